pub mod amount;
pub mod eligibility;
pub mod transform;

pub use amount::parse_amount;
pub use eligibility::should_publish;
pub use transform::{build_description, build_title};
