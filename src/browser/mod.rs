pub mod categories;
pub mod driver;
pub mod gate;
pub mod pacing;
pub mod selectors;
pub mod session;
pub mod state;
pub mod webdriver;

pub use categories::CategoryMap;
pub use gate::{HumanGate, StdinGate};
pub use pacing::{HumanPacing, Pacing, Pause};
pub use session::{SubmissionError, SubmissionErrorKind, SubmissionSession};
pub use state::SessionStore;
pub use webdriver::{BrowserProfile, WebDriverPage};
