pub mod auth;
pub mod config;
pub mod drive;
pub mod sheets;

pub use auth::ServiceAccountAuth;
pub use drive::{DriveFile, GoogleDrive, PhotoSource, extract_folder_id};
pub use sheets::{GoogleSheets, RowStore};
