use once_cell::sync::Lazy;
use std::env;

pub static SHEETS_ROOT: Lazy<String> = Lazy::new(|| {
    env::var("GOOGLE_SHEETS_API_ROOT")
        .unwrap_or_else(|_| "https://sheets.googleapis.com/v4".to_string())
        .trim_end_matches('/')
        .to_string()
});

pub static DRIVE_ROOT: Lazy<String> = Lazy::new(|| {
    env::var("GOOGLE_DRIVE_API_ROOT")
        .unwrap_or_else(|_| "https://www.googleapis.com/drive/v3".to_string())
        .trim_end_matches('/')
        .to_string()
});

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive.readonly",
];
