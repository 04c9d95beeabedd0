use crate::browser::state::SessionState;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("webdriver session failed: {0}")]
    Session(String),
    #[error("browser command failed: {0}")]
    Command(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Link,
    Button,
}

/// How a control is located on the page. All text matching is a
/// case-insensitive substring match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Role { role: Role, name: String },
    Text(String),
    Label(String),
    FileInput,
}

impl Target {
    pub fn link(name: &str) -> Self {
        Target::Role {
            role: Role::Link,
            name: name.to_string(),
        }
    }

    pub fn button(name: &str) -> Self {
        Target::Role {
            role: Role::Button,
            name: name.to_string(),
        }
    }

    pub fn text(value: &str) -> Self {
        Target::Text(value.to_string())
    }

    pub fn label(value: &str) -> Self {
        Target::Label(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Browser capability the submission session drives. One value owns one
/// isolated browser context.
#[allow(async_fn_in_trait)]
pub trait PageDriver {
    type Element: Clone;

    /// Navigates and returns once the DOM content is loaded.
    async fn goto(&self, url: &str) -> Result<(), DriverError>;
    async fn javascript_enabled(&self) -> Result<bool, DriverError>;
    /// Matching elements in document order. Visible elements only, except file inputs.
    async fn find_all(&self, target: &Target) -> Result<Vec<Self::Element>, DriverError>;
    async fn click(&self, element: &Self::Element) -> Result<(), DriverError>;
    async fn type_text(&self, element: &Self::Element, text: &str) -> Result<(), DriverError>;
    async fn attach_files(
        &self,
        element: &Self::Element,
        paths: &[PathBuf],
    ) -> Result<(), DriverError>;
    async fn bounding_box(
        &self,
        element: &Self::Element,
    ) -> Result<Option<BoundingBox>, DriverError>;
    async fn move_pointer(&self, x: f64, y: f64) -> Result<(), DriverError>;
    async fn scroll_by(&self, dy: i64) -> Result<(), DriverError>;
    async fn wait_for_network_idle(&self) -> Result<(), DriverError>;
    async fn current_url(&self) -> Result<String, DriverError>;
    async fn export_state(&self) -> Result<SessionState, DriverError>;
    /// Restores cookies and storage. The page must already be on the marketplace origin.
    async fn import_state(&self, state: &SessionState) -> Result<(), DriverError>;
    async fn close(self) -> Result<(), DriverError>
    where
        Self: Sized;
}
