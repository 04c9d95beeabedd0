use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intervention {
    /// The marketplace asks for a login; the operator logs in by hand.
    Login,
    /// No submit control matched; the operator inspects the form.
    SubmitControlMissing,
}

impl Intervention {
    pub fn instructions(&self) -> &'static str {
        match self {
            Intervention::Login => {
                "Log in to the marketplace in the browser window (solve any captcha or 2FA), then press Enter here."
            }
            Intervention::SubmitControlMissing => {
                "The publish button was not found. Inspect the form in the browser window, then press Enter here."
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("timed out after {0:?} waiting for manual action")]
    TimedOut(Duration),
    #[error("manual action cancelled")]
    Cancelled,
    #[error("cannot read operator input: {0}")]
    Io(String),
}

/// Suspension point awaiting a human operator.
#[allow(async_fn_in_trait)]
pub trait HumanGate {
    async fn wait_for_human(&self, reason: Intervention) -> Result<(), GateError>;
}

/// Waits for the operator to press Enter on stdin. Without a timeout the wait is unbounded.
#[derive(Debug, Clone, Default)]
pub struct StdinGate {
    timeout: Option<Duration>,
}

impl StdinGate {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl HumanGate for StdinGate {
    async fn wait_for_human(&self, reason: Intervention) -> Result<(), GateError> {
        warn!(target = "lbc.session", reason = ?reason, "waiting for operator");
        eprintln!("\n>>> {}", reason.instructions());

        let read = async {
            let mut line = String::new();
            let mut stdin = BufReader::new(tokio::io::stdin());
            match stdin.read_line(&mut line).await {
                Ok(0) => Err(GateError::Cancelled),
                Ok(_) => Ok(()),
                Err(err) => Err(GateError::Io(err.to_string())),
            }
        };

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| GateError::TimedOut(limit))?,
            None => read.await,
        }
    }
}
