//! CLI error handling

use std::fmt;

use warden_errors::UserFacingError;

/// CLI-specific error type
#[derive(Debug)]
pub enum CliError {
    /// Configuration or runtime error from the warden crates
    Warden(warden_errors::Error),
    /// Invalid command arguments
    InvalidArguments(String),
    /// The run finished but some operations returned wrong data or failed
    Verification { failed: u64, total: u64 },
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Warden(e) => {
                write!(f, "{}", e.user_message())?;
                if let Some(code) = e.user_code() {
                    write!(f, "\n  Code: {code}")?;
                }
                if let Some(hint) = e.user_hint() {
                    write!(f, "\n  Hint: {hint}")?;
                }
                Ok(())
            }
            CliError::InvalidArguments(message) => write!(f, "Invalid arguments: {message}"),
            CliError::Verification { failed, total } => {
                write!(f, "{failed} of {total} operations failed verification")
            }
        }
    }
}

impl std::error::Error for CliError {}

impl From<warden_errors::Error> for CliError {
    fn from(e: warden_errors::Error) -> Self {
        CliError::Warden(e)
    }
}
