//! Progress payload carried from compute phases to progress sinks

use serde::{Deserialize, Serialize};

/// A single progress report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Completed fraction, `0.0..=1.0`
    pub complete: f64,
    /// Optional message supplied by the native operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressInfo {
    #[must_use]
    pub fn new(complete: f64) -> Self {
        Self {
            complete: complete.clamp(0.0, 1.0),
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Progress as a percentage (0.0-100.0)
    #[must_use]
    pub fn percentage(&self) -> f64 {
        self.complete * 100.0
    }
}
