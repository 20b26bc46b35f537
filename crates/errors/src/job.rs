//! Job execution error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;
use warden_types::JobId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum JobError {
    /// Malformed arguments detected while building the job
    #[error("{message}")]
    UserInput { message: String },

    /// The wrapped native library reported a failure
    #[error("{message}")]
    Engine { message: String },

    /// The compute phase panicked; its locks were released during unwinding
    #[error("compute phase of {job} panicked: {message}")]
    Panicked { job: JobId, message: String },

    /// The controller stopped accepting deliveries before the job finished
    #[error("controller is gone, result of {job} was dropped")]
    ControllerGone { job: JobId },

    /// The intermediate value delivered to finalize had an unexpected type
    #[error("intermediate result of {job} has an unexpected type")]
    ResultTypeMismatch { job: JobId },
}

impl JobError {
    /// Engine failure carrying the captured native message
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    /// Argument validation failure
    pub fn user_input(message: impl Into<String>) -> Self {
        Self::UserInput {
            message: message.into(),
        }
    }
}

impl UserFacingError for JobError {
    fn user_message(&self) -> Cow<'_, str> {
        match self {
            Self::UserInput { message } | Self::Engine { message } => Cow::Borrowed(message),
            _ => Cow::Owned(self.to_string()),
        }
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::UserInput { .. } => Some("Check the arguments passed to the operation."),
            Self::Panicked { .. } | Self::ResultTypeMismatch { .. } => {
                Some("This is a bug in the operation shim, please report it.")
            }
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        Some(match self {
            Self::UserInput { .. } => "job.user_input",
            Self::Engine { .. } => "job.engine",
            Self::Panicked { .. } => "job.panicked",
            Self::ControllerGone { .. } => "job.controller_gone",
            Self::ResultTypeMismatch { .. } => "job.result_type_mismatch",
        })
    }
}
