#![warn(mismatched_lifetime_syntaxes)]
#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Error types for warden
//!
//! This crate provides fine-grained error types organized by domain.
//! All error types implement Clone so failures captured on a worker thread
//! can be handed to the controller thread and logged on the way.

use std::borrow::Cow;

use thiserror::Error;

pub mod config;
pub mod hazard;
pub mod job;
pub mod registry;

pub use config::ConfigError;
pub use hazard::ConcurrencyHazard;
pub use job::JobError;
pub use registry::RegistryError;

/// Generic error type for cross-crate boundaries
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Error {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    Job(#[from] JobError),

    #[error("concurrency hazard: {0}")]
    Hazard(#[from] ConcurrencyHazard),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an internal error with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error is the expected "resource already disposed" race
    #[must_use]
    pub fn is_resource_gone(&self) -> bool {
        matches!(self, Self::Registry(err) if err.is_gone())
    }

    /// Whether this error reports a locking protocol violation
    #[must_use]
    pub fn is_hazard(&self) -> bool {
        matches!(self, Self::Hazard(_))
    }
}

/// Result type alias for warden operations
pub type Result<T> = std::result::Result<T, Error>;

/// Minimal interface for rendering user-facing error information without
/// requiring heavyweight envelopes.
pub trait UserFacingError {
    /// Short message suitable for surfacing to the caller of an operation.
    fn user_message(&self) -> Cow<'_, str>;

    /// Optional remediation hint.
    fn user_hint(&self) -> Option<&'static str> {
        None
    }

    /// Whether retrying the same operation is likely to succeed.
    fn is_retryable(&self) -> bool {
        false
    }

    /// Stable error code for analytics / structured reporting.
    fn user_code(&self) -> Option<&'static str> {
        None
    }
}

impl UserFacingError for Error {
    fn user_message(&self) -> Cow<'_, str> {
        match self {
            Error::Registry(err) => err.user_message(),
            Error::Job(err) => err.user_message(),
            Error::Hazard(err) => err.user_message(),
            Error::Config(err) => err.user_message(),
            Error::Internal(_) => Cow::Owned(self.to_string()),
        }
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Error::Registry(err) => err.user_hint(),
            Error::Job(err) => err.user_hint(),
            Error::Hazard(err) => err.user_hint(),
            Error::Config(err) => err.user_hint(),
            Error::Internal(_) => None,
        }
    }

    fn is_retryable(&self) -> bool {
        false
    }

    fn user_code(&self) -> Option<&'static str> {
        match self {
            Error::Registry(err) => err.user_code(),
            Error::Job(err) => err.user_code(),
            Error::Hazard(err) => err.user_code(),
            Error::Config(err) => err.user_code(),
            Error::Internal(_) => Some("error.internal"),
        }
    }
}
