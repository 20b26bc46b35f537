use serde::{Deserialize, Serialize};

use crate::EventSource;
use warden_errors::UserFacingError;

/// Structured failure information shared across domains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureContext {
    /// Stable error code, e.g. `resource.gone`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Short user-facing message.
    pub message: String,
    /// Optional remediation hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether retrying the operation might succeed.
    pub retryable: bool,
}

impl FailureContext {
    /// Construct a new failure context.
    #[must_use]
    pub fn new(
        code: Option<impl Into<String>>,
        message: impl Into<String>,
        hint: Option<impl Into<String>>,
        retryable: bool,
    ) -> Self {
        Self {
            code: code.map(Into::into),
            message: message.into(),
            hint: hint.map(Into::into),
            retryable,
        }
    }

    /// Build failure context from a `UserFacingError` implementation.
    #[must_use]
    pub fn from_error<E: UserFacingError + ?Sized>(error: &E) -> Self {
        Self::new(
            error.user_code(),
            error.user_message().into_owned(),
            error.user_hint(),
            error.is_retryable(),
        )
    }
}

pub mod general;
pub mod job;
pub mod registry;

pub use general::*;
pub use job::*;
pub use registry::*;

/// Top-level application event enum that aggregates all domain-specific events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum AppEvent {
    /// General utility events (warnings, errors, debug logs)
    General(GeneralEvent),

    /// Resource registry lifecycle (registration, disposal)
    Registry(RegistryEvent),

    /// Job lifecycle (queued, started, completed, failed)
    Job(JobEvent),
}

impl AppEvent {
    /// Identify the source domain for this event (used for metadata/logging).
    #[must_use]
    pub fn event_source(&self) -> EventSource {
        match self {
            Self::General(_) => EventSource::GENERAL,
            Self::Registry(_) => EventSource::REGISTRY,
            Self::Job(_) => EventSource::JOB,
        }
    }

    /// Determine the appropriate tracing log level for this event
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;

        match self {
            Self::General(GeneralEvent::Error { .. }) | Self::Job(JobEvent::Failed { .. }) => {
                Level::ERROR
            }

            Self::General(GeneralEvent::Warning { .. })
            | Self::Job(JobEvent::ControllerBlocked { .. }) => Level::WARN,

            Self::General(GeneralEvent::DebugLog { .. })
            | Self::Job(JobEvent::Queued { .. } | JobEvent::Started { .. }) => Level::DEBUG,

            // Registration churn is very high under load
            Self::Registry(_) => Level::TRACE,

            Self::Job(JobEvent::Completed { .. }) => Level::INFO,
        }
    }

    /// Get the log target for this event (for structured logging)
    #[must_use]
    pub fn log_target(&self) -> &'static str {
        match self {
            Self::General(_) => "warden::events::general",
            Self::Registry(_) => "warden::events::registry",
            Self::Job(_) => "warden::events::job",
        }
    }

    /// Job or resource this event belongs to
    #[must_use]
    pub fn correlation(&self) -> Option<String> {
        match self {
            Self::General(_) => None,
            Self::Registry(
                RegistryEvent::Registered { id, .. } | RegistryEvent::Disposed { id, .. },
            ) => Some(id.to_string()),
            Self::Job(event) => Some(event.job().to_string()),
        }
    }

    /// Get structured fields for logging
    #[must_use]
    pub fn log_fields(&self) -> String {
        format!("{self:?}")
    }
}
