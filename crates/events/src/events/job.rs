use serde::{Deserialize, Serialize};
use std::time::Duration;
use warden_types::{JobId, ResourceId};

use super::FailureContext;

/// How a job's compute phase is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// On the controller thread, blocking the caller
    Inline,
    /// On a worker thread, completing through the controller queue
    Queued,
}

/// Job lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Job handed to the worker scheduler
    Queued {
        job: JobId,
        label: String,
        resources: Vec<ResourceId>,
    },

    /// Locks acquired, compute phase starting
    Started {
        job: JobId,
        label: String,
        mode: ExecutionMode,
    },

    /// Finalize produced the external value
    Completed {
        job: JobId,
        label: String,
        duration: Duration,
    },

    /// Compute or finalize failed, or the locks could not be taken
    Failed {
        job: JobId,
        label: String,
        failure: FailureContext,
    },

    /// An inline job held up the controller thread waiting for locks
    ControllerBlocked {
        job: JobId,
        label: String,
        resources: Vec<ResourceId>,
        waited: Duration,
    },
}

impl JobEvent {
    #[must_use]
    pub fn job(&self) -> JobId {
        match self {
            Self::Queued { job, .. }
            | Self::Started { job, .. }
            | Self::Completed { job, .. }
            | Self::Failed { job, .. }
            | Self::ControllerBlocked { job, .. } => *job,
        }
    }
}
