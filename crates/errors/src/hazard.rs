//! Locking protocol violations
//!
//! These never happen in a correct program. They are reported as errors
//! instead of deadlocking or double-freeing so the offending call site can be
//! found, and every construction site logs them at error level.

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;
use warden_types::ResourceId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum ConcurrencyHazard {
    /// The current thread tried to lock a root it already holds
    #[error("reentrant lock of root {root}")]
    ReentrantLock { root: ResourceId },

    /// A native object release was requested twice
    #[error("native object of {id} released twice")]
    DoubleRelease { id: ResourceId },

    /// Disposal was requested by a thread that holds the root lock
    #[error("dispose of {id} requested while holding root {root}")]
    DisposeWhileHeld { id: ResourceId, root: ResourceId },
}

impl UserFacingError for ConcurrencyHazard {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        Some("This is a locking protocol violation, please report it.")
    }

    fn user_code(&self) -> Option<&'static str> {
        Some(match self {
            Self::ReentrantLock { .. } => "hazard.reentrant_lock",
            Self::DoubleRelease { .. } => "hazard.double_release",
            Self::DisposeWhileHeld { .. } => "hazard.dispose_while_held",
        })
    }
}
