//! Registry error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;
use warden_types::{NativePtr, ResourceId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum RegistryError {
    /// The native pointer already has a live registry entry
    #[error("native object {ptr} is already registered as {existing}")]
    DuplicateResource {
        ptr: NativePtr,
        existing: ResourceId,
    },

    /// The resource (or the root protecting it) has been disposed
    #[error("{kind} {id} has already been destroyed")]
    ResourceGone { id: ResourceId, kind: Cow<'static, str> },

    /// Registration named a parent that is not registered
    #[error("parent {parent} is not registered")]
    UnknownParent { parent: ResourceId },

    /// Registration named a parent that is itself a child
    #[error("parent {parent} is not a root resource (its root is {root})")]
    ParentNotRoot { parent: ResourceId, root: ResourceId },
}

impl RegistryError {
    /// Resource-gone error for an id whose kind is not known anymore
    #[must_use]
    pub fn gone(id: ResourceId) -> Self {
        Self::ResourceGone {
            id,
            kind: Cow::Borrowed("resource"),
        }
    }

    /// Resource-gone error carrying the kind label of the disposed entry
    #[must_use]
    pub fn gone_kind(id: ResourceId, kind: &'static str) -> Self {
        Self::ResourceGone {
            id,
            kind: Cow::Borrowed(kind),
        }
    }

    #[must_use]
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::ResourceGone { .. })
    }
}

impl UserFacingError for RegistryError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::ResourceGone { .. } => {
                Some("The object was closed or collected before the operation could lock it.")
            }
            Self::DuplicateResource { .. } => {
                Some("Look the existing proxy up instead of wrapping the native object twice.")
            }
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        Some(match self {
            Self::DuplicateResource { .. } => "resource.duplicate",
            Self::ResourceGone { .. } => "resource.gone",
            Self::UnknownParent { .. } => "resource.unknown_parent",
            Self::ParentNotRoot { .. } => "resource.parent_not_root",
        })
    }
}
