use serde::{Deserialize, Serialize};
use warden_types::{NativePtr, ResourceId};

/// What caused a resource to be disposed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisposeTrigger {
    /// `dispose` called by the owner of the proxy (e.g. `close()`)
    Explicit,
    /// The last controller-side proxy was dropped
    Unreachable,
    /// The parent root was disposed
    Cascade,
}

impl DisposeTrigger {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Unreachable => "unreachable",
            Self::Cascade => "cascade",
        }
    }
}

/// Resource registry lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryEvent {
    /// A native object received a registry entry
    Registered {
        id: ResourceId,
        parent: ResourceId,
        ptr: NativePtr,
        kind: String,
    },

    /// A registry entry was removed and its native object released
    Disposed {
        id: ResourceId,
        kind: String,
        trigger: DisposeTrigger,
        children: usize,
    },
}
