#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Native resource registry and locking protocol for warden
//!
//! Native objects are registered once, get a monotonic [`ResourceId`] and are
//! grouped into trees one level deep: a root (a dataset) owns children (its
//! bands, layers, result sets). Each root carries an exclusive, non-reentrant
//! lock that protects the whole tree.
//!
//! Operations that need several roots at once go through
//! [`ResourceRegistry::lock_roots`], which acquires in ascending id order with
//! release-and-yield on contention, so concurrent lock sets never deadlock.
//!
//! [`ResourceId`]: warden_types::ResourceId

mod guard;
mod lock;
mod proxy;
mod registry;

pub use guard::LockGuard;
pub use lock::{held_roots, RootToken};
pub use proxy::Proxy;
pub use registry::{ReleaseFn, ResourceInfo, ResourceRegistry, DEFAULT_KIND};
