//! Controller-side proxies and the reachability tracker
//!
//! A [`Proxy`] is the object handed out to the controller for a registered
//! native resource. The registry keeps only a `Weak` to it, so the proxy's
//! lifetime is decided by the controller alone. Dropping the last clone is the
//! tracker notification: the entry is disposed with
//! [`DisposeTrigger::Unreachable`].
//!
//! Proxies are meant to stay on the controller thread. Workers get at the
//! native object through whatever the job captured at build time, never
//! through the proxy.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use warden_errors::{RegistryError, Result};
use warden_events::DisposeTrigger;
use warden_types::{NativePtr, ResourceId, ResourceKind};

use crate::registry::{ReleaseFn, ResourceRegistry};

struct ProxyInner<T: Send + Sync + 'static> {
    id: ResourceId,
    registry: Arc<ResourceRegistry>,
    value: T,
}

impl<T: Send + Sync + 'static> Drop for ProxyInner<T> {
    fn drop(&mut self) {
        if let Err(err) = self.registry.dispose_unreachable(self.id) {
            tracing::error!(resource = %self.id, %err, "tracker disposal failed");
        }
    }
}

/// Controller-visible handle to a registered resource
///
/// Dropping the last clone on a thread that holds the resource's root lock
/// parks the disposal; it completes at the next
/// [`ResourceRegistry::dispose_deferred`] call made without that lock.
pub struct Proxy<T: Send + Sync + 'static> {
    inner: Arc<ProxyInner<T>>,
}

impl<T: Send + Sync + 'static> Clone for Proxy<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Deref for Proxy<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner.value
    }
}

impl<T: Send + Sync + fmt::Debug + 'static> fmt::Debug for Proxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("id", &self.inner.id)
            .field("value", &self.inner.value)
            .finish()
    }
}

impl<T: Send + Sync + 'static> Proxy<T> {
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.registry.is_alive(self.inner.id)
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.inner.registry
    }

    /// Dispose the resource now instead of waiting for the tracker
    ///
    /// # Errors
    ///
    /// See [`ResourceRegistry::dispose_with`].
    pub fn close(&self) -> Result<()> {
        self.inner
            .registry
            .dispose_with(self.inner.id, DisposeTrigger::Explicit)
    }

    /// Whether both proxies wrap the same registry entry
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Number of live clones of this proxy
    #[must_use]
    pub fn reach(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl ResourceRegistry {
    /// Proxy for `ptr`, creating and registering it on first use
    ///
    /// A pointer that already has a live proxy of type `T` yields that same
    /// proxy; `value` and `release` are then dropped unused. An entry whose
    /// proxy is already unreachable is disposed first and registered afresh.
    ///
    /// # Errors
    ///
    /// `DuplicateResource` if `ptr` is registered without a proxy or with a
    /// proxy of a different type, plus everything
    /// [`register_as`](Self::register_as) reports.
    pub fn wrap<T: Send + Sync + 'static>(
        self: &Arc<Self>,
        ptr: NativePtr,
        parent: ResourceId,
        kind: ResourceKind,
        value: impl FnOnce() -> T,
        release: Option<ReleaseFn>,
    ) -> Result<Proxy<T>> {
        if let Some(existing) = self.proxy_for(ptr)? {
            return Ok(existing);
        }

        let id = self.register_as(ptr, parent, kind, release)?;
        let inner = Arc::new(ProxyInner {
            id,
            registry: Arc::clone(self),
            value: value(),
        });

        if let Some(entry) = self.entry(id) {
            let weak = Arc::downgrade(&inner);
            let weak: Weak<dyn std::any::Any + Send + Sync> = weak;
            *entry.proxy.lock() = Some(weak);
        }
        Ok(Proxy { inner })
    }

    /// The live proxy of type `T` attached to `ptr`, if there is one
    ///
    /// # Errors
    ///
    /// `DuplicateResource` when `ptr` is registered but cannot be exposed as a
    /// `Proxy<T>`.
    pub fn proxy_for<T: Send + Sync + 'static>(&self, ptr: NativePtr) -> Result<Option<Proxy<T>>> {
        let Some(entry) = self.entry_for_ptr(ptr) else {
            return Ok(None);
        };

        let attached = entry.proxy.lock().clone();
        let Some(weak) = attached else {
            return Err(RegistryError::DuplicateResource {
                ptr,
                existing: entry.id,
            }
            .into());
        };

        match weak.upgrade() {
            Some(strong) => strong
                .downcast::<ProxyInner<T>>()
                .map(|inner| Some(Proxy { inner }))
                .map_err(|_| {
                    RegistryError::DuplicateResource {
                        ptr,
                        existing: entry.id,
                    }
                    .into()
                }),
            None => {
                // Unreachable but not yet swept
                self.dispose_with(entry.id, DisposeTrigger::Unreachable)?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Dataset {
        name: &'static str,
    }

    #[test]
    fn wrap_reuses_live_proxy() {
        let registry = Arc::new(ResourceRegistry::new());
        let ptr = NativePtr::from_addr(0xabc);

        let first = registry
            .wrap(ptr, ResourceId::NONE, "dataset", || Dataset { name: "a" }, None)
            .unwrap();
        let second = registry
            .wrap(ptr, ResourceId::NONE, "dataset", || Dataset { name: "b" }, None)
            .unwrap();

        assert!(Proxy::ptr_eq(&first, &second));
        assert_eq!(second.name, "a");
        assert_eq!(first.reach(), 2);
    }

    #[test]
    fn dropping_last_proxy_disposes() {
        let registry = Arc::new(ResourceRegistry::new());
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);

        let proxy = registry
            .wrap(
                NativePtr::from_addr(0x1),
                ResourceId::NONE,
                "dataset",
                || Dataset { name: "x" },
                Some(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
        let id = proxy.id();
        let clone = proxy.clone();

        drop(proxy);
        assert!(registry.is_alive(id));
        drop(clone);
        assert!(!registry.is_alive(id));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_then_drop_releases_once() {
        let registry = Arc::new(ResourceRegistry::new());
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);

        let proxy = registry
            .wrap(
                NativePtr::from_addr(0x2),
                ResourceId::NONE,
                "dataset",
                || (),
                Some(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
        proxy.close().unwrap();
        assert!(!proxy.is_alive());
        drop(proxy);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let registry = Arc::new(ResourceRegistry::new());
        let ptr = NativePtr::from_addr(0x3);
        let _proxy = registry
            .wrap(ptr, ResourceId::NONE, "dataset", || 1_u32, None)
            .unwrap();
        assert!(registry
            .wrap(ptr, ResourceId::NONE, "dataset", || "text", None)
            .is_err());
    }

    #[test]
    fn plain_registration_has_no_proxy() {
        let registry = Arc::new(ResourceRegistry::new());
        let ptr = NativePtr::from_addr(0x4);
        registry.register(ptr, ResourceId::NONE).unwrap();
        assert!(registry.proxy_for::<()>(ptr).is_err());
    }
}
