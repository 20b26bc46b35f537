//! The resource registry
//!
//! One master mutex protects the id table, the pointer table and the child
//! sets so that every structural change is atomic across all three. The
//! master mutex is never held while waiting for a root lock: callers resolve
//! the entry, drop the master mutex, block on the root lock, then re-check
//! liveness.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use warden_errors::{ConcurrencyHazard, Error, RegistryError, Result};
use warden_events::{DisposeTrigger, EventEmitter, EventSender, RegistryEvent};
use warden_types::{NativePtr, ResourceId, ResourceKind};

use crate::lock::{held_by_current_thread, RootLock, RootToken};

/// One-shot hook releasing the native object behind an entry
pub type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Kind label used when a registration does not name one
pub const DEFAULT_KIND: ResourceKind = "resource";

pub(crate) struct Entry {
    pub(crate) id: ResourceId,
    pub(crate) ptr: NativePtr,
    pub(crate) parent: ResourceId,
    pub(crate) kind: ResourceKind,
    pub(crate) lock: Option<Arc<RootLock>>,
    alive: AtomicBool,
    released: AtomicBool,
    release: Mutex<Option<ReleaseFn>>,
    pub(crate) proxy: Mutex<Option<Weak<dyn Any + Send + Sync>>>,
}

impl Entry {
    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Flip `alive` to false; only the first caller wins
    fn mark_disposed(&self) -> bool {
        self.alive
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn gone(&self) -> Error {
        RegistryError::gone_kind(self.id, self.kind).into()
    }
}

/// A root entry together with its lock
pub(crate) struct ResolvedRoot {
    pub(crate) entry: Arc<Entry>,
    pub(crate) lock: Arc<RootLock>,
}

impl ResolvedRoot {
    pub(crate) fn id(&self) -> ResourceId {
        self.entry.id
    }

    /// Liveness check, authoritative only while the root lock is held
    pub(crate) fn ensure_alive(&self) -> Result<()> {
        if self.entry.is_alive() {
            Ok(())
        } else {
            Err(self.entry.gone())
        }
    }
}

#[derive(Default)]
struct Tables {
    by_id: HashMap<ResourceId, Arc<Entry>>,
    by_ptr: HashMap<NativePtr, ResourceId>,
    children: HashMap<ResourceId, BTreeSet<ResourceId>>,
}

impl Tables {
    fn remove(&mut self, entry: &Entry) {
        self.by_id.remove(&entry.id);
        if self.by_ptr.get(&entry.ptr) == Some(&entry.id) {
            self.by_ptr.remove(&entry.ptr);
        }
    }
}

/// Read-only snapshot of a registry entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub id: ResourceId,
    pub ptr: NativePtr,
    pub parent: ResourceId,
    pub kind: ResourceKind,
    pub children: Vec<ResourceId>,
    pub alive: bool,
    /// Whether a controller-side proxy is currently attached
    pub has_proxy: bool,
}

impl ResourceInfo {
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Registry of native objects shared between the controller and workers
pub struct ResourceRegistry {
    tables: Mutex<Tables>,
    next_id: AtomicU64,
    events: Option<EventSender>,
    /// Unreachable resources whose root was held by the dropping thread, as `(id, root)`
    deferred: Mutex<Vec<(ResourceId, ResourceId)>>,
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("live", &self.len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEmitter for ResourceRegistry {
    fn event_sender(&self) -> Option<&EventSender> {
        self.events.as_ref()
    }
}

pub(crate) fn hazard(hazard: ConcurrencyHazard) -> Error {
    tracing::error!(%hazard, "concurrency hazard");
    Error::Hazard(hazard)
}

impl ResourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            next_id: AtomicU64::new(1),
            events: None,
            deferred: Mutex::new(Vec::new()),
        }
    }

    /// Registry reporting registrations and disposals to `events`
    #[must_use]
    pub fn with_events(events: EventSender) -> Self {
        Self {
            events: Some(events),
            ..Self::new()
        }
    }

    /// Register a native object without a release hook
    ///
    /// # Errors
    ///
    /// See [`register_as`](Self::register_as).
    pub fn register(&self, ptr: NativePtr, parent: ResourceId) -> Result<ResourceId> {
        self.register_as(ptr, parent, DEFAULT_KIND, None)
    }

    /// Register a native object whose release runs when the entry is destroyed
    ///
    /// # Errors
    ///
    /// See [`register_as`](Self::register_as).
    pub fn register_with_release(
        &self,
        ptr: NativePtr,
        parent: ResourceId,
        release: ReleaseFn,
    ) -> Result<ResourceId> {
        self.register_as(ptr, parent, DEFAULT_KIND, Some(release))
    }

    /// Register a native object under `parent` (`ResourceId::NONE` for a root)
    ///
    /// Roots get their own lock; children are protected by the lock of their
    /// parent. On error the release hook is dropped without running.
    ///
    /// # Errors
    ///
    /// - `DuplicateResource` if `ptr` is already registered
    /// - `UnknownParent` if `parent` was never registered
    /// - `ResourceGone` if `parent` is disposed or being disposed
    /// - `ParentNotRoot` if `parent` is itself a child
    pub fn register_as(
        &self,
        ptr: NativePtr,
        parent: ResourceId,
        kind: ResourceKind,
        release: Option<ReleaseFn>,
    ) -> Result<ResourceId> {
        let mut tables = self.tables.lock();

        if let Some(&existing) = tables.by_ptr.get(&ptr) {
            return Err(RegistryError::DuplicateResource { ptr, existing }.into());
        }

        if !parent.is_none() {
            let Some(root) = tables.by_id.get(&parent) else {
                // Ids are never reused, so anything below the counter existed once
                return Err(if parent.get() < self.next_id.load(Ordering::Acquire) {
                    RegistryError::gone(parent).into()
                } else {
                    RegistryError::UnknownParent { parent }.into()
                });
            };
            if !root.parent.is_none() {
                return Err(RegistryError::ParentNotRoot {
                    parent,
                    root: root.parent,
                }
                .into());
            }
            if !root.is_alive() {
                return Err(root.gone());
            }
        }

        let id = ResourceId::new(self.next_id.fetch_add(1, Ordering::AcqRel));
        let entry = Arc::new(Entry {
            id,
            ptr,
            parent,
            kind,
            lock: parent.is_none().then(|| RootLock::new(id)),
            alive: AtomicBool::new(true),
            released: AtomicBool::new(false),
            release: Mutex::new(release),
            proxy: Mutex::new(None),
        });

        tables.by_id.insert(id, entry);
        tables.by_ptr.insert(ptr, id);
        if parent.is_none() {
            tables.children.insert(id, BTreeSet::new());
        } else {
            tables.children.entry(parent).or_default().insert(id);
        }
        drop(tables);

        tracing::debug!(resource = %id, parent = %parent, %ptr, kind, "resource registered");
        self.emit_registry(RegistryEvent::Registered {
            id,
            parent,
            ptr,
            kind: kind.to_string(),
        });
        Ok(id)
    }

    /// Snapshot of a registered entry
    #[must_use]
    pub fn lookup(&self, id: ResourceId) -> Option<ResourceInfo> {
        let tables = self.tables.lock();
        tables.by_id.get(&id).map(|entry| Self::snapshot(&tables, entry))
    }

    /// Snapshot of the entry registered for a native pointer
    #[must_use]
    pub fn lookup_ptr(&self, ptr: NativePtr) -> Option<ResourceInfo> {
        let tables = self.tables.lock();
        let id = tables.by_ptr.get(&ptr)?;
        tables.by_id.get(id).map(|entry| Self::snapshot(&tables, entry))
    }

    fn snapshot(tables: &Tables, entry: &Entry) -> ResourceInfo {
        ResourceInfo {
            id: entry.id,
            ptr: entry.ptr,
            parent: entry.parent,
            kind: entry.kind,
            children: tables
                .children
                .get(&entry.id)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default(),
            alive: entry.is_alive(),
            has_proxy: entry
                .proxy
                .lock()
                .as_ref()
                .is_some_and(|weak| weak.strong_count() > 0),
        }
    }

    /// `true` for the sentinel and for every registered, non-disposed id
    #[must_use]
    pub fn is_alive(&self, id: ResourceId) -> bool {
        id.is_none()
            || self
                .tables
                .lock()
                .by_id
                .get(&id)
                .is_some_and(|entry| entry.is_alive())
    }

    /// Number of registered entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.lock().by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn entry(&self, id: ResourceId) -> Option<Arc<Entry>> {
        self.tables.lock().by_id.get(&id).cloned()
    }

    pub(crate) fn entry_for_ptr(&self, ptr: NativePtr) -> Option<Arc<Entry>> {
        let tables = self.tables.lock();
        let id = tables.by_ptr.get(&ptr)?;
        tables.by_id.get(id).cloned()
    }

    /// Resolve `id` to the root whose lock protects it
    pub(crate) fn resolve_root(&self, id: ResourceId) -> Result<ResolvedRoot> {
        let tables = self.tables.lock();
        let entry = tables
            .by_id
            .get(&id)
            .ok_or_else(|| Error::from(RegistryError::gone(id)))?;

        let root = if entry.parent.is_none() {
            entry
        } else {
            tables
                .by_id
                .get(&entry.parent)
                .ok_or_else(|| entry.gone())?
        };

        match &root.lock {
            Some(lock) => Ok(ResolvedRoot {
                entry: Arc::clone(root),
                lock: Arc::clone(lock),
            }),
            None => Err(Error::internal(format!("root {} has no lock", root.id))),
        }
    }

    /// Block until the root protecting `id` is locked
    ///
    /// # Errors
    ///
    /// Returns `ResourceGone` if `id` does not resolve to a live root, or a
    /// `ReentrantLock` hazard if the current thread already holds that root.
    pub fn lock_root(&self, id: ResourceId) -> Result<RootToken> {
        let root = self.resolve_root(id)?;
        if held_by_current_thread(root.id()) {
            return Err(hazard(ConcurrencyHazard::ReentrantLock { root: root.id() }));
        }
        let token = root.lock.acquire();
        root.ensure_alive()?;
        Ok(token)
    }

    /// Lock the root protecting `id` if it is free right now
    ///
    /// # Errors
    ///
    /// Same as [`lock_root`](Self::lock_root). A busy root is `Ok(None)`.
    pub fn try_lock_root(&self, id: ResourceId) -> Result<Option<RootToken>> {
        let root = self.resolve_root(id)?;
        if held_by_current_thread(root.id()) {
            return Err(hazard(ConcurrencyHazard::ReentrantLock { root: root.id() }));
        }
        let Some(token) = root.lock.try_acquire() else {
            return Ok(None);
        };
        root.ensure_alive()?;
        Ok(Some(token))
    }

    /// Whether some thread currently holds the lock of the root protecting `id`
    #[must_use]
    pub fn is_locked(&self, id: ResourceId) -> bool {
        self.resolve_root(id)
            .is_ok_and(|root| root.lock.is_locked())
    }

    /// Explicitly dispose `id`
    ///
    /// # Errors
    ///
    /// See [`dispose_with`](Self::dispose_with).
    pub fn dispose(&self, id: ResourceId) -> Result<()> {
        self.dispose_with(id, DisposeTrigger::Explicit)
    }

    /// Dispose `id` and everything it owns
    ///
    /// Disposing a root waits for any operation holding its lock to finish.
    /// Disposing an unknown or already disposed id is a no-op, so explicit and
    /// tracker-driven disposal may race freely.
    ///
    /// # Errors
    ///
    /// Returns a `DisposeWhileHeld` hazard when called from a thread holding
    /// the relevant root lock, or a `DoubleRelease` hazard if a native object
    /// would be released twice.
    pub fn dispose_with(&self, id: ResourceId, trigger: DisposeTrigger) -> Result<()> {
        if id.is_none() {
            return Ok(());
        }
        let Some(entry) = self.entry(id) else {
            tracing::trace!(resource = %id, "dispose of unknown or disposed resource");
            return Ok(());
        };
        if !entry.is_alive() {
            return Ok(());
        }

        match &entry.lock {
            Some(lock) => self.dispose_root(&entry, lock, trigger),
            None => self.dispose_child(&entry, trigger),
        }
    }

    /// Tracker disposal of `id`
    ///
    /// When the dropping thread holds the protecting root lock the disposal
    /// is parked until [`dispose_deferred`](Self::dispose_deferred) runs on a
    /// thread that does not.
    pub(crate) fn dispose_unreachable(&self, id: ResourceId) -> Result<()> {
        let Some(entry) = self.entry(id) else {
            return Ok(());
        };
        let root = if entry.lock.is_some() { entry.id } else { entry.parent };
        if held_by_current_thread(root) {
            tracing::debug!(resource = %id, root = %root, "root held by dropping thread, deferring disposal");
            self.deferred.lock().push((id, root));
            return Ok(());
        }
        self.dispose_with(id, DisposeTrigger::Unreachable)
    }

    /// Dispose every parked unreachable resource whose root the current
    /// thread does not hold
    ///
    /// Returns how many were disposed.
    ///
    /// # Errors
    ///
    /// Returns the first disposal failure; the remaining resources are still
    /// disposed.
    pub fn dispose_deferred(&self) -> Result<usize> {
        let ready: Vec<ResourceId> = {
            let mut deferred = self.deferred.lock();
            if deferred.is_empty() {
                return Ok(0);
            }
            let (held, ready): (Vec<_>, Vec<_>) = deferred
                .drain(..)
                .partition(|(_, root)| held_by_current_thread(*root));
            *deferred = held;
            ready.into_iter().map(|(id, _)| id).collect()
        };

        let mut outcome = Ok(ready.len());
        for id in ready {
            if let Err(err) = self.dispose_with(id, DisposeTrigger::Unreachable) {
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
        }
        outcome
    }

    /// Unreachable resources waiting for [`dispose_deferred`](Self::dispose_deferred)
    #[must_use]
    pub fn deferred_disposals(&self) -> usize {
        self.deferred.lock().len()
    }

    fn dispose_root(&self, entry: &Entry, lock: &Arc<RootLock>, trigger: DisposeTrigger) -> Result<()> {
        if held_by_current_thread(entry.id) {
            return Err(hazard(ConcurrencyHazard::DisposeWhileHeld {
                id: entry.id,
                root: entry.id,
            }));
        }

        let token = lock.acquire();
        if !entry.mark_disposed() {
            return Ok(());
        }
        let children = {
            let mut tables = self.tables.lock();
            tables.remove(entry);
            tables.children.remove(&entry.id).unwrap_or_default()
        };
        drop(token);

        let mut outcome = self.release_native(entry);
        self.report_disposed(entry, trigger, children.len());

        for child in children {
            if let Err(err) = self.dispose_with(child, DisposeTrigger::Cascade) {
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
        }
        outcome
    }

    fn dispose_child(&self, entry: &Entry, trigger: DisposeTrigger) -> Result<()> {
        let root = entry.parent;
        if held_by_current_thread(root) {
            return Err(hazard(ConcurrencyHazard::DisposeWhileHeld { id: entry.id, root }));
        }

        // A parent already out of the tables has excluded compute phases itself
        let token = match self.lock_root(root) {
            Ok(token) => Some(token),
            Err(err) if err.is_resource_gone() => None,
            Err(err) => return Err(err),
        };

        if !entry.mark_disposed() {
            return Ok(());
        }
        {
            let mut tables = self.tables.lock();
            tables.remove(entry);
            if let Some(siblings) = tables.children.get_mut(&root) {
                siblings.remove(&entry.id);
            }
        }

        let outcome = self.release_native(entry);
        drop(token);
        self.report_disposed(entry, trigger, 0);
        outcome
    }

    fn release_native(&self, entry: &Entry) -> Result<()> {
        if entry.released.swap(true, Ordering::AcqRel) {
            return Err(hazard(ConcurrencyHazard::DoubleRelease { id: entry.id }));
        }
        let release = entry.release.lock().take();
        if let Some(release) = release {
            release();
        }
        Ok(())
    }

    fn report_disposed(&self, entry: &Entry, trigger: DisposeTrigger, children: usize) {
        tracing::debug!(
            resource = %entry.id,
            kind = entry.kind,
            trigger = trigger.as_str(),
            children,
            "resource disposed"
        );
        self.emit_registry(RegistryEvent::Disposed {
            id: entry.id,
            kind: entry.kind.to_string(),
            trigger,
            children,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn ptr(addr: usize) -> NativePtr {
        NativePtr::from_addr(addr)
    }

    #[test]
    fn ids_are_monotonic() {
        let registry = ResourceRegistry::new();
        let a = registry.register(ptr(0x10), ResourceId::NONE).unwrap();
        registry.dispose(a).unwrap();
        let b = registry.register(ptr(0x10), ResourceId::NONE).unwrap();
        assert!(b > a);
        assert!(!registry.is_alive(a));
    }

    #[test]
    fn unreachable_while_held_is_deferred() {
        let registry = ResourceRegistry::new();
        let root = registry.register(ptr(0x1), ResourceId::NONE).unwrap();
        let child = registry.register(ptr(0x2), root).unwrap();

        let token = registry.lock_root(root).unwrap();
        registry.dispose_unreachable(child).unwrap();
        assert!(registry.is_alive(child));
        assert_eq!(registry.deferred_disposals(), 1);
        assert_eq!(registry.dispose_deferred().unwrap(), 0);

        drop(token);
        assert_eq!(registry.dispose_deferred().unwrap(), 1);
        assert!(!registry.is_alive(child));
        assert!(registry.is_alive(root));
        assert_eq!(registry.deferred_disposals(), 0);
    }

    #[test]
    fn sentinel_is_always_alive() {
        let registry = ResourceRegistry::new();
        assert!(registry.is_alive(ResourceId::NONE));
        registry.dispose(ResourceId::NONE).unwrap();
    }

    #[test]
    fn parent_validation() {
        let registry = ResourceRegistry::new();
        let root = registry.register(ptr(0x1), ResourceId::NONE).unwrap();
        let child = registry.register(ptr(0x2), root).unwrap();

        let err = registry.register(ptr(0x3), child).unwrap_err();
        assert!(matches!(
            err,
            Error::Registry(RegistryError::ParentNotRoot { .. })
        ));

        let err = registry.register(ptr(0x3), ResourceId::new(999)).unwrap_err();
        assert!(matches!(
            err,
            Error::Registry(RegistryError::UnknownParent { .. })
        ));

        registry.dispose(root).unwrap();
        let err = registry.register(ptr(0x3), root).unwrap_err();
        assert!(err.is_resource_gone());
    }

    #[test]
    fn release_runs_exactly_once() {
        let registry = ResourceRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = registry
            .register_with_release(
                ptr(0x20),
                ResourceId::NONE,
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        registry.dispose(id).unwrap();
        registry.dispose(id).unwrap();
        registry.dispose_with(id, DisposeTrigger::Unreachable).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn child_lock_resolves_to_root() {
        let registry = ResourceRegistry::new();
        let root = registry.register(ptr(0x1), ResourceId::NONE).unwrap();
        let child = registry.register(ptr(0x2), root).unwrap();

        let token = registry.lock_root(child).unwrap();
        assert_eq!(token.root(), root);
        assert!(registry.is_locked(root));
        drop(token);
        assert!(!registry.is_locked(root));
    }

    #[test]
    fn disposing_child_unlinks_it() {
        let registry = ResourceRegistry::new();
        let root = registry.register(ptr(0x1), ResourceId::NONE).unwrap();
        let child = registry.register(ptr(0x2), root).unwrap();

        registry.dispose(child).unwrap();
        assert!(registry.is_alive(root));
        assert!(!registry.is_alive(child));
        assert!(registry.lookup(root).unwrap().children.is_empty());
        assert!(registry.lookup_ptr(ptr(0x2)).is_none());
    }

    #[test]
    fn try_lock_reports_busy_and_gone() {
        let registry = ResourceRegistry::new();
        let root = registry.register(ptr(0x1), ResourceId::NONE).unwrap();

        let other = std::thread::scope(|scope| {
            let token = registry.lock_root(root).unwrap();
            let busy = scope
                .spawn(|| registry.try_lock_root(root).map(|t| t.is_none()))
                .join()
                .unwrap();
            drop(token);
            busy
        });
        assert!(other.unwrap());

        registry.dispose(root).unwrap();
        assert!(registry.try_lock_root(root).unwrap_err().is_resource_gone());
    }
}
