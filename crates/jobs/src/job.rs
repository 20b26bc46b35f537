//! Job definition
//!
//! A job is built on the controller thread and has three phases:
//!
//! - **build**: the caller captures inputs, names the resources the compute
//!   phase needs exclusively and the controller-side objects that must stay
//!   reachable until the job is done
//! - **compute**: runs on any thread under the resource locks; it must only
//!   touch what it captured (`Send`), never controller memory
//! - **finalize**: runs on the controller thread with the persisted objects
//!   and turns the intermediate result into the externally visible value

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use warden_errors::Result;
use warden_resources::Proxy;
use warden_types::{ProgressInfo, ResourceId};

use crate::progress::{ProgressReporter, ProgressSink};

pub(crate) type ComputeFn<R> = Box<dyn FnOnce(&dyn ProgressReporter) -> Result<R> + Send>;
pub(crate) type FinalizeFn<R, V> = Box<dyn FnOnce(R, &Persisted) -> Result<V>>;

/// Controller-side objects kept reachable for the lifetime of a job
#[derive(Default)]
pub struct Persisted {
    objects: HashMap<String, Box<dyn Any>>,
}

impl Persisted {
    pub fn insert<T: 'static>(&mut self, key: impl Into<String>, value: T) {
        self.objects.insert(key.into(), Box::new(value));
    }

    /// Persisted object `key`, if present with type `T`
    #[must_use]
    pub fn get<T: 'static>(&self, key: &str) -> Option<&T> {
        self.objects.get(key)?.downcast_ref()
    }

    /// Persisted proxy `key`
    #[must_use]
    pub fn proxy<T: Send + Sync + 'static>(&self, key: &str) -> Option<&Proxy<T>> {
        self.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl fmt::Debug for Persisted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.objects.keys()).finish()
    }
}

/// A unit of work producing `V` through an intermediate `R`
pub struct Job<R, V> {
    pub(crate) label: String,
    pub(crate) compute: ComputeFn<R>,
    pub(crate) finalize: FinalizeFn<R, V>,
    pub(crate) persisted: Persisted,
    pub(crate) locks: Vec<ResourceId>,
    pub(crate) progress: Option<ProgressSink>,
}

impl<R: Send + 'static, V: 'static> Job<R, V> {
    pub fn new(
        label: impl Into<String>,
        compute: impl FnOnce(&dyn ProgressReporter) -> Result<R> + Send + 'static,
        finalize: impl FnOnce(R, &Persisted) -> Result<V> + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            compute: Box::new(compute),
            finalize: Box::new(finalize),
            persisted: Persisted::default(),
            locks: Vec::new(),
            progress: None,
        }
    }

    /// Lock the root protecting `id` while compute runs
    #[must_use]
    pub fn lock(mut self, id: ResourceId) -> Self {
        self.locks.push(id);
        self
    }

    #[must_use]
    pub fn lock_all(mut self, ids: impl IntoIterator<Item = ResourceId>) -> Self {
        self.locks.extend(ids);
        self
    }

    /// Keep `value` reachable until finalize has run
    #[must_use]
    pub fn persist<T: 'static>(mut self, key: impl Into<String>, value: T) -> Self {
        self.persisted.insert(key, value);
        self
    }

    /// Lock the proxy's resource and keep the proxy reachable
    #[must_use]
    pub fn on_resource<T: Send + Sync + 'static>(
        self,
        key: impl Into<String>,
        proxy: &Proxy<T>,
    ) -> Self {
        self.lock(proxy.id()).persist(key, proxy.clone())
    }

    #[must_use]
    pub fn on_progress(mut self, sink: impl FnMut(&ProgressInfo) + 'static) -> Self {
        self.progress = Some(Box::new(sink));
        self
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn locked_resources(&self) -> &[ResourceId] {
        &self.locks
    }

    #[must_use]
    pub fn persisted(&self) -> &Persisted {
        &self.persisted
    }
}

impl<R: Send + 'static> Job<R, R> {
    /// Job whose intermediate result is already the external value
    pub fn passthrough(
        label: impl Into<String>,
        compute: impl FnOnce(&dyn ProgressReporter) -> Result<R> + Send + 'static,
    ) -> Self {
        Self::new(label, compute, |value, _| Ok(value))
    }
}

impl<R, V> fmt::Debug for Job<R, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("label", &self.label)
            .field("locks", &self.locks)
            .field("persisted", &self.persisted)
            .field("progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_records_locks_and_persisted() {
        let job = Job::passthrough("read", |_| Ok(1_u32))
            .lock(ResourceId::new(3))
            .lock_all([ResourceId::new(1), ResourceId::NONE])
            .persist("buffer", vec![0_u8; 4]);

        assert_eq!(job.label(), "read");
        assert_eq!(
            job.locked_resources(),
            &[ResourceId::new(3), ResourceId::new(1), ResourceId::NONE]
        );
        assert_eq!(job.persisted().get::<Vec<u8>>("buffer").map(Vec::len), Some(4));
        assert!(job.persisted().get::<String>("buffer").is_none());
    }
}
