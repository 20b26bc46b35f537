//! Process context
//!
//! A [`Runtime`] bundles the registry, the worker pool and the configuration
//! they were built from. Create one at start-up, hand it (or the controller
//! it creates) to every entry point, and shut it down once at exit. There is
//! no global instance.

use std::sync::Arc;

use warden_config::Config;
use warden_errors::Result;
use warden_events::EventSender;
use warden_resources::ResourceRegistry;

use crate::controller::{Controller, ControllerSettings};
use crate::pool::WorkerPool;

#[derive(Debug)]
pub struct Runtime {
    config: Config,
    registry: Arc<ResourceRegistry>,
    pool: Arc<WorkerPool>,
    events: Option<EventSender>,
}

impl Runtime {
    /// Start the worker pool described by `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the worker threads cannot be spawned.
    pub fn new(config: Config) -> Result<Self> {
        Self::build(config, None)
    }

    /// Like [`new`](Self::new), reporting registry and job events to `events`
    ///
    /// # Errors
    ///
    /// Returns an error if the worker threads cannot be spawned.
    pub fn with_events(config: Config, events: EventSender) -> Result<Self> {
        Self::build(config, Some(events))
    }

    fn build(config: Config, events: Option<EventSender>) -> Result<Self> {
        let pool = WorkerPool::new(config.worker_threads(), &config.scheduler.thread_name)?;
        let registry = match &events {
            Some(sender) => ResourceRegistry::with_events(sender.clone()),
            None => ResourceRegistry::new(),
        };
        tracing::info!(
            workers = pool.threads(),
            coalesce = config.progress.coalesce,
            inline_block_warning_ms = config.locking.inline_block_warning_ms,
            "runtime started"
        );
        Ok(Self {
            config,
            registry: Arc::new(registry),
            pool: Arc::new(pool),
            events,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.pool.threads()
    }

    /// Controller bound to the calling thread
    #[must_use]
    pub fn controller(&self) -> Controller {
        Controller::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.pool),
            ControllerSettings::from_config(&self.config),
            self.events.clone(),
        )
    }

    /// Stop the workers after the queued tasks have run
    ///
    /// Controllers created from this runtime keep the pool alive until they
    /// are dropped as well.
    pub fn shutdown(self) {
        let live = self.registry.len();
        if live > 0 {
            tracing::debug!(live, "runtime shutting down with registered resources");
        }
        match Arc::try_unwrap(self.pool) {
            Ok(mut pool) => pool.shutdown(),
            Err(_) => tracing::debug!("worker pool still referenced by a controller"),
        }
        tracing::info!("runtime stopped");
    }
}
