//! Controller thread state and completion delivery
//!
//! The [`Controller`] lives on the one thread that owns proxies and receives
//! completions. Worker threads never touch it: they only push [`Delivery`]
//! values onto a FIFO queue, and the controller drains that queue between
//! its own steps (`run_pending`, `pump`, `wait`). Finalize phases, progress
//! sinks and completion callbacks therefore always run on the controller
//! thread and need not be `Send`.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tokio::sync::oneshot;
use warden_config::Config;
use warden_errors::{Error, JobError, Result};
use warden_events::{EventEmitter, EventSender, ExecutionMode, FailureContext, JobEvent};
use warden_resources::ResourceRegistry;
use warden_types::{JobId, ProgressInfo, ResourceId};

use crate::job::{FinalizeFn, Job, Persisted};
use crate::pool::WorkerPool;
use crate::progress::{
    take_latest, InlineProgress, NoProgress, ProgressReporter, ProgressSink, QueuedProgress,
    SharedSlot,
};

/// Intermediate result with its type erased for the trip back to the controller
pub type Erased = Box<dyn Any + Send>;

/// Message from a worker to the controller thread
pub enum Delivery {
    /// A progress report; `None` means "read the coalescing slot"
    Progress {
        job: JobId,
        info: Option<ProgressInfo>,
    },
    /// The compute phase finished and its locks are released
    Complete {
        job: JobId,
        outcome: Result<Erased>,
    },
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Progress { job, info } => f
                .debug_struct("Progress")
                .field("job", job)
                .field("info", info)
                .finish(),
            Self::Complete { job, outcome } => f
                .debug_struct("Complete")
                .field("job", job)
                .field("ok", &outcome.is_ok())
                .finish(),
        }
    }
}

/// Controller-side knobs, usually taken from [`Config`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Report inline jobs blocked on their locks for longer than this
    pub inline_block_warning: Duration,
    /// Collapse progress bursts of queued jobs
    pub coalesce_progress: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ControllerSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            inline_block_warning: config.locking.inline_block_warning(),
            coalesce_progress: config.progress.coalesce,
        }
    }
}

enum Completion<V> {
    Callback(Box<dyn FnOnce(Result<V>)>),
    Handle(oneshot::Sender<Result<V>>),
}

impl<V> Completion<V> {
    fn settle(self, job: JobId, result: Result<V>) {
        match self {
            Self::Callback(callback) => callback(result),
            Self::Handle(sender) => {
                if sender.send(result).is_err() {
                    tracing::trace!(job = %job, "job handle dropped before completion");
                }
            }
        }
    }
}

/// Type-erased view of a queued job waiting on the controller
trait PendingJob {
    fn label(&self) -> &str;

    fn started(&self) -> Instant;

    fn progress(&mut self, info: Option<ProgressInfo>);

    /// Run finalize and settle the completion; returns the delivered failure
    fn complete(self: Box<Self>, job: JobId, outcome: Result<Erased>) -> Option<Error>;
}

struct Pending<R, V> {
    label: String,
    started: Instant,
    finalize: FinalizeFn<R, V>,
    persisted: Persisted,
    sink: Option<ProgressSink>,
    slot: Option<SharedSlot>,
    completion: Completion<V>,
}

impl<R: Send + 'static, V: 'static> PendingJob for Pending<R, V> {
    fn label(&self) -> &str {
        &self.label
    }

    fn started(&self) -> Instant {
        self.started
    }

    fn progress(&mut self, info: Option<ProgressInfo>) {
        let info = match (info, &self.slot) {
            (Some(info), _) => Some(info),
            (None, Some(slot)) => take_latest(slot),
            (None, None) => None,
        };
        if let (Some(info), Some(sink)) = (info, self.sink.as_mut()) {
            sink(&info);
        }
    }

    fn complete(self: Box<Self>, job: JobId, outcome: Result<Erased>) -> Option<Error> {
        let Pending {
            finalize,
            persisted,
            completion,
            ..
        } = *self;

        let result = outcome.and_then(|value| {
            let value = value
                .downcast::<R>()
                .map_err(|_| Error::from(JobError::ResultTypeMismatch { job }))?;
            finalize(*value, &persisted)
        });
        // persisted objects stay reachable until finalize is done
        drop(persisted);

        let failure = result.as_ref().err().cloned();
        completion.settle(job, result);
        failure
    }
}

/// Future-style completion of a queued job
#[must_use = "dropping the handle discards the job's result"]
pub struct JobHandle<V> {
    job: JobId,
    receiver: oneshot::Receiver<Result<V>>,
}

impl<V> fmt::Debug for JobHandle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle").field("job", &self.job).finish()
    }
}

impl<V> JobHandle<V> {
    #[must_use]
    pub fn job(&self) -> JobId {
        self.job
    }

    /// The result, if the controller has already settled it
    pub fn try_take(&mut self) -> Option<Result<V>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(Err(JobError::ControllerGone { job: self.job }.into()))
            }
        }
    }

    /// Awaitable receiver for hosts driving the controller from async code
    pub fn into_receiver(self) -> oneshot::Receiver<Result<V>> {
        self.receiver
    }
}

/// Work handed to a worker thread
struct WorkerTask {
    job: JobId,
    label: String,
    locks: Vec<ResourceId>,
    compute: Box<dyn FnOnce(&dyn ProgressReporter) -> Result<Erased> + Send>,
    reporter: Option<QueuedProgress>,
    registry: Arc<ResourceRegistry>,
    deliveries: Sender<Delivery>,
    events: Option<EventSender>,
}

impl WorkerTask {
    fn run(self) {
        let WorkerTask {
            job,
            label,
            locks,
            compute,
            reporter,
            registry,
            deliveries,
            events,
        } = self;

        let outcome = registry.lock_roots(&locks).and_then(|guard| {
            tracing::trace!(job = %job, roots = ?guard.roots(), "compute starting");
            events.emit_job(JobEvent::Started {
                job,
                label,
                mode: ExecutionMode::Queued,
            });
            let reporter: &dyn ProgressReporter = match &reporter {
                Some(reporter) => reporter,
                None => &NoProgress,
            };
            let result = run_compute(job, compute, reporter);
            drop(guard);
            result
        });
        sweep_deferred(&registry);

        if deliveries
            .send(Delivery::Complete { job, outcome })
            .is_err()
        {
            tracing::warn!(job = %job, "controller is gone, dropping completion");
        }
    }
}

/// Finish tracker disposals parked while a compute phase held their root
fn sweep_deferred(registry: &ResourceRegistry) {
    match registry.dispose_deferred() {
        Ok(0) => {}
        Ok(disposed) => tracing::debug!(disposed, "finished deferred disposals"),
        Err(err) => tracing::error!(error = %err, "deferred disposal failed"),
    }
}

/// Run a compute phase, turning a panic into a job failure
fn run_compute<R>(
    job: JobId,
    compute: impl FnOnce(&dyn ProgressReporter) -> Result<R>,
    reporter: &dyn ProgressReporter,
) -> Result<R> {
    panic::catch_unwind(AssertUnwindSafe(|| compute(reporter))).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(job = %job, %message, "compute phase panicked");
        Err(JobError::Panicked { job, message }.into())
    })
}

/// Owner of completion delivery on the controller thread
///
/// Not `Send`: it must stay on the thread that created it.
pub struct Controller {
    registry: Arc<ResourceRegistry>,
    pool: Arc<WorkerPool>,
    settings: ControllerSettings,
    events: Option<EventSender>,
    deliveries: Sender<Delivery>,
    inbox: Receiver<Delivery>,
    pending: RefCell<HashMap<JobId, Box<dyn PendingJob>>>,
    /// Jobs whose progress sink is on the stack right now
    in_sink: RefCell<HashSet<JobId>>,
    /// Completions that arrived while their job's sink was running
    deferred: RefCell<HashMap<JobId, Result<Erased>>>,
    next_job: Cell<u64>,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("settings", &self.settings)
            .field("pending", &self.pending.borrow().len())
            .field("queued_deliveries", &self.inbox.len())
            .finish_non_exhaustive()
    }
}

impl EventEmitter for Controller {
    fn event_sender(&self) -> Option<&EventSender> {
        self.events.as_ref()
    }
}

impl Controller {
    #[must_use]
    pub fn new(
        registry: Arc<ResourceRegistry>,
        pool: Arc<WorkerPool>,
        settings: ControllerSettings,
        events: Option<EventSender>,
    ) -> Self {
        let (deliveries, inbox) = channel::unbounded();
        Self {
            registry,
            pool,
            settings,
            events,
            deliveries,
            inbox,
            pending: RefCell::new(HashMap::new()),
            in_sink: RefCell::new(HashSet::new()),
            deferred: RefCell::new(HashMap::new()),
            next_job: Cell::new(1),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn settings(&self) -> ControllerSettings {
        self.settings
    }

    /// Queued jobs whose completion has not been delivered yet
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        let in_sink = self.in_sink.borrow();
        let deferred = self.deferred.borrow();
        let sinking = in_sink
            .iter()
            .filter(|job| !deferred.contains_key(*job))
            .count();
        self.pending.borrow().len() + sinking
    }

    fn is_pending(&self, job: JobId) -> bool {
        self.pending.borrow().contains_key(&job) || self.in_sink.borrow().contains(&job)
    }

    fn allocate_job(&self) -> JobId {
        let id = self.next_job.get();
        self.next_job.set(id + 1);
        JobId::new(id)
    }

    /// Run `job` on the calling (controller) thread
    ///
    /// Blocks until the locks are acquired; a wait longer than the configured
    /// threshold is reported as a `ControllerBlocked` event.
    ///
    /// # Errors
    ///
    /// Returns the lock, compute or finalize failure of the job.
    pub fn run_inline<R: Send + 'static, V: 'static>(&self, job: Job<R, V>) -> Result<V> {
        let id = self.allocate_job();
        let Job {
            label,
            compute,
            finalize,
            persisted,
            locks,
            progress,
        } = job;
        let started = Instant::now();

        let guard = self.registry.lock_roots_watched(
            &locks,
            Some(self.settings.inline_block_warning),
            |waited| {
                tracing::warn!(
                    job = %id,
                    waited_ms = waited.as_millis(),
                    "inline job is blocking the controller thread"
                );
                self.emit_job(JobEvent::ControllerBlocked {
                    job: id,
                    label: label.clone(),
                    resources: locks.clone(),
                    waited,
                });
            },
        );

        let result = guard.and_then(|guard| {
            self.emit_job(JobEvent::Started {
                job: id,
                label: label.clone(),
                mode: ExecutionMode::Inline,
            });
            let reporter = InlineProgress::new(progress);
            let value = run_compute(id, compute, &reporter);
            drop(guard);
            sweep_deferred(&self.registry);
            value
        });

        let result = result.and_then(|value| finalize(value, &persisted));
        drop(persisted);
        self.report_outcome(id, label, started, result.as_ref().err());
        result
    }

    /// Queue `job`; the returned handle settles once finalize has run
    pub fn submit<R: Send + 'static, V: 'static>(&self, job: Job<R, V>) -> JobHandle<V> {
        let (sender, receiver) = oneshot::channel();
        let id = self.enqueue(job, Completion::Handle(sender));
        JobHandle { job: id, receiver }
    }

    /// Queue `job`; `callback` receives the result on the controller thread
    pub fn submit_with_callback<R: Send + 'static, V: 'static>(
        &self,
        job: Job<R, V>,
        callback: impl FnOnce(Result<V>) + 'static,
    ) -> JobId {
        self.enqueue(job, Completion::Callback(Box::new(callback)))
    }

    fn enqueue<R: Send + 'static, V: 'static>(
        &self,
        job: Job<R, V>,
        completion: Completion<V>,
    ) -> JobId {
        let id = self.allocate_job();
        let Job {
            label,
            compute,
            finalize,
            persisted,
            locks,
            progress,
        } = job;

        let slot = (progress.is_some() && self.settings.coalesce_progress)
            .then(SharedSlot::default);
        let reporter = match (&progress, &slot) {
            (None, _) => None,
            (Some(_), Some(slot)) => Some(QueuedProgress::coalesced(
                id,
                self.deliveries.clone(),
                Arc::clone(slot),
            )),
            (Some(_), None) => Some(QueuedProgress::every(id, self.deliveries.clone())),
        };

        self.emit_job(JobEvent::Queued {
            job: id,
            label: label.clone(),
            resources: locks.clone(),
        });
        tracing::debug!(job = %id, label = %label, resources = ?locks, "job queued");

        let task = WorkerTask {
            job: id,
            label: label.clone(),
            locks,
            compute: Box::new(move |reporter: &dyn ProgressReporter| {
                compute(reporter).map(|value| Box::new(value) as Erased)
            }),
            reporter,
            registry: Arc::clone(&self.registry),
            deliveries: self.deliveries.clone(),
            events: self.events.clone(),
        };

        self.pending.borrow_mut().insert(
            id,
            Box::new(Pending {
                label,
                started: Instant::now(),
                finalize,
                persisted,
                sink: progress,
                slot,
                completion,
            }),
        );

        if let Err(err) = self.pool.execute(move || task.run()) {
            // Deliver the failure through the queue like any other completion
            let _ = self.deliveries.send(Delivery::Complete {
                job: id,
                outcome: Err(err),
            });
        }
        id
    }

    /// Deliver everything already queued without blocking
    ///
    /// Returns the number of deliveries processed.
    pub fn run_pending(&self) -> usize {
        let mut delivered = 0;
        while let Ok(delivery) = self.inbox.try_recv() {
            self.deliver(delivery);
            delivered += 1;
        }
        delivered
    }

    /// Block for at most `timeout` waiting for one delivery
    ///
    /// Returns whether a delivery was processed.
    pub fn pump(&self, timeout: Duration) -> bool {
        match self.inbox.recv_timeout(timeout) {
            Ok(delivery) => {
                self.deliver(delivery);
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Pump deliveries until `handle` settles
    ///
    /// # Errors
    ///
    /// Returns the job's failure, or `ControllerGone` if the job is not known
    /// to this controller and can never settle.
    pub fn wait<V>(&self, mut handle: JobHandle<V>) -> Result<V> {
        loop {
            if let Some(result) = handle.try_take() {
                return result;
            }
            if !self.is_pending(handle.job) && self.inbox.is_empty() {
                return Err(JobError::ControllerGone { job: handle.job }.into());
            }
            if let Ok(delivery) = self.inbox.recv() {
                self.deliver(delivery);
            }
        }
    }

    /// Pump deliveries until every queued job has completed
    pub fn drain(&self) {
        while self.pending_jobs() > 0 {
            if let Ok(delivery) = self.inbox.recv() {
                self.deliver(delivery);
            }
        }
        self.run_pending();
    }

    fn deliver(&self, delivery: Delivery) {
        match delivery {
            Delivery::Progress { job, info } => {
                // Taken out so the sink may submit jobs itself
                let Some(mut pending) = self.pending.borrow_mut().remove(&job) else {
                    return;
                };
                self.in_sink.borrow_mut().insert(job);
                pending.progress(info);
                self.in_sink.borrow_mut().remove(&job);
                self.pending.borrow_mut().insert(job, pending);

                // The sink pumped the queue and met its own completion
                let deferred = self.deferred.borrow_mut().remove(&job);
                if let Some(outcome) = deferred {
                    self.complete(job, outcome);
                }
            }
            Delivery::Complete { job, outcome } => {
                if self.in_sink.borrow().contains(&job) {
                    self.deferred.borrow_mut().insert(job, outcome);
                    return;
                }
                self.complete(job, outcome);
            }
        }
    }

    fn complete(&self, job: JobId, outcome: Result<Erased>) {
        let Some(pending) = self.pending.borrow_mut().remove(&job) else {
            tracing::warn!(job = %job, "completion for unknown job");
            return;
        };
        let label = pending.label().to_string();
        let started = pending.started();
        let failure = pending.complete(job, outcome);
        self.report_outcome(job, label, started, failure.as_ref());
    }

    fn report_outcome(&self, job: JobId, label: String, started: Instant, failure: Option<&Error>) {
        match failure {
            None => {
                let duration = started.elapsed();
                tracing::debug!(job = %job, label = %label, duration_ms = duration.as_millis(), "job completed");
                self.emit_job(JobEvent::Completed {
                    job,
                    label,
                    duration,
                });
            }
            Some(err) => {
                if err.is_hazard() {
                    tracing::error!(job = %job, label = %label, error = %err, "job hit a concurrency hazard");
                } else {
                    tracing::debug!(job = %job, label = %label, error = %err, "job failed");
                }
                self.emit_job(JobEvent::Failed {
                    job,
                    label,
                    failure: FailureContext::from_error(err),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> Controller {
        let pool = Arc::new(WorkerPool::new(2, "controller-test").unwrap());
        Controller::new(
            Arc::new(ResourceRegistry::new()),
            pool,
            ControllerSettings::default(),
            None,
        )
    }

    #[test]
    fn mismatched_intermediate_is_reported() {
        let controller = controller();
        let handle = controller.submit(Job::passthrough("typed", |_| Ok(5_u32)));
        let job = handle.job();

        // Replace the in-flight job with one expecting a different type
        let (sender, receiver) = oneshot::channel::<Result<String>>();
        controller.pending.borrow_mut().insert(
            job,
            Box::new(Pending::<String, String> {
                label: "typed".into(),
                started: Instant::now(),
                finalize: Box::new(|value, _| Ok(value)),
                persisted: Persisted::default(),
                sink: None,
                slot: None,
                completion: Completion::Handle(sender),
            }),
        );
        drop(handle);

        let result = controller.wait(JobHandle { job, receiver });
        assert_eq!(
            result.unwrap_err(),
            Error::Job(JobError::ResultTypeMismatch { job })
        );
    }

    #[test]
    fn unknown_handle_does_not_block() {
        let controller = controller();
        let (_sender, receiver) = oneshot::channel::<Result<()>>();
        let handle = JobHandle {
            job: JobId::new(99),
            receiver,
        };
        assert!(controller.wait(handle).is_err());
    }
}
