//! Progress trampoline
//!
//! Compute phases report through [`ProgressReporter`] without knowing where
//! they run. Inline jobs call the sink directly; queued jobs marshal reports
//! to the controller thread through the delivery queue.
//!
//! With coalescing on, a queued reporter keeps only the latest report in a
//! shared slot and schedules at most one delivery at a time. A burst produced
//! while the controller is busy therefore collapses into a single delivery
//! carrying the most recent report.

use std::cell::RefCell;
use std::sync::Arc;

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use warden_types::{JobId, ProgressInfo};

use crate::controller::Delivery;

/// Controller-side consumer of progress reports
pub type ProgressSink = Box<dyn FnMut(&ProgressInfo)>;

/// Interface handed to compute phases
pub trait ProgressReporter {
    fn report(&self, info: ProgressInfo);

    /// Whether anyone listens; compute may skip building reports otherwise
    fn is_enabled(&self) -> bool {
        true
    }

    fn progress(&self, complete: f64) {
        self.report(ProgressInfo::new(complete));
    }

    fn progress_with_message(&self, complete: f64, message: &str) {
        self.report(ProgressInfo::new(complete).with_message(message));
    }
}

/// Reporter for jobs without a sink
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _info: ProgressInfo) {}

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Same-thread reporter used by inline jobs
pub struct InlineProgress {
    sink: RefCell<Option<ProgressSink>>,
}

impl InlineProgress {
    #[must_use]
    pub fn new(sink: Option<ProgressSink>) -> Self {
        Self {
            sink: RefCell::new(sink),
        }
    }
}

impl ProgressReporter for InlineProgress {
    fn report(&self, info: ProgressInfo) {
        // A sink reporting into itself is dropped rather than panicking
        if let Ok(mut sink) = self.sink.try_borrow_mut() {
            if let Some(sink) = sink.as_mut() {
                sink(&info);
            }
        }
    }

    fn is_enabled(&self) -> bool {
        self.sink.borrow().is_some()
    }
}

#[derive(Debug, Default)]
pub(crate) struct ProgressSlot {
    latest: Option<ProgressInfo>,
    scheduled: bool,
}

/// Latest-report slot shared by a worker and the controller
pub(crate) type SharedSlot = Arc<Mutex<ProgressSlot>>;

/// Called on the controller when a scheduled delivery arrives
pub(crate) fn take_latest(slot: &SharedSlot) -> Option<ProgressInfo> {
    let mut slot = slot.lock();
    slot.scheduled = false;
    slot.latest.take()
}

enum Marshal {
    Coalesced(SharedSlot),
    Every,
}

/// Cross-thread reporter used by queued jobs
pub struct QueuedProgress {
    job: JobId,
    tx: Sender<Delivery>,
    marshal: Marshal,
}

impl QueuedProgress {
    pub(crate) fn coalesced(job: JobId, tx: Sender<Delivery>, slot: SharedSlot) -> Self {
        Self {
            job,
            tx,
            marshal: Marshal::Coalesced(slot),
        }
    }

    pub(crate) fn every(job: JobId, tx: Sender<Delivery>) -> Self {
        Self {
            job,
            tx,
            marshal: Marshal::Every,
        }
    }
}

impl ProgressReporter for QueuedProgress {
    fn report(&self, info: ProgressInfo) {
        let delivery = match &self.marshal {
            Marshal::Every => Delivery::Progress {
                job: self.job,
                info: Some(info),
            },
            Marshal::Coalesced(slot) => {
                let mut slot = slot.lock();
                slot.latest = Some(info);
                if slot.scheduled {
                    return;
                }
                slot.scheduled = true;
                Delivery::Progress {
                    job: self.job,
                    info: None,
                }
            }
        };
        if self.tx.send(delivery).is_err() {
            tracing::trace!(job = %self.job, "progress dropped, controller is gone");
        }
    }
}
