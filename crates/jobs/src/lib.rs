#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Job execution for warden
//!
//! Jobs are built on the controller thread, computed inline or on the worker
//! pool under their resource locks, and finalized back on the controller
//! thread. Progress and completions from workers reach the controller through
//! a FIFO delivery queue that it drains between steps.

pub mod controller;
pub mod engine;
pub mod job;
pub mod pool;
pub mod progress;
pub mod runtime;

pub use controller::{Controller, ControllerSettings, Delivery, JobHandle};
pub use job::{Job, Persisted};
pub use pool::WorkerPool;
pub use progress::{InlineProgress, NoProgress, ProgressReporter, ProgressSink, QueuedProgress};
pub use runtime::Runtime;
