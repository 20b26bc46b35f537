//! Fixed-size worker pool
//!
//! Tasks are queued on an unbounded crossbeam channel and picked up by
//! whichever named worker thread is free. No priorities, no stealing.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use warden_errors::{Error, Result};

type Task = Box<dyn FnOnce() + Send>;

pub struct WorkerPool {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.workers.len())
            .field("open", &self.sender.is_some())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn `threads` workers named `{name}-{index}`
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn new(threads: usize, name: &str) -> Result<Self> {
        let (sender, receiver) = channel::unbounded::<Task>();
        let mut workers = Vec::with_capacity(threads.max(1));

        for index in 0..threads.max(1) {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(&receiver))
                .map_err(|e| Error::internal(format!("failed to spawn worker thread: {e}")))?;
            workers.push(handle);
        }

        tracing::debug!(threads = workers.len(), name, "worker pool started");
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Queue `task` for the next free worker
    ///
    /// # Errors
    ///
    /// Returns an error if the pool has been shut down.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| Error::internal("worker pool is shut down"))?;
        sender
            .send(Box::new(task))
            .map_err(|_| Error::internal("worker pool is shut down"))
    }

    #[must_use]
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Tasks waiting for a free worker
    #[must_use]
    pub fn queued(&self) -> usize {
        self.sender.as_ref().map_or(0, Sender::len)
    }

    /// Stop accepting tasks, finish the queued ones and join the workers
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("worker thread terminated abnormally");
            }
        }
        tracing::debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: &Receiver<Task>) {
    while let Ok(task) = receiver.recv() {
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!("worker task panicked outside a compute phase");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn runs_every_task_before_shutdown() {
        let mut pool = WorkerPool::new(3, "test-worker").unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let done = Arc::clone(&done);
            pool.execute(move || {
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 50);
        assert!(pool.execute(|| {}).is_err());
    }

    #[test]
    fn workers_are_named() {
        let pool = WorkerPool::new(1, "named").unwrap();
        let (tx, rx) = crossbeam::channel::bounded(1);
        pool.execute(move || {
            let _ = tx.send(thread::current().name().map(ToString::to_string));
        })
        .unwrap();
        assert_eq!(rx.recv().unwrap().as_deref(), Some("named-0"));
    }

    #[test]
    fn panicking_task_keeps_worker_alive() {
        let pool = WorkerPool::new(1, "panicky").unwrap();
        pool.execute(|| panic!("boom")).unwrap();
        let (tx, rx) = crossbeam::channel::bounded(1);
        pool.execute(move || {
            let _ = tx.send(());
        })
        .unwrap();
        assert!(rx.recv().is_ok());
    }
}
