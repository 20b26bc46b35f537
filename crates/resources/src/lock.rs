//! Per-root exclusive locks
//!
//! A [`RootLock`] is a binary semaphore rather than a mutex guard: the token
//! proving ownership is an owned value so it can be stored in a
//! [`LockGuard`](crate::LockGuard) next to tokens of other roots and released
//! in any order.
//!
//! Every token is recorded in a thread-local held set. The registry consults it
//! to turn a second acquisition of the same root on the same thread into a
//! reported hazard instead of a self-deadlock.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use warden_types::ResourceId;

thread_local! {
    static HELD: RefCell<Vec<ResourceId>> = const { RefCell::new(Vec::new()) };
}

/// Whether the current thread holds the lock of `root`
pub(crate) fn held_by_current_thread(root: ResourceId) -> bool {
    HELD.with(|held| held.borrow().contains(&root))
}

/// Roots locked by the current thread, in acquisition order
#[must_use]
pub fn held_roots() -> Vec<ResourceId> {
    HELD.with(|held| held.borrow().clone())
}

pub(crate) struct RootLock {
    root: ResourceId,
    locked: Mutex<bool>,
    unlocked: Condvar,
}

impl RootLock {
    pub(crate) fn new(root: ResourceId) -> Arc<Self> {
        Arc::new(Self {
            root,
            locked: Mutex::new(false),
            unlocked: Condvar::new(),
        })
    }

    pub(crate) fn try_acquire(self: &Arc<Self>) -> Option<RootToken> {
        let mut locked = self.locked.lock();
        if *locked {
            return None;
        }
        *locked = true;
        drop(locked);
        Some(self.token())
    }

    pub(crate) fn acquire(self: &Arc<Self>) -> RootToken {
        let mut locked = self.locked.lock();
        while *locked {
            self.unlocked.wait(&mut locked);
        }
        *locked = true;
        drop(locked);
        self.token()
    }

    /// Block for at most `timeout`
    pub(crate) fn acquire_for(self: &Arc<Self>, timeout: Duration) -> Option<RootToken> {
        let deadline = Instant::now() + timeout;
        let mut locked = self.locked.lock();
        while *locked {
            if self.unlocked.wait_until(&mut locked, deadline).timed_out() {
                if *locked {
                    return None;
                }
                break;
            }
        }
        *locked = true;
        drop(locked);
        Some(self.token())
    }

    pub(crate) fn is_locked(&self) -> bool {
        *self.locked.lock()
    }

    fn token(self: &Arc<Self>) -> RootToken {
        HELD.with(|held| held.borrow_mut().push(self.root));
        tracing::trace!(resource = %self.root, "root lock acquired");
        RootToken {
            lock: Arc::clone(self),
            _thread_bound: PhantomData,
        }
    }

    fn release(&self) {
        let mut locked = self.locked.lock();
        *locked = false;
        drop(locked);
        self.unlocked.notify_one();
        tracing::trace!(resource = %self.root, "root lock released");
    }
}

/// Proof of exclusive ownership of one root lock
///
/// Released on drop, including during unwinding. A token stays on the thread
/// that acquired it, so the thread-local held set is always accurate.
#[must_use = "the root lock is released as soon as the token is dropped"]
pub struct RootToken {
    lock: Arc<RootLock>,
    _thread_bound: PhantomData<*const ()>,
}

impl RootToken {
    #[must_use]
    pub fn root(&self) -> ResourceId {
        self.lock.root
    }
}

impl fmt::Debug for RootToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootToken")
            .field("root", &self.lock.root)
            .finish()
    }
}

impl Drop for RootToken {
    fn drop(&mut self) {
        let root = self.lock.root;
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|id| *id == root) {
                held.remove(pos);
            }
        });
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn try_acquire_is_exclusive() {
        let lock = RootLock::new(ResourceId::new(1));
        let token = lock.try_acquire().unwrap();
        assert!(lock.try_acquire().is_none());
        assert!(lock.is_locked());
        drop(token);
        assert!(!lock.is_locked());
        assert!(lock.try_acquire().is_some());
    }

    #[test]
    fn held_set_tracks_tokens() {
        let lock = RootLock::new(ResourceId::new(9));
        assert!(!held_by_current_thread(ResourceId::new(9)));
        let token = lock.acquire();
        assert!(held_by_current_thread(ResourceId::new(9)));
        assert_eq!(held_roots(), vec![ResourceId::new(9)]);
        drop(token);
        assert!(held_roots().is_empty());
    }

    #[test]
    fn acquire_waits_for_release() {
        let lock = RootLock::new(ResourceId::new(2));
        let token = lock.acquire();
        let released = Arc::new(AtomicBool::new(false));

        let waiter = {
            let lock = Arc::clone(&lock);
            let released = Arc::clone(&released);
            thread::spawn(move || {
                let _token = lock.acquire();
                assert!(released.load(Ordering::SeqCst));
            })
        };

        thread::sleep(Duration::from_millis(20));
        released.store(true, Ordering::SeqCst);
        drop(token);
        waiter.join().unwrap();
    }

    #[test]
    fn acquire_for_times_out() {
        let lock = RootLock::new(ResourceId::new(3));
        let _token = lock.acquire();
        let other = Arc::clone(&lock);
        let result = thread::spawn(move || other.acquire_for(Duration::from_millis(10)).is_none())
            .join()
            .unwrap();
        assert!(result);
    }
}
