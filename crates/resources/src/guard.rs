//! Multi-root acquisition
//!
//! Every request that needs more than one root goes through
//! [`ResourceRegistry::lock_roots`]: ids are resolved to their roots, sorted
//! ascending and deduplicated, then try-locked in that order. A busy root
//! releases everything taken in the attempt and the thread yields before
//! retrying, so no thread ever waits while holding a root lock.

use std::fmt;
use std::time::{Duration, Instant};

use warden_errors::{ConcurrencyHazard, Result};
use warden_types::ResourceId;

use crate::lock::{held_by_current_thread, RootToken};
use crate::registry::{hazard, ResolvedRoot, ResourceRegistry};

/// Scoped ownership of a set of root locks
///
/// All locks are released when the guard is dropped, in reverse acquisition
/// order, on every exit path including unwinding.
#[must_use = "the root locks are released as soon as the guard is dropped"]
#[derive(Default)]
pub struct LockGuard {
    tokens: Vec<RootToken>,
}

impl LockGuard {
    /// Guard holding nothing, for jobs that lock no resource
    pub fn empty() -> Self {
        Self::default()
    }

    /// Roots held, ascending
    #[must_use]
    pub fn roots(&self) -> Vec<ResourceId> {
        self.tokens.iter().map(RootToken::root).collect()
    }

    #[must_use]
    pub fn holds(&self, root: ResourceId) -> bool {
        self.tokens.iter().any(|token| token.root() == root)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Release every lock now
    pub fn release(self) {}
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        while let Some(token) = self.tokens.pop() {
            drop(token);
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("roots", &self.roots())
            .finish()
    }
}

#[derive(Debug)]
enum Attempt {
    Acquired(Vec<RootToken>),
    Busy(ResourceId),
}

fn attempt(roots: &[ResolvedRoot]) -> Result<Attempt> {
    let mut tokens = Vec::with_capacity(roots.len());
    for root in roots {
        root.ensure_alive()?;
        let Some(token) = root.lock.try_acquire() else {
            return Ok(Attempt::Busy(root.id()));
        };
        // alive only changes under the root lock, so this check is final
        root.ensure_alive()?;
        tokens.push(token);
    }
    Ok(Attempt::Acquired(tokens))
}

impl ResourceRegistry {
    fn canonical_roots(&self, ids: &[ResourceId]) -> Result<Vec<ResolvedRoot>> {
        let mut roots = Vec::with_capacity(ids.len());
        for &id in ids {
            if !id.is_none() {
                roots.push(self.resolve_root(id)?);
            }
        }
        roots.sort_by_key(ResolvedRoot::id);
        roots.dedup_by_key(|root| root.id());

        if let Some(root) = roots.iter().find(|root| held_by_current_thread(root.id())) {
            return Err(hazard(ConcurrencyHazard::ReentrantLock { root: root.id() }));
        }
        Ok(roots)
    }

    /// Acquire the roots of every id in `ids`, or none of them
    ///
    /// Sentinel ids are skipped and child ids lock their root.
    ///
    /// # Errors
    ///
    /// Fails fast with `ResourceGone` if any root is disposed, and with a
    /// `ReentrantLock` hazard if the current thread already holds one of them.
    pub fn lock_roots(&self, ids: &[ResourceId]) -> Result<LockGuard> {
        self.lock_roots_watched(ids, None, |_| {})
    }

    /// Like [`lock_roots`](Self::lock_roots), calling `on_stall` once if the
    /// acquisition is still waiting after `threshold`
    ///
    /// # Errors
    ///
    /// Same as [`lock_roots`](Self::lock_roots).
    pub fn lock_roots_watched(
        &self,
        ids: &[ResourceId],
        threshold: Option<Duration>,
        on_stall: impl FnOnce(Duration),
    ) -> Result<LockGuard> {
        let roots = self.canonical_roots(ids)?;
        let started = Instant::now();
        let mut on_stall = Some(on_stall);

        match roots.as_slice() {
            [] => Ok(LockGuard::empty()),
            [root] => {
                let token = match threshold.map(|limit| root.lock.acquire_for(limit)) {
                    Some(Some(token)) => token,
                    Some(None) => {
                        if let Some(report) = on_stall.take() {
                            report(started.elapsed());
                        }
                        root.lock.acquire()
                    }
                    None => root.lock.acquire(),
                };
                root.ensure_alive()?;
                Ok(LockGuard {
                    tokens: vec![token],
                })
            }
            _ => loop {
                match attempt(&roots)? {
                    Attempt::Acquired(tokens) => return Ok(LockGuard { tokens }),
                    Attempt::Busy(busy) => {
                        tracing::trace!(resource = %busy, "root busy, backing off");
                        if let Some(limit) = threshold {
                            let waited = started.elapsed();
                            if waited >= limit {
                                if let Some(report) = on_stall.take() {
                                    report(waited);
                                }
                            }
                        }
                        std::thread::yield_now();
                    }
                }
            },
        }
    }

    /// Single attempt at acquiring every root of `ids`
    ///
    /// # Errors
    ///
    /// Same as [`lock_roots`](Self::lock_roots). Busy roots are `Ok(None)`.
    pub fn try_lock_roots(&self, ids: &[ResourceId]) -> Result<Option<LockGuard>> {
        let roots = self.canonical_roots(ids)?;
        Ok(match attempt(&roots)? {
            Attempt::Acquired(tokens) => Some(LockGuard { tokens }),
            Attempt::Busy(_) => None,
        })
    }
}
