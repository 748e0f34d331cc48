//! The single coarse lock shared by every stage worker.
//!
//! All stages serialize on one `tokio::sync::Mutex`. The guard is held across
//! the evaluator and broker calls of a pass, which also serializes calls to
//! the rate-limited data source.

use super::sets::ClassificationSets;
use super::stage::WorkerKind;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::sync::{Mutex, MutexGuard};
use tracing::trace;

/// Who holds the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockHolder {
    Worker(WorkerKind),
    Scheduler,
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockHolder::Worker(kind) => write!(f, "{kind}"),
            LockHolder::Scheduler => f.write_str("scheduler"),
        }
    }
}

/// One acquire/release cycle.
#[derive(Debug, Clone, Copy)]
pub struct LockSpan {
    pub holder: LockHolder,
    pub acquired: Instant,
    pub released: Instant,
}

impl LockSpan {
    pub fn overlaps(&self, other: &LockSpan) -> bool {
        self.acquired < other.released && other.acquired < self.released
    }
}

struct Inner {
    sets: Mutex<ClassificationSets>,
    held: AtomicBool,
    journal: Option<StdMutex<Vec<LockSpan>>>,
}

/// Cloneable handle to the shared classification state.
#[derive(Clone)]
pub struct SharedSets {
    inner: Arc<Inner>,
}

impl SharedSets {
    pub fn new(sets: ClassificationSets) -> Self {
        Self::build(sets, None)
    }

    /// Handle that journals every acquire/release cycle.
    pub fn instrumented(sets: ClassificationSets) -> Self {
        Self::build(sets, Some(StdMutex::new(Vec::new())))
    }

    fn build(sets: ClassificationSets, journal: Option<StdMutex<Vec<LockSpan>>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                sets: Mutex::new(sets),
                held: AtomicBool::new(false),
                journal,
            }),
        }
    }

    /// Wait for exclusive access.
    pub async fn acquire(&self, holder: LockHolder) -> SetsGuard<'_> {
        let guard = self.inner.sets.lock().await;
        let was_held = self.inner.held.swap(true, Ordering::SeqCst);
        debug_assert!(!was_held, "shared lock observed held while acquiring");
        trace!(%holder, "Lock acquired");

        SetsGuard {
            guard,
            holder,
            acquired: Instant::now(),
            inner: &self.inner,
        }
    }

    /// Journal of completed cycles (empty unless instrumented).
    pub fn spans(&self) -> Vec<LockSpan> {
        self.inner
            .journal
            .as_ref()
            .and_then(|journal| journal.lock().ok().map(|spans| spans.clone()))
            .unwrap_or_default()
    }

    /// Whether any holder currently has the lock.
    pub fn is_held(&self) -> bool {
        self.inner.held.load(Ordering::SeqCst)
    }
}

/// Exclusive access to the classification state; releases on drop.
pub struct SetsGuard<'a> {
    guard: MutexGuard<'a, ClassificationSets>,
    holder: LockHolder,
    acquired: Instant,
    inner: &'a Inner,
}

impl SetsGuard<'_> {
    pub fn holder(&self) -> LockHolder {
        self.holder
    }
}

impl Deref for SetsGuard<'_> {
    type Target = ClassificationSets;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for SetsGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for SetsGuard<'_> {
    fn drop(&mut self) {
        // Runs before the mutex guard field drops, so the recorded release
        // always precedes the next acquisition.
        let released = Instant::now();
        if let Some(journal) = &self.inner.journal {
            if let Ok(mut spans) = journal.lock() {
                spans.push(LockSpan {
                    holder: self.holder,
                    acquired: self.acquired,
                    released,
                });
            }
        }
        self.inner.held.store(false, Ordering::SeqCst);
        trace!(holder = %self.holder, "Lock released");
    }
}
