use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::chain::request::RequestKind;
use crate::chain::ResumeOutcome;

/// Trait for tracking chain commit activity.
///
/// Implementations collect statistics about coordinator runs and resume
/// passes. The hooks are called on hot paths and must not block.
pub trait ChainMetrics: Send + Sync {
    /// Records a fresh coordinator run that got past validation.
    fn chain_started(&self, kind: RequestKind);

    /// Records a run that committed locally and remotely.
    fn chain_committed(&self, kind: RequestKind);

    /// Records a run that erased its prime after a permanent failure.
    fn chain_aborted(&self, kind: RequestKind);

    /// Records a run that committed locally and left a double-prime marker.
    fn chain_deferred(&self, kind: RequestKind);

    /// Records a request refused because an edge was locked or had a pending marker.
    fn lock_conflict(&self);

    /// Records the outcome of one resume invocation.
    fn resume_finished(&self, outcome: ResumeOutcome);
}

/// A no-op implementation of [`ChainMetrics`] that discards everything.
#[derive(Default)]
pub struct NoopMetrics;

impl ChainMetrics for NoopMetrics {
    fn chain_started(&self, _kind: RequestKind) {}
    fn chain_committed(&self, _kind: RequestKind) {}
    fn chain_aborted(&self, _kind: RequestKind) {}
    fn chain_deferred(&self, _kind: RequestKind) {}
    fn lock_conflict(&self) {}
    fn resume_finished(&self, _outcome: ResumeOutcome) {}
}

/// A thread-safe counter-based implementation of [`ChainMetrics`].
///
/// Per-kind counters are folded together; tests and the simulator only need totals.
#[derive(Default, Debug)]
pub struct CounterMetrics {
    /// Fresh runs started.
    pub started: AtomicU64,

    /// Fresh runs committed on both partitions.
    pub committed: AtomicU64,

    /// Fresh runs aborted.
    pub aborted: AtomicU64,

    /// Fresh runs that left a double-prime marker.
    pub deferred: AtomicU64,

    /// Requests refused with a write conflict.
    pub lock_conflicts: AtomicU64,

    /// Resume runs that committed the remote side.
    pub resumed_committed: AtomicU64,

    /// Resume runs that aborted.
    pub resumed_aborted: AtomicU64,

    /// Resume runs that upgraded a prime to a double-prime.
    pub resumed_upgraded: AtomicU64,

    /// Resume runs that left the marker for the next pass.
    pub resumed_pending: AtomicU64,

    /// Resume runs that found nothing to do.
    pub resumed_skipped: AtomicU64,
}

impl CounterMetrics {
    /// Reads one counter.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

impl ChainMetrics for CounterMetrics {
    fn chain_started(&self, _kind: RequestKind) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn chain_committed(&self, _kind: RequestKind) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    fn chain_aborted(&self, _kind: RequestKind) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    fn chain_deferred(&self, _kind: RequestKind) {
        self.deferred.fetch_add(1, Ordering::Relaxed);
    }

    fn lock_conflict(&self) {
        self.lock_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    fn resume_finished(&self, outcome: ResumeOutcome) {
        let counter = match outcome {
            ResumeOutcome::Committed => &self.resumed_committed,
            ResumeOutcome::Aborted => &self.resumed_aborted,
            ResumeOutcome::Upgraded => &self.resumed_upgraded,
            ResumeOutcome::Pending => &self.resumed_pending,
            ResumeOutcome::Skipped => &self.resumed_skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
pub fn default_metrics() -> Arc<dyn ChainMetrics> {
    Arc::new(NoopMetrics)
}
