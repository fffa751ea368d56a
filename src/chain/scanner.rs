//! Background resume scanner.
//!
//! Enumerates the prime and double-prime tables of every led partition,
//! dispatches each marker to its reconstructor and drives it. Cadence is a
//! fixed interval; a marker that stays pending is simply seen again on the
//! next pass.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chain::env::ChainEnv;
use crate::chain::resume::{ResumeFactory, ResumePhase};
use crate::chain::ResumeOutcome;
use crate::error::{ChainError, Result};
use crate::storage::keys::staged_table;
use crate::storage::{Phase, StagedKey};
use crate::types::{PartitionId, SpaceId};

/// Tally of one scan pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct ScanStats {
    /// Markers found.
    pub scanned: u64,
    /// Resumes that committed the remote side.
    pub committed: u64,
    /// Resumes that aborted.
    pub aborted: u64,
    /// Primes upgraded to double-primes.
    pub upgraded: u64,
    /// Markers left for the next pass.
    pub pending: u64,
    /// Markers already resolved elsewhere.
    pub skipped: u64,
    /// Markers whose edge was locked by a live coordinator.
    pub conflicts: u64,
    /// Markers that failed for any other reason.
    pub errors: u64,
    /// Partitions skipped because this node does not lead them.
    pub not_leader: u64,
}

impl ScanStats {
    fn record(&mut self, result: &Result<ResumeOutcome>) {
        match result {
            Ok(ResumeOutcome::Committed) => self.committed += 1,
            Ok(ResumeOutcome::Aborted) => self.aborted += 1,
            Ok(ResumeOutcome::Upgraded) => self.upgraded += 1,
            Ok(ResumeOutcome::Pending) => self.pending += 1,
            Ok(ResumeOutcome::Skipped) => self.skipped += 1,
            Err(ChainError::WriteConflict { .. }) => self.conflicts += 1,
            Err(_) => self.errors += 1,
        }
    }

    /// Adds another pass's counts to this one.
    pub fn merge(&mut self, other: &ScanStats) {
        self.scanned += other.scanned;
        self.committed += other.committed;
        self.aborted += other.aborted;
        self.upgraded += other.upgraded;
        self.pending += other.pending;
        self.skipped += other.skipped;
        self.conflicts += other.conflicts;
        self.errors += other.errors;
        self.not_leader += other.not_leader;
    }
}

/// Drives resume reconstructors for staged markers.
#[derive(Clone)]
pub struct ResumeScanner {
    env: ChainEnv,
    factory: ResumeFactory,
}

impl ResumeScanner {
    /// Creates a scanner over `env`.
    pub fn new(env: ChainEnv) -> Self {
        let factory = env.resume_factory();
        Self { env, factory }
    }

    /// Resumes every marker of one partition, primes first.
    pub async fn scan_partition(&self, space: SpaceId, part: PartitionId) -> Result<ScanStats> {
        let mut stats = ScanStats::default();
        if !self.env.terms().is_leader(space, part) {
            stats.not_leader += 1;
            return Ok(stats);
        }
        let limit = self.env.config().scan_batch_limit;
        for phase in [Phase::Prime, Phase::DoublePrime] {
            let entries =
                self.env
                    .store()
                    .prefix(space, part, &staged_table(phase, part), limit)?;
            for (raw, _) in entries {
                stats.scanned += 1;
                let result = self.resume_one(space, &raw, phase.into()).await;
                if let Err(err) = &result {
                    warn!(
                        space = %space,
                        part = %part,
                        key = %hex::encode(&raw),
                        error = %err,
                        "chain.scan.entry_failed"
                    );
                }
                stats.record(&result);
            }
        }
        if stats.scanned > 0 {
            debug!(space = %space, part = %part, ?stats, "chain.scan.partition");
        }
        Ok(stats)
    }

    async fn resume_one(
        &self,
        space: SpaceId,
        raw: &[u8],
        phase: ResumePhase,
    ) -> Result<ResumeOutcome> {
        let staged = StagedKey::parse(raw)?;
        let Some(mut reconstructed) = self
            .factory
            .dispatch(space, staged.real().to_bytes(), phase)?
        else {
            return Ok(ResumeOutcome::Skipped);
        };
        let term = self.env.terms().current_term(space, staged.real().partition())?;
        reconstructed.stamp_term(term);
        reconstructed.resume().await
    }

    /// Runs one pass over `parts`, continuing past partitions that fail.
    pub async fn scan_once(&self, parts: &[(SpaceId, PartitionId)]) -> ScanStats {
        let mut total = ScanStats::default();
        for &(space, part) in parts {
            match self.scan_partition(space, part).await {
                Ok(stats) => total.merge(&stats),
                Err(err) => {
                    total.errors += 1;
                    warn!(
                        space = %space,
                        part = %part,
                        error = %err,
                        "chain.scan.partition_failed"
                    );
                }
            }
        }
        total
    }

    /// Scans `parts` every configured interval until `shutdown` turns true.
    pub fn spawn(
        self,
        parts: Vec<(SpaceId, PartitionId)>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let period = self.env.config().scan_interval().max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            info!(parts = parts.len(), period_ms = period.as_millis() as u64, "chain.scan.started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let stats = self.scan_once(&parts).await;
                        if stats.scanned > 0 {
                            info!(?stats, "chain.scan.pass");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("chain.scan.stopped");
        })
    }
}
