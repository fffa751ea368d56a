//! Chain coordinators.
//!
//! Each coordinator runs the same four steps, driven by [`drive`]:
//!
//! 1. `prepare_local`: resolve routing, lock the edges, stage or re-read the marker
//! 2. `process_remote`: forward the mirrored request
//! 3. `process_local`: apply the [`decide`] outcome to the local partition
//! 4. `finish`: release locks, record metrics and produce the result
//!
//! `finish` consumes the coordinator, so its lock guard is dropped on every
//! exit path, including errors raised by the earlier steps.

use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::chain::codec::{Origin, StagedValue};
use crate::chain::env::ChainEnv;
use crate::chain::forwarder::RemoteCode;
use crate::chain::request::{
    ChainMutation, DeleteEdgesRequest, InsertEdgesRequest, UpdateEdgeRequest,
};
use crate::chain::routing::PartitionRouter;
use crate::chain::state::{decide, Decision, Entry};
use crate::chain::term::TermValidator;
use crate::chain::{ResumeOutcome, TxnId};
use crate::error::{ChainError, Result};
use crate::primitives::concurrency::EdgeLockGuard;
use crate::storage::{EdgeKey, Phase, WriteBatch};
use crate::types::{PartitionId, SpaceId, Term, VidSpec};

/// Whether a coordinator continues after `prepare_local`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Go on to the remote step.
    Continue,
    /// Nothing left to do; skip straight to `finish`.
    Done,
}

/// The four steps shared by fresh coordinators and resume reconstructors.
#[async_trait]
pub trait ChainProcessor: Send {
    /// Value returned to the caller on success.
    type Output: Send;

    /// Local checks, locking and marker handling before the remote call.
    fn prepare_local(&mut self) -> Result<Flow>;

    /// Forwards the mirrored request and records the remote code.
    async fn process_remote(&mut self) -> Result<()>;

    /// Applies the decision for the recorded remote code locally.
    fn process_local(&mut self) -> Result<()>;

    /// Releases every held resource and converts the step result.
    fn finish(self, result: Result<()>) -> Result<Self::Output>
    where
        Self: Sized;
}

/// Runs a coordinator to completion.
pub async fn drive<P: ChainProcessor>(mut processor: P) -> Result<P::Output> {
    let result = run_steps(&mut processor).await;
    processor.finish(result)
}

async fn run_steps<P: ChainProcessor>(processor: &mut P) -> Result<()> {
    if processor.prepare_local()? == Flow::Done {
        return Ok(());
    }
    processor.process_remote().await?;
    processor.process_local()
}

/// Partition holding the in-edge copies of every edge in `request`.
fn remote_partition<M: ChainMutation>(
    router: &dyn PartitionRouter,
    request: &M,
) -> Result<PartitionId> {
    let space = request.space();
    let mut remote = None;
    for edge in request.edges() {
        let part = router.partition_for_vertex(space, &edge.dst)?;
        match remote {
            None => remote = Some(part),
            Some(seen) if seen != part => {
                return Err(ChainError::InvalidRequest(
                    "edges span more than one remote partition",
                ));
            }
            Some(_) => {}
        }
    }
    remote.ok_or(ChainError::InvalidRequest("request has no edges"))
}

fn edge_keys<M: ChainMutation>(
    space: SpaceId,
    part: PartitionId,
    vid: VidSpec,
    request: &M,
) -> Result<Vec<EdgeKey>> {
    request
        .edges()
        .into_iter()
        .map(|edge| EdgeKey::new(space, part, vid, edge))
        .collect()
}

/// Flags the last occurrence of every distinct real key.
fn last_occurrences(keys: &[EdgeKey]) -> Vec<bool> {
    let mut seen = FxHashSet::default();
    let mut keep: Vec<bool> = keys
        .iter()
        .rev()
        .map(|key| seen.insert(key.real().to_bytes()))
        .collect();
    keep.reverse();
    keep
}

fn vid_spec(env: &ChainEnv, space: SpaceId) -> Result<VidSpec> {
    env.router()
        .vid_spec(space)
        .ok_or(ChainError::InvalidSpaceConfig(space))
}

fn lock_edges(env: &ChainEnv, txn: TxnId, keys: &[EdgeKey]) -> Result<EdgeLockGuard> {
    env.locks()
        .try_lock(keys.iter().map(EdgeKey::lock_key))
        .map_err(|held| {
            env.metrics().lock_conflict();
            let edge = keys
                .iter()
                .find(|k| k.lock_key() == held)
                .map(ToString::to_string)
                .unwrap_or_else(|| hex::encode(&held));
            debug!(txn = %txn, edge = %edge, "chain.lock.conflict");
            ChainError::conflict(edge)
        })
}

fn term_holds(env: &ChainEnv, term: Option<&TermValidator>) -> bool {
    term.map_or(false, |t| t.check(env.terms()).is_ok())
}

async fn forward<M: ChainMutation>(
    env: &ChainEnv,
    txn: TxnId,
    request: &M,
    remote: Option<PartitionId>,
    term: Option<&TermValidator>,
) -> Result<RemoteCode> {
    let (Some(remote), Some(term)) = (remote, term) else {
        return Err(ChainError::InvalidRequest("coordinator was not prepared"));
    };
    let mirrored = request.mirrored(remote).into_mutation();
    debug!(
        txn = %txn,
        kind = %M::KIND,
        local = %request.part(),
        remote = %remote,
        term = %term.term(),
        "chain.forward.start"
    );
    Ok(env
        .forwarder()
        .send(txn, &mirrored, request.part(), term.term())
        .await)
}

/// Fresh coordinator for one request on its source-side partition.
pub struct LocalChain<M: ChainMutation> {
    env: ChainEnv,
    request: M,
    txn: TxnId,
    keys: Vec<EdgeKey>,
    values: Vec<Bytes>,
    remote: Option<PartitionId>,
    guard: Option<EdgeLockGuard>,
    term: Option<TermValidator>,
    code: Option<RemoteCode>,
    decision: Option<Decision>,
    started: bool,
}

/// Insert-edges coordinator.
pub type InsertChain = LocalChain<InsertEdgesRequest>;
/// Update-edge coordinator.
pub type UpdateChain = LocalChain<UpdateEdgeRequest>;
/// Delete-edges coordinator.
pub type DeleteChain = LocalChain<DeleteEdgesRequest>;

impl<M: ChainMutation> LocalChain<M> {
    /// Creates a coordinator for `request`.
    pub fn new(env: ChainEnv, request: M) -> Self {
        Self {
            env,
            request,
            txn: TxnId::random(),
            keys: Vec::new(),
            values: Vec::new(),
            remote: None,
            guard: None,
            term: None,
            code: None,
            decision: None,
            started: false,
        }
    }

    /// Id used on this run's log events.
    pub fn txn(&self) -> TxnId {
        self.txn
    }

    fn check_pending_markers(&self) -> Result<()> {
        let (space, part) = (self.request.space(), self.request.part());
        for key in &self.keys {
            for phase in [Phase::Prime, Phase::DoublePrime] {
                if self
                    .env
                    .store()
                    .get(space, part, key.staged(phase).as_bytes())?
                    .is_some()
                {
                    self.env.metrics().lock_conflict();
                    debug!(
                        txn = %self.txn,
                        edge = %key,
                        phase = %phase,
                        "chain.local.pending_marker"
                    );
                    return Err(ChainError::conflict(key.to_string()));
                }
            }
        }
        Ok(())
    }

    fn commit(&self, deferred: bool) -> Result<()> {
        let edits = self.request.edits(&self.keys)?;
        let mut markers = WriteBatch::new();
        for (key, value) in self.keys.iter().zip(&self.values) {
            markers.remove(key.staged(Phase::Prime).to_bytes());
            if deferred {
                markers.put(key.staged(Phase::DoublePrime).to_bytes(), value.clone());
            }
        }
        let stats = self.env.writer().apply(&edits, markers)?;
        debug!(
            txn = %self.txn,
            deferred,
            written = stats.written,
            removed = stats.removed,
            skipped = stats.skipped,
            "chain.local.commit"
        );
        Ok(())
    }

    fn erase_primes(&self) -> Result<()> {
        let mut batch = WriteBatch::new();
        for key in &self.keys {
            batch.remove(key.staged(Phase::Prime).to_bytes());
        }
        self.env
            .store()
            .write_batch(self.request.space(), self.request.part(), batch)?;
        Ok(())
    }
}

#[async_trait]
impl<M: ChainMutation> ChainProcessor for LocalChain<M> {
    type Output = ();

    fn prepare_local(&mut self) -> Result<Flow> {
        let (space, part) = (self.request.space(), self.request.part());
        if self.request.edges().is_empty() {
            return Ok(Flow::Done);
        }
        let vid = vid_spec(&self.env, space)?;
        let router = self.env.router();
        for edge in self.request.edges() {
            if router.partition_for_vertex(space, &edge.src)? != part {
                return Err(ChainError::InvalidRequest(
                    "edge source is not on the request partition",
                ));
            }
        }
        let remote = remote_partition(router, &self.request)?;
        let keys = edge_keys(space, part, vid, &self.request)?;
        let keep = last_occurrences(&keys);
        if keep.contains(&false) {
            self.request.retain_edges(&keep);
            debug!(
                txn = %self.txn,
                dropped = keep.iter().filter(|k| !**k).count(),
                "chain.local.duplicate_edges"
            );
        }
        self.keys = keys
            .into_iter()
            .zip(keep)
            .filter_map(|(key, keep)| keep.then_some(key))
            .collect();
        self.guard = Some(lock_edges(&self.env, self.txn, &self.keys)?);
        self.check_pending_markers()?;
        self.request.precheck(&self.env.writer(), &self.keys)?;
        self.term = Some(TermValidator::capture(self.env.terms(), space, part)?);

        self.request.fill_defaults(router, SystemTime::now())?;

        self.env.metrics().chain_started(M::KIND);
        self.started = true;
        self.values = self
            .request
            .split()
            .into_iter()
            .map(|single| StagedValue::new(single.into_mutation(), Origin::Fresh).encode())
            .collect();
        let mut batch = WriteBatch::new();
        for (key, value) in self.keys.iter().zip(&self.values) {
            batch.put(key.staged(Phase::Prime).to_bytes(), value.clone());
        }
        self.env.store().write_batch(space, part, batch)?;
        debug!(
            txn = %self.txn,
            kind = %M::KIND,
            space = %space,
            part = %part,
            edges = self.keys.len(),
            "chain.local.staged"
        );
        self.remote = Some(remote);
        Ok(Flow::Continue)
    }

    async fn process_remote(&mut self) -> Result<()> {
        let code = forward(
            &self.env,
            self.txn,
            &self.request,
            self.remote,
            self.term.as_ref(),
        )
        .await?;
        self.code = Some(code);
        Ok(())
    }

    fn process_local(&mut self) -> Result<()> {
        let code = self
            .code
            .clone()
            .ok_or(ChainError::InvalidRequest("remote step did not run"))?;
        let decision = decide(
            Entry::Fresh,
            term_holds(&self.env, self.term.as_ref()),
            &code,
        );
        self.decision = Some(decision.clone());
        match decision {
            Decision::Commit => self.commit(false),
            Decision::CommitDeferred => self.commit(true),
            Decision::Abort(err) => {
                self.erase_primes()?;
                Err(err)
            }
            Decision::Stale => Err(ChainError::LeaderChanged),
            // only produced for resumed entries
            Decision::Settle | Decision::Retain => Ok(()),
        }
    }

    fn finish(self, result: Result<()>) -> Result<()> {
        drop(self.guard);
        if self.started {
            let metrics = self.env.metrics();
            match (&result, &self.decision) {
                (Ok(()), Some(Decision::Commit)) => metrics.chain_committed(M::KIND),
                (Ok(()), Some(Decision::CommitDeferred)) => metrics.chain_deferred(M::KIND),
                (Err(_), Some(Decision::Abort(_))) => metrics.chain_aborted(M::KIND),
                _ => {}
            }
        }
        match &result {
            Ok(()) => debug!(
                txn = %self.txn,
                kind = %M::KIND,
                code = ?self.code,
                "chain.local.done"
            ),
            Err(err) => warn!(
                txn = %self.txn,
                kind = %M::KIND,
                code = ?self.code,
                error = %err,
                "chain.local.failed"
            ),
        }
        result
    }
}

/// State shared by both reconstructor kinds.
struct ResumeCore<M: ChainMutation> {
    env: ChainEnv,
    request: M,
    found: Bytes,
    txn: TxnId,
    key: Option<EdgeKey>,
    remote: Option<PartitionId>,
    guard: Option<EdgeLockGuard>,
    term: Option<TermValidator>,
    code: Option<RemoteCode>,
    outcome: ResumeOutcome,
}

impl<M: ChainMutation> ResumeCore<M> {
    fn new(env: ChainEnv, request: M, found: Bytes) -> Self {
        Self {
            env,
            request,
            found,
            txn: TxnId::random(),
            key: None,
            remote: None,
            guard: None,
            term: None,
            code: None,
            outcome: ResumeOutcome::Skipped,
        }
    }

    fn stamp(&mut self, term: Term) {
        self.term = Some(TermValidator::at(
            self.request.space(),
            self.request.part(),
            term,
        ));
    }

    /// Locks the edge and confirms the marker still holds the dispatched value.
    fn prepare(&mut self, phase: Phase) -> Result<Flow> {
        let (space, part) = (self.request.space(), self.request.part());
        if self.term.is_none() {
            self.term = Some(TermValidator::capture(self.env.terms(), space, part)?);
        }
        let vid = vid_spec(&self.env, space)?;
        // routing is recomputed rather than trusted from the staged value
        let router = self.env.router();
        for edge in self.request.edges() {
            let owner = router.partition_for_vertex(space, &edge.src)?;
            if owner != part {
                warn!(txn = %self.txn, owner = %owner, found = %part, "chain.resume.owner_moved");
            }
        }
        let remote = remote_partition(router, &self.request)?;
        let mut keys = edge_keys(space, part, vid, &self.request)?;
        if keys.len() != 1 {
            return Err(ChainError::Decode("staged request must carry exactly one edge"));
        }
        let key = keys.remove(0);
        self.guard = Some(lock_edges(
            &self.env,
            self.txn,
            std::slice::from_ref(&key),
        )?);
        let current = self
            .env
            .store()
            .get(space, part, key.staged(phase).as_bytes())?;
        if current.as_deref() != Some(self.found.as_ref()) {
            debug!(txn = %self.txn, edge = %key, phase = %phase, "chain.resume.resolved");
            self.outcome = ResumeOutcome::Skipped;
            return Ok(Flow::Done);
        }
        debug!(txn = %self.txn, edge = %key, phase = %phase, "chain.resume.locked");
        self.key = Some(key);
        self.remote = Some(remote);
        Ok(Flow::Continue)
    }

    async fn forward(&mut self) -> Result<()> {
        let code = forward(
            &self.env,
            self.txn,
            &self.request,
            self.remote,
            self.term.as_ref(),
        )
        .await?;
        self.code = Some(code);
        Ok(())
    }

    fn decision(&self, entry: Entry) -> Result<Decision> {
        let code = self
            .code
            .as_ref()
            .ok_or(ChainError::InvalidRequest("remote step did not run"))?;
        Ok(decide(entry, term_holds(&self.env, self.term.as_ref()), code))
    }

    fn key(&self) -> Result<&EdgeKey> {
        self.key
            .as_ref()
            .ok_or(ChainError::InvalidRequest("reconstructor was not prepared"))
    }

    fn write_markers(&self, batch: WriteBatch) -> Result<()> {
        self.env
            .store()
            .write_batch(self.request.space(), self.request.part(), batch)?;
        Ok(())
    }

    fn finish(self, result: Result<()>) -> Result<ResumeOutcome> {
        drop(self.guard);
        match result {
            Ok(()) => {
                self.env.metrics().resume_finished(self.outcome);
                debug!(
                    txn = %self.txn,
                    kind = %M::KIND,
                    code = ?self.code,
                    outcome = %self.outcome,
                    "chain.resume.done"
                );
                Ok(self.outcome)
            }
            Err(err) => {
                warn!(
                    txn = %self.txn,
                    kind = %M::KIND,
                    code = ?self.code,
                    error = %err,
                    "chain.resume.failed"
                );
                Err(err)
            }
        }
    }
}

/// Reconstructor for a prime found by the scanner.
///
/// The local data was never written. The forward is retried once per run; a
/// second transport failure commits locally and upgrades the prime to a
/// double-prime so the next pass resends without redoing local work.
pub struct ResumeChain<M: ChainMutation> {
    core: ResumeCore<M>,
}

impl<M: ChainMutation> ResumeChain<M> {
    /// Creates a reconstructor for `request`, found as `found` under its prime key.
    pub fn new(env: ChainEnv, request: M, found: Bytes) -> Self {
        Self {
            core: ResumeCore::new(env, request, found),
        }
    }

    /// Sets the term every local write is validated against.
    pub fn stamp_term(&mut self, term: Term) {
        self.core.stamp(term);
    }

    /// The request being resumed.
    pub fn request(&self) -> &M {
        &self.core.request
    }

    fn commit(&mut self, upgrade: bool) -> Result<()> {
        let key = self.core.key()?.clone();
        let edits = self.core.request.edits(std::slice::from_ref(&key))?;
        let mut markers = WriteBatch::new();
        markers.remove(key.staged(Phase::Prime).to_bytes());
        if upgrade {
            let value =
                StagedValue::new(self.core.request.clone().into_mutation(), Origin::Upgraded);
            markers.put(key.staged(Phase::DoublePrime).to_bytes(), value.encode());
        }
        self.core.env.writer().apply(&edits, markers)?;
        self.core.outcome = if upgrade {
            ResumeOutcome::Upgraded
        } else {
            ResumeOutcome::Committed
        };
        Ok(())
    }
}

#[async_trait]
impl<M: ChainMutation> ChainProcessor for ResumeChain<M> {
    type Output = ResumeOutcome;

    fn prepare_local(&mut self) -> Result<Flow> {
        self.core.prepare(Phase::Prime)
    }

    async fn process_remote(&mut self) -> Result<()> {
        self.core.forward().await
    }

    fn process_local(&mut self) -> Result<()> {
        match self.core.decision(Entry::ResumeChain)? {
            Decision::Commit => self.commit(false),
            Decision::CommitDeferred => self.commit(true),
            Decision::Abort(err) => {
                let mut batch = WriteBatch::new();
                batch.remove(self.core.key()?.staged(Phase::Prime).to_bytes());
                self.core.write_markers(batch)?;
                warn!(txn = %self.core.txn, error = %err, "chain.resume.aborted");
                self.core.outcome = ResumeOutcome::Aborted;
                Ok(())
            }
            Decision::Retain => {
                self.core.outcome = ResumeOutcome::Pending;
                Ok(())
            }
            Decision::Stale => Err(ChainError::LeaderChanged),
            // only produced for double-prime entries
            Decision::Settle => Ok(()),
        }
    }

    fn finish(self, result: Result<()>) -> Result<ResumeOutcome> {
        self.core.finish(result)
    }
}

/// Reconstructor for a double-prime found by the scanner.
///
/// The local data is already durable, so this only resends the forward and
/// removes the marker once the remote side confirms. Local data is never
/// applied again.
pub struct ResumeRemote<M: ChainMutation> {
    core: ResumeCore<M>,
}

impl<M: ChainMutation> ResumeRemote<M> {
    /// Creates a reconstructor for `request`, found as `found` under its double-prime key.
    pub fn new(env: ChainEnv, request: M, found: Bytes) -> Self {
        Self {
            core: ResumeCore::new(env, request, found),
        }
    }

    /// Sets the term every local write is validated against.
    pub fn stamp_term(&mut self, term: Term) {
        self.core.stamp(term);
    }

    /// The request being resumed.
    pub fn request(&self) -> &M {
        &self.core.request
    }
}

#[async_trait]
impl<M: ChainMutation> ChainProcessor for ResumeRemote<M> {
    type Output = ResumeOutcome;

    fn prepare_local(&mut self) -> Result<Flow> {
        self.core.prepare(Phase::DoublePrime)
    }

    async fn process_remote(&mut self) -> Result<()> {
        self.core.forward().await
    }

    fn process_local(&mut self) -> Result<()> {
        match self.core.decision(Entry::ResumeRemote)? {
            Decision::Settle => {
                let mut batch = WriteBatch::new();
                batch.remove(self.core.key()?.staged(Phase::DoublePrime).to_bytes());
                self.core.write_markers(batch)?;
                self.core.outcome = ResumeOutcome::Committed;
                Ok(())
            }
            Decision::Stale => Err(ChainError::LeaderChanged),
            _ => {
                self.core.outcome = ResumeOutcome::Pending;
                Ok(())
            }
        }
    }

    fn finish(self, result: Result<()>) -> Result<ResumeOutcome> {
        self.core.finish(result)
    }
}
