//! Resume dispatch: turns a staged marker found by a scan into the matching
//! reconstructor.

use std::fmt;

use bytes::Bytes;
use tracing::debug;

use crate::chain::codec::StagedValue;
use crate::chain::env::ChainEnv;
use crate::chain::processor::{drive, ResumeChain, ResumeRemote};
use crate::chain::request::{
    ChainMutation, DeleteEdgesRequest, InsertEdgesRequest, RequestKind, UpdateEdgeRequest,
};
use crate::chain::ResumeOutcome;
use crate::error::{ChainError, Result};
use crate::storage::{Phase, RealKey, StagedKey};
use crate::types::{PartitionId, SpaceId, Term};

/// Which staged table a scan found the edge under.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResumePhase {
    /// Found under the prime table.
    ResumeChain,
    /// Found under the double-prime table.
    ResumeRemote,
}

impl ResumePhase {
    /// Marker table this phase reads.
    pub fn marker(self) -> Phase {
        match self {
            ResumePhase::ResumeChain => Phase::Prime,
            ResumePhase::ResumeRemote => Phase::DoublePrime,
        }
    }
}

impl From<Phase> for ResumePhase {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Prime => ResumePhase::ResumeChain,
            Phase::DoublePrime => ResumePhase::ResumeRemote,
        }
    }
}

impl fmt::Display for ResumePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResumePhase::ResumeChain => f.write_str("resume-chain"),
            ResumePhase::ResumeRemote => f.write_str("resume-remote"),
        }
    }
}

/// A reconstructor for one `(kind, phase)` pair.
pub enum Reconstructed {
    /// Insert found under a prime.
    InsertResumeChain(ResumeChain<InsertEdgesRequest>),
    /// Insert found under a double-prime.
    InsertResumeRemote(ResumeRemote<InsertEdgesRequest>),
    /// Update found under a prime.
    UpdateResumeChain(ResumeChain<UpdateEdgeRequest>),
    /// Update found under a double-prime.
    UpdateResumeRemote(ResumeRemote<UpdateEdgeRequest>),
    /// Delete found under a prime.
    DeleteResumeChain(ResumeChain<DeleteEdgesRequest>),
    /// Delete found under a double-prime.
    DeleteResumeRemote(ResumeRemote<DeleteEdgesRequest>),
}

impl Reconstructed {
    /// Request kind of the reconstructor.
    pub fn kind(&self) -> RequestKind {
        match self {
            Reconstructed::InsertResumeChain(_) | Reconstructed::InsertResumeRemote(_) => {
                RequestKind::Insert
            }
            Reconstructed::UpdateResumeChain(_) | Reconstructed::UpdateResumeRemote(_) => {
                RequestKind::Update
            }
            Reconstructed::DeleteResumeChain(_) | Reconstructed::DeleteResumeRemote(_) => {
                RequestKind::Delete
            }
        }
    }

    /// Phase the reconstructor resumes from.
    pub fn phase(&self) -> ResumePhase {
        match self {
            Reconstructed::InsertResumeChain(_)
            | Reconstructed::UpdateResumeChain(_)
            | Reconstructed::DeleteResumeChain(_) => ResumePhase::ResumeChain,
            Reconstructed::InsertResumeRemote(_)
            | Reconstructed::UpdateResumeRemote(_)
            | Reconstructed::DeleteResumeRemote(_) => ResumePhase::ResumeRemote,
        }
    }

    /// Sets the current term; the term stored with the marker is stale by definition.
    pub fn stamp_term(&mut self, term: Term) {
        match self {
            Reconstructed::InsertResumeChain(p) => p.stamp_term(term),
            Reconstructed::InsertResumeRemote(p) => p.stamp_term(term),
            Reconstructed::UpdateResumeChain(p) => p.stamp_term(term),
            Reconstructed::UpdateResumeRemote(p) => p.stamp_term(term),
            Reconstructed::DeleteResumeChain(p) => p.stamp_term(term),
            Reconstructed::DeleteResumeRemote(p) => p.stamp_term(term),
        }
    }

    /// Drives the reconstructor to completion.
    pub async fn resume(self) -> Result<ResumeOutcome> {
        match self {
            Reconstructed::InsertResumeChain(p) => drive(p).await,
            Reconstructed::InsertResumeRemote(p) => drive(p).await,
            Reconstructed::UpdateResumeChain(p) => drive(p).await,
            Reconstructed::UpdateResumeRemote(p) => drive(p).await,
            Reconstructed::DeleteResumeChain(p) => drive(p).await,
            Reconstructed::DeleteResumeRemote(p) => drive(p).await,
        }
    }
}

impl fmt::Debug for Reconstructed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconstructed")
            .field("kind", &self.kind())
            .field("phase", &self.phase())
            .finish()
    }
}

/// Builds reconstructors from staged values.
#[derive(Clone)]
pub struct ResumeFactory {
    env: ChainEnv,
}

impl ResumeFactory {
    /// Creates a factory over `env`.
    pub fn new(env: ChainEnv) -> Self {
        Self { env }
    }

    /// Reads the marker of `edge_key` under `phase` and selects its reconstructor.
    ///
    /// Returns `None` when the marker is gone, which happens when a live
    /// coordinator or an earlier pass resolved it after the scan saw it.
    /// The caller must stamp the result with the current term before driving it.
    pub fn dispatch(
        &self,
        space: SpaceId,
        edge_key: Bytes,
        phase: ResumePhase,
    ) -> Result<Option<Reconstructed>> {
        let real = RealKey::from_bytes(edge_key)?;
        let part = real.partition();
        let staged = StagedKey::from_real(phase.marker(), &real);
        let Some(value) = self.env.store().get(space, part, staged.as_bytes())? else {
            debug!(space = %space, part = %part, key = %staged.hex(), "chain.dispatch.gone");
            return Ok(None);
        };
        let kind = StagedValue::peek_kind(&value)?;
        debug!(
            space = %space,
            part = %part,
            kind = %kind,
            phase = %phase,
            key = %staged.hex(),
            "chain.dispatch"
        );
        let env = self.env.clone();
        let reconstructed = match (kind, phase) {
            (RequestKind::Insert, ResumePhase::ResumeChain) => {
                Reconstructed::InsertResumeChain(chain(env, space, part, value)?)
            }
            (RequestKind::Insert, ResumePhase::ResumeRemote) => {
                Reconstructed::InsertResumeRemote(remote(env, space, part, value)?)
            }
            (RequestKind::Update, ResumePhase::ResumeChain) => {
                Reconstructed::UpdateResumeChain(chain(env, space, part, value)?)
            }
            (RequestKind::Update, ResumePhase::ResumeRemote) => {
                Reconstructed::UpdateResumeRemote(remote(env, space, part, value)?)
            }
            (RequestKind::Delete, ResumePhase::ResumeChain) => {
                Reconstructed::DeleteResumeChain(chain(env, space, part, value)?)
            }
            (RequestKind::Delete, ResumePhase::ResumeRemote) => {
                Reconstructed::DeleteResumeRemote(remote(env, space, part, value)?)
            }
        };
        Ok(Some(reconstructed))
    }
}

fn decode_request<M: ChainMutation>(
    space: SpaceId,
    part: PartitionId,
    value: &[u8],
) -> Result<M> {
    let (mut request, _origin) = StagedValue::decode_as::<M>(value)?;
    if request.space() != space {
        return Err(ChainError::Decode("staged value belongs to another space"));
    }
    request.set_part(part);
    Ok(request)
}

fn chain<M: ChainMutation>(
    env: ChainEnv,
    space: SpaceId,
    part: PartitionId,
    value: Bytes,
) -> Result<ResumeChain<M>> {
    let request = decode_request::<M>(space, part, &value)?;
    Ok(ResumeChain::new(env, request, value))
}

fn remote<M: ChainMutation>(
    env: ChainEnv,
    space: SpaceId,
    part: PartitionId,
    value: Bytes,
) -> Result<ResumeRemote<M>> {
    let request = decode_request::<M>(space, part, &value)?;
    Ok(ResumeRemote::new(env, request, value))
}
