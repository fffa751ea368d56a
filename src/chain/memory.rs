//! In-memory collaborators for tests and the simulator.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::chain::forwarder::{RemoteClient, RemoteCode};
use crate::chain::remote::RemoteHandler;
use crate::chain::request::Mutation;
use crate::chain::term::TermOracle;
use crate::error::{ChainError, RemoteError, Result};
use crate::types::{PartitionId, SpaceId, Term};

#[derive(Copy, Clone, Debug)]
struct Leadership {
    term: Term,
    leader: bool,
}

/// Term oracle backed by a map; every partition starts at term 1.
#[derive(Default, Debug)]
pub struct InMemoryTerms {
    parts: RwLock<HashMap<(SpaceId, PartitionId), Leadership>>,
}

impl InMemoryTerms {
    /// Creates an oracle that knows no partitions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks this node leader of a partition, keeping its term.
    pub fn lead(&self, space: SpaceId, part: PartitionId) {
        self.parts
            .write()
            .entry((space, part))
            .or_insert(Leadership {
                term: Term(1),
                leader: true,
            })
            .leader = true;
    }

    /// Marks `1..=parts` of `space` as led here.
    pub fn lead_all(&self, space: SpaceId, parts: u32) {
        for part in 1..=parts {
            self.lead(space, PartitionId(part));
        }
    }

    /// Starts a new term, as after an election this node won again.
    pub fn bump(&self, space: SpaceId, part: PartitionId) -> Term {
        let mut parts = self.parts.write();
        let entry = parts.entry((space, part)).or_insert(Leadership {
            term: Term(0),
            leader: true,
        });
        entry.term = Term(entry.term.0 + 1);
        entry.term
    }

    /// Gives up leadership and starts a new term.
    pub fn step_down(&self, space: SpaceId, part: PartitionId) {
        self.bump(space, part);
        if let Some(entry) = self.parts.write().get_mut(&(space, part)) {
            entry.leader = false;
        }
    }
}

impl TermOracle for InMemoryTerms {
    fn current_term(&self, space: SpaceId, part: PartitionId) -> Result<Term> {
        self.parts
            .read()
            .get(&(space, part))
            .map(|l| l.term)
            .ok_or(ChainError::PartitionNotFound { space, part })
    }

    fn is_leader(&self, space: SpaceId, part: PartitionId) -> bool {
        self.parts
            .read()
            .get(&(space, part))
            .map_or(false, |l| l.leader)
    }
}

/// One scripted misbehaviour of the loopback transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Fail with `RpcFailure` before the remote side sees the request.
    DropRequest,
    /// Apply remotely, then lose the reply.
    DropReply,
    /// Answer `LeaderChanged` without applying.
    LeaderChanged,
    /// Apply remotely and answer `UnknownAppend`.
    UnknownAppend,
    /// Answer a permanent error without applying.
    Reject(RemoteError),
    /// Never answer within any reasonable timeout.
    Hang,
}

/// [`RemoteClient`] that calls a [`RemoteHandler`] in the same process.
///
/// Faults are taken from a script first, then drawn at random when a
/// failure rate is configured.
pub struct LoopbackClient {
    handler: RemoteHandler,
    script: Mutex<VecDeque<Fault>>,
    random: Mutex<Option<(ChaCha8Rng, f64)>>,
    calls: AtomicU64,
}

impl LoopbackClient {
    /// Creates a transport that always delivers.
    pub fn new(handler: RemoteHandler) -> Self {
        Self {
            handler,
            script: Mutex::new(VecDeque::new()),
            random: Mutex::new(None),
            calls: AtomicU64::new(0),
        }
    }

    /// Drops requests or replies with probability `rate`, seeded for reproducibility.
    pub fn with_failure_rate(self, rate: f64, seed: u64) -> Self {
        *self.random.lock() = Some((ChaCha8Rng::seed_from_u64(seed), rate.clamp(0.0, 1.0)));
        self
    }

    /// Queues faults for the next calls, in order.
    pub fn script(&self, faults: impl IntoIterator<Item = Fault>) {
        self.script.lock().extend(faults);
    }

    /// Stops random failures; scripted faults are unaffected.
    pub fn heal(&self) {
        *self.random.lock() = None;
    }

    /// Number of forwards received.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn next_fault(&self) -> Option<Fault> {
        if let Some(fault) = self.script.lock().pop_front() {
            return Some(fault);
        }
        let mut random = self.random.lock();
        let (rng, rate) = random.as_mut()?;
        if rng.gen_bool(*rate) {
            if rng.gen_bool(0.5) {
                Some(Fault::DropRequest)
            } else {
                Some(Fault::DropReply)
            }
        } else {
            None
        }
    }
}

#[async_trait]
impl RemoteClient for LoopbackClient {
    async fn forward(&self, mutation: &Mutation, origin: PartitionId, term: Term) -> RemoteCode {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match self.next_fault() {
            None => self.handler.handle(mutation, origin, term),
            Some(Fault::DropRequest) => RemoteCode::RpcFailure,
            Some(Fault::DropReply) => {
                self.handler.handle(mutation, origin, term);
                RemoteCode::RpcFailure
            }
            Some(Fault::LeaderChanged) => RemoteCode::LeaderChanged,
            Some(Fault::UnknownAppend) => {
                self.handler.handle(mutation, origin, term);
                RemoteCode::UnknownAppend
            }
            Some(Fault::Reject(err)) => RemoteCode::Rejected(err),
            Some(Fault::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                RemoteCode::RpcFailure
            }
        }
    }
}
