//! Chain commit protocol for edges stored on two partitions.
//!
//! Every edge has an out copy on the source vertex's partition and an in copy
//! on the destination vertex's partition. A coordinator on the source side
//! stages a prime marker, forwards the mirrored mutation to the destination
//! side and then commits, aborts or leaves a double-prime marker for the
//! background scanner. Resume reconstructors rebuild interrupted mutations
//! from those markers alone.

use std::fmt;

/// Staged value serialization.
pub mod codec;
/// Injected collaborators shared by every coordinator.
pub mod env;
/// Remote client contract and the retrying forwarder.
pub mod forwarder;
/// In-memory collaborators for tests and simulation.
pub mod memory;
/// Coordinators and the processor driver.
pub mod processor;
/// Remote (in-edge) side handler.
pub mod remote;
/// Mutation requests.
pub mod request;
/// Resume dispatch factory.
pub mod resume;
/// Partition routing.
pub mod routing;
/// Background resume scanner.
pub mod scanner;
/// Pure decision table.
pub mod state;
/// Leadership term validation.
pub mod term;

pub use codec::{Origin, StagedValue};
pub use env::ChainEnv;
pub use forwarder::{Forwarder, RemoteClient, RemoteCode};
pub use processor::{
    drive, ChainProcessor, DeleteChain, Flow, InsertChain, LocalChain, ResumeChain, ResumeRemote,
    UpdateChain,
};
pub use remote::RemoteHandler;
pub use request::{
    ChainMutation, DeleteEdgesRequest, InsertEdgesRequest, Mutation, NewEdge, RequestKind,
    UpdateEdgeRequest, UpdatedProp,
};
pub use resume::{Reconstructed, ResumeFactory, ResumePhase};
pub use routing::{EdgeField, HashRouter, PartitionRouter, PropDefault};
pub use scanner::{ResumeScanner, ScanStats};
pub use term::{TermOracle, TermValidator};

/// Short id tying together the log events of one coordinator run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TxnId(pub u64);

impl TxnId {
    /// A fresh random id.
    pub fn random() -> Self {
        TxnId(rand::random())
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// What one resume run did with its staged marker.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResumeOutcome {
    /// Both partitions hold the mutation and the marker is gone.
    Committed,
    /// The remote side refused permanently; the prime was erased.
    Aborted,
    /// The local side was committed and the prime replaced by a double-prime.
    Upgraded,
    /// The marker was left for the next pass.
    Pending,
    /// The marker was already resolved or replaced by someone else.
    Skipped,
}

impl ResumeOutcome {
    /// Lowercase name used in logs and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            ResumeOutcome::Committed => "committed",
            ResumeOutcome::Aborted => "aborted",
            ResumeOutcome::Upgraded => "upgraded",
            ResumeOutcome::Pending => "pending",
            ResumeOutcome::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ResumeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
