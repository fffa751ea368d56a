//! Partition-local storage seen by the chain commit layer.
//!
//! Holds the staged-key encoder, the key-value collaborator contract, the
//! encoded edge row and the normal apply path that writes real edge data.

/// Normal (non-chain) local apply path and the secondary-index hook.
pub mod apply;

/// Real, prime and double-prime key derivation.
pub mod keys;

/// Key-value store contract and the in-memory store.
pub mod kv;

mod metrics;
mod row;

pub use apply::{ApplyStats, EdgeEdit, EdgeWriter, IndexHook, NoIndex};
pub use keys::{EdgeKey, EdgeRef, Phase, RealKey, StagedKey};
pub use kv::{BatchOp, KvStore, MemStore, WriteBatch};
pub use metrics::{default_metrics, ChainMetrics, CounterMetrics, NoopMetrics};
pub use row::EdgeRow;

pub(crate) use row::{read_prop, write_prop};
