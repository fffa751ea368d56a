//! Receiving side of a forwarded mutation.
//!
//! The in-edge partition applies the mirrored request through the normal
//! apply path without staging anything: the sender's markers already make
//! the pair resumable, and every request here is idempotent.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::chain::forwarder::RemoteCode;
use crate::chain::request::Mutation;
use crate::chain::routing::PartitionRouter;
use crate::chain::term::TermOracle;
use crate::error::{ChainError, RemoteError};
use crate::storage::{EdgeKey, EdgeWriter, IndexHook, KvStore};
use crate::types::{PartitionId, Term};

/// Applies mirrored mutations addressed to partitions led by this node.
#[derive(Clone)]
pub struct RemoteHandler {
    store: Arc<dyn KvStore>,
    terms: Arc<dyn TermOracle>,
    router: Arc<dyn PartitionRouter>,
    index: Arc<dyn IndexHook>,
}

impl RemoteHandler {
    /// Creates a handler over the receiving node's collaborators.
    pub fn new(
        store: Arc<dyn KvStore>,
        terms: Arc<dyn TermOracle>,
        router: Arc<dyn PartitionRouter>,
        index: Arc<dyn IndexHook>,
    ) -> Self {
        Self {
            store,
            terms,
            router,
            index,
        }
    }

    /// Applies `mutation` sent by the leader of `origin` under `term`.
    pub fn handle(&self, mutation: &Mutation, origin: PartitionId, term: Term) -> RemoteCode {
        let (space, part) = (mutation.space(), mutation.part());
        if !self.terms.is_leader(space, part) {
            debug!(space = %space, part = %part, "chain.remote.not_leader");
            return RemoteCode::LeaderChanged;
        }
        match self.terms.current_term(space, origin) {
            Ok(current) if current == term => {}
            Ok(current) => {
                debug!(origin = %origin, sent = %term, current = %current, "chain.remote.outdated");
                return RemoteCode::Rejected(RemoteError::OutdatedTerm);
            }
            Err(err) => {
                return RemoteCode::Rejected(RemoteError::SchemaMismatch(err.to_string()));
            }
        }
        let Some(vid) = self.router.vid_spec(space) else {
            return RemoteCode::Rejected(RemoteError::SchemaMismatch(format!(
                "space {space} is unknown"
            )));
        };
        let keys = match mutation
            .edges()
            .into_iter()
            .map(|edge| EdgeKey::new(space, part, vid, edge))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(keys) => keys,
            Err(err) => return RemoteCode::Rejected(RemoteError::SchemaMismatch(err.to_string())),
        };
        if keys.is_empty() {
            return RemoteCode::Succeeded;
        }
        let writer = EdgeWriter::new(self.store.as_ref(), self.index.as_ref());
        let result = mutation
            .edits(&keys)
            .and_then(|edits| writer.apply(&edits, Default::default()));
        match result {
            Ok(stats) => {
                debug!(
                    space = %space,
                    part = %part,
                    kind = %mutation.kind(),
                    written = stats.written,
                    removed = stats.removed,
                    "chain.remote.applied"
                );
                RemoteCode::Succeeded
            }
            Err(ChainError::EdgeNotFound) => RemoteCode::Rejected(RemoteError::EdgeNotFound),
            Err(err) => {
                warn!(space = %space, part = %part, error = %err, "chain.remote.failed");
                RemoteCode::Rejected(RemoteError::Store(err.to_string()))
            }
        }
    }
}
