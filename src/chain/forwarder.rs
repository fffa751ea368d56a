//! Remote partition client contract and the retrying forwarder.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::chain::request::Mutation;
use crate::chain::TxnId;
use crate::config::ChainConfig;
use crate::error::RemoteError;
use crate::types::{PartitionId, Term};

/// Result of sending a mirrored mutation to the remote partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteCode {
    /// Applied on the remote partition.
    Succeeded,
    /// The remote replica is not the leader; retryable.
    LeaderChanged,
    /// Transport failure or timeout; outcome unknown.
    RpcFailure,
    /// The remote log accepted the entry but could not confirm the apply.
    UnknownAppend,
    /// Permanent application error.
    Rejected(RemoteError),
}

impl RemoteCode {
    /// Whether the remote side holds the mutation.
    pub fn is_success(&self) -> bool {
        matches!(self, RemoteCode::Succeeded | RemoteCode::UnknownAppend)
    }
}

/// Transport to the partition holding the in-edge copies.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Sends `mutation`, already addressed to the remote partition.
    ///
    /// `origin` is the sending partition and `term` its leadership term, so
    /// the receiver can refuse requests from a deposed leader.
    async fn forward(&self, mutation: &Mutation, origin: PartitionId, term: Term) -> RemoteCode;
}

/// Sends mirrored mutations with a bounded retry on leader changes.
#[derive(Clone)]
pub struct Forwarder {
    client: Arc<dyn RemoteClient>,
    retry_limit: u32,
    timeout: Duration,
    backoff: Duration,
}

impl Forwarder {
    /// Builds a forwarder using the retry and timeout settings of `config`.
    pub fn new(client: Arc<dyn RemoteClient>, config: &ChainConfig) -> Self {
        Self {
            client,
            retry_limit: config.retry_limit,
            timeout: config.rpc_timeout(),
            backoff: config.leader_retry_backoff(),
        }
    }

    /// Sends `mutation` and folds the reply into a terminal code.
    ///
    /// `LeaderChanged` is retried up to the retry limit and returned once the
    /// budget is spent. A timed-out attempt counts as `RpcFailure` and
    /// `UnknownAppend` counts as success.
    pub async fn send(
        &self,
        txn: TxnId,
        mutation: &Mutation,
        origin: PartitionId,
        term: Term,
    ) -> RemoteCode {
        let mut retries = 0u32;
        loop {
            let code = match tokio::time::timeout(
                self.timeout,
                self.client.forward(mutation, origin, term),
            )
            .await
            {
                Ok(code) => code,
                Err(_) => {
                    warn!(txn = %txn, remote = %mutation.part(), "chain.forward.timeout");
                    RemoteCode::RpcFailure
                }
            };
            match code {
                RemoteCode::LeaderChanged if retries < self.retry_limit => {
                    retries += 1;
                    debug!(txn = %txn, retries, "chain.forward.leader_changed");
                    if !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
                RemoteCode::UnknownAppend => {
                    debug!(txn = %txn, "chain.forward.unknown_append");
                    return RemoteCode::Succeeded;
                }
                other => {
                    debug!(txn = %txn, code = ?other, retries, "chain.forward.done");
                    return other;
                }
            }
        }
    }
}
