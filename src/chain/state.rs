//! Decision table of the chain protocol.
//!
//! Every coordinator ends with the same question: given where it entered
//! the protocol, whether its term still holds and what the remote partition
//! said, what must happen locally? Keeping the answer a pure function makes
//! each transition testable without a store or a remote.

use crate::chain::forwarder::RemoteCode;
use crate::error::ChainError;

/// Where a coordinator entered the protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Entry {
    /// A new request; the coordinator wrote the prime itself.
    Fresh,
    /// A prime found by the scanner; local data not yet written.
    ResumeChain,
    /// A double-prime found by the scanner; local data already written.
    ResumeRemote,
}

/// Local action after the remote round trip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Write real data and remove the prime in one batch.
    Commit,
    /// Write real data, remove the prime and put a double-prime in one batch.
    CommitDeferred,
    /// Remove the prime, write no data and report the error.
    Abort(ChainError),
    /// Remove the double-prime only.
    Settle,
    /// Leave the marker for the next scan.
    Retain,
    /// Leadership moved; write nothing and report `LeaderChanged`.
    Stale,
}

/// Maps `(entry, term still valid, remote code)` to the local action.
pub fn decide(entry: Entry, term_ok: bool, code: &RemoteCode) -> Decision {
    if !term_ok {
        return Decision::Stale;
    }
    match entry {
        Entry::Fresh | Entry::ResumeChain => match code {
            RemoteCode::Succeeded | RemoteCode::UnknownAppend => Decision::Commit,
            RemoteCode::RpcFailure => Decision::CommitDeferred,
            RemoteCode::Rejected(err) => Decision::Abort(ChainError::Remote(err.clone())),
            RemoteCode::LeaderChanged => match entry {
                Entry::Fresh => Decision::Abort(ChainError::LeaderChanged),
                // the remote never applied it; try again under the next scan
                _ => Decision::Retain,
            },
        },
        Entry::ResumeRemote => {
            if code.is_success() {
                Decision::Settle
            } else {
                Decision::Retain
            }
        }
    }
}
