//! Leadership term oracle and the validator coordinators use against it.

use tracing::debug;

use crate::error::{ChainError, Result};
use crate::types::{PartitionId, SpaceId, Term};

/// Read-only view of the replication layer's leadership state.
pub trait TermOracle: Send + Sync {
    /// Current term of a partition's replication group.
    fn current_term(&self, space: SpaceId, part: PartitionId) -> Result<Term>;

    /// Whether this node currently leads the partition.
    fn is_leader(&self, space: SpaceId, part: PartitionId) -> bool;
}

/// A term captured at a known point, checked again before local writes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TermValidator {
    space: SpaceId,
    part: PartitionId,
    captured: Term,
}

impl TermValidator {
    /// Captures the partition's current term. Fails when this node does not lead it.
    pub fn capture(oracle: &dyn TermOracle, space: SpaceId, part: PartitionId) -> Result<Self> {
        if !oracle.is_leader(space, part) {
            return Err(ChainError::LeaderChanged);
        }
        Ok(Self::at(space, part, oracle.current_term(space, part)?))
    }

    /// A validator for a term obtained elsewhere.
    pub fn at(space: SpaceId, part: PartitionId, term: Term) -> Self {
        Self {
            space,
            part,
            captured: term,
        }
    }

    /// The captured term.
    pub fn term(&self) -> Term {
        self.captured
    }

    /// Fails with [`ChainError::LeaderChanged`] unless the partition is still
    /// led here under the captured term.
    pub fn check(&self, oracle: &dyn TermOracle) -> Result<()> {
        let current = oracle.current_term(self.space, self.part)?;
        if current != self.captured || !oracle.is_leader(self.space, self.part) {
            debug!(
                space = %self.space,
                part = %self.part,
                captured = %self.captured,
                current = %current,
                "chain.term.changed"
            );
            return Err(ChainError::LeaderChanged);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::memory::InMemoryTerms;

    #[test]
    fn bump_invalidates_captured_term() {
        let terms = InMemoryTerms::new();
        terms.lead(SpaceId(1), PartitionId(1));
        let v = TermValidator::capture(&terms, SpaceId(1), PartitionId(1)).unwrap();
        assert!(v.check(&terms).is_ok());
        terms.bump(SpaceId(1), PartitionId(1));
        assert_eq!(v.check(&terms), Err(ChainError::LeaderChanged));
    }

    #[test]
    fn capture_requires_leadership() {
        let terms = InMemoryTerms::new();
        terms.lead(SpaceId(1), PartitionId(1));
        terms.step_down(SpaceId(1), PartitionId(1));
        assert_eq!(
            TermValidator::capture(&terms, SpaceId(1), PartitionId(1)),
            Err(ChainError::LeaderChanged)
        );
    }
}
