//! Key-value store contract consumed by the chain layer, plus an in-memory store.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::StoreError;
use crate::types::{PartitionId, SpaceId};

/// One operation inside an atomic batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite a key.
    Put(Bytes, Bytes),
    /// Remove a key; removing a missing key is not an error.
    Remove(Bytes),
}

/// Ordered list of puts and removes applied all-or-nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a put.
    pub fn put(&mut self, key: Bytes, value: Bytes) {
        self.ops.push(BatchOp::Put(key, value));
    }

    /// Appends a remove.
    pub fn remove(&mut self, key: Bytes) {
        self.ops.push(BatchOp::Remove(key));
    }

    /// Moves every operation of `other` to the end of this batch.
    pub fn append(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    /// Operations in application order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch has no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Per-partition ordered key-value store.
///
/// Implementations must apply a batch all-or-nothing and give read-your-writes
/// on the same partition.
pub trait KvStore: Send + Sync {
    /// Point read.
    fn get(&self, space: SpaceId, part: PartitionId, key: &[u8])
        -> Result<Option<Bytes>, StoreError>;

    /// Atomic batch of puts and removes.
    fn write_batch(
        &self,
        space: SpaceId,
        part: PartitionId,
        batch: WriteBatch,
    ) -> Result<(), StoreError>;

    /// Returns up to `limit` entries whose key starts with `prefix`, in key order.
    fn prefix(
        &self,
        space: SpaceId,
        part: PartitionId,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Bytes, Bytes)>, StoreError>;
}

type PartMap = BTreeMap<Bytes, Bytes>;

/// In-memory [`KvStore`] keyed by `(space, partition)`.
///
/// Partitions must be registered with [`MemStore::add_part`] before use.
/// Write failures can be injected for tests and simulations.
#[derive(Default)]
pub struct MemStore {
    parts: RwLock<HashMap<(SpaceId, PartitionId), PartMap>>,
    fail_writes: AtomicUsize,
}

impl MemStore {
    /// Creates a store without partitions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an empty partition; existing data is kept.
    pub fn add_part(&self, space: SpaceId, part: PartitionId) {
        self.parts.write().entry((space, part)).or_default();
    }

    /// Makes the next `n` batch writes fail without applying anything.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Number of keys in a partition starting with `prefix`.
    pub fn count_prefix(&self, space: SpaceId, part: PartitionId, prefix: &[u8]) -> usize {
        self.parts
            .read()
            .get(&(space, part))
            .map(|map| {
                map.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
                    .take_while(|(k, _)| k.starts_with(prefix))
                    .count()
            })
            .unwrap_or(0)
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl KvStore for MemStore {
    fn get(
        &self,
        space: SpaceId,
        part: PartitionId,
        key: &[u8],
    ) -> Result<Option<Bytes>, StoreError> {
        let parts = self.parts.read();
        let map = parts
            .get(&(space, part))
            .ok_or(StoreError::PartitionNotFound { space, part })?;
        Ok(map.get(key).cloned())
    }

    fn write_batch(
        &self,
        space: SpaceId,
        part: PartitionId,
        batch: WriteBatch,
    ) -> Result<(), StoreError> {
        let mut parts = self.parts.write();
        let map = parts
            .get_mut(&(space, part))
            .ok_or(StoreError::PartitionNotFound { space, part })?;
        if self.take_injected_failure() {
            return Err(StoreError::Write("injected failure".into()));
        }
        for op in batch.ops {
            match op {
                BatchOp::Put(k, v) => {
                    map.insert(k, v);
                }
                BatchOp::Remove(k) => {
                    map.remove(&k);
                }
            }
        }
        Ok(())
    }

    fn prefix(
        &self,
        space: SpaceId,
        part: PartitionId,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Bytes, Bytes)>, StoreError> {
        let parts = self.parts.read();
        let map = parts
            .get(&(space, part))
            .ok_or(StoreError::PartitionNotFound { space, part })?;
        Ok(map
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: SpaceId = SpaceId(1);
    const P: PartitionId = PartitionId(1);

    fn store() -> MemStore {
        let store = MemStore::new();
        store.add_part(S, P);
        store
    }

    #[test]
    fn batch_applies_in_order() {
        let store = store();
        let mut batch = WriteBatch::new();
        batch.put(Bytes::from_static(b"k"), Bytes::from_static(b"v1"));
        batch.remove(Bytes::from_static(b"k"));
        batch.put(Bytes::from_static(b"j"), Bytes::from_static(b"v2"));
        store.write_batch(S, P, batch).unwrap();
        assert_eq!(store.get(S, P, b"k").unwrap(), None);
        assert_eq!(store.get(S, P, b"j").unwrap(), Some(Bytes::from_static(b"v2")));
    }

    #[test]
    fn injected_failure_applies_nothing() {
        let store = store();
        store.fail_next_writes(1);
        let mut batch = WriteBatch::new();
        batch.put(Bytes::from_static(b"a"), Bytes::from_static(b"1"));
        batch.put(Bytes::from_static(b"b"), Bytes::from_static(b"2"));
        assert!(store.write_batch(S, P, batch.clone()).is_err());
        assert_eq!(store.count_prefix(S, P, b""), 0);
        store.write_batch(S, P, batch).unwrap();
        assert_eq!(store.count_prefix(S, P, b""), 2);
    }

    #[test]
    fn prefix_scan_is_bounded() {
        let store = store();
        let mut batch = WriteBatch::new();
        for k in [&b"pa"[..], &b"pb"[..], &b"pc"[..], &b"q"[..]] {
            batch.put(Bytes::copy_from_slice(k), Bytes::new());
        }
        store.write_batch(S, P, batch).unwrap();
        let found = store.prefix(S, P, b"p", 2).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(&found[0].0[..], b"pa");
        assert_eq!(store.count_prefix(S, P, b"p"), 3);
    }

    #[test]
    fn unknown_partition_is_an_error() {
        let store = MemStore::new();
        assert!(matches!(
            store.get(S, P, b"k"),
            Err(StoreError::PartitionNotFound { .. })
        ));
    }
}
