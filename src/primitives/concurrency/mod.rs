//! Edge lock table serializing chain operations that touch the same edge.
//!
//! Acquisition never blocks: a held edge fails the whole request immediately
//! so the caller sees a write conflict instead of queueing behind a slow
//! remote partition.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

/// Process-wide set of edges currently owned by a coordinator.
#[derive(Default)]
pub struct EdgeLockTable {
    held: Mutex<FxHashSet<Bytes>>,
}

/// Snapshot of lock table state for observability.
#[derive(Default, Debug, Clone, Copy)]
pub struct LockSnapshot {
    /// Number of edges currently locked.
    pub held: usize,
}

/// Guard owning a set of edge locks; releases all of them on drop.
pub struct EdgeLockGuard {
    table: Arc<EdgeLockTable>,
    keys: Vec<Bytes>,
}

impl EdgeLockTable {
    /// Creates an empty shared lock table.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attempts to lock every key at once.
    ///
    /// Either all keys are locked and a guard is returned, or nothing is
    /// locked and the first conflicting key is returned. Duplicate keys in
    /// one request are locked once.
    pub fn try_lock<I>(self: &Arc<Self>, keys: I) -> std::result::Result<EdgeLockGuard, Bytes>
    where
        I: IntoIterator<Item = Bytes>,
    {
        let mut keys: Vec<Bytes> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();
        let mut held = self.held.lock();
        if let Some(conflict) = keys.iter().find(|key| held.contains(*key)) {
            return Err(conflict.clone());
        }
        for key in &keys {
            held.insert(key.clone());
        }
        drop(held);
        Ok(EdgeLockGuard {
            table: Arc::clone(self),
            keys,
        })
    }

    /// Whether `key` is currently locked.
    pub fn is_locked(&self, key: &[u8]) -> bool {
        self.held.lock().contains(key)
    }

    /// Returns a snapshot of the current lock state.
    pub fn snapshot(&self) -> LockSnapshot {
        LockSnapshot {
            held: self.held.lock().len(),
        }
    }
}

impl EdgeLockGuard {
    /// Keys owned by this guard, sorted and deduplicated.
    pub fn keys(&self) -> &[Bytes] {
        &self.keys
    }
}

impl Drop for EdgeLockGuard {
    fn drop(&mut self) {
        let mut held = self.table.held.lock();
        for key in &self.keys {
            held.remove(key);
        }
    }
}

impl fmt::Debug for EdgeLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeLockGuard")
            .field("keys", &self.keys.len())
            .finish()
    }
}

impl fmt::Debug for EdgeLockTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeLockTable")
            .field("held", &self.snapshot().held)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn key(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn guard_releases_on_drop() {
        let table = EdgeLockTable::new();
        let guard = table.try_lock([key("a"), key("b")]).unwrap();
        assert!(table.is_locked(b"a"));
        assert_eq!(table.snapshot().held, 2);
        drop(guard);
        assert!(!table.is_locked(b"a"));
        assert_eq!(table.snapshot().held, 0);
    }

    #[test]
    fn conflict_locks_nothing() {
        let table = EdgeLockTable::new();
        let _held = table.try_lock([key("b")]).unwrap();
        let conflict = table.try_lock([key("a"), key("b"), key("c")]).unwrap_err();
        assert_eq!(conflict, key("b"));
        assert!(!table.is_locked(b"a"));
        assert!(!table.is_locked(b"c"));
    }

    #[test]
    fn duplicate_keys_lock_once() {
        let table = EdgeLockTable::new();
        let guard = table.try_lock([key("a"), key("a")]).unwrap();
        assert_eq!(guard.keys().len(), 1);
    }

    #[test]
    fn exactly_one_concurrent_winner() {
        const THREADS: usize = 8;
        let table = EdgeLockTable::new();
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let table = Arc::clone(&table);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    // winners keep their guard alive until every thread has tried
                    let guard = table.try_lock([key("edge")]).ok();
                    barrier.wait();
                    guard.is_some()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
