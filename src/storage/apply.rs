//! Normal (non-chain) local apply path.
//!
//! This is the only code that writes real edge keys. The chain layer appends
//! its marker operations to the batch handed in, so real data and marker
//! changes for one partition land in a single atomic write.

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::{ChainError, Result};
use crate::storage::keys::EdgeKey;
use crate::storage::kv::{KvStore, WriteBatch};
use crate::storage::row::EdgeRow;
use crate::types::PropValue;

/// Secondary-index maintenance invoked for every real-key change.
///
/// Index entries are added to the same batch as the edge row so they commit
/// together.
pub trait IndexHook: Send + Sync {
    /// Called once per changed edge. `old` is the row before the change,
    /// `new` is `None` for removals.
    fn on_edge(
        &self,
        key: &EdgeKey,
        old: Option<&EdgeRow>,
        new: Option<&EdgeRow>,
        batch: &mut WriteBatch,
    ) -> Result<()>;
}

/// Index hook for spaces without edge indexes.
#[derive(Default, Debug, Clone, Copy)]
pub struct NoIndex;

impl IndexHook for NoIndex {
    fn on_edge(
        &self,
        _key: &EdgeKey,
        _old: Option<&EdgeRow>,
        _new: Option<&EdgeRow>,
        _batch: &mut WriteBatch,
    ) -> Result<()> {
        Ok(())
    }
}

/// One real-key change requested by a mutation.
#[derive(Clone, Debug, PartialEq)]
pub enum EdgeEdit {
    /// Write a full row. With `if_not_exists`, an existing row is kept.
    Insert {
        /// Edge to write.
        key: EdgeKey,
        /// New row.
        row: EdgeRow,
        /// Skip when the real key already exists.
        if_not_exists: bool,
    },
    /// Overwrite named properties of an existing row.
    Update {
        /// Edge to update.
        key: EdgeKey,
        /// `(name, value)` assignments.
        props: Vec<(String, PropValue)>,
        /// Create the row from `props` when the edge is missing.
        insertable: bool,
    },
    /// Remove the row if present.
    Delete {
        /// Edge to remove.
        key: EdgeKey,
    },
}

impl EdgeEdit {
    /// The edge this edit targets.
    pub fn key(&self) -> &EdgeKey {
        match self {
            EdgeEdit::Insert { key, .. }
            | EdgeEdit::Update { key, .. }
            | EdgeEdit::Delete { key } => key,
        }
    }
}

/// Counters describing what one apply call changed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ApplyStats {
    /// Rows written (inserted or updated).
    pub written: u64,
    /// Rows removed.
    pub removed: u64,
    /// Edits that changed nothing (existing row under `if_not_exists`, missing row on delete).
    pub skipped: u64,
}

/// Applies edge edits to one partition through an atomic batch.
pub struct EdgeWriter<'a> {
    store: &'a dyn KvStore,
    index: &'a dyn IndexHook,
}

impl<'a> EdgeWriter<'a> {
    /// Creates a writer over `store` maintaining indexes through `index`.
    pub fn new(store: &'a dyn KvStore, index: &'a dyn IndexHook) -> Self {
        Self { store, index }
    }

    /// Returns whether the real key of `key` exists.
    pub fn exists(&self, key: &EdgeKey) -> Result<bool> {
        Ok(self.read_row(key)?.is_some())
    }

    /// Reads the current row of `key`.
    pub fn read_row(&self, key: &EdgeKey) -> Result<Option<EdgeRow>> {
        self.store
            .get(key.space(), key.part(), key.real().as_bytes())?
            .map(|raw| EdgeRow::decode(&raw))
            .transpose()
    }

    /// Plans `edits` into one batch, appends `markers` and writes it.
    ///
    /// Every edit must target the same partition. Edits on the same edge see
    /// the rows planned by earlier edits of the call, so the index hook is
    /// told about the row that is actually replaced.
    pub fn apply(&self, edits: &[EdgeEdit], markers: WriteBatch) -> Result<ApplyStats> {
        let Some(first) = edits.first() else {
            return Err(ChainError::InvalidRequest("empty edit list"));
        };
        let (space, part) = (first.key().space(), first.key().part());
        if edits
            .iter()
            .any(|e| e.key().space() != space || e.key().part() != part)
        {
            return Err(ChainError::InvalidRequest("edits span more than one partition"));
        }
        let mut batch = WriteBatch::new();
        let mut stats = ApplyStats::default();
        let mut planned = Planned::default();
        for edit in edits {
            self.plan(edit, &mut planned, &mut batch, &mut stats)?;
        }
        batch.append(markers);
        trace!(
            space = %space,
            part = %part,
            ops = batch.len(),
            written = stats.written,
            removed = stats.removed,
            "storage.apply.batch"
        );
        self.store.write_batch(space, part, batch)?;
        Ok(stats)
    }

    fn current(&self, key: &EdgeKey, planned: &Planned) -> Result<Option<EdgeRow>> {
        match planned.get(key.real().as_bytes()) {
            Some(row) => Ok(row.clone()),
            None => self.read_row(key),
        }
    }

    fn plan(
        &self,
        edit: &EdgeEdit,
        planned: &mut Planned,
        batch: &mut WriteBatch,
        stats: &mut ApplyStats,
    ) -> Result<()> {
        let key = edit.key();
        let old = self.current(key, planned)?;
        let new = match edit {
            EdgeEdit::Insert {
                row, if_not_exists, ..
            } => {
                if *if_not_exists && old.is_some() {
                    stats.skipped += 1;
                    return Ok(());
                }
                row.clone()
            }
            EdgeEdit::Update {
                props, insertable, ..
            } => {
                let mut row = match (&old, insertable) {
                    (Some(row), _) => row.clone(),
                    (None, true) => EdgeRow::default(),
                    (None, false) => return Err(ChainError::EdgeNotFound),
                };
                for (name, value) in props {
                    row.set(name, value.clone());
                }
                row
            }
            EdgeEdit::Delete { .. } => {
                match old {
                    Some(old) => {
                        self.index.on_edge(key, Some(&old), None, batch)?;
                        batch.remove(key.real().to_bytes());
                        planned.insert(key.real().to_bytes(), None);
                        stats.removed += 1;
                    }
                    None => stats.skipped += 1,
                }
                return Ok(());
            }
        };
        self.index.on_edge(key, old.as_ref(), Some(&new), batch)?;
        batch.put(key.real().to_bytes(), new.encode());
        planned.insert(key.real().to_bytes(), Some(new));
        stats.written += 1;
        Ok(())
    }
}

/// Rows written or removed by earlier edits of one apply call.
type Planned = FxHashMap<Bytes, Option<EdgeRow>>;
