//! Partition routing: which partition owns a vertex, the vertex id layout
//! of each space, and the property defaults of each edge type.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use xxhash_rust::xxh64::xxh64;

use crate::error::{ChainError, Result};
use crate::types::{EdgeType, PartitionId, PropValue, SpaceId, VertexId, VidSpec};

/// Schema and partition metadata consumed by the coordinators.
pub trait PartitionRouter: Send + Sync {
    /// Vertex id layout of `space`, if the space is known.
    fn vid_spec(&self, space: SpaceId) -> Option<VidSpec>;

    /// Number of partitions in `space`, if the space is known.
    fn partition_count(&self, space: SpaceId) -> Option<u32>;

    /// Properties of `edge_type` in schema order, if a schema is registered.
    ///
    /// Both directions of a type share one schema.
    fn edge_schema(&self, _space: SpaceId, _edge_type: EdgeType) -> Option<Vec<EdgeField>> {
        None
    }

    /// Partition owning `vid`.
    fn partition_for_vertex(&self, space: SpaceId, vid: &VertexId) -> Result<PartitionId> {
        let count = self
            .partition_count(space)
            .filter(|n| *n > 0)
            .ok_or(ChainError::PartitionNotFound {
                space,
                part: PartitionId(0),
            })?;
        Ok(hash_partition(vid, count))
    }
}

/// Maps a vertex to one of `count` partitions numbered from 1.
///
/// Integer ids are taken modulo the count; string ids are hashed first.
pub fn hash_partition(vid: &VertexId, count: u32) -> PartitionId {
    let hash = match vid {
        VertexId::Int(v) => *v as u64,
        VertexId::Str(s) => xxh64(s.as_bytes(), 0),
    };
    PartitionId((hash % u64::from(count.max(1))) as u32 + 1)
}

/// Value an insert receives for a property it leaves out.
#[derive(Clone, Debug, PartialEq)]
pub enum PropDefault {
    /// A constant.
    Value(PropValue),
    /// Wall-clock time of the insert, as a `DateTime`.
    Now,
    /// Wall-clock date of the insert, as a `Date`.
    Today,
}

impl PropDefault {
    /// Evaluates the default at `now`.
    pub fn resolve(&self, now: SystemTime) -> PropValue {
        let since = now.duration_since(UNIX_EPOCH).unwrap_or_default();
        match self {
            PropDefault::Value(v) => v.clone(),
            PropDefault::Now => PropValue::DateTime(since.as_millis() as i64),
            PropDefault::Today => PropValue::Date((since.as_secs() / 86_400) as i64),
        }
    }
}

/// One property of an edge type.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeField {
    /// Property name.
    pub name: String,
    /// Default for inserts that omit the property; `None` means null.
    pub default: Option<PropDefault>,
}

impl EdgeField {
    /// A property without a default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    /// Sets the default; builder style.
    pub fn with_default(mut self, default: PropDefault) -> Self {
        self.default = Some(default);
        self
    }
}

#[derive(Copy, Clone, Debug)]
struct SpaceEntry {
    vid: VidSpec,
    parts: u32,
}

/// Static catalog routing vertices with [`hash_partition`].
#[derive(Default, Debug)]
pub struct HashRouter {
    spaces: RwLock<HashMap<SpaceId, SpaceEntry>>,
    edge_types: RwLock<HashMap<(SpaceId, EdgeType), Vec<EdgeField>>>,
}

impl HashRouter {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a space; builder style.
    pub fn with_space(self, space: SpaceId, vid: VidSpec, parts: u32) -> Self {
        self.add_space(space, vid, parts);
        self
    }

    /// Registers or replaces a space.
    pub fn add_space(&self, space: SpaceId, vid: VidSpec, parts: u32) {
        self.spaces.write().insert(space, SpaceEntry { vid, parts });
    }

    /// Registers the schema of an edge type; builder style.
    pub fn with_edge_schema(
        self,
        space: SpaceId,
        edge_type: EdgeType,
        fields: Vec<EdgeField>,
    ) -> Self {
        self.add_edge_schema(space, edge_type, fields);
        self
    }

    /// Registers or replaces the schema of an edge type.
    pub fn add_edge_schema(&self, space: SpaceId, edge_type: EdgeType, fields: Vec<EdgeField>) {
        self.edge_types
            .write()
            .insert((space, out_type(edge_type)), fields);
    }

    /// Forgets a space and its edge schemas, as after a drop.
    pub fn remove_space(&self, space: SpaceId) {
        self.spaces.write().remove(&space);
        self.edge_types.write().retain(|(s, _), _| *s != space);
    }
}

fn out_type(edge_type: EdgeType) -> EdgeType {
    EdgeType(edge_type.0.abs())
}

impl PartitionRouter for HashRouter {
    fn vid_spec(&self, space: SpaceId) -> Option<VidSpec> {
        self.spaces.read().get(&space).map(|e| e.vid)
    }

    fn partition_count(&self, space: SpaceId) -> Option<u32> {
        self.spaces.read().get(&space).map(|e| e.parts)
    }

    fn edge_schema(&self, space: SpaceId, edge_type: EdgeType) -> Option<Vec<EdgeField>> {
        self.edge_types
            .read()
            .get(&(space, out_type(edge_type)))
            .cloned()
    }
}
