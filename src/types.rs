//! Identifiers and value types shared by the chain commit layer.

use std::fmt;

/// Graph space identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct SpaceId(pub u32);
/// Partition identifier inside a space. Partitions are numbered from 1.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PartitionId(pub u32);
/// Leadership epoch of a partition's replication group.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Term(pub u64);
/// Edge type. Positive values are out-edges, the negated value is the in-edge copy.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct EdgeType(pub i32);

/// Edge rank, used to distinguish parallel edges of the same type.
pub type Rank = i64;

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SpaceId {
    fn from(value: u32) -> Self {
        SpaceId(value)
    }
}

impl From<u32> for PartitionId {
    fn from(value: u32) -> Self {
        PartitionId(value)
    }
}

impl From<u64> for Term {
    fn from(value: u64) -> Self {
        Term(value)
    }
}

impl EdgeType {
    /// Returns the type of the mirrored copy (out <-> in).
    pub fn reversed(self) -> Self {
        EdgeType(-self.0)
    }

    /// Whether this is the out-edge copy.
    pub fn is_out(self) -> bool {
        self.0 > 0
    }
}

/// Vertex identifier as carried by mutation requests.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum VertexId {
    /// 64-bit integer vertex id.
    Int(i64),
    /// String vertex id, padded to the space's fixed id length in keys.
    Str(String),
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VertexId::Int(v) => write!(f, "{v}"),
            VertexId::Str(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<i64> for VertexId {
    fn from(value: i64) -> Self {
        VertexId::Int(value)
    }
}

impl From<&str> for VertexId {
    fn from(value: &str) -> Self {
        VertexId::Str(value.to_string())
    }
}

/// How a space lays out vertex ids in keys.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VidKind {
    /// Fixed eight-byte integers.
    Int64,
    /// Fixed-length strings, zero padded.
    FixedString,
}

/// Vertex id layout of a space, resolved from the schema service.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VidSpec {
    /// Id kind.
    pub kind: VidKind,
    /// Encoded width in bytes.
    pub len: usize,
}

impl VidSpec {
    /// Integer vertex ids.
    pub const fn int64() -> Self {
        Self {
            kind: VidKind::Int64,
            len: 8,
        }
    }

    /// Fixed-length string vertex ids of `len` bytes.
    pub const fn fixed_string(len: usize) -> Self {
        Self {
            kind: VidKind::FixedString,
            len,
        }
    }
}

/// Edge property value.
#[derive(Clone, Debug, PartialEq)]
pub enum PropValue {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point number.
    Float(f64),
    /// Owned string.
    Str(String),
    /// Owned byte vector.
    Bytes(Vec<u8>),
    /// Date value represented as Unix timestamp (days since epoch).
    Date(i64),
    /// DateTime value represented as Unix timestamp (milliseconds since epoch).
    DateTime(i64),
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Null => write!(f, "null"),
            PropValue::Bool(v) => write!(f, "{v}"),
            PropValue::Int(v) => write!(f, "{v}"),
            PropValue::Float(v) => write!(f, "{v}"),
            PropValue::Str(v) => write!(f, "{v}"),
            PropValue::Bytes(v) => write!(f, "bytes(len={})", v.len()),
            PropValue::Date(v) => write!(f, "date({v})"),
            PropValue::DateTime(v) => write!(f, "datetime({v})"),
        }
    }
}
