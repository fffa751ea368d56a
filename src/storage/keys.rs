//! Staged-key encoder.
//!
//! Every edge mutation derives three keys from one [`EdgeKey`]:
//!
//! | key | layout |
//! |---|---|
//! | real | `[TABLE_EDGE][part u32][src][type i32][rank i64][dst]` |
//! | prime | `[TABLE_PRIME][part u32]` + real |
//! | double-prime | `[TABLE_DOUBLE_PRIME][part u32]` + real |
//!
//! The three table bytes are distinct, so a prefix scan over
//! `[TABLE_PRIME][part]` or `[TABLE_DOUBLE_PRIME][part]` enumerates exactly
//! the staged entries of a partition without touching settled data.

use std::fmt;

use bytes::Bytes;

use crate::error::{ChainError, Result};
use crate::primitives::bytes::ord;
use crate::types::{EdgeType, PartitionId, Rank, SpaceId, VertexId, VidKind, VidSpec};

/// Table byte of real (user-visible) edge keys.
pub const TABLE_EDGE: u8 = 0x02;
/// Table byte of prime markers.
pub const TABLE_PRIME: u8 = 0x10;
/// Table byte of double-prime markers.
pub const TABLE_DOUBLE_PRIME: u8 = 0x11;

const TABLE_PREFIX_LEN: usize = 5;

/// Which staged marker a key refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Local write intended, remote not yet confirmed.
    Prime,
    /// Local write durable, remote forward failed and must be resumed.
    DoublePrime,
}

impl Phase {
    fn table(self) -> u8 {
        match self {
            Phase::Prime => TABLE_PRIME,
            Phase::DoublePrime => TABLE_DOUBLE_PRIME,
        }
    }

    fn from_table(table: u8) -> Option<Self> {
        match table {
            TABLE_PRIME => Some(Phase::Prime),
            TABLE_DOUBLE_PRIME => Some(Phase::DoublePrime),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Prime => f.write_str("prime"),
            Phase::DoublePrime => f.write_str("double-prime"),
        }
    }
}

/// Edge identity as carried inside mutation requests.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EdgeRef {
    /// Source vertex.
    pub src: VertexId,
    /// Edge type; negative for the in-edge copy.
    pub edge_type: EdgeType,
    /// Rank.
    pub rank: Rank,
    /// Destination vertex.
    pub dst: VertexId,
}

impl EdgeRef {
    /// Creates an edge reference.
    pub fn new(
        src: impl Into<VertexId>,
        edge_type: EdgeType,
        rank: Rank,
        dst: impl Into<VertexId>,
    ) -> Self {
        Self {
            src: src.into(),
            edge_type,
            rank,
            dst: dst.into(),
        }
    }

    /// The mirrored copy: endpoints swapped, type negated.
    pub fn reversed(&self) -> Self {
        Self {
            src: self.dst.clone(),
            edge_type: self.edge_type.reversed(),
            rank: self.rank,
            dst: self.src.clone(),
        }
    }
}

impl fmt::Display for EdgeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{} @{}#{}",
            self.src, self.dst, self.edge_type, self.rank
        )
    }
}

/// One directed edge instance on one partition. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeKey {
    space: SpaceId,
    part: PartitionId,
    edge: EdgeRef,
    real: RealKey,
}

impl EdgeKey {
    /// Builds the key, validating the vertex ids against the space's id layout.
    pub fn new(space: SpaceId, part: PartitionId, vid: VidSpec, edge: &EdgeRef) -> Result<Self> {
        let mut buf = Vec::with_capacity(TABLE_PREFIX_LEN + 2 * vid.len + 12);
        buf.push(TABLE_EDGE);
        ord::push_u32_be(&mut buf, part.0);
        encode_vid(&mut buf, &edge.src, vid)?;
        ord::push_i32_be(&mut buf, edge.edge_type.0);
        ord::push_i64_be(&mut buf, edge.rank);
        encode_vid(&mut buf, &edge.dst, vid)?;
        Ok(Self {
            space,
            part,
            edge: edge.clone(),
            real: RealKey(Bytes::from(buf)),
        })
    }

    /// Space of the edge.
    pub fn space(&self) -> SpaceId {
        self.space
    }

    /// Partition that stores this copy of the edge.
    pub fn part(&self) -> PartitionId {
        self.part
    }

    /// The edge identity.
    pub fn edge(&self) -> &EdgeRef {
        &self.edge
    }

    /// Final, queryable key.
    pub fn real(&self) -> &RealKey {
        &self.real
    }

    /// Prime or double-prime marker key.
    pub fn staged(&self, phase: Phase) -> StagedKey {
        StagedKey::from_real(phase, &self.real)
    }

    /// Key used in the edge lock table; scoped by space so spaces never collide.
    pub fn lock_key(&self) -> Bytes {
        let mut buf = Vec::with_capacity(4 + self.real.0.len());
        ord::push_u32_be(&mut buf, self.space.0);
        buf.extend_from_slice(&self.real.0);
        Bytes::from(buf)
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.space, self.part, self.edge)
    }
}

/// Encoded real edge key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RealKey(Bytes);

impl RealKey {
    /// Wraps raw bytes found by a scan after checking the table byte.
    pub fn from_bytes(bytes: Bytes) -> Result<Self> {
        if bytes.len() <= TABLE_PREFIX_LEN || bytes[0] != TABLE_EDGE {
            return Err(ChainError::Decode("not a real edge key"));
        }
        Ok(Self(bytes))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Shared key bytes.
    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }

    /// Partition encoded in the key.
    pub fn partition(&self) -> PartitionId {
        // from_bytes and EdgeKey::new both guarantee the prefix
        PartitionId(ord::get_u32_be(&self.0[1..]).unwrap_or_default())
    }

    /// Hex rendering for logs.
    pub fn hex(&self) -> String {
        hex::encode(&self.0)
    }
}

/// Encoded prime or double-prime marker key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StagedKey {
    phase: Phase,
    bytes: Bytes,
}

impl StagedKey {
    /// Derives the marker key for `real` under `phase`.
    pub fn from_real(phase: Phase, real: &RealKey) -> Self {
        let mut buf = Vec::with_capacity(TABLE_PREFIX_LEN + real.0.len());
        buf.extend_from_slice(&staged_table(phase, real.partition()));
        buf.extend_from_slice(&real.0);
        Self {
            phase,
            bytes: Bytes::from(buf),
        }
    }

    /// Parses a key found under one of the staged table prefixes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let table = *bytes.first().ok_or(ChainError::Decode("empty staged key"))?;
        let phase = Phase::from_table(table).ok_or(ChainError::Decode("not a staged key"))?;
        let real = RealKey::from_bytes(Bytes::copy_from_slice(
            bytes.get(TABLE_PREFIX_LEN..).unwrap_or_default(),
        ))?;
        let staged = Self::from_real(phase, &real);
        if staged.bytes != bytes {
            return Err(ChainError::Decode("staged key partition mismatch"));
        }
        Ok(staged)
    }

    /// Marker kind.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Shared key bytes.
    pub fn to_bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    /// The real key this marker guards.
    pub fn real(&self) -> RealKey {
        RealKey(self.bytes.slice(TABLE_PREFIX_LEN..))
    }

    /// Hex rendering for logs.
    pub fn hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

/// Partition-scoped prefix of a staged table.
pub fn staged_table(phase: Phase, part: PartitionId) -> [u8; TABLE_PREFIX_LEN] {
    let mut out = [0u8; TABLE_PREFIX_LEN];
    out[0] = phase.table();
    out[1..].copy_from_slice(&part.0.to_be_bytes());
    out
}

/// Partition-scoped prefix of the real edge table.
pub fn edge_table(part: PartitionId) -> [u8; TABLE_PREFIX_LEN] {
    let mut out = [0u8; TABLE_PREFIX_LEN];
    out[0] = TABLE_EDGE;
    out[1..].copy_from_slice(&part.0.to_be_bytes());
    out
}

fn encode_vid(buf: &mut Vec<u8>, vid: &VertexId, spec: VidSpec) -> Result<()> {
    match (spec.kind, vid) {
        (VidKind::Int64, VertexId::Int(v)) => {
            ord::push_i64_be(buf, *v);
            Ok(())
        }
        (VidKind::FixedString, VertexId::Str(s)) => {
            if ord::push_padded(buf, s.as_bytes(), spec.len) {
                Ok(())
            } else {
                Err(ChainError::InvalidRequest("vertex id longer than space vid length"))
            }
        }
        _ => Err(ChainError::InvalidRequest("vertex id type does not match space")),
    }
}
