//! Staged value serialization.
//!
//! A staged value is the only durable record of an in-flight mutation, so it
//! carries the whole single-edge request:
//!
//! ```text
//! [shape u8][body ...][kind u8][origin u8]
//! ```
//!
//! The shape byte at the head of the body is fixed per request kind. Decoding
//! checks it against the trailing kind byte, so a body of one kind is never
//! read as another.

use bytes::Bytes;

use crate::chain::request::{
    ChainMutation, DeleteEdgesRequest, InsertEdgesRequest, Mutation, NewEdge, RequestKind,
    UpdateEdgeRequest, UpdatedProp,
};
use crate::error::{ChainError, Result};
use crate::primitives::bytes::{buf::Cursor, var};
use crate::storage::{read_prop, write_prop, EdgeRef};
use crate::types::{EdgeType, PartitionId, SpaceId, VertexId};

const SHAPE_INSERT: u8 = 0xa1;
const SHAPE_UPDATE: u8 = 0xa2;
const SHAPE_DELETE: u8 = 0xa3;

const VID_INT: u8 = 0;
const VID_STR: u8 = 1;

const TRAILER_LEN: usize = 2;

/// Who wrote the staged marker.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Written by a fresh coordinator.
    Fresh,
    /// Rewritten by a resume run that upgraded a prime to a double-prime.
    Upgraded,
}

impl Origin {
    fn tag(self) -> u8 {
        match self {
            Origin::Fresh => b'f',
            Origin::Upgraded => b'r',
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            b'f' => Ok(Origin::Fresh),
            b'r' => Ok(Origin::Upgraded),
            _ => Err(ChainError::Decode("unknown staged value origin")),
        }
    }
}

/// Decoded value stored under a prime or double-prime key.
#[derive(Clone, Debug, PartialEq)]
pub struct StagedValue {
    /// The single-edge request to resume.
    pub mutation: Mutation,
    /// Writer of the marker.
    pub origin: Origin,
}

impl StagedValue {
    /// Wraps a request.
    pub fn new(mutation: Mutation, origin: Origin) -> Self {
        Self { mutation, origin }
    }

    /// Kind of the carried request.
    pub fn kind(&self) -> RequestKind {
        self.mutation.kind()
    }

    /// Serializes the value.
    pub fn encode(&self) -> Bytes {
        let mut buf = Vec::with_capacity(64);
        match &self.mutation {
            Mutation::Insert(r) => encode_insert(&mut buf, r),
            Mutation::Update(r) => encode_update(&mut buf, r),
            Mutation::Delete(r) => encode_delete(&mut buf, r),
        }
        buf.push(self.kind().tag());
        buf.push(self.origin.tag());
        Bytes::from(buf)
    }

    /// Reads the kind byte without decoding the body.
    pub fn peek_kind(src: &[u8]) -> Result<RequestKind> {
        let (_, kind, _) = split_trailer(src)?;
        RequestKind::from_tag(kind)
    }

    /// Parses a value written by [`StagedValue::encode`].
    pub fn decode(src: &[u8]) -> Result<Self> {
        let (body, kind, origin) = split_trailer(src)?;
        let mutation = match RequestKind::from_tag(kind)? {
            RequestKind::Insert => Mutation::Insert(decode_insert(body)?),
            RequestKind::Update => Mutation::Update(decode_update(body)?),
            RequestKind::Delete => Mutation::Delete(decode_delete(body)?),
        };
        Ok(Self {
            mutation,
            origin: Origin::from_tag(origin)?,
        })
    }

    /// Decodes a value that must carry an `M` request.
    pub fn decode_as<M: ChainMutation>(src: &[u8]) -> Result<(M, Origin)> {
        if Self::peek_kind(src)? != M::KIND {
            return Err(ChainError::Decode("staged value kind does not match"));
        }
        let value = Self::decode(src)?;
        Ok((M::from_mutation(value.mutation)?, value.origin))
    }
}

fn split_trailer(src: &[u8]) -> Result<(&[u8], u8, u8)> {
    if src.len() < TRAILER_LEN + 1 {
        return Err(ChainError::Decode("staged value truncated"));
    }
    let (body, trailer) = src.split_at(src.len() - TRAILER_LEN);
    Ok((body, trailer[0], trailer[1]))
}

fn encode_header(buf: &mut Vec<u8>, shape: u8, space: SpaceId, part: PartitionId) {
    buf.push(shape);
    var::encode_u64(u64::from(space.0), buf);
    var::encode_u64(u64::from(part.0), buf);
}

fn decode_header(cur: &mut Cursor<'_>, shape: u8) -> Result<(SpaceId, PartitionId)> {
    if cur.u8()? != shape {
        return Err(ChainError::Decode("payload shape does not match request kind"));
    }
    Ok((SpaceId(read_u32(cur)?), PartitionId(read_u32(cur)?)))
}

fn read_u32(cur: &mut Cursor<'_>) -> Result<u32> {
    u32::try_from(cur.varint()?).map_err(|_| ChainError::Decode("id out of range"))
}

fn read_len(cur: &mut Cursor<'_>) -> Result<usize> {
    let len = usize::try_from(cur.varint()?).map_err(|_| ChainError::Decode("length overflow"))?;
    // every element takes at least one byte
    if len > cur.remaining() {
        return Err(ChainError::Decode("element count exceeds payload"));
    }
    Ok(len)
}

fn read_bool(cur: &mut Cursor<'_>) -> Result<bool> {
    match cur.u8()? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(ChainError::Decode("invalid bool")),
    }
}

fn encode_vid(buf: &mut Vec<u8>, vid: &VertexId) {
    match vid {
        VertexId::Int(v) => {
            buf.push(VID_INT);
            var::encode_i64(*v, buf);
        }
        VertexId::Str(s) => {
            buf.push(VID_STR);
            var::put_bytes(buf, s.as_bytes());
        }
    }
}

fn decode_vid(cur: &mut Cursor<'_>) -> Result<VertexId> {
    match cur.u8()? {
        VID_INT => Ok(VertexId::Int(cur.zigzag()?)),
        VID_STR => Ok(VertexId::Str(cur.string()?)),
        _ => Err(ChainError::Decode("unknown vertex id tag")),
    }
}

fn encode_edge(buf: &mut Vec<u8>, edge: &EdgeRef) {
    encode_vid(buf, &edge.src);
    var::encode_i64(i64::from(edge.edge_type.0), buf);
    var::encode_i64(edge.rank, buf);
    encode_vid(buf, &edge.dst);
}

fn decode_edge(cur: &mut Cursor<'_>) -> Result<EdgeRef> {
    let src = decode_vid(cur)?;
    let edge_type = i32::try_from(cur.zigzag()?)
        .map_err(|_| ChainError::Decode("edge type out of range"))?;
    let rank = cur.zigzag()?;
    let dst = decode_vid(cur)?;
    Ok(EdgeRef {
        src,
        edge_type: EdgeType(edge_type),
        rank,
        dst,
    })
}

fn encode_insert(buf: &mut Vec<u8>, req: &InsertEdgesRequest) {
    encode_header(buf, SHAPE_INSERT, req.space, req.part);
    buf.push(u8::from(req.if_not_exists));
    var::encode_u64(req.prop_names.len() as u64, buf);
    for name in &req.prop_names {
        var::put_bytes(buf, name.as_bytes());
    }
    var::encode_u64(req.edges.len() as u64, buf);
    for edge in &req.edges {
        encode_edge(buf, &edge.edge);
        var::encode_u64(edge.props.len() as u64, buf);
        for value in &edge.props {
            write_prop(buf, value);
        }
    }
}

fn decode_insert(body: &[u8]) -> Result<InsertEdgesRequest> {
    let mut cur = Cursor::new(body);
    let (space, part) = decode_header(&mut cur, SHAPE_INSERT)?;
    let if_not_exists = read_bool(&mut cur)?;
    let names = read_len(&mut cur)?;
    let prop_names = (0..names)
        .map(|_| cur.string())
        .collect::<Result<Vec<_>>>()?;
    let count = read_len(&mut cur)?;
    let mut edges = Vec::with_capacity(count);
    for _ in 0..count {
        let edge = decode_edge(&mut cur)?;
        let props_len = read_len(&mut cur)?;
        let props = (0..props_len)
            .map(|_| read_prop(&mut cur))
            .collect::<Result<Vec<_>>>()?;
        edges.push(NewEdge { edge, props });
    }
    cur.finish()?;
    Ok(InsertEdgesRequest {
        space,
        part,
        prop_names,
        edges,
        if_not_exists,
    })
}

fn encode_update(buf: &mut Vec<u8>, req: &UpdateEdgeRequest) {
    encode_header(buf, SHAPE_UPDATE, req.space, req.part);
    encode_edge(buf, &req.edge);
    buf.push(u8::from(req.insertable));
    var::encode_u64(req.updated_props.len() as u64, buf);
    for prop in &req.updated_props {
        var::put_bytes(buf, prop.name.as_bytes());
        write_prop(buf, &prop.value);
    }
}

fn decode_update(body: &[u8]) -> Result<UpdateEdgeRequest> {
    let mut cur = Cursor::new(body);
    let (space, part) = decode_header(&mut cur, SHAPE_UPDATE)?;
    let edge = decode_edge(&mut cur)?;
    let insertable = read_bool(&mut cur)?;
    let count = read_len(&mut cur)?;
    let mut updated_props = Vec::with_capacity(count);
    for _ in 0..count {
        let name = cur.string()?;
        let value = read_prop(&mut cur)?;
        updated_props.push(UpdatedProp { name, value });
    }
    cur.finish()?;
    Ok(UpdateEdgeRequest {
        space,
        part,
        edge,
        updated_props,
        insertable,
    })
}

fn encode_delete(buf: &mut Vec<u8>, req: &DeleteEdgesRequest) {
    encode_header(buf, SHAPE_DELETE, req.space, req.part);
    var::encode_u64(req.edges.len() as u64, buf);
    for edge in &req.edges {
        encode_edge(buf, edge);
    }
}

fn decode_delete(body: &[u8]) -> Result<DeleteEdgesRequest> {
    let mut cur = Cursor::new(body);
    let (space, part) = decode_header(&mut cur, SHAPE_DELETE)?;
    let count = read_len(&mut cur)?;
    let edges = (0..count)
        .map(|_| decode_edge(&mut cur))
        .collect::<Result<Vec<_>>>()?;
    cur.finish()?;
    Ok(DeleteEdgesRequest { space, part, edges })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PropValue;

    fn delete() -> DeleteEdgesRequest {
        DeleteEdgesRequest {
            space: SpaceId(4),
            part: PartitionId(2),
            edges: vec![EdgeRef::new("a", EdgeType(7), -3, "b")],
        }
    }

    fn insert() -> InsertEdgesRequest {
        InsertEdgesRequest {
            space: SpaceId(4),
            part: PartitionId(2),
            prop_names: vec!["w".into(), "label".into()],
            edges: vec![NewEdge {
                edge: EdgeRef::new(1, EdgeType(7), 0, 2),
                props: vec![PropValue::Float(0.25), PropValue::Str("x".into())],
            }],
            if_not_exists: false,
        }
    }

    #[test]
    fn kind_and_origin_survive() {
        let value = StagedValue::new(delete().into_mutation(), Origin::Upgraded);
        let raw = value.encode();
        assert_eq!(StagedValue::peek_kind(&raw).unwrap(), RequestKind::Delete);
        assert_eq!(StagedValue::decode(&raw).unwrap(), value);
    }

    #[test]
    fn insert_body_under_delete_kind_is_rejected() {
        let mut raw = StagedValue::new(insert().into_mutation(), Origin::Fresh)
            .encode()
            .to_vec();
        let kind_at = raw.len() - 2;
        raw[kind_at] = RequestKind::Delete.tag();
        assert!(matches!(StagedValue::decode(&raw), Err(ChainError::Decode(_))));
        assert!(matches!(
            StagedValue::decode_as::<DeleteEdgesRequest>(&raw),
            Err(ChainError::Decode(_))
        ));
    }

    #[test]
    fn decode_as_checks_kind() {
        let raw = StagedValue::new(insert().into_mutation(), Origin::Fresh).encode();
        assert!(StagedValue::decode_as::<UpdateEdgeRequest>(&raw).is_err());
        let (req, origin) = StagedValue::decode_as::<InsertEdgesRequest>(&raw).unwrap();
        assert_eq!(req, insert());
        assert_eq!(origin, Origin::Fresh);
    }

    #[test]
    fn truncated_values_fail_cleanly() {
        let raw = StagedValue::new(insert().into_mutation(), Origin::Fresh).encode();
        for cut in 0..raw.len() - 2 {
            let mut short = raw[..cut].to_vec();
            short.extend_from_slice(&raw[raw.len() - 2..]);
            assert!(StagedValue::decode(&short).is_err(), "cut at {cut}");
        }
    }
}
