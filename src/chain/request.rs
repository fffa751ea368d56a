//! Mutation requests handled by the chain coordinators.

use std::fmt;
use std::time::SystemTime;

use crate::chain::routing::PartitionRouter;
use crate::error::{ChainError, Result};
use crate::storage::{EdgeEdit, EdgeKey, EdgeRef, EdgeRow, EdgeWriter};
use crate::types::{PartitionId, PropValue, SpaceId};

/// Which mutation a staged value carries. Persisted as one byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Insert edges.
    Insert,
    /// Update one edge.
    Update,
    /// Delete edges.
    Delete,
}

impl RequestKind {
    pub(crate) fn tag(self) -> u8 {
        match self {
            RequestKind::Insert => b'a',
            RequestKind::Update => b'u',
            RequestKind::Delete => b'd',
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            b'a' => Ok(RequestKind::Insert),
            b'u' => Ok(RequestKind::Update),
            b'd' => Ok(RequestKind::Delete),
            _ => Err(ChainError::Decode("unknown request kind")),
        }
    }

    /// Lowercase name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Insert => "insert",
            RequestKind::Update => "update",
            RequestKind::Delete => "delete",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An edge to insert together with its property values.
#[derive(Clone, Debug, PartialEq)]
pub struct NewEdge {
    /// Edge identity.
    pub edge: EdgeRef,
    /// Values aligned with the request's `prop_names`.
    pub props: Vec<PropValue>,
}

/// Batch insert scoped to one source-side partition.
#[derive(Clone, Debug, PartialEq)]
pub struct InsertEdgesRequest {
    /// Graph space.
    pub space: SpaceId,
    /// Partition owning every edge's source vertex.
    pub part: PartitionId,
    /// Property names shared by every edge.
    pub prop_names: Vec<String>,
    /// Edges to insert.
    pub edges: Vec<NewEdge>,
    /// Keep edges that already exist instead of overwriting them.
    pub if_not_exists: bool,
}

/// One property assignment of an update.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdatedProp {
    /// Property name.
    pub name: String,
    /// New value.
    pub value: PropValue,
}

/// Single-edge update.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateEdgeRequest {
    /// Graph space.
    pub space: SpaceId,
    /// Partition owning the source vertex.
    pub part: PartitionId,
    /// Edge to update.
    pub edge: EdgeRef,
    /// Assignments in application order.
    pub updated_props: Vec<UpdatedProp>,
    /// Create the edge when it does not exist.
    pub insertable: bool,
}

/// Batch delete scoped to one source-side partition.
#[derive(Clone, Debug, PartialEq)]
pub struct DeleteEdgesRequest {
    /// Graph space.
    pub space: SpaceId,
    /// Partition owning every edge's source vertex.
    pub part: PartitionId,
    /// Edges to delete. Duplicates are allowed.
    pub edges: Vec<EdgeRef>,
}

/// Any mutation the chain layer can stage, forward or resume.
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    /// Insert edges.
    Insert(InsertEdgesRequest),
    /// Update one edge.
    Update(UpdateEdgeRequest),
    /// Delete edges.
    Delete(DeleteEdgesRequest),
}

impl Mutation {
    /// Kind tag.
    pub fn kind(&self) -> RequestKind {
        match self {
            Mutation::Insert(_) => RequestKind::Insert,
            Mutation::Update(_) => RequestKind::Update,
            Mutation::Delete(_) => RequestKind::Delete,
        }
    }

    /// Space of the request.
    pub fn space(&self) -> SpaceId {
        match self {
            Mutation::Insert(r) => r.space,
            Mutation::Update(r) => r.space,
            Mutation::Delete(r) => r.space,
        }
    }

    /// Partition the request is addressed to.
    pub fn part(&self) -> PartitionId {
        match self {
            Mutation::Insert(r) => r.part,
            Mutation::Update(r) => r.part,
            Mutation::Delete(r) => r.part,
        }
    }

    /// Edges touched, in request order.
    pub fn edges(&self) -> Vec<&EdgeRef> {
        match self {
            Mutation::Insert(r) => ChainMutation::edges(r),
            Mutation::Update(r) => ChainMutation::edges(r),
            Mutation::Delete(r) => ChainMutation::edges(r),
        }
    }

    /// Real-key edits for `keys`, which must align with [`Mutation::edges`].
    pub fn edits(&self, keys: &[EdgeKey]) -> Result<Vec<EdgeEdit>> {
        match self {
            Mutation::Insert(r) => ChainMutation::edits(r, keys),
            Mutation::Update(r) => ChainMutation::edits(r, keys),
            Mutation::Delete(r) => ChainMutation::edits(r, keys),
        }
    }
}

/// Behaviour shared by the three request shapes so one coordinator and one
/// pair of reconstructors serve every kind.
pub trait ChainMutation: Clone + fmt::Debug + Send + Sync + 'static {
    /// Kind tag of this request shape.
    const KIND: RequestKind;

    /// Graph space.
    fn space(&self) -> SpaceId;

    /// Partition the request is addressed to.
    fn part(&self) -> PartitionId;

    /// Readdresses the request.
    fn set_part(&mut self, part: PartitionId);

    /// Edges touched, in request order.
    fn edges(&self) -> Vec<&EdgeRef>;

    /// The in-edge copy of this request addressed to `remote`.
    fn mirrored(&self, remote: PartitionId) -> Self;

    /// Single-edge copies, one per edge, in request order.
    fn split(&self) -> Vec<Self>;

    /// Real-key edits for `keys`, which must align with [`ChainMutation::edges`].
    fn edits(&self, keys: &[EdgeKey]) -> Result<Vec<EdgeEdit>>;

    /// Keeps the edges whose flag is set; `keep` aligns with [`ChainMutation::edges`].
    fn retain_edges(&mut self, _keep: &[bool]) {}

    /// Freezes schema defaults for properties the request leaves out, so both
    /// copies store the values chosen here.
    fn fill_defaults(&mut self, _router: &dyn PartitionRouter, _now: SystemTime) -> Result<()> {
        Ok(())
    }

    /// Checks run under the edge locks before anything is staged.
    fn precheck(&self, _writer: &EdgeWriter<'_>, _keys: &[EdgeKey]) -> Result<()> {
        Ok(())
    }

    /// Wraps the request.
    fn into_mutation(self) -> Mutation;

    /// Unwraps a request of this kind; other kinds are a decode error.
    fn from_mutation(mutation: Mutation) -> Result<Self>;
}

fn check_aligned(edges: usize, keys: &[EdgeKey]) -> Result<()> {
    if edges != keys.len() {
        return Err(ChainError::InvalidRequest("edge keys do not match request edges"));
    }
    Ok(())
}

impl ChainMutation for InsertEdgesRequest {
    const KIND: RequestKind = RequestKind::Insert;

    fn space(&self) -> SpaceId {
        self.space
    }

    fn part(&self) -> PartitionId {
        self.part
    }

    fn set_part(&mut self, part: PartitionId) {
        self.part = part;
    }

    fn edges(&self) -> Vec<&EdgeRef> {
        self.edges.iter().map(|e| &e.edge).collect()
    }

    fn mirrored(&self, remote: PartitionId) -> Self {
        Self {
            part: remote,
            edges: self
                .edges
                .iter()
                .map(|e| NewEdge {
                    edge: e.edge.reversed(),
                    props: e.props.clone(),
                })
                .collect(),
            ..self.clone()
        }
    }

    fn split(&self) -> Vec<Self> {
        self.edges
            .iter()
            .map(|e| Self {
                edges: vec![e.clone()],
                ..self.clone()
            })
            .collect()
    }

    fn retain_edges(&mut self, keep: &[bool]) {
        let mut flags = keep.iter();
        self.edges.retain(|_| flags.next().copied().unwrap_or(true));
    }

    fn fill_defaults(&mut self, router: &dyn PartitionRouter, now: SystemTime) -> Result<()> {
        let Some(first) = self.edges.first() else {
            return Ok(());
        };
        let Some(fields) = router.edge_schema(self.space, first.edge.edge_type) else {
            return Ok(());
        };
        // Without names the values are positional over the whole schema;
        // with names, every defaulted property the request skips is appended.
        let names: Vec<String> = if self.prop_names.is_empty() {
            fields.iter().map(|f| f.name.clone()).collect()
        } else {
            let extra = fields
                .iter()
                .filter(|f| f.default.is_some() && !self.prop_names.contains(&f.name))
                .map(|f| f.name.clone());
            self.prop_names.iter().cloned().chain(extra).collect()
        };
        let fill: Vec<PropValue> = names
            .iter()
            .map(|name| {
                fields
                    .iter()
                    .find(|f| &f.name == name)
                    .and_then(|f| f.default.as_ref())
                    .map_or(PropValue::Null, |d| d.resolve(now))
            })
            .collect();
        for edge in &mut self.edges {
            let have = edge.props.len();
            if have > fill.len() {
                return Err(ChainError::InvalidRequest(
                    "more property values than schema properties",
                ));
            }
            edge.props.extend_from_slice(&fill[have..]);
        }
        self.prop_names = names;
        Ok(())
    }

    fn edits(&self, keys: &[EdgeKey]) -> Result<Vec<EdgeEdit>> {
        check_aligned(self.edges.len(), keys)?;
        self.edges
            .iter()
            .zip(keys)
            .map(|(e, key)| {
                Ok(EdgeEdit::Insert {
                    key: key.clone(),
                    row: EdgeRow::from_parts(&self.prop_names, &e.props)?,
                    if_not_exists: self.if_not_exists,
                })
            })
            .collect()
    }

    fn into_mutation(self) -> Mutation {
        Mutation::Insert(self)
    }

    fn from_mutation(mutation: Mutation) -> Result<Self> {
        match mutation {
            Mutation::Insert(r) => Ok(r),
            _ => Err(ChainError::Decode("expected an insert request")),
        }
    }
}

impl ChainMutation for UpdateEdgeRequest {
    const KIND: RequestKind = RequestKind::Update;

    fn space(&self) -> SpaceId {
        self.space
    }

    fn part(&self) -> PartitionId {
        self.part
    }

    fn set_part(&mut self, part: PartitionId) {
        self.part = part;
    }

    fn edges(&self) -> Vec<&EdgeRef> {
        vec![&self.edge]
    }

    fn mirrored(&self, remote: PartitionId) -> Self {
        Self {
            part: remote,
            edge: self.edge.reversed(),
            ..self.clone()
        }
    }

    fn split(&self) -> Vec<Self> {
        vec![self.clone()]
    }

    fn edits(&self, keys: &[EdgeKey]) -> Result<Vec<EdgeEdit>> {
        check_aligned(1, keys)?;
        Ok(vec![EdgeEdit::Update {
            key: keys[0].clone(),
            props: self
                .updated_props
                .iter()
                .map(|p| (p.name.clone(), p.value.clone()))
                .collect(),
            insertable: self.insertable,
        }])
    }

    fn precheck(&self, writer: &EdgeWriter<'_>, keys: &[EdgeKey]) -> Result<()> {
        check_aligned(1, keys)?;
        if self.insertable || writer.exists(&keys[0])? {
            Ok(())
        } else {
            Err(ChainError::EdgeNotFound)
        }
    }

    fn into_mutation(self) -> Mutation {
        Mutation::Update(self)
    }

    fn from_mutation(mutation: Mutation) -> Result<Self> {
        match mutation {
            Mutation::Update(r) => Ok(r),
            _ => Err(ChainError::Decode("expected an update request")),
        }
    }
}

impl ChainMutation for DeleteEdgesRequest {
    const KIND: RequestKind = RequestKind::Delete;

    fn space(&self) -> SpaceId {
        self.space
    }

    fn part(&self) -> PartitionId {
        self.part
    }

    fn set_part(&mut self, part: PartitionId) {
        self.part = part;
    }

    fn edges(&self) -> Vec<&EdgeRef> {
        self.edges.iter().collect()
    }

    fn mirrored(&self, remote: PartitionId) -> Self {
        Self {
            space: self.space,
            part: remote,
            edges: self.edges.iter().map(EdgeRef::reversed).collect(),
        }
    }

    fn retain_edges(&mut self, keep: &[bool]) {
        let mut flags = keep.iter();
        self.edges.retain(|_| flags.next().copied().unwrap_or(true));
    }

    fn split(&self) -> Vec<Self> {
        self.edges
            .iter()
            .map(|e| Self {
                space: self.space,
                part: self.part,
                edges: vec![e.clone()],
            })
            .collect()
    }

    fn edits(&self, keys: &[EdgeKey]) -> Result<Vec<EdgeEdit>> {
        check_aligned(self.edges.len(), keys)?;
        Ok(keys
            .iter()
            .map(|key| EdgeEdit::Delete { key: key.clone() })
            .collect())
    }

    fn into_mutation(self) -> Mutation {
        Mutation::Delete(self)
    }

    fn from_mutation(mutation: Mutation) -> Result<Self> {
        match mutation {
            Mutation::Delete(r) => Ok(r),
            _ => Err(ChainError::Decode("expected a delete request")),
        }
    }
}
