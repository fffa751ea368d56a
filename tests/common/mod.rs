#![allow(dead_code)]

use std::sync::{Arc, Once};

use sombra_chain::chain::memory::{InMemoryTerms, LoopbackClient};
use sombra_chain::chain::{
    ChainEnv, DeleteEdgesRequest, HashRouter, InsertEdgesRequest, NewEdge, RemoteHandler,
    UpdateEdgeRequest, UpdatedProp,
};
use sombra_chain::storage::keys::{edge_table, staged_table};
use sombra_chain::storage::{
    CounterMetrics, EdgeKey, EdgeRef, EdgeRow, EdgeWriter, KvStore, MemStore, NoIndex, Phase,
};
use sombra_chain::types::{EdgeType, PartitionId, PropValue, SpaceId, VidSpec};
use sombra_chain::ChainConfig;
use tracing_subscriber::EnvFilter;

pub const SPACE: SpaceId = SpaceId(1);
/// Owns even vertex ids.
pub const P1: PartitionId = PartitionId(1);
/// Owns odd vertex ids.
pub const P2: PartitionId = PartitionId(2);
pub const FOLLOWS: EdgeType = EdgeType(7);

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("sombra_chain=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_test_writer()
            .try_init();
    });
}

/// Two partitions of one space, both led by this process and sharing a store.
pub struct Cluster {
    pub store: Arc<MemStore>,
    pub terms: Arc<InMemoryTerms>,
    pub router: Arc<HashRouter>,
    pub client: Arc<LoopbackClient>,
    pub metrics: Arc<CounterMetrics>,
    pub env: ChainEnv,
}

impl Cluster {
    pub fn new() -> Self {
        Self::with_config(
            ChainConfig::default()
                .with_retry_limit(2)
                .with_rpc_timeout_ms(200),
        )
    }

    pub fn with_config(config: ChainConfig) -> Self {
        init_tracing();
        let store = Arc::new(MemStore::new());
        let terms = Arc::new(InMemoryTerms::new());
        let router = Arc::new(HashRouter::new().with_space(SPACE, VidSpec::int64(), 2));
        for part in [P1, P2] {
            store.add_part(SPACE, part);
        }
        terms.lead_all(SPACE, 2);
        let handler = RemoteHandler::new(
            store.clone(),
            terms.clone(),
            router.clone(),
            Arc::new(NoIndex),
        );
        let client = Arc::new(LoopbackClient::new(handler));
        let metrics = Arc::new(CounterMetrics::default());
        let env = ChainEnv::new(store.clone(), terms.clone(), router.clone(), client.clone())
            .with_config(config)
            .with_metrics(metrics.clone());
        Self {
            store,
            terms,
            router,
            client,
            metrics,
            env,
        }
    }

    pub fn key(&self, part: PartitionId, edge: &EdgeRef) -> EdgeKey {
        EdgeKey::new(SPACE, part, VidSpec::int64(), edge).unwrap()
    }

    /// Out copy of `edge` on the source partition.
    pub fn out_key(&self, edge: &EdgeRef) -> EdgeKey {
        self.key(part_of(&edge.src), edge)
    }

    /// In copy of `edge` on the destination partition.
    pub fn in_key(&self, edge: &EdgeRef) -> EdgeKey {
        self.key(part_of(&edge.dst), &edge.reversed())
    }

    pub fn row(&self, key: &EdgeKey) -> Option<EdgeRow> {
        let index = NoIndex;
        EdgeWriter::new(self.store.as_ref(), &index)
            .read_row(key)
            .unwrap()
    }

    pub fn has_out(&self, edge: &EdgeRef) -> bool {
        self.row(&self.out_key(edge)).is_some()
    }

    pub fn has_in(&self, edge: &EdgeRef) -> bool {
        self.row(&self.in_key(edge)).is_some()
    }

    pub fn marker(&self, edge: &EdgeRef, phase: Phase) -> bool {
        let key = self.out_key(edge);
        self.store
            .get(SPACE, key.part(), key.staged(phase).as_bytes())
            .unwrap()
            .is_some()
    }

    pub fn staged_count(&self) -> usize {
        [P1, P2]
            .iter()
            .flat_map(|&part| {
                [Phase::Prime, Phase::DoublePrime]
                    .map(|phase| self.store.count_prefix(SPACE, part, &staged_table(phase, part)))
            })
            .sum()
    }

    pub fn edge_count(&self) -> usize {
        [P1, P2]
            .iter()
            .map(|&part| self.store.count_prefix(SPACE, part, &edge_table(part)))
            .sum()
    }

    pub fn parts(&self) -> Vec<(SpaceId, PartitionId)> {
        vec![(SPACE, P1), (SPACE, P2)]
    }
}

pub fn part_of(vid: &sombra_chain::types::VertexId) -> PartitionId {
    sombra_chain::chain::routing::hash_partition(vid, 2)
}

pub fn edge(src: i64, dst: i64) -> EdgeRef {
    EdgeRef::new(src, FOLLOWS, 0, dst)
}

pub fn insert(edges: &[EdgeRef], weight: i64) -> InsertEdgesRequest {
    InsertEdgesRequest {
        space: SPACE,
        part: part_of(&edges[0].src),
        prop_names: vec!["weight".to_string()],
        edges: edges
            .iter()
            .map(|e| NewEdge {
                edge: e.clone(),
                props: vec![PropValue::Int(weight)],
            })
            .collect(),
        if_not_exists: false,
    }
}

pub fn update(edge: &EdgeRef, weight: i64, insertable: bool) -> UpdateEdgeRequest {
    UpdateEdgeRequest {
        space: SPACE,
        part: part_of(&edge.src),
        edge: edge.clone(),
        updated_props: vec![UpdatedProp {
            name: "weight".to_string(),
            value: PropValue::Int(weight),
        }],
        insertable,
    }
}

pub fn delete(edges: &[EdgeRef]) -> DeleteEdgesRequest {
    DeleteEdgesRequest {
        space: SPACE,
        part: part_of(&edges[0].src),
        edges: edges.to_vec(),
    }
}

pub fn weight(row: &EdgeRow) -> Option<i64> {
    match row.get("weight") {
        Some(PropValue::Int(v)) => Some(*v),
        _ => None,
    }
}
