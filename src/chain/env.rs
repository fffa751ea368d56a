use std::sync::Arc;

use crate::chain::forwarder::{Forwarder, RemoteClient};
use crate::chain::processor::{drive, LocalChain};
use crate::chain::request::{DeleteEdgesRequest, InsertEdgesRequest, UpdateEdgeRequest};
use crate::chain::resume::ResumeFactory;
use crate::chain::routing::PartitionRouter;
use crate::chain::term::TermOracle;
use crate::config::ChainConfig;
use crate::error::Result;
use crate::primitives::concurrency::EdgeLockTable;
use crate::storage::{default_metrics, ChainMetrics, EdgeWriter, IndexHook, KvStore, NoIndex};

/// Collaborators and settings shared by every coordinator on a node.
///
/// Cloning is cheap; clones share the lock table, so every coordinator of a
/// node must be built from clones of one environment.
#[derive(Clone)]
pub struct ChainEnv {
    store: Arc<dyn KvStore>,
    terms: Arc<dyn TermOracle>,
    router: Arc<dyn PartitionRouter>,
    client: Arc<dyn RemoteClient>,
    index: Arc<dyn IndexHook>,
    locks: Arc<EdgeLockTable>,
    metrics: Arc<dyn ChainMetrics>,
    config: ChainConfig,
}

impl ChainEnv {
    /// Creates an environment with default settings, no indexes and no metrics.
    pub fn new(
        store: Arc<dyn KvStore>,
        terms: Arc<dyn TermOracle>,
        router: Arc<dyn PartitionRouter>,
        client: Arc<dyn RemoteClient>,
    ) -> Self {
        Self {
            store,
            terms,
            router,
            client,
            index: Arc::new(NoIndex),
            locks: EdgeLockTable::new(),
            metrics: default_metrics(),
            config: ChainConfig::default(),
        }
    }

    /// Sets the secondary-index hook used by the apply path.
    pub fn with_index(mut self, index: Arc<dyn IndexHook>) -> Self {
        self.index = index;
        self
    }

    /// Sets the metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn ChainMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replaces the settings.
    pub fn with_config(mut self, config: ChainConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the remote client.
    pub fn with_client(mut self, client: Arc<dyn RemoteClient>) -> Self {
        self.client = client;
        self
    }

    /// Local store.
    pub fn store(&self) -> &dyn KvStore {
        self.store.as_ref()
    }

    /// Shared handle to the local store.
    pub fn store_handle(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.store)
    }

    /// Leadership oracle.
    pub fn terms(&self) -> &dyn TermOracle {
        self.terms.as_ref()
    }

    /// Shared handle to the leadership oracle.
    pub fn terms_handle(&self) -> Arc<dyn TermOracle> {
        Arc::clone(&self.terms)
    }

    /// Partition router.
    pub fn router(&self) -> &dyn PartitionRouter {
        self.router.as_ref()
    }

    /// Shared handle to the partition router.
    pub fn router_handle(&self) -> Arc<dyn PartitionRouter> {
        Arc::clone(&self.router)
    }

    /// Secondary-index hook.
    pub fn index_handle(&self) -> Arc<dyn IndexHook> {
        Arc::clone(&self.index)
    }

    /// Edge lock table.
    pub fn locks(&self) -> &Arc<EdgeLockTable> {
        &self.locks
    }

    /// Metrics sink.
    pub fn metrics(&self) -> &dyn ChainMetrics {
        self.metrics.as_ref()
    }

    /// Settings.
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Apply path over the local store.
    pub fn writer(&self) -> EdgeWriter<'_> {
        EdgeWriter::new(self.store.as_ref(), self.index.as_ref())
    }

    /// Forwarder over the remote client.
    pub fn forwarder(&self) -> Forwarder {
        Forwarder::new(Arc::clone(&self.client), &self.config)
    }

    /// Resume dispatch factory over this environment.
    pub fn resume_factory(&self) -> ResumeFactory {
        ResumeFactory::new(self.clone())
    }

    /// Inserts edges through the chain protocol.
    pub async fn insert_edges(&self, request: InsertEdgesRequest) -> Result<()> {
        drive(LocalChain::new(self.clone(), request)).await
    }

    /// Updates one edge through the chain protocol.
    pub async fn update_edge(&self, request: UpdateEdgeRequest) -> Result<()> {
        drive(LocalChain::new(self.clone(), request)).await
    }

    /// Deletes edges through the chain protocol.
    pub async fn delete_edges(&self, request: DeleteEdgesRequest) -> Result<()> {
        drive(LocalChain::new(self.clone(), request)).await
    }
}
