//! The Node: one running registry instance.
//!
//! A Node is an explicit context object constructed at startup - identity,
//! store, peer registry, coordinator, scheduler - with no ambient global
//! state, so several isolated nodes can coexist in one process (and one
//! test). Sync outcomes are plain return values; there is no callback
//! registry to wire up.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, info};

use capmesh_core::{InstanceInfo, Keypair, Record};
use capmesh_store::{MemoryStore, RecordStore, SqliteStore};
use capmesh_sync::discovery::DEFAULT_ANNOUNCE_INTERVAL;
use capmesh_sync::{
    ClientConfig, Discovery, PeerDescriptor, PeerRegistry, RoundReport, Scheduler, ServerState,
    SyncClient, SyncCoordinator,
};

use crate::config::{NodeConfig, TopologyMode};
use crate::error::Result;

/// A running capmesh instance: sync API server, scheduler, and (in mesh
/// mode) discovery, all bound to one identity and one store.
pub struct Node {
    identity: InstanceInfo,
    endpoint: String,
    store: Arc<dyn RecordStore>,
    peers: Arc<PeerRegistry>,
    scheduler: Arc<Scheduler>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Build and start a node from configuration.
    ///
    /// Binds the listener first so a `listen_port` of zero resolves to a
    /// real port before the endpoint is advertised anywhere.
    pub async fn start(config: NodeConfig) -> Result<Self> {
        config.validate()?;

        let identity = InstanceInfo::derive(config.instance_type.clone(), now_millis());
        let keypair = Keypair::generate();

        let store: Arc<dyn RecordStore> = match &config.data_path {
            Some(path) => Arc::new(SqliteStore::open(path)?),
            None => Arc::new(MemoryStore::new()),
        };

        let listener =
            tokio::net::TcpListener::bind(("0.0.0.0", config.listen_port)).await?;
        let port = listener.local_addr()?.port();
        let endpoint = config
            .advertised_endpoint
            .clone()
            .unwrap_or_else(|| format!("http://127.0.0.1:{port}"));

        let peers = Arc::new(PeerRegistry::new(identity.instance_id.clone()));
        if config.mode == TopologyMode::Hub {
            for hub in &config.hub_endpoints {
                peers.add(hub);
            }
        }

        let client = SyncClient::new(
            identity.instance_id.clone(),
            Some(endpoint.clone()),
            ClientConfig {
                request_timeout: config.request_timeout,
                ..Default::default()
            },
        )?;
        let coordinator = Arc::new(SyncCoordinator::new(
            identity.clone(),
            keypair,
            Some(endpoint.clone()),
            Arc::clone(&store),
            Arc::clone(&peers),
            client,
            config.max_concurrent_peer_syncs,
        ));
        let scheduler = Arc::new(Scheduler::new(coordinator, config.sync_interval));

        let state = Arc::new(ServerState {
            identity: identity.clone(),
            store: Arc::clone(&store),
            peers: Arc::clone(&peers),
            scheduler: Arc::clone(&scheduler),
            require_signed_manifests: config.require_signed_manifests,
        });

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = capmesh_sync::serve(listener, state).await {
                error!(error = %e, "sync API server stopped");
            }
        }));
        tasks.push(scheduler.spawn());

        if config.mode == TopologyMode::Mesh && config.auto_discover {
            let discovery = Discovery::new(
                identity.instance_id.clone(),
                endpoint.clone(),
                Arc::clone(&peers),
                config.discovery_port,
                DEFAULT_ANNOUNCE_INTERVAL,
            );
            tasks.push(discovery.spawn());
        }

        info!(
            instance = %identity.instance_id,
            kind = %identity.instance_type,
            %endpoint,
            "node started"
        );

        Ok(Self {
            identity,
            endpoint,
            store,
            peers,
            scheduler,
            tasks,
        })
    }

    /// This node's identity.
    pub fn identity(&self) -> &InstanceInfo {
        &self.identity
    }

    /// The endpoint peers use to reach this node.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Write or update a registry record on behalf of a collaborator.
    /// The store bumps version, timestamp, and origin.
    pub async fn write(&self, key: &str, payload: Value) -> Result<Record> {
        Ok(self
            .store
            .write_local(key, payload, &self.identity.instance_id)
            .await?)
    }

    /// Read one record.
    pub async fn get(&self, key: &str) -> Result<Option<Record>> {
        Ok(self.store.get(key).await?)
    }

    /// All records in the local store.
    pub async fn records(&self) -> Result<Vec<Record>> {
        Ok(self.store.all().await?)
    }

    /// All known peers.
    pub fn peers(&self) -> Vec<PeerDescriptor> {
        self.peers.list()
    }

    /// Add a peer by endpoint, as manual configuration would.
    pub fn add_peer(&self, endpoint: &str) -> bool {
        self.peers.add(endpoint)
    }

    /// Remove a peer explicitly.
    pub fn remove_peer(&self, endpoint: &str) -> bool {
        self.peers.remove(endpoint).is_some()
    }

    /// Run a sync round now and return the per-peer outcomes.
    pub async fn sync_now(&self) -> RoundReport {
        self.scheduler.sync_now().await
    }

    /// Stop the background tasks. Dropping the node does the same.
    pub fn shutdown(mut self) {
        self.abort_tasks();
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}
