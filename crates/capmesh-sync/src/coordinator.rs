//! The sync coordinator: one cycle against one peer, one round over all.
//!
//! A cycle is pull-then-push: the peer's delta is applied locally before
//! the local delta is computed, so a cycle never pushes back a record in a
//! form stale relative to what it just learned. Cycles against different
//! peers are independent; convergence comes from the resolver's
//! determinism, not from ordering.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use capmesh_core::{InstanceInfo, Keypair};
use capmesh_store::{ApplyOutcome, RecordStore, StoreError};

use crate::client::SyncClient;
use crate::error::{Result, SyncError};
use crate::manifest::{limits, PushSummary, SyncManifest};
use crate::peers::{IdentityUpdate, PeerDescriptor, PeerRegistry};

/// Outcome of one sync cycle against one peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub endpoint: String,
    pub success: bool,
    /// Local application tallies for the records pulled from the peer.
    pub pulled: PushSummary,
    /// The peer's tallies for the delta pushed to it.
    pub pushed: PushSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a round: one cycle report per known peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundReport {
    pub peers: Vec<CycleReport>,
}

impl RoundReport {
    pub fn successes(&self) -> usize {
        self.peers.iter().filter(|c| c.success).count()
    }
}

/// Orchestrates sync cycles using the transport client, the record store,
/// and the peer registry.
pub struct SyncCoordinator {
    identity: InstanceInfo,
    keypair: Keypair,
    local_endpoint: Option<String>,
    store: Arc<dyn RecordStore>,
    peers: Arc<PeerRegistry>,
    client: SyncClient,
    max_concurrent: usize,
}

impl SyncCoordinator {
    pub fn new(
        identity: InstanceInfo,
        keypair: Keypair,
        local_endpoint: Option<String>,
        store: Arc<dyn RecordStore>,
        peers: Arc<PeerRegistry>,
        client: SyncClient,
        max_concurrent: usize,
    ) -> Self {
        Self {
            identity,
            keypair,
            local_endpoint,
            store,
            peers,
            client,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Run one cycle against one peer. Errors are folded into the report;
    /// this never fails the caller.
    pub async fn sync_cycle(&self, peer: &PeerDescriptor) -> CycleReport {
        match self.run_cycle(peer).await {
            Ok((pulled, pushed)) => {
                self.peers.record_success(&peer.endpoint, now_millis());
                debug!(
                    endpoint = %peer.endpoint,
                    applied = pulled.accepted,
                    pushed = pushed.accepted,
                    "sync cycle complete"
                );
                CycleReport {
                    endpoint: peer.endpoint.clone(),
                    success: true,
                    pulled,
                    pushed,
                    error: None,
                }
            }
            Err(e) => {
                // A self-pointing endpoint was already dropped from the
                // registry; everything else is marked unreachable and
                // retried on the next round with the same watermark.
                if !matches!(e, SyncError::SelfEndpoint) {
                    self.peers.record_failure(&peer.endpoint);
                }
                info!(endpoint = %peer.endpoint, error = %e, "sync cycle failed");
                CycleReport {
                    endpoint: peer.endpoint.clone(),
                    success: false,
                    pulled: PushSummary::default(),
                    pushed: PushSummary::default(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn run_cycle(&self, peer: &PeerDescriptor) -> Result<(PushSummary, PushSummary)> {
        let endpoint = &peer.endpoint;

        // 1. Handshake: learn or confirm the peer's identity.
        let document = self.client.handshake(endpoint).await?;
        let update = self
            .peers
            .learn_identity(endpoint, document.instance_id.clone());
        if update == IdentityUpdate::SelfDetected {
            return Err(SyncError::SelfEndpoint);
        }

        // Re-read the descriptor: an identity replacement just reset the
        // watermark and the whole history must flow again.
        let since = self
            .peers
            .get(endpoint)
            .and_then(|d| d.last_sync_at)
            .unwrap_or(0);

        // 2. Pull the peer's delta and apply it through the resolver.
        let pull = self.client.pull(endpoint, since).await?;
        let mut pulled = PushSummary::default();
        for record in &pull.records {
            match self.store.apply(record).await {
                Ok(ApplyOutcome::Applied) => pulled.accepted += 1,
                Ok(ApplyOutcome::Superseded) => pulled.superseded += 1,
                Err(StoreError::InvalidRecord(e)) => {
                    warn!(key = %record.key, error = %e, "rejected record from peer");
                    pulled.rejected += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        // 3. Push the local delta, computed after the pull was applied.
        let delta = self.store.delta(since).await?;
        let mut pushed = PushSummary::default();
        for chunk in delta.chunks(limits::MAX_RECORDS_PER_MANIFEST) {
            let mut manifest =
                SyncManifest::new(self.identity.instance_id.clone(), since, chunk.to_vec());
            if let Some(local_endpoint) = &self.local_endpoint {
                manifest = manifest.with_endpoint(local_endpoint.clone());
            }
            let manifest = manifest.sign(&self.keypair)?;
            pushed.absorb(self.client.push(endpoint, &manifest).await?);
        }

        Ok((pulled, pushed))
    }

    /// Run one cycle against every known peer, at most `max_concurrent`
    /// in flight. One peer's failure never blocks the others.
    pub async fn sync_round(self: Arc<Self>) -> RoundReport {
        let peers = self.peers.list();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut cycles = JoinSet::new();

        for peer in peers {
            let coordinator = Arc::clone(&self);
            let slots = Arc::clone(&semaphore);
            cycles.spawn(async move {
                let _permit = slots.acquire_owned().await.expect("semaphore never closed");
                coordinator.sync_cycle(&peer).await
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = cycles.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => warn!(error = %e, "sync cycle task panicked"),
            }
        }
        reports.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        RoundReport { peers: reports }
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
