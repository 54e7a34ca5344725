//! The peer registry: every remote endpoint this instance knows about.
//!
//! Descriptors are created by manual configuration, discovery, hub
//! seeding, or self-registration of an unsolicited caller. They are never
//! evicted automatically - an unreachable peer is retried on every round
//! until an operator removes it explicitly.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use capmesh_core::InstanceId;

/// A known remote endpoint and what we have learned about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDescriptor {
    /// Base URL of the peer's sync API.
    pub endpoint: String,

    /// Self-reported identity, learned on first contact. Used to detect
    /// address reuse.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,

    /// Wall clock of the last fully successful exchange. Only advanced on
    /// success, so a failed cycle re-sends the same superset delta.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<i64>,

    /// Result of the most recent contact attempt.
    pub reachable: bool,
}

/// What `learn_identity` concluded about an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityUpdate {
    /// Identity recorded or confirmed.
    Confirmed,
    /// The endpoint now reports a different instance; state was reset.
    Replaced,
    /// The endpoint is this very instance; the entry was dropped.
    SelfDetected,
}

/// Thread-safe registry of peers, excluding the local instance.
pub struct PeerRegistry {
    local: InstanceId,
    inner: RwLock<HashMap<String, PeerDescriptor>>,
}

impl PeerRegistry {
    pub fn new(local: InstanceId) -> Self {
        Self {
            local,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Add a peer by endpoint. Returns false if it was already known.
    /// Reachability starts pessimistic; the first cycle decides.
    pub fn add(&self, endpoint: &str) -> bool {
        let endpoint = normalize(endpoint);
        let mut inner = self.inner.write().unwrap();
        if inner.contains_key(&endpoint) {
            return false;
        }
        inner.insert(
            endpoint.clone(),
            PeerDescriptor {
                endpoint,
                instance_id: None,
                last_sync_at: None,
                reachable: false,
            },
        );
        true
    }

    /// Add a peer found via discovery: identity already known, endpoint
    /// just announced itself, so it is reachable.
    pub fn add_discovered(&self, endpoint: &str, instance_id: InstanceId) -> bool {
        if instance_id == self.local {
            return false;
        }
        let endpoint = normalize(endpoint);
        let mut inner = self.inner.write().unwrap();
        if inner.contains_key(&endpoint) {
            return false;
        }
        info!(%endpoint, %instance_id, "discovered peer");
        inner.insert(
            endpoint.clone(),
            PeerDescriptor {
                endpoint,
                instance_id: Some(instance_id),
                last_sync_at: None,
                reachable: true,
            },
        );
        true
    }

    /// Remove a peer explicitly. Returns the removed descriptor.
    pub fn remove(&self, endpoint: &str) -> Option<PeerDescriptor> {
        let endpoint = normalize(endpoint);
        self.inner.write().unwrap().remove(&endpoint)
    }

    /// Look up one peer.
    pub fn get(&self, endpoint: &str) -> Option<PeerDescriptor> {
        let endpoint = normalize(endpoint);
        self.inner.read().unwrap().get(&endpoint).cloned()
    }

    /// All known peers, ordered by endpoint for stable output.
    pub fn list(&self) -> Vec<PeerDescriptor> {
        let inner = self.inner.read().unwrap();
        let mut peers: Vec<PeerDescriptor> = inner.values().cloned().collect();
        peers.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        peers
    }

    /// Record the peer's self-reported identity after a handshake or an
    /// unsolicited contact.
    pub fn learn_identity(&self, endpoint: &str, instance_id: InstanceId) -> IdentityUpdate {
        let endpoint = normalize(endpoint);

        if instance_id == self.local {
            let mut inner = self.inner.write().unwrap();
            if inner.remove(&endpoint).is_some() {
                warn!(%endpoint, "endpoint resolves to this instance; dropping peer");
            }
            return IdentityUpdate::SelfDetected;
        }

        let mut inner = self.inner.write().unwrap();
        let Some(descriptor) = inner.get_mut(&endpoint) else {
            return IdentityUpdate::Confirmed;
        };

        match &descriptor.instance_id {
            Some(known) if *known != instance_id => {
                // Address reuse: a different instance answers at this
                // endpoint now. Start over on the sync watermark.
                info!(
                    %endpoint,
                    old = %known,
                    new = %instance_id,
                    "peer endpoint changed identity"
                );
                descriptor.instance_id = Some(instance_id);
                descriptor.last_sync_at = None;
                IdentityUpdate::Replaced
            }
            _ => {
                descriptor.instance_id = Some(instance_id);
                IdentityUpdate::Confirmed
            }
        }
    }

    /// Both directions of a cycle succeeded.
    pub fn record_success(&self, endpoint: &str, at: i64) {
        let endpoint = normalize(endpoint);
        let mut inner = self.inner.write().unwrap();
        if let Some(descriptor) = inner.get_mut(&endpoint) {
            descriptor.last_sync_at = Some(at);
            descriptor.reachable = true;
        }
    }

    /// A contact attempt failed. `last_sync_at` is left alone so the next
    /// cycle re-sends the full pending delta.
    pub fn record_failure(&self, endpoint: &str) {
        let endpoint = normalize(endpoint);
        let mut inner = self.inner.write().unwrap();
        if let Some(descriptor) = inner.get_mut(&endpoint) {
            descriptor.reachable = false;
        }
    }

    /// Register an unsolicited caller that supplied its own endpoint.
    pub fn observe_caller(&self, endpoint: &str, instance_id: InstanceId) {
        if instance_id == self.local {
            return;
        }
        if self.add(endpoint) {
            info!(endpoint = %normalize(endpoint), %instance_id, "peer self-registered");
        }
        self.learn_identity(endpoint, instance_id);
    }
}

fn normalize(endpoint: &str) -> String {
    endpoint.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PeerRegistry {
        PeerRegistry::new(InstanceId::from_string("self-id".into()))
    }

    fn id(s: &str) -> InstanceId {
        InstanceId::from_string(s.to_string())
    }

    #[test]
    fn test_add_and_list() {
        let peers = registry();
        assert!(peers.add("http://b:7411"));
        assert!(peers.add("http://a:7411/"));
        assert!(!peers.add("http://a:7411")); // trailing slash normalized away

        let listed = peers.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].endpoint, "http://a:7411");
        assert!(!listed[0].reachable);
    }

    #[test]
    fn test_remove_is_explicit_only() {
        let peers = registry();
        peers.add("http://a:7411");
        peers.record_failure("http://a:7411");

        // Failures never evict.
        assert_eq!(peers.list().len(), 1);
        assert!(peers.remove("http://a:7411").is_some());
        assert!(peers.remove("http://a:7411").is_none());
    }

    #[test]
    fn test_success_advances_watermark_failure_does_not() {
        let peers = registry();
        peers.add("http://a:7411");

        peers.record_success("http://a:7411", 5000);
        let d = peers.get("http://a:7411").unwrap();
        assert_eq!(d.last_sync_at, Some(5000));
        assert!(d.reachable);

        peers.record_failure("http://a:7411");
        let d = peers.get("http://a:7411").unwrap();
        assert_eq!(d.last_sync_at, Some(5000));
        assert!(!d.reachable);
    }

    #[test]
    fn test_address_reuse_resets_watermark() {
        let peers = registry();
        peers.add("http://a:7411");
        peers.learn_identity("http://a:7411", id("first"));
        peers.record_success("http://a:7411", 5000);

        let update = peers.learn_identity("http://a:7411", id("second"));
        assert_eq!(update, IdentityUpdate::Replaced);

        let d = peers.get("http://a:7411").unwrap();
        assert_eq!(d.instance_id, Some(id("second")));
        assert_eq!(d.last_sync_at, None);
    }

    #[test]
    fn test_self_is_excluded() {
        let peers = registry();
        peers.add("http://loop:7411");

        let update = peers.learn_identity("http://loop:7411", id("self-id"));
        assert_eq!(update, IdentityUpdate::SelfDetected);
        assert!(peers.list().is_empty());

        assert!(!peers.add_discovered("http://loop:7411", id("self-id")));
        peers.observe_caller("http://loop:7411", id("self-id"));
        assert!(peers.list().is_empty());
    }

    #[test]
    fn test_discovered_peers_start_reachable() {
        let peers = registry();
        assert!(peers.add_discovered("http://edge:7411", id("edge-1")));
        let d = peers.get("http://edge:7411").unwrap();
        assert!(d.reachable);
        assert_eq!(d.instance_id, Some(id("edge-1")));
    }

    #[test]
    fn test_observe_caller_registers_unknown() {
        let peers = registry();
        peers.observe_caller("http://new:7411", id("caller-1"));

        let d = peers.get("http://new:7411").unwrap();
        assert_eq!(d.instance_id, Some(id("caller-1")));
    }
}
