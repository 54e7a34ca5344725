//! End-to-end convergence tests: live nodes exchanging records over HTTP.
//!
//! Nodes bind port zero, run without discovery, and sync only when the
//! test says so, which keeps every scenario deterministic.

use std::time::Duration;

use serde_json::json;

use capmesh::{Node, NodeConfig, TopologyMode};
use capmesh_sync::{ClientConfig, SyncClient, SyncManifest};
use capmesh_testkit::fixtures::{instance_id, record};

fn test_config() -> NodeConfig {
    NodeConfig {
        listen_port: 0,
        auto_discover: false,
        sync_interval: Duration::from_secs(3600),
        request_timeout: Duration::from_millis(800),
        ..Default::default()
    }
}

async fn start_node() -> Node {
    Node::start(test_config()).await.expect("node should start")
}

/// Push fabricated records straight through the HTTP API, the way an
/// external collaborator would seed state.
async fn seed(node: &Node, records: Vec<capmesh::Record>) {
    let client = SyncClient::new(
        instance_id("seeder"),
        None,
        ClientConfig::default(),
    )
    .unwrap();
    let manifest = SyncManifest::new(instance_id("seeder"), 0, records);
    let summary = client.push(node.endpoint(), &manifest).await.unwrap();
    assert_eq!(summary.rejected, 0, "seed records must be valid");
}

/// Scenario A: a record created on one instance propagates verbatim to a
/// peer that never saw the key.
#[tokio::test]
async fn scenario_a_fresh_record_propagates() {
    let a = start_node().await;
    let b = start_node().await;

    let written = a.write("x", json!({"capability": "search"})).await.unwrap();
    assert_eq!(written.version, 1);

    b.add_peer(a.endpoint());
    let report = b.sync_now().await;
    assert_eq!(report.successes(), 1);
    assert_eq!(report.peers[0].pulled.accepted, 1);

    let replicated = b.get("x").await.unwrap().expect("record should replicate");
    assert_eq!(replicated, written);
}

/// Scenario B: with diverged versions of the same key, both sides
/// converge on the higher version regardless of sync direction.
#[tokio::test]
async fn scenario_b_higher_version_wins() {
    let a = start_node().await;
    let b = start_node().await;

    a.write("x", json!({"rev": "first"})).await.unwrap();
    let winning = a.write("x", json!({"rev": "second"})).await.unwrap();
    assert_eq!(winning.version, 2);

    let losing = b.write("x", json!({"rev": "rival"})).await.unwrap();
    assert_eq!(losing.version, 1);

    b.add_peer(a.endpoint());
    let report = b.sync_now().await;
    assert_eq!(report.successes(), 1);

    let on_a = a.get("x").await.unwrap().unwrap();
    let on_b = b.get("x").await.unwrap().unwrap();
    assert_eq!(on_a, winning);
    assert_eq!(on_b, winning);
}

/// Scenario C: equal version and equal timestamp (clock skew); the
/// lexicographically higher origin id must win on both sides.
#[tokio::test]
async fn scenario_c_tie_breaks_deterministically() {
    let a = start_node().await;
    let b = start_node().await;

    seed(&a, vec![record("y", 3, 5000, "aaaa")]).await;
    seed(&b, vec![record("y", 3, 5000, "bbbb")]).await;

    b.add_peer(a.endpoint());
    let report = b.sync_now().await;
    assert_eq!(report.successes(), 1);
    // B's copy won locally; A accepted B's copy on the push leg.
    assert_eq!(report.peers[0].pulled.superseded, 1);
    assert_eq!(report.peers[0].pushed.accepted, 1);

    let on_a = a.get("y").await.unwrap().unwrap();
    let on_b = b.get("y").await.unwrap().unwrap();
    assert_eq!(on_a.origin_instance, instance_id("bbbb"));
    assert_eq!(on_b, on_a);
}

/// Scenario D: a peer that stayed unreachable accumulates a delta; the
/// first successful cycle after recovery delivers all of it because the
/// watermark never advanced.
#[tokio::test]
async fn scenario_d_full_delta_after_recovery() {
    // Reserve a port for the peer that is not up yet.
    let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = reserved.local_addr().unwrap().port();
    drop(reserved);

    let b = start_node().await;
    b.add_peer(&format!("http://127.0.0.1:{port}"));

    b.write("first", json!(1)).await.unwrap();
    let report = b.sync_now().await;
    assert_eq!(report.successes(), 0);

    let down = &b.peers()[0];
    assert!(!down.reachable);
    assert_eq!(down.last_sync_at, None);

    // More writes while the peer is still down.
    b.write("second", json!(2)).await.unwrap();

    // The peer comes up on the reserved port.
    let a = Node::start(NodeConfig {
        listen_port: port,
        ..test_config()
    })
    .await
    .expect("recovered node should start");

    let report = b.sync_now().await;
    assert_eq!(report.successes(), 1);
    assert_eq!(report.peers[0].pushed.accepted, 2);

    assert!(a.get("first").await.unwrap().is_some());
    assert!(a.get("second").await.unwrap().is_some());

    let recovered = &b.peers()[0];
    assert!(recovered.reachable);
    assert!(recovered.last_sync_at.is_some());
}

/// Disjoint writes on two instances become the union on both after one
/// bidirectional cycle, and the callee learns the caller as a peer.
#[tokio::test]
async fn bidirectional_cycle_yields_union() {
    let a = start_node().await;
    let b = start_node().await;

    a.write("from-a", json!("a")).await.unwrap();
    b.write("from-b", json!("b")).await.unwrap();

    b.add_peer(a.endpoint());
    let report = b.sync_now().await;
    assert_eq!(report.successes(), 1);

    for node in [&a, &b] {
        assert!(node.get("from-a").await.unwrap().is_some());
        assert!(node.get("from-b").await.unwrap().is_some());
    }

    // A learned B through self-registration on first contact.
    let a_peers = a.peers();
    assert_eq!(a_peers.len(), 1);
    assert_eq!(a_peers[0].endpoint, b.endpoint());
    assert_eq!(
        a_peers[0].instance_id.as_ref(),
        Some(&b.identity().instance_id)
    );
}

/// A second sync right after convergence moves nothing.
#[tokio::test]
async fn resync_is_idempotent() {
    let a = start_node().await;
    let b = start_node().await;

    a.write("x", json!(1)).await.unwrap();
    b.add_peer(a.endpoint());

    assert_eq!(b.sync_now().await.successes(), 1);
    let mut before = b.records().await.unwrap();
    before.sort_by(|x, y| x.key.cmp(&y.key));

    let report = b.sync_now().await;
    assert_eq!(report.successes(), 1);
    assert_eq!(report.peers[0].pulled.accepted, 0);
    assert_eq!(report.peers[0].pushed.accepted, 0);

    let mut after = b.records().await.unwrap();
    after.sort_by(|x, y| x.key.cmp(&y.key));
    assert_eq!(before, after);
}

/// Hub topology: edges never talk to each other, yet everything flows
/// through the hub.
#[tokio::test]
async fn hub_topology_relays_between_edges() {
    let hub = start_node().await;

    let edge_config = |hub_endpoint: &str| NodeConfig {
        mode: TopologyMode::Hub,
        hub_endpoints: vec![hub_endpoint.to_string()],
        instance_type: "edge".into(),
        ..test_config()
    };
    let edge_1 = Node::start(edge_config(hub.endpoint())).await.unwrap();
    let edge_2 = Node::start(edge_config(hub.endpoint())).await.unwrap();

    // Hub mode pre-seeds the registry from configuration.
    assert_eq!(edge_1.peers().len(), 1);

    edge_1.write("from-edge-1", json!(1)).await.unwrap();
    assert_eq!(edge_1.sync_now().await.successes(), 1);

    // Write after edge 1's round so its timestamp clears the hub's
    // watermark for edge 1's next pull.
    tokio::time::sleep(Duration::from_millis(5)).await;
    edge_2.write("from-edge-2", json!(2)).await.unwrap();
    assert_eq!(edge_2.sync_now().await.successes(), 1);

    assert_eq!(edge_1.sync_now().await.successes(), 1);

    for node in [&hub, &edge_1, &edge_2] {
        assert!(node.get("from-edge-1").await.unwrap().is_some());
        assert!(node.get("from-edge-2").await.unwrap().is_some());
    }
}

/// A durable node keeps its records and high-water mark across restarts.
#[tokio::test]
async fn durable_node_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let data_path = dir.path().join("registry.db");

    let written = {
        let node = Node::start(NodeConfig {
            data_path: Some(data_path.clone()),
            ..test_config()
        })
        .await
        .unwrap();
        node.write("persistent", json!({"survives": true}))
            .await
            .unwrap()
        // Node drops here; background tasks abort and the port frees up.
    };

    let reopened = Node::start(NodeConfig {
        data_path: Some(data_path),
        ..test_config()
    })
    .await
    .unwrap();

    let stored = reopened.get("persistent").await.unwrap().unwrap();
    assert_eq!(stored, written);
}

/// The signing layer end to end: a node that requires signed manifests
/// accepts pushes from a real peer (which always signs) and turns away
/// unsigned ones.
#[tokio::test]
async fn signed_manifests_gate_unsolicited_pushes() {
    let strict = Node::start(NodeConfig {
        require_signed_manifests: true,
        ..test_config()
    })
    .await
    .unwrap();

    // Unsigned external push is turned away at the door.
    let client = SyncClient::new(instance_id("intruder"), None, ClientConfig::default()).unwrap();
    let manifest = SyncManifest::new(instance_id("intruder"), 0, vec![record("k", 1, 1000, "xx")]);
    let err = client.push(strict.endpoint(), &manifest).await.unwrap_err();
    assert!(matches!(
        err,
        capmesh_sync::SyncError::Http { status: 401 }
    ));
    assert!(strict.get("k").await.unwrap().is_none());

    // A full node signs its manifests, so a real peer cycle goes through.
    let peer = start_node().await;
    peer.write("legit", json!(true)).await.unwrap();
    peer.add_peer(strict.endpoint());
    let report = peer.sync_now().await;
    assert_eq!(report.successes(), 1);
    assert!(strict.get("legit").await.unwrap().is_some());
}
