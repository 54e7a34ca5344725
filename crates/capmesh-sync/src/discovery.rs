//! Local-segment peer discovery over UDP multicast.
//!
//! Periodically announces `{ instanceId, endpoint }` to a well-known
//! multicast group and listens for the same from others; an announcement
//! from an unknown instance feeds the peer registry through the same "add
//! peer" path as manual configuration. Only mesh-mode instances run this;
//! hub mode seeds its peers from configuration instead.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use capmesh_core::InstanceId;

use crate::manifest::Announcement;
use crate::peers::PeerRegistry;

/// Multicast group for announcements.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 72, 85);

/// Default announcement port.
pub const DEFAULT_PORT: u16 = 7410;

/// Default announcement cadence.
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(15);

/// Broadcast/listen task configuration.
pub struct Discovery {
    local: InstanceId,
    local_endpoint: String,
    peers: Arc<PeerRegistry>,
    port: u16,
    announce_interval: Duration,
}

impl Discovery {
    pub fn new(
        local: InstanceId,
        local_endpoint: String,
        peers: Arc<PeerRegistry>,
        port: u16,
        announce_interval: Duration,
    ) -> Self {
        Self {
            local,
            local_endpoint,
            peers,
            port,
            announce_interval,
        }
    }

    /// Spawn the announce/listen loop. Socket errors are logged and end
    /// the task; sync continues against already-known peers.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                error!(error = %e, "discovery task stopped");
            }
        })
    }

    async fn run(self) -> std::io::Result<()> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.port)).await?;
        socket.join_multicast_v4(MULTICAST_GROUP, Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_loop_v4(true)?;
        debug!(group = %MULTICAST_GROUP, port = self.port, "discovery listening");

        let announcement = Announcement {
            instance_id: self.local.clone(),
            endpoint: self.local_endpoint.clone(),
        };
        let datagram = match serde_json::to_vec(&announcement) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "cannot encode announcement");
                return Ok(());
            }
        };

        let mut ticker = tokio::time::interval(self.announce_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut buf = [0u8; 1024];

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = socket
                        .send_to(&datagram, (MULTICAST_GROUP, self.port))
                        .await
                    {
                        warn!(error = %e, "announcement send failed");
                    }
                }
                received = socket.recv_from(&mut buf) => {
                    let (len, from) = received?;
                    self.handle_datagram(&buf[..len], from);
                }
            }
        }
    }

    fn handle_datagram(&self, datagram: &[u8], from: std::net::SocketAddr) {
        let announcement: Announcement = match serde_json::from_slice(datagram) {
            Ok(a) => a,
            Err(e) => {
                debug!(%from, error = %e, "ignoring malformed announcement");
                return;
            }
        };

        // Our own loopback traffic.
        if announcement.instance_id == self.local {
            return;
        }

        self.peers
            .add_discovered(&announcement.endpoint, announcement.instance_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovery(peers: Arc<PeerRegistry>) -> Discovery {
        Discovery::new(
            InstanceId::from_string("local-id".into()),
            "http://local:7411".into(),
            peers,
            DEFAULT_PORT,
            DEFAULT_ANNOUNCE_INTERVAL,
        )
    }

    #[test]
    fn test_announcement_from_peer_is_added() {
        let peers = Arc::new(PeerRegistry::new(InstanceId::from_string("local-id".into())));
        let d = discovery(Arc::clone(&peers));

        let datagram = serde_json::to_vec(&Announcement {
            instance_id: InstanceId::from_string("remote-id".into()),
            endpoint: "http://remote:7411".into(),
        })
        .unwrap();
        d.handle_datagram(&datagram, "10.0.0.9:7410".parse().unwrap());

        let listed = peers.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].endpoint, "http://remote:7411");
        assert!(listed[0].reachable);
    }

    #[test]
    fn test_own_announcement_is_ignored() {
        let peers = Arc::new(PeerRegistry::new(InstanceId::from_string("local-id".into())));
        let d = discovery(Arc::clone(&peers));

        let datagram = serde_json::to_vec(&Announcement {
            instance_id: InstanceId::from_string("local-id".into()),
            endpoint: "http://local:7411".into(),
        })
        .unwrap();
        d.handle_datagram(&datagram, "127.0.0.1:7410".parse().unwrap());

        assert!(peers.list().is_empty());
    }

    #[test]
    fn test_garbage_datagram_is_ignored() {
        let peers = Arc::new(PeerRegistry::new(InstanceId::from_string("local-id".into())));
        let d = discovery(Arc::clone(&peers));

        d.handle_datagram(b"not json", "10.0.0.9:7410".parse().unwrap());
        assert!(peers.list().is_empty());
    }
}
