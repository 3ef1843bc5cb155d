use std::fmt;

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::rpc::PeerHandle;

#[derive(Clone)]
pub struct Peer {
    pub id: String,
    pub handle: PeerHandle,
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Result of one fan-out round.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub evicted: Vec<String>,
}

/// The other brokers a node replicates to, keyed by broker id.
///
/// Readers take a snapshot and iterate it without holding the lock, so peers
/// can join or be evicted while a fan-out is in flight.
#[derive(Debug)]
pub struct PeerSet {
    self_id: String,
    peers: RwLock<Vec<Peer>>,
}

impl PeerSet {
    pub fn new(self_id: impl Into<String>) -> Self {
        Self { self_id: self_id.into(), peers: RwLock::new(Vec::new()) }
    }

    /// Adds a peer. False if `id` is this node or already present.
    pub fn insert(&self, id: &str, handle: PeerHandle) -> bool {
        if id == self.self_id {
            return false;
        }
        let mut peers = self.peers.write();
        if peers.iter().any(|p| p.id == id) {
            return false;
        }
        peers.push(Peer { id: id.to_string(), handle });
        info!(broker = %self.self_id, peer = id, total = peers.len(), "Registered peer");
        true
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut peers = self.peers.write();
        let before = peers.len();
        peers.retain(|p| p.id != id);
        before != peers.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.read().iter().any(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.peers.read().iter().map(|p| p.id.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<Peer> {
        self.peers.read().clone()
    }

    /// Drops a peer after a failed push. No retry, no notification.
    pub fn evict(&self, id: &str, reason: &dyn fmt::Display) {
        if self.remove(id) {
            metrics::counter!("stockmesh_peer_evictions_total").increment(1);
            warn!(broker = %self.self_id, peer = id, error = %reason, "Evicted unreachable peer");
        }
    }

    /// Push a point update to every current peer, evicting those that fail.
    pub async fn fan_out(&self, symbol: &str, new_price: f64) -> FanOutReport {
        let peers = self.snapshot();
        if peers.is_empty() {
            return FanOutReport::default();
        }
        debug!(broker = %self.self_id, symbol, new_price, peers = peers.len(), "Fanning out point update");

        let pushes = peers.iter().map(|peer| async move {
            let result = peer.handle.push_update(symbol, new_price, &self.self_id).await;
            (peer, result)
        });

        let mut report = FanOutReport::default();
        for (peer, result) in join_all(pushes).await {
            match result {
                Ok(()) => {
                    metrics::counter!("stockmesh_replication_pushes_total", "outcome" => "ok").increment(1);
                    report.delivered += 1;
                }
                Err(e) => {
                    metrics::counter!("stockmesh_replication_pushes_total", "outcome" => "failed").increment(1);
                    self.evict(&peer.id, &e);
                    report.evicted.push(peer.id.clone());
                }
            }
        }
        report
    }
}
