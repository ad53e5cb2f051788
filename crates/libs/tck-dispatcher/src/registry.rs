use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// One complete frame, prefix included, shared by every receiving peer.
pub type Frame = Arc<[u8]>;

pub const PEER_TX_QUEUE_CAPACITY: usize = 128;
pub const PEER_TX_ENQUEUE_TIMEOUT_MS: u64 = 200;

/// Outbound side of one connected peer.
#[derive(Debug, Clone)]
pub struct PeerSender {
    tx: mpsc::Sender<Frame>,
    stop: CancellationToken,
}

impl PeerSender {
    pub fn new(tx: mpsc::Sender<Frame>, stop: CancellationToken) -> Self {
        Self { tx, stop }
    }

    pub fn channel(stop: CancellationToken) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(PEER_TX_QUEUE_CAPACITY);
        (Self::new(tx, stop), rx)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled() || self.tx.is_closed()
    }
}

/// Result of relaying one frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastTrace {
    pub matched_peers: usize,
    pub sent_peers: usize,
    pub failed_peers: usize,
}

/// Live connections, keyed by peer address.
///
/// Registration and removal take the write lock; relaying takes a snapshot
/// under the read lock so a slow peer never blocks connects or disconnects.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    peers: RwLock<HashMap<SocketAddr, PeerSender>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, addr: SocketAddr, peer: PeerSender) {
        let replaced = self.peers.write().await.insert(addr, peer);
        if let Some(old) = replaced {
            old.stop.cancel();
        }
    }

    /// Removes `addr`; returns whether it was still registered.
    pub async fn remove(&self, addr: &SocketAddr) -> bool {
        match self.peers.write().await.remove(addr) {
            Some(peer) => {
                peer.stop.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    pub async fn contains(&self, addr: &SocketAddr) -> bool {
        self.peers.read().await.contains_key(addr)
    }

    /// Queues `frame` for every peer except `exclude`.
    ///
    /// A peer whose queue stays full past the enqueue timeout, or whose writer
    /// has stopped, is dropped from the registry. Other peers are unaffected.
    pub async fn broadcast(&self, frame: Frame, exclude: SocketAddr) -> BroadcastTrace {
        let targets: Vec<(SocketAddr, PeerSender)> = {
            let peers = self.peers.read().await;
            peers
                .iter()
                .filter(|(addr, _)| **addr != exclude)
                .map(|(addr, peer)| (*addr, peer.clone()))
                .collect()
        };

        let mut trace = BroadcastTrace::default();
        let mut failed = Vec::new();
        for (addr, peer) in targets {
            trace.matched_peers += 1;
            if peer.is_stopped() {
                trace.failed_peers += 1;
                failed.push(addr);
                continue;
            }
            match peer.tx.try_send(frame.clone()) {
                Ok(()) => trace.sent_peers += 1,
                Err(mpsc::error::TrySendError::Full(frame)) => {
                    match tokio::time::timeout(
                        Duration::from_millis(PEER_TX_ENQUEUE_TIMEOUT_MS),
                        peer.tx.send(frame),
                    )
                    .await
                    {
                        Ok(Ok(())) => {
                            trace.sent_peers += 1;
                            log::warn!("dispatcher: recovered from full tx queue on <{}>", addr);
                        }
                        Ok(Err(_)) | Err(_) => {
                            trace.failed_peers += 1;
                            log::warn!("dispatcher: tx queue to <{}> stalled, dropping peer", addr);
                            failed.push(addr);
                        }
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    trace.failed_peers += 1;
                    failed.push(addr);
                }
            }
        }

        for addr in failed {
            if self.remove(&addr).await {
                log::info!("dispatcher: removed failed peer <{}>", addr);
            }
        }

        trace
    }

    /// Stops every peer and empties the registry.
    pub async fn clear(&self) {
        let mut peers = self.peers.write().await;
        for peer in peers.values() {
            peer.stop.cancel();
        }
        peers.clear();
    }
}
