//! Process-wide peer registry.
//!
//! One entry per 32-byte public key. An entry may exist without a live
//! connection (a known peer), and at most one live connection exists per
//! key; the earlier-established session wins any collision.

use crate::crypto::PubKey;
use crate::net::peer::{Peer, PeerAddrError};
use crate::rlp::Rlp;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

struct PeerEntry {
    peer: Peer,
    /// Send handle into the owning connection's writer; present only
    /// while a session is live.
    conn: Option<mpsc::Sender<Vec<u8>>>,
}

#[derive(Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<PubKey, PeerEntry>>,
    /// Outbound dials in flight, to keep `try_connect` idempotent.
    connecting: Mutex<HashSet<PubKey>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn have_peer(&self, pubkey: &PubKey) -> bool {
        self.peers.lock().await.contains_key(pubkey)
    }

    pub async fn is_connected(&self, pubkey: &PubKey) -> bool {
        self.peers
            .lock()
            .await
            .get(pubkey)
            .map(|e| e.conn.is_some())
            .unwrap_or(false)
    }

    /// Insert or refresh a known peer. Never touches an existing live
    /// connection handle.
    pub async fn add_peer(&self, peer: Peer) {
        let mut peers = self.peers.lock().await;
        match peers.get_mut(&peer.pubkey) {
            Some(entry) => entry.peer = peer,
            None => {
                debug!("registering peer {}", peer);
                peers.insert(peer.pubkey, PeerEntry { peer, conn: None });
            }
        }
    }

    /// Claim the live-connection slot for `peer`. Returns false when an
    /// earlier session already holds it; the caller must close.
    pub async fn mark_connected(&self, peer: Peer, conn: mpsc::Sender<Vec<u8>>) -> bool {
        let mut peers = self.peers.lock().await;
        match peers.get_mut(&peer.pubkey) {
            Some(entry) if entry.conn.is_some() => false,
            Some(entry) => {
                entry.peer = peer;
                entry.conn = Some(conn);
                true
            }
            None => {
                debug!("registering connected peer {}", peer);
                peers.insert(peer.pubkey, PeerEntry { peer, conn: Some(conn) });
                true
            }
        }
    }

    /// Drop a peer entirely; called when its socket closes.
    pub async fn remove_peer(&self, pubkey: &PubKey) {
        self.peers.lock().await.remove(pubkey);
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }

    /// Up to `limit` known peers for sharing in a ping, excluding the
    /// recipient itself.
    pub async fn peers_to_share(&self, limit: usize, exclude: &PubKey) -> Vec<Peer> {
        self.peers
            .lock()
            .await
            .values()
            .filter(|e| &e.peer.pubkey != exclude)
            .take(limit)
            .map(|e| e.peer.clone())
            .collect()
    }

    /// Reserve an outbound dial slot. Returns false while a dial to the
    /// same key is already in flight.
    pub async fn start_connecting(&self, pubkey: &PubKey) -> bool {
        self.connecting.lock().await.insert(*pubkey)
    }

    pub async fn finish_connecting(&self, pubkey: &PubKey) {
        self.connecting.lock().await.remove(pubkey);
    }

    /// Canonical decoder for peer lists embedded in ping payloads: each
    /// item is itself an RLP-encoded `[host, port, pubkey]` triple.
    pub fn rlp_decode_peers(items: &[Rlp]) -> Result<Vec<Peer>, PeerAddrError> {
        items
            .iter()
            .map(|item| {
                let bytes = item.as_bytes().map_err(|_| PeerAddrError::BadWireForm)?;
                Peer::from_rlp_bytes(bytes)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(seed: u8) -> Peer {
        Peer::new([seed; 32], "127.0.0.1".parse().unwrap(), 4000 + u16::from(seed))
    }

    #[tokio::test]
    async fn add_peer_is_idempotent() {
        let reg = PeerRegistry::new();
        reg.add_peer(peer(1)).await;
        reg.add_peer(peer(1)).await;
        assert_eq!(reg.peer_count().await, 1);
        assert!(reg.have_peer(&[1; 32]).await);
        assert!(!reg.have_peer(&[2; 32]).await);
    }

    #[tokio::test]
    async fn earlier_connection_wins() {
        let reg = PeerRegistry::new();
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);
        assert!(reg.mark_connected(peer(1), tx1).await);
        assert!(!reg.mark_connected(peer(1), tx2).await);
        assert!(reg.is_connected(&[1; 32]).await);
        assert_eq!(reg.peer_count().await, 1);
    }

    #[tokio::test]
    async fn remove_clears_entry() {
        let reg = PeerRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        assert!(reg.mark_connected(peer(1), tx).await);
        reg.remove_peer(&[1; 32]).await;
        assert!(!reg.have_peer(&[1; 32]).await);
        // the slot is free again
        let (tx, _rx) = mpsc::channel(1);
        assert!(reg.mark_connected(peer(1), tx).await);
    }

    #[tokio::test]
    async fn share_excludes_recipient() {
        let reg = PeerRegistry::new();
        reg.add_peer(peer(1)).await;
        reg.add_peer(peer(2)).await;
        reg.add_peer(peer(3)).await;
        let shared = reg.peers_to_share(32, &[2; 32]).await;
        assert_eq!(shared.len(), 2);
        assert!(shared.iter().all(|p| p.pubkey != [2; 32]));
        assert_eq!(reg.peers_to_share(1, &[2; 32]).await.len(), 1);
    }

    #[tokio::test]
    async fn connecting_gate_is_exclusive() {
        let reg = PeerRegistry::new();
        assert!(reg.start_connecting(&[1; 32]).await);
        assert!(!reg.start_connecting(&[1; 32]).await);
        reg.finish_connecting(&[1; 32]).await;
        assert!(reg.start_connecting(&[1; 32]).await);
    }

    #[tokio::test]
    async fn decode_peers_delegates_to_wire_form() {
        let items: Vec<Rlp> = vec![
            Rlp::bytes(peer(1).to_rlp_bytes()),
            Rlp::bytes(peer(2).to_rlp_bytes()),
        ];
        let decoded = PeerRegistry::rlp_decode_peers(&items).unwrap();
        assert_eq!(decoded, vec![peer(1), peer(2)]);

        let bad = vec![Rlp::list(vec![])];
        assert_eq!(
            PeerRegistry::rlp_decode_peers(&bad).unwrap_err(),
            PeerAddrError::BadWireForm
        );
    }
}
