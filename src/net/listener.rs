//! The listener: accepts inbound sockets, dials configured peers, and
//! hands decoded observations to the consumer through a bounded channel.

use crate::net::connection;
use crate::net::peer::Peer;
use crate::net::registry::PeerRegistry;
use crate::net::types::{NetConfig, NetEvent};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// State shared by the accept loop and every connection task. The
/// registry is the only mutable part.
pub(crate) struct Shared {
    pub config: NetConfig,
    /// Actual bound port, advertised in outbound pings.
    pub listen_port: u16,
    pub registry: PeerRegistry,
    pub events: mpsc::Sender<NetEvent>,
}

impl Shared {
    /// Spawn an outbound session unless one is live or being dialed.
    pub fn try_connect(self: &Arc<Self>, peer: Peer) {
        let shared = self.clone();
        tokio::spawn(async move {
            if shared.registry.is_connected(&peer.pubkey).await {
                return;
            }
            if !shared.registry.start_connecting(&peer.pubkey).await {
                return;
            }
            let pubkey = peer.pubkey;
            connection::run_outbound(shared.clone(), peer).await;
            shared.registry.finish_connecting(&pubkey).await;
        });
    }
}

/// Handle to a running listener. Dropping it stops accepting; live
/// connections wind down as their sockets close.
pub struct Listener {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl Listener {
    /// Bind the listen socket, dial the configured peers, and return the
    /// handle together with the consumer event stream.
    pub async fn bind(config: NetConfig) -> io::Result<(Self, mpsc::Receiver<NetEvent>)> {
        let (events, event_rx) = mpsc::channel(config.event_buffer);

        let socket = TcpListener::bind(("0.0.0.0", config.port)).await?;
        let local_addr = socket.local_addr()?;

        let shared = Arc::new(Shared {
            listen_port: local_addr.port(),
            registry: PeerRegistry::new(),
            events,
            config,
        });

        info!(
            "listening on {} ({}, {} configured peer(s))",
            local_addr,
            shared.config.network,
            shared.config.peers.len()
        );

        for peer in shared.config.peers.clone() {
            shared.registry.add_peer(peer.clone()).await;
            shared.try_connect(peer);
        }

        let accept_shared = shared.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match socket.accept().await {
                    Ok((stream, addr)) => {
                        debug!("accepted connection from {}", addr);
                        let shared = accept_shared.clone();
                        tokio::spawn(connection::run_inbound(shared, stream));
                    }
                    Err(e) => {
                        debug!("accept failed: {}", e);
                    }
                }
            }
        });

        Ok((Self { shared, local_addr, accept_task }, event_rx))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// This node's static public key; peers need it to dial us.
    pub fn local_pubkey(&self) -> [u8; 32] {
        self.shared.config.keypair.public
    }

    pub async fn peer_count(&self) -> usize {
        self.shared.registry.peer_count().await
    }

    pub async fn have_peer(&self, pubkey: &[u8; 32]) -> bool {
        self.shared.registry.have_peer(pubkey).await
    }

    /// Dial a peer on demand; no-op when already connected.
    pub fn try_connect(&self, peer: Peer) {
        self.shared.try_connect(peer);
    }

    /// Stop accepting inbound connections.
    pub fn shutdown(&self) {
        self.accept_task.abort();
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}
