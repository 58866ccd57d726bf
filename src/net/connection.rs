//! Per-socket connection task: handshake, first-ping gate, steady-state
//! dispatch.
//!
//! Each live connection is owned by exactly one task. A companion writer
//! task serializes the send path; everything the connection wants to emit
//! goes through a bounded channel into it.

use crate::net::framing::{self, FragmentError, Reassembler};
use crate::net::listener::Shared;
use crate::net::message::{self, CodecError, Message, P2pResponse, Ping};
use crate::net::noise::{NoiseError, NoiseReader, NoiseStream, NoiseWriter};
use crate::net::peer::Peer;
use crate::net::types::{
    NetEvent, MSG_BLOCK_TXS, MSG_GET_BLOCK_TXS, MSG_P2P_RESPONSE, MSG_PING, PING_SHARE,
};
use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, trace, warn};

/// Capacity of the per-connection send queue.
const SEND_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Noise(#[from] NoiseError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Fragment(#[from] FragmentError),

    #[error("peer already has a live session")]
    Duplicate,

    #[error("no ping completed before the deadline")]
    FirstPingTimeout,

    #[error("send channel closed")]
    Closed,
}

/// Outstanding request kinds, queued per inner type. Correlation is
/// positional: one response is expected per outstanding request.
enum PendingRequest {
    Ping,
    BlockTxs,
}

/// Dial a configured peer and run the session to completion.
pub(crate) async fn run_outbound(shared: Arc<Shared>, peer: Peer) {
    debug!("dialing {}", peer);
    let stream = match TcpStream::connect(peer.addr()).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!("connect to {} failed: {}", peer, e);
            return;
        }
    };

    let handshake = timeout(
        shared.config.handshake_timeout,
        NoiseStream::connect(stream, &shared.config.keypair, &peer.pubkey, shared.config.network),
    )
    .await;
    let session = match handshake {
        Ok(Ok(session)) => session,
        Ok(Err(e)) => {
            debug!("noise handshake with {} failed: {}", peer, e);
            return;
        }
        Err(_) => {
            debug!("noise handshake with {} timed out", peer);
            return;
        }
    };

    run_session(shared, session, Some(peer)).await;
}

/// Run an accepted socket to completion.
pub(crate) async fn run_inbound(shared: Arc<Shared>, stream: TcpStream) {
    let peer_addr = stream.peer_addr().ok();
    let handshake = timeout(
        shared.config.handshake_timeout,
        NoiseStream::accept(stream, &shared.config.keypair, shared.config.network),
    )
    .await;
    let session = match handshake {
        Ok(Ok(session)) => session,
        Ok(Err(e)) => {
            debug!("inbound noise handshake failed: {}", e);
            return;
        }
        Err(_) => {
            debug!("inbound noise handshake from {:?} timed out", peer_addr);
            return;
        }
    };

    run_session(shared, session, None).await;
}

async fn run_session(shared: Arc<Shared>, session: NoiseStream, dialed: Option<Peer>) {
    let peer_addr = session.peer_addr;
    let remote_pubkey = session.remote_pubkey;
    let (reader, writer) = session.split();

    let (send_tx, send_rx) = mpsc::channel(SEND_QUEUE_DEPTH);
    let writer_task = tokio::spawn(write_loop(writer, send_rx));

    let mut conn = PeerConnection {
        shared: shared.clone(),
        remote_pubkey,
        peer_addr,
        reassembler: Reassembler::new(),
        pending: HashMap::new(),
        send_tx,
        registered: false,
    };

    match conn.drive(reader, dialed).await {
        Ok(()) => debug!("connection to {} closed by peer", peer_addr),
        Err(e) => debug!("connection to {} closed: {}", peer_addr, e),
    }

    // Single shutdown pass: stop the writer, free the registry slot,
    // tell the consumer.
    let registered = conn.registered;
    drop(conn);
    writer_task.abort();
    if registered {
        shared.registry.remove_peer(&remote_pubkey).await;
        if shared.events.try_send(NetEvent::PeerDisconnected(peer_addr)).is_err() {
            warn!("event channel full, dropping disconnect of {}", peer_addr);
        }
    }
}

async fn write_loop(mut writer: NoiseWriter, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = framing::send_message(&mut writer, &msg).await {
            debug!("send failed: {}", e);
            break;
        }
    }
}

struct PeerConnection {
    shared: Arc<Shared>,
    remote_pubkey: [u8; 32],
    peer_addr: SocketAddr,
    reassembler: Reassembler,
    pending: HashMap<u16, VecDeque<PendingRequest>>,
    send_tx: mpsc::Sender<Vec<u8>>,
    /// True once this task holds the registry's live-connection slot.
    registered: bool,
}

impl PeerConnection {
    async fn drive(
        &mut self,
        mut reader: NoiseReader,
        dialed: Option<Peer>,
    ) -> Result<(), ConnectionError> {
        let mut first_ping_deadline = None;

        match dialed {
            Some(peer) => {
                // Initiator: claim the slot and ping right away, no gate.
                self.register(peer).await?;
                self.send_ping().await?;
            }
            None => {
                if self.shared.registry.is_connected(&self.remote_pubkey).await {
                    return Err(ConnectionError::Duplicate);
                }
                first_ping_deadline =
                    Some(Instant::now() + self.shared.config.first_ping_timeout);
            }
        }

        loop {
            let gate = first_ping_deadline;
            tokio::select! {
                res = reader.recv() => {
                    let datagram = match res {
                        Ok(datagram) => datagram,
                        Err(NoiseError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                            return Ok(())
                        }
                        Err(e) => return Err(e.into()),
                    };
                    if let Some(raw) = self.reassembler.push(datagram)? {
                        self.dispatch(&raw).await?;
                        if self.registered {
                            first_ping_deadline = None;
                        }
                    }
                }
                _ = sleep_until_opt(gate), if gate.is_some() => {
                    if self.shared.registry.have_peer(&self.remote_pubkey).await {
                        first_ping_deadline = None;
                    } else {
                        return Err(ConnectionError::FirstPingTimeout);
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, raw: &[u8]) -> Result<(), ConnectionError> {
        let msg = Message::decode(raw)?;
        trace!("{} from {}", msg.command(), self.peer_addr);
        match msg {
            Message::Ignored(msg_type) => {
                trace!("dropping message type {} from {}", msg_type, self.peer_addr);
            }
            Message::Ping(ping) => self.handle_ping(ping, true).await?,
            Message::Response(resp) => self.handle_response(resp).await?,
            Message::KeyBlock(kb) => self.publish(NetEvent::KeyBlock(kb)),
            Message::MicroBlock(mb) => self.handle_micro_block(mb).await?,
            Message::BlockTxs { txs, .. } => self.publish(NetEvent::BlockTxs(txs)),
            Message::GetBlockTxs { .. } => {
                // This node observes; it serves nothing but ping echoes.
                debug!("ignoring block request from {}", self.peer_addr);
            }
        }
        Ok(())
    }

    /// Shared ping handling for direct pings (`respond = true`) and ping
    /// payloads arriving inside a response (`respond = false`).
    async fn handle_ping(&mut self, ping: Ping, respond: bool) -> Result<(), ConnectionError> {
        if ping.genesis_hash != self.shared.config.network.genesis_hash() {
            warn!("peer {} is on a different network, ignoring ping body", self.peer_addr);
        } else {
            let port = u16::try_from(ping.port)
                .map_err(|_| CodecError::BadField("port"))?;
            let remote = Peer::new(self.remote_pubkey, self.peer_addr.ip(), port);
            self.register(remote).await?;

            for advertised in ping.peers {
                if advertised.pubkey == self.shared.config.keypair.public
                    || advertised.pubkey == self.remote_pubkey
                    || self.shared.registry.have_peer(&advertised.pubkey).await
                {
                    continue;
                }
                self.shared.try_connect(advertised);
            }
        }

        if respond {
            let object = message::encode_ping(&self.local_ping().await);
            let payload = message::encode_response_ok(MSG_PING, &object);
            self.send_envelope(MSG_P2P_RESPONSE, &payload).await?;
        }
        Ok(())
    }

    async fn handle_response(&mut self, resp: P2pResponse) -> Result<(), ConnectionError> {
        let outstanding = self
            .pending
            .get_mut(&resp.inner_type)
            .and_then(|queue| queue.pop_front());
        if outstanding.is_none() {
            warn!(
                "unsolicited p2p_response (inner type {}) from {}, dropping",
                resp.inner_type, self.peer_addr
            );
            return Ok(());
        }

        if !resp.result {
            warn!(
                "peer {} answered negatively: {}",
                self.peer_addr,
                resp.reason.as_deref().unwrap_or("no reason given")
            );
            return Ok(());
        }

        let Some(object) = resp.object else {
            warn!("positive response without a body from {}, dropping", self.peer_addr);
            return Ok(());
        };

        match Message::decode_payload(resp.inner_type, &object)? {
            Message::Ping(ping) => self.handle_ping(ping, false).await?,
            Message::BlockTxs { txs, .. } => self.publish(NetEvent::BlockTxs(txs)),
            other => {
                debug!("response carried unexpected {} from {}", other.command(), self.peer_addr);
            }
        }
        Ok(())
    }

    async fn handle_micro_block(
        &mut self,
        mb: Box<crate::block::MicroBlock>,
    ) -> Result<(), ConnectionError> {
        let request = message::encode_get_block_txs(&mb.hash_raw, &mb.tx_hashes);
        self.publish(NetEvent::MicroBlock(mb));
        self.send_envelope(MSG_GET_BLOCK_TXS, &request).await?;
        self.pending
            .entry(MSG_BLOCK_TXS)
            .or_default()
            .push_back(PendingRequest::BlockTxs);
        Ok(())
    }

    async fn send_ping(&mut self) -> Result<(), ConnectionError> {
        let ping = self.local_ping().await;
        self.send_envelope(MSG_PING, &message::encode_ping(&ping)).await?;
        self.pending.entry(MSG_PING).or_default().push_back(PendingRequest::Ping);
        Ok(())
    }

    async fn local_ping(&self) -> Ping {
        let peers = self
            .shared
            .registry
            .peers_to_share(PING_SHARE as usize, &self.remote_pubkey)
            .await;
        Ping::local(
            self.shared.listen_port,
            self.shared.config.network.genesis_hash(),
            peers,
        )
    }

    /// Claim (or refresh) this connection's registry slot.
    async fn register(&mut self, peer: Peer) -> Result<(), ConnectionError> {
        if self.registered {
            self.shared.registry.add_peer(peer).await;
            return Ok(());
        }
        if self.shared.registry.mark_connected(peer, self.send_tx.clone()).await {
            self.registered = true;
            self.publish(NetEvent::PeerConnected(self.peer_addr));
            Ok(())
        } else {
            Err(ConnectionError::Duplicate)
        }
    }

    async fn send_envelope(&mut self, msg_type: u16, payload: &[u8]) -> Result<(), ConnectionError> {
        let msg = message::envelope(msg_type, payload);
        self.send_tx.send(msg).await.map_err(|_| ConnectionError::Closed)
    }

    fn publish(&self, event: NetEvent) {
        if self.shared.events.try_send(event).is_err() {
            warn!("event channel full, dropping event from {}", self.peer_addr);
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
