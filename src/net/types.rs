//! Network constants, configuration, and the event stream surfaced to
//! consumers.

use crate::block::{KeyBlock, MicroBlock};
use crate::chain_objects::SignedTx;
use crate::crypto::Keypair;
use crate::net::peer::Peer;
use std::net::SocketAddr;
use std::time::Duration;

// =============================================================================
// PROTOCOL IDENTIFICATION
// =============================================================================

/// Wire protocol version, also mixed into the Noise prologue.
pub const PROTOCOL_VERSION: u64 = 1;

/// Default TCP port for node-to-node traffic.
pub const DEFAULT_PORT: u16 = 3015;

/// Genesis hash selecting mainnet; part of the Noise prologue, echoed in
/// every ping.
pub const GENESIS_MAINNET: [u8; 32] = [
    0x6c, 0x15, 0xda, 0x6e, 0xbf, 0xaf, 0x02, 0x78, 0xfe, 0xaf, 0x4d, 0xf1, 0xb0, 0xf1, 0xa9,
    0x82, 0x55, 0x07, 0xae, 0x7b, 0x9a, 0x49, 0x4b, 0xc3, 0x4c, 0x91, 0x71, 0x3f, 0x38, 0xdd,
    0x57, 0x83,
];

/// Genesis hash selecting testnet.
pub const GENESIS_TESTNET: [u8; 32] = [
    0xae, 0x24, 0x94, 0xdb, 0xe0, 0xad, 0xcc, 0x8a, 0x62, 0xb1, 0xde, 0x13, 0x51, 0x14, 0xf8,
    0x79, 0x22, 0xfb, 0x96, 0x61, 0x0b, 0x0c, 0x82, 0x00, 0x06, 0xba, 0x8a, 0xef, 0x45, 0x55,
    0x52, 0xce,
];

// =============================================================================
// MESSAGE TYPE CODES
// =============================================================================

pub const MSG_FRAGMENT: u16 = 0;
pub const MSG_PING: u16 = 1;
pub const MSG_GET_BLOCK_TXS: u16 = 7;
/// Reserved; silently dropped on receipt.
pub const MSG_RESERVED: u16 = 9;
pub const MSG_KEY_BLOCK: u16 = 10;
pub const MSG_MICRO_BLOCK: u16 = 11;
pub const MSG_BLOCK_TXS: u16 = 13;
pub const MSG_P2P_RESPONSE: u16 = 100;

// =============================================================================
// FRAMING
// =============================================================================

/// Largest unfragmented wire message, type prefix included.
pub const MAX_PACKET_SIZE: usize = 511;

/// Payload bytes carried by every fragment except the last.
pub const FRAGMENT_SIZE: usize = 507;

/// Fragment header: three u16s (type code, 1-based index, total count).
pub const FRAGMENT_HEADER_SIZE: usize = 6;

/// Upper bound on a reassembled logical message. Key blocks are the
/// largest gossiped object and stay far below this.
pub const MAX_REASSEMBLED_SIZE: usize = 1024 * 1024;

// =============================================================================
// PING
// =============================================================================

/// Advisory cap on peers shared in a ping payload.
pub const PING_SHARE: u64 = 32;

// =============================================================================
// TIMERS
// =============================================================================

/// Noise handshake must complete within this window.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// An accepted connection must have completed a ping exchange by this
/// deadline or it is closed.
pub const FIRST_PING_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// NETWORK SELECTION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkId {
    Mainnet,
    Testnet,
}

impl NetworkId {
    pub fn genesis_hash(self) -> [u8; 32] {
        match self {
            NetworkId::Mainnet => GENESIS_MAINNET,
            NetworkId::Testnet => GENESIS_TESTNET,
        }
    }
}

impl std::str::FromStr for NetworkId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(NetworkId::Mainnet),
            "testnet" => Ok(NetworkId::Testnet),
            other => Err(format!("unknown network `{other}` (use mainnet or testnet)")),
        }
    }
}

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            NetworkId::Mainnet => "mainnet",
            NetworkId::Testnet => "testnet",
        })
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Listener configuration, read once at startup.
#[derive(Clone)]
pub struct NetConfig {
    /// TCP listen port. Port 0 binds an ephemeral port; the advertised
    /// ping port follows the bound socket.
    pub port: u16,
    pub network: NetworkId,
    /// Static identity used for every Noise session.
    pub keypair: Keypair,
    /// Peers dialed at startup.
    pub peers: Vec<Peer>,
    pub handshake_timeout: Duration,
    pub first_ping_timeout: Duration,
    /// Capacity of the consumer event channel.
    pub event_buffer: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            network: NetworkId::Mainnet,
            keypair: Keypair::generate(),
            peers: Vec::new(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
            first_ping_timeout: FIRST_PING_TIMEOUT,
            event_buffer: 256,
        }
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Observations delivered to the consumer. Delivery is fire-and-forget:
/// if the channel is full the event is dropped, never the connection.
#[derive(Debug)]
pub enum NetEvent {
    PeerConnected(SocketAddr),
    PeerDisconnected(SocketAddr),
    KeyBlock(Box<KeyBlock>),
    MicroBlock(Box<MicroBlock>),
    /// Transactions of one micro block, in block order.
    BlockTxs(Vec<SignedTx>),
}
