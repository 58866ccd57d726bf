//! P2P listener layer: Noise sessions, wire framing, typed messages, the
//! peer registry, and the per-connection state machine.

pub mod connection;
pub mod framing;
pub mod listener;
pub mod message;
pub mod noise;
pub mod peer;
pub mod registry;
pub mod types;

// Re-exports
pub use connection::ConnectionError;
pub use framing::{FragmentError, Reassembler};
pub use listener::Listener;
pub use message::{CodecError, Message, P2pResponse, Ping};
pub use noise::{NoiseError, NoiseStream, NOISE_PROTOCOL_NAME};
pub use peer::{Peer, PeerAddrError};
pub use registry::PeerRegistry;
pub use types::{
    NetConfig, NetEvent, NetworkId, DEFAULT_PORT, FIRST_PING_TIMEOUT, FRAGMENT_SIZE,
    GENESIS_MAINNET, GENESIS_TESTNET, HANDSHAKE_TIMEOUT, MAX_PACKET_SIZE, PING_SHARE,
    PROTOCOL_VERSION,
};
