pub mod block;
pub mod chain_objects;
pub mod crypto;
pub mod ids;
pub mod net;
pub mod rlp;

pub use block::{KeyBlock, MicroBlock};
pub use chain_objects::SignedTx;
pub use crypto::{blake2b256, Keypair, PubKey};
pub use net::{Listener, NetConfig, NetEvent, NetworkId, Peer, PeerRegistry};
