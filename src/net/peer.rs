//! Known-peer records and their textual / wire forms.
//!
//! A peer is addressed as `pp_<base58check pubkey>@host:port` in
//! configuration and logs, and as an RLP `[host, port, pubkey]` triple
//! inside ping payloads, host in ASCII textual form.

use crate::crypto::PubKey;
use crate::ids::{self, IdTag};
use crate::rlp::{self, Rlp};
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerAddrError {
    #[error("peer address must look like pp_…@host:port")]
    BadFormat,
    #[error("peer pubkey must be a 32-byte pp_ identifier")]
    BadPubkey,
    #[error("invalid host address")]
    BadHost,
    #[error("invalid port")]
    BadPort,
    #[error("malformed peer triple on the wire")]
    BadWireForm,
}

/// A peer known to the registry; may or may not have a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub pubkey: PubKey,
    pub host: IpAddr,
    pub port: u16,
}

impl Peer {
    pub fn new(pubkey: PubKey, host: IpAddr, port: u16) -> Self {
        Self { pubkey, host, port }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// `pp_…@host:port`
    pub fn uri(&self) -> String {
        format!("{}@{}:{}", ids::encode(IdTag::PeerPubkey, &self.pubkey), self.host, self.port)
    }

    /// Wire form carried inside ping payloads: the RLP encoding of
    /// `[host, port, pubkey]` as one byte string.
    pub fn to_rlp_bytes(&self) -> Vec<u8> {
        Rlp::list(vec![
            Rlp::bytes(self.host.to_string().into_bytes()),
            Rlp::uint(u64::from(self.port)),
            Rlp::bytes(self.pubkey.to_vec()),
        ])
        .encode()
    }

    pub fn from_rlp_bytes(bytes: &[u8]) -> Result<Self, PeerAddrError> {
        let value = rlp::decode(bytes).map_err(|_| PeerAddrError::BadWireForm)?;
        let items = value.as_list_of(3).map_err(|_| PeerAddrError::BadWireForm)?;
        let host_text = String::from_utf8(
            items[0].as_bytes().map_err(|_| PeerAddrError::BadWireForm)?.to_vec(),
        )
        .map_err(|_| PeerAddrError::BadHost)?;
        let host: IpAddr = host_text.parse().map_err(|_| PeerAddrError::BadHost)?;
        let port = items[1].as_u64().map_err(|_| PeerAddrError::BadWireForm)?;
        let port = u16::try_from(port).map_err(|_| PeerAddrError::BadPort)?;
        let pubkey = items[2].as_hash32().map_err(|_| PeerAddrError::BadPubkey)?;
        Ok(Self { pubkey, host, port })
    }
}

impl std::str::FromStr for Peer {
    type Err = PeerAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, addr) = s.split_once('@').ok_or(PeerAddrError::BadFormat)?;
        let (tag, pubkey) = ids::decode(id).map_err(|_| PeerAddrError::BadPubkey)?;
        if tag != IdTag::PeerPubkey {
            return Err(PeerAddrError::BadPubkey);
        }
        let pubkey: PubKey = pubkey.try_into().map_err(|_| PeerAddrError::BadPubkey)?;
        let (host, port) = addr.rsplit_once(':').ok_or(PeerAddrError::BadFormat)?;
        let host: IpAddr = host.parse().map_err(|_| PeerAddrError::BadHost)?;
        let port: u16 = port.parse().map_err(|_| PeerAddrError::BadPort)?;
        Ok(Self { pubkey, host, port })
    }
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.uri())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Peer {
        Peer::new([0x42; 32], "127.0.0.1".parse().unwrap(), 3015)
    }

    #[test]
    fn uri_roundtrip() {
        let peer = sample();
        let uri = peer.uri();
        assert!(uri.starts_with("pp_"));
        assert!(uri.ends_with("@127.0.0.1:3015"));
        assert_eq!(uri.parse::<Peer>().unwrap(), peer);
    }

    #[test]
    fn wire_roundtrip() {
        let peer = sample();
        assert_eq!(Peer::from_rlp_bytes(&peer.to_rlp_bytes()).unwrap(), peer);
    }

    #[test]
    fn wire_rejects_bad_host() {
        let encoded = Rlp::list(vec![
            Rlp::bytes(b"not-an-ip".to_vec()),
            Rlp::uint(3015),
            Rlp::bytes(vec![0x42; 32]),
        ])
        .encode();
        assert_eq!(Peer::from_rlp_bytes(&encoded), Err(PeerAddrError::BadHost));
    }

    #[test]
    fn wire_rejects_oversized_port() {
        let encoded = Rlp::list(vec![
            Rlp::bytes(b"127.0.0.1".to_vec()),
            Rlp::uint(70_000),
            Rlp::bytes(vec![0x42; 32]),
        ])
        .encode();
        assert_eq!(Peer::from_rlp_bytes(&encoded), Err(PeerAddrError::BadPort));
    }

    #[test]
    fn uri_rejects_wrong_tag() {
        let s = format!("{}@127.0.0.1:3015", ids::encode(IdTag::Account, &[0x42; 32]));
        assert_eq!(s.parse::<Peer>().unwrap_err(), PeerAddrError::BadPubkey);
    }
}
