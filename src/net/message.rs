//! Typed wire messages: `[msg_type: u16 BE][payload]`, payloads RLP.

use crate::block::{self, KeyBlock, MicroBlock};
use crate::chain_objects::{self, ObjectError, SignedTx};
use crate::net::peer::PeerAddrError;
use crate::net::registry::PeerRegistry;
use crate::net::types::{
    MSG_BLOCK_TXS, MSG_GET_BLOCK_TXS, MSG_KEY_BLOCK, MSG_MICRO_BLOCK, MSG_P2P_RESPONSE, MSG_PING,
    MSG_RESERVED, PING_SHARE, PROTOCOL_VERSION,
};
use crate::net::Peer;
use crate::rlp::{self, Rlp, RlpError};
use thiserror::Error;

/// Version field of the ping / response / get_block_txs payloads.
const MSG_VSN: u64 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("message shorter than its type prefix")]
    ShortEnvelope,
    #[error(transparent)]
    Rlp(#[from] RlpError),
    #[error(transparent)]
    Header(#[from] block::HeaderError),
    #[error(transparent)]
    Object(#[from] ObjectError),
    #[error(transparent)]
    PeerAddr(#[from] PeerAddrError),
    #[error("malformed {0} field")]
    BadField(&'static str),
    #[error("micro block announcement was not in light form")]
    NotLightMicro,
}

/// Handshake ping payload, exchanged in both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ping {
    pub version: u64,
    /// TCP port the sender listens on.
    pub port: u64,
    /// Advisory cap on peers the sender wants shared back.
    pub share: u64,
    pub genesis_hash: [u8; 32],
    pub difficulty: u64,
    pub best_hash: [u8; 32],
    pub sync_allowed: bool,
    pub peers: Vec<Peer>,
}

impl Ping {
    /// The payload this observer sends: zero claimed difficulty, best
    /// hash pinned to genesis, sync never invited.
    pub fn local(port: u16, genesis_hash: [u8; 32], peers: Vec<Peer>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            port: u64::from(port),
            share: PING_SHARE,
            genesis_hash,
            difficulty: 0,
            best_hash: genesis_hash,
            sync_allowed: false,
            peers,
        }
    }
}

/// `p2p_response` payload. `object` holds the RLP payload of
/// `inner_type` when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct P2pResponse {
    pub version: u64,
    pub result: bool,
    pub inner_type: u16,
    pub reason: Option<String>,
    pub object: Option<Vec<u8>>,
}

/// Every message the dispatcher can see. Reserved and unrecognized codes
/// land in `Ignored` so the match stays exhaustive.
#[derive(Debug)]
pub enum Message {
    Ping(Ping),
    GetBlockTxs { block_hash: [u8; 32], tx_hashes: Vec<[u8; 32]> },
    KeyBlock(Box<KeyBlock>),
    MicroBlock(Box<MicroBlock>),
    BlockTxs { block_hash: [u8; 32], txs: Vec<SignedTx> },
    Response(P2pResponse),
    Ignored(u16),
}

impl Message {
    /// Decode a whole logical message, type prefix included.
    pub fn decode(raw: &[u8]) -> Result<Self, CodecError> {
        if raw.len() < 2 {
            return Err(CodecError::ShortEnvelope);
        }
        let msg_type = u16::from_be_bytes([raw[0], raw[1]]);
        Self::decode_payload(msg_type, &raw[2..])
    }

    /// Decode a payload whose type arrived out of band (the envelope, or
    /// the `inner_type` of a response).
    pub fn decode_payload(msg_type: u16, payload: &[u8]) -> Result<Self, CodecError> {
        match msg_type {
            MSG_PING => Ok(Message::Ping(decode_ping(payload)?)),
            MSG_GET_BLOCK_TXS => decode_get_block_txs(payload),
            MSG_KEY_BLOCK => decode_key_block(payload),
            MSG_MICRO_BLOCK => decode_micro_block(payload),
            MSG_BLOCK_TXS => decode_block_txs(payload),
            MSG_P2P_RESPONSE => Ok(Message::Response(decode_response(payload)?)),
            MSG_RESERVED => Ok(Message::Ignored(MSG_RESERVED)),
            other => Ok(Message::Ignored(other)),
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            Message::Ping(_) => "ping",
            Message::GetBlockTxs { .. } => "get_block_txs",
            Message::KeyBlock(_) => "key_block",
            Message::MicroBlock(_) => "micro_block",
            Message::BlockTxs { .. } => "block_txs",
            Message::Response(_) => "p2p_response",
            Message::Ignored(_) => "ignored",
        }
    }
}

/// Prefix a payload with its type code.
pub fn envelope(msg_type: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + payload.len());
    out.extend_from_slice(&msg_type.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

// =============================================================================
// PING
// =============================================================================

pub fn encode_ping(ping: &Ping) -> Vec<u8> {
    Rlp::list(vec![
        Rlp::uint(ping.version),
        Rlp::uint(ping.port),
        Rlp::uint(ping.share),
        Rlp::bytes(ping.genesis_hash.to_vec()),
        Rlp::uint(ping.difficulty),
        Rlp::bytes(ping.best_hash.to_vec()),
        Rlp::bytes(vec![u8::from(ping.sync_allowed)]),
        Rlp::list(ping.peers.iter().map(|p| Rlp::bytes(p.to_rlp_bytes())).collect()),
    ])
    .encode()
}

pub fn decode_ping(payload: &[u8]) -> Result<Ping, CodecError> {
    let value = rlp::decode(payload)?;
    let items = value.as_list_of(8)?;
    let sync_byte = items[6].as_bytes()?;
    if sync_byte.len() != 1 {
        return Err(CodecError::BadField("sync_allowed"));
    }
    Ok(Ping {
        version: items[0].as_u64()?,
        port: items[1].as_u64()?,
        share: items[2].as_u64()?,
        genesis_hash: items[3].as_hash32()?,
        difficulty: items[4].as_u64()?,
        best_hash: items[5].as_hash32()?,
        sync_allowed: sync_byte[0] != 0,
        peers: PeerRegistry::rlp_decode_peers(items[7].as_list()?)?,
    })
}

// =============================================================================
// P2P RESPONSE
// =============================================================================

/// A positive response echoing the payload of `inner_type`.
pub fn encode_response_ok(inner_type: u16, object: &[u8]) -> Vec<u8> {
    Rlp::list(vec![
        Rlp::uint(MSG_VSN),
        Rlp::bytes(vec![1]),
        Rlp::uint(u64::from(inner_type)),
        Rlp::bytes(Vec::new()),
        Rlp::bytes(object.to_vec()),
    ])
    .encode()
}

pub fn decode_response(payload: &[u8]) -> Result<P2pResponse, CodecError> {
    let value = rlp::decode(payload)?;
    let items = value.as_list_of(5)?;
    let result_byte = items[1].as_bytes()?;
    let inner_type = u16::try_from(items[2].as_u64()?)
        .map_err(|_| CodecError::BadField("inner_type"))?;
    let reason = items[3].as_bytes()?;
    let object = items[4].as_bytes()?;
    Ok(P2pResponse {
        version: items[0].as_u64()?,
        result: result_byte.first().copied().unwrap_or(0) != 0,
        inner_type,
        reason: if reason.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(reason).into_owned())
        },
        object: if object.is_empty() { None } else { Some(object.to_vec()) },
    })
}

// =============================================================================
// BLOCK TRAFFIC
// =============================================================================

pub fn encode_get_block_txs(block_hash: &[u8; 32], tx_hashes: &[[u8; 32]]) -> Vec<u8> {
    Rlp::list(vec![
        Rlp::uint(MSG_VSN),
        Rlp::bytes(block_hash.to_vec()),
        Rlp::list(tx_hashes.iter().map(|h| Rlp::bytes(h.to_vec())).collect()),
    ])
    .encode()
}

fn decode_get_block_txs(payload: &[u8]) -> Result<Message, CodecError> {
    let value = rlp::decode(payload)?;
    let items = value.as_list_of(3)?;
    let block_hash = items[1].as_hash32()?;
    let tx_hashes = items[2]
        .as_list()?
        .iter()
        .map(|h| h.as_hash32())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Message::GetBlockTxs { block_hash, tx_hashes })
}

fn decode_key_block(payload: &[u8]) -> Result<Message, CodecError> {
    let value = rlp::decode(payload)?;
    let items = value.as_list_of(2)?;
    let header = items[1].as_bytes()?;
    Ok(Message::KeyBlock(Box::new(block::parse_key_header(header)?)))
}

fn decode_micro_block(payload: &[u8]) -> Result<Message, CodecError> {
    let value = rlp::decode(payload)?;
    let items = value.as_list_of(3)?;
    let object = items[1].as_bytes()?;
    if items[2].as_u64()? != 1 {
        return Err(CodecError::NotLightMicro);
    }
    let body = chain_objects::decode_light_micro(object)?;
    let fields = block::parse_micro_header(&body.header)?;
    Ok(Message::MicroBlock(Box::new(MicroBlock::from_parts(
        fields,
        &body.header,
        body.tx_hashes,
    ))))
}

fn decode_block_txs(payload: &[u8]) -> Result<Message, CodecError> {
    let value = rlp::decode(payload)?;
    let items = value.as_list_of(3)?;
    let block_hash = items[1].as_hash32()?;
    let txs = items[2]
        .as_list()?
        .iter()
        .map(|tx| Ok(chain_objects::decode_signed_tx(tx.as_bytes()?)?))
        .collect::<Result<Vec<_>, CodecError>>()?;
    Ok(Message::BlockTxs { block_hash, txs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_objects::{encode_light_micro, encode_signed_tx, LightMicroBody};
    use crate::net::types::GENESIS_TESTNET;

    fn sample_peer(seed: u8) -> Peer {
        Peer::new([seed; 32], "10.0.0.1".parse().unwrap(), 3000 + u16::from(seed))
    }

    #[test]
    fn ping_roundtrip_empty_peers() {
        let ping = Ping::local(3015, GENESIS_TESTNET, vec![]);
        let decoded = decode_ping(&encode_ping(&ping)).unwrap();
        assert_eq!(decoded, ping);
        assert!(!decoded.sync_allowed);
        assert_eq!(decoded.difficulty, 0);
        assert_eq!(decoded.best_hash, GENESIS_TESTNET);
    }

    #[test]
    fn ping_roundtrip_with_peers() {
        let mut ping = Ping::local(3015, GENESIS_TESTNET, vec![sample_peer(1), sample_peer(2)]);
        ping.difficulty = 123_456;
        let decoded = decode_ping(&encode_ping(&ping)).unwrap();
        assert_eq!(decoded, ping);
        assert_eq!(decoded.peers.len(), 2);
        assert_eq!(decoded.peers[1].port, 3002);
    }

    #[test]
    fn ping_rejects_wide_sync_flag() {
        let mut fields = match rlp::decode(&encode_ping(&Ping::local(1, [0; 32], vec![]))) {
            Ok(Rlp::List(items)) => items,
            _ => unreachable!(),
        };
        fields[6] = Rlp::bytes(vec![0, 0]);
        let payload = Rlp::list(fields).encode();
        assert_eq!(decode_ping(&payload).unwrap_err(), CodecError::BadField("sync_allowed"));
    }

    #[test]
    fn envelope_roundtrip() {
        let ping = Ping::local(3015, GENESIS_TESTNET, vec![]);
        let raw = envelope(MSG_PING, &encode_ping(&ping));
        match Message::decode(&raw).unwrap() {
            Message::Ping(p) => assert_eq!(p, ping),
            other => panic!("decoded {}", other.command()),
        }
    }

    #[test]
    fn reserved_type_maps_to_ignored() {
        let raw = envelope(MSG_RESERVED, b"whatever");
        assert!(matches!(Message::decode(&raw).unwrap(), Message::Ignored(9)));
        let raw = envelope(0x7777, b"");
        assert!(matches!(Message::decode(&raw).unwrap(), Message::Ignored(0x7777)));
    }

    #[test]
    fn short_envelope_rejected() {
        assert_eq!(Message::decode(&[0x00]).unwrap_err(), CodecError::ShortEnvelope);
    }

    #[test]
    fn response_ok_roundtrip() {
        let object = encode_ping(&Ping::local(3015, GENESIS_TESTNET, vec![]));
        let payload = encode_response_ok(MSG_PING, &object);
        let resp = decode_response(&payload).unwrap();
        assert!(resp.result);
        assert_eq!(resp.inner_type, MSG_PING);
        assert_eq!(resp.reason, None);
        assert_eq!(resp.object.as_deref(), Some(&object[..]));
    }

    #[test]
    fn response_error_carries_reason() {
        let payload = Rlp::list(vec![
            Rlp::uint(1),
            Rlp::bytes(vec![0]),
            Rlp::uint(u64::from(MSG_GET_BLOCK_TXS)),
            Rlp::bytes(b"block not found".to_vec()),
            Rlp::bytes(Vec::new()),
        ])
        .encode();
        let resp = decode_response(&payload).unwrap();
        assert!(!resp.result);
        assert_eq!(resp.reason.as_deref(), Some("block not found"));
        assert_eq!(resp.object, None);
    }

    #[test]
    fn get_block_txs_roundtrip() {
        let payload = encode_get_block_txs(&[0xab; 32], &[[1; 32], [2; 32]]);
        match Message::decode_payload(MSG_GET_BLOCK_TXS, &payload).unwrap() {
            Message::GetBlockTxs { block_hash, tx_hashes } => {
                assert_eq!(block_hash, [0xab; 32]);
                assert_eq!(tx_hashes, vec![[1; 32], [2; 32]]);
            }
            other => panic!("decoded {}", other.command()),
        }
    }

    fn key_header() -> Vec<u8> {
        // version 1, key bit set, height, hashes, target, pow, nonce, time
        let mut out = Vec::new();
        out.extend_from_slice(&1u32.to_be_bytes());
        out.extend_from_slice(&(1u32 << 31).to_be_bytes());
        out.extend_from_slice(&7u64.to_be_bytes());
        out.extend_from_slice(&[0x11; 32]);
        out.extend_from_slice(&[0x22; 32]);
        out.extend_from_slice(&[0x33; 32]);
        out.extend_from_slice(&[0x44; 32]);
        out.extend_from_slice(&[0x55; 32]);
        out.extend_from_slice(&0x2100ffffu32.to_be_bytes());
        for i in 0..42u32 {
            out.extend_from_slice(&i.to_be_bytes());
        }
        out.extend_from_slice(&99u64.to_be_bytes());
        out.extend_from_slice(&1_550_000_000_000u64.to_be_bytes());
        out
    }

    #[test]
    fn key_block_decodes_from_wrapped_header() {
        let header = key_header();
        let payload = Rlp::list(vec![Rlp::uint(1), Rlp::bytes(header)]).encode();
        match Message::decode_payload(MSG_KEY_BLOCK, &payload).unwrap() {
            Message::KeyBlock(kb) => {
                assert_eq!(kb.height, 7);
                assert!(kb.prev_hash.starts_with("mh_"));
            }
            other => panic!("decoded {}", other.command()),
        }
    }

    fn micro_header() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&1u32.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&8u64.to_be_bytes());
        out.extend_from_slice(&[0x11; 32]);
        out.extend_from_slice(&[0x22; 32]);
        out.extend_from_slice(&[0x33; 32]);
        out.extend_from_slice(&[0x44; 32]);
        out.extend_from_slice(&1_550_000_003_000u64.to_be_bytes());
        out
    }

    #[test]
    fn micro_block_decodes_light_body() {
        let header = micro_header();
        let body = LightMicroBody {
            header: header.clone(),
            tx_hashes: vec![[0xaa; 32], [0xbb; 32]],
            pof: vec![],
        };
        let payload = Rlp::list(vec![
            Rlp::uint(1),
            Rlp::bytes(encode_light_micro(&body)),
            Rlp::uint(1),
        ])
        .encode();
        match Message::decode_payload(MSG_MICRO_BLOCK, &payload).unwrap() {
            Message::MicroBlock(mb) => {
                assert_eq!(mb.height, 8);
                assert_eq!(mb.tx_hashes, vec![[0xaa; 32], [0xbb; 32]]);
                assert_eq!(mb.hash_raw, crate::crypto::blake2b256(&header));
            }
            other => panic!("decoded {}", other.command()),
        }
    }

    #[test]
    fn non_light_micro_rejected() {
        let body = LightMicroBody { header: micro_header(), tx_hashes: vec![], pof: vec![] };
        let payload = Rlp::list(vec![
            Rlp::uint(1),
            Rlp::bytes(encode_light_micro(&body)),
            Rlp::uint(0),
        ])
        .encode();
        assert_eq!(
            Message::decode_payload(MSG_MICRO_BLOCK, &payload).unwrap_err(),
            CodecError::NotLightMicro
        );
    }

    #[test]
    fn block_txs_decodes_envelopes_in_order() {
        let tx_body = Rlp::list(vec![Rlp::uint(12), Rlp::uint(1), Rlp::bytes(vec![0; 8])]).encode();
        let tx1 = encode_signed_tx(&[vec![1; 64]], &tx_body);
        let tx2 = encode_signed_tx(&[vec![2; 64]], &tx_body);
        let payload = Rlp::list(vec![
            Rlp::uint(1),
            Rlp::bytes(vec![0xcd; 32]),
            Rlp::list(vec![Rlp::bytes(tx1.clone()), Rlp::bytes(tx2.clone())]),
        ])
        .encode();
        match Message::decode_payload(MSG_BLOCK_TXS, &payload).unwrap() {
            Message::BlockTxs { block_hash, txs } => {
                assert_eq!(block_hash, [0xcd; 32]);
                assert_eq!(txs.len(), 2);
                assert_eq!(txs[0].signatures[0], vec![1; 64]);
                assert_eq!(txs[1].signatures[0], vec![2; 64]);
            }
            other => panic!("decoded {}", other.command()),
        }
    }
}
