//! Type- and version-tagged chain object layer.
//!
//! Chain objects travel as `rlp([tag, vsn, field...])`. The listener only
//! ever unpacks two of them: the light micro block body carried inside a
//! micro block announcement, and the signed-transaction envelopes carried
//! inside a `block_txs`.

use crate::crypto::blake2b256;
use crate::ids::{self, IdTag};
use crate::rlp::{self, Rlp, RlpError};
use thiserror::Error;

pub const TAG_SIGNED_TX: u64 = 11;
pub const TAG_LIGHT_MICRO_BLOCK: u64 = 102;
pub const OBJECT_VSN: u64 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObjectError {
    #[error(transparent)]
    Rlp(#[from] RlpError),
    #[error("object tag {got}, expected {want}")]
    WrongTag { want: u64, got: u64 },
    #[error("unsupported object version {0}")]
    UnsupportedVersion(u64),
    #[error("malformed {0} field")]
    BadField(&'static str),
}

/// The gossiped form of a micro block: header bytes plus transaction
/// hashes, without the transaction bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightMicroBody {
    pub header: Vec<u8>,
    pub tx_hashes: Vec<[u8; 32]>,
    pub pof: Vec<Vec<u8>>,
}

/// A signed transaction envelope, resolved far enough for consumers: the
/// inner body stays opaque apart from its leading type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    /// `th_` hash of the envelope bytes.
    pub hash: String,
    pub tx_type_tag: u64,
    pub signatures: Vec<Vec<u8>>,
    pub body: Vec<u8>,
}

fn decode_tagged(bytes: &[u8], want_tag: u64) -> Result<Vec<Rlp>, ObjectError> {
    let value = rlp::decode(bytes)?;
    let items = value.as_list()?;
    if items.len() < 2 {
        return Err(RlpError::Arity { want: 2, got: items.len() }.into());
    }
    let tag = items[0].as_u64()?;
    if tag != want_tag {
        return Err(ObjectError::WrongTag { want: want_tag, got: tag });
    }
    let vsn = items[1].as_u64()?;
    if vsn != OBJECT_VSN {
        return Err(ObjectError::UnsupportedVersion(vsn));
    }
    Ok(items[2..].to_vec())
}

pub fn decode_light_micro(bytes: &[u8]) -> Result<LightMicroBody, ObjectError> {
    let fields = decode_tagged(bytes, TAG_LIGHT_MICRO_BLOCK)?;
    if fields.len() != 3 {
        return Err(RlpError::Arity { want: 3, got: fields.len() }.into());
    }
    let header = fields[0].as_bytes()?.to_vec();
    let tx_hashes = fields[1]
        .as_list()?
        .iter()
        .map(|h| h.as_hash32())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ObjectError::BadField("tx_hashes"))?;
    let pof = fields[2]
        .as_list()?
        .iter()
        .map(|p| Ok(p.as_bytes()?.to_vec()))
        .collect::<Result<Vec<_>, RlpError>>()?;
    Ok(LightMicroBody { header, tx_hashes, pof })
}

pub fn decode_signed_tx(bytes: &[u8]) -> Result<SignedTx, ObjectError> {
    let fields = decode_tagged(bytes, TAG_SIGNED_TX)?;
    if fields.len() != 2 {
        return Err(RlpError::Arity { want: 2, got: fields.len() }.into());
    }
    let signatures = fields[0]
        .as_list()?
        .iter()
        .map(|s| Ok(s.as_bytes()?.to_vec()))
        .collect::<Result<Vec<_>, RlpError>>()?;
    let body = fields[1].as_bytes()?.to_vec();

    // The inner transaction is itself a tagged object; only its type tag
    // is interpreted here.
    let tx_type_tag = rlp::decode(&body)
        .ok()
        .and_then(|v| v.as_list().ok().and_then(|items| items.first().cloned()))
        .ok_or(ObjectError::BadField("transaction"))?
        .as_u64()
        .map_err(|_| ObjectError::BadField("transaction"))?;

    Ok(SignedTx {
        hash: ids::encode(IdTag::TxHash, &blake2b256(bytes)),
        tx_type_tag,
        signatures,
        body,
    })
}

/// Encode a light micro body; the send path never emits these, tests and
/// tooling do.
pub fn encode_light_micro(body: &LightMicroBody) -> Vec<u8> {
    Rlp::list(vec![
        Rlp::uint(TAG_LIGHT_MICRO_BLOCK),
        Rlp::uint(OBJECT_VSN),
        Rlp::bytes(body.header.clone()),
        Rlp::list(body.tx_hashes.iter().map(|h| Rlp::bytes(h.to_vec())).collect()),
        Rlp::list(body.pof.iter().map(|p| Rlp::bytes(p.clone())).collect()),
    ])
    .encode()
}

/// Encode a signed-transaction envelope around an already-encoded body.
pub fn encode_signed_tx(signatures: &[Vec<u8>], body: &[u8]) -> Vec<u8> {
    Rlp::list(vec![
        Rlp::uint(TAG_SIGNED_TX),
        Rlp::uint(OBJECT_VSN),
        Rlp::list(signatures.iter().map(|s| Rlp::bytes(s.clone())).collect()),
        Rlp::bytes(body.to_vec()),
    ])
    .encode()
}
