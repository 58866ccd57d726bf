//! Bit-exact block header parsing and the decoded block types handed to
//! consumers.
//!
//! Both header kinds share a packed prefix: a 32-bit version, then a
//! 32-bit flags word whose top bit selects the kind (1 = key block,
//! 0 = micro block), whose second bit carries a kind-specific flag
//! (`info` present / proof-of-fraud present), and whose remaining 30 bits
//! are reserved zero.

use crate::crypto::blake2b256;
use crate::ids::{self, IdTag};
use thiserror::Error;

/// Number of 32-bit words in the proof-of-work evidence.
pub const POW_EVIDENCE_WORDS: usize = 42;

/// Fixed byte length of a key block header without the trailing info field.
pub const KEY_HEADER_BASE_LEN: usize = 4 + 4 + 8 + 5 * 32 + 4 + POW_EVIDENCE_WORDS * 4 + 8 + 8;

/// Fixed byte length of a micro block header without trailing bytes.
pub const MICRO_HEADER_BASE_LEN: usize = 4 + 4 + 8 + 4 * 32 + 8;

const FLAG_KEY_HEADER: u32 = 1 << 31;
const FLAG_EXTRA: u32 = 1 << 30;
const FLAG_RESERVED_MASK: u32 = (1 << 30) - 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("header truncated ({got} bytes, need {need})")]
    Truncated { got: usize, need: usize },
    #[error("header kind bit does not match message type")]
    WrongKind,
    #[error("reserved flag bits set")]
    ReservedFlags,
    #[error("unexpected trailing bytes")]
    TrailingBytes,
    #[error("flagged info field is empty")]
    MissingInfo,
}

/// A decoded key block announcement, hashes re-encoded for consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBlock {
    /// `kh_` hash of the raw header bytes.
    pub hash: String,
    pub version: u32,
    pub height: u64,
    /// `mh_` unless it equals `prev_key_hash`, then `kh_`.
    pub prev_hash: String,
    /// `kh_`
    pub prev_key_hash: String,
    /// `bs_`
    pub state_hash: String,
    /// `ak_`
    pub miner: String,
    /// `ak_`
    pub beneficiary: String,
    pub target: u32,
    pub pow: Vec<u32>,
    pub nonce: u64,
    pub time: u64,
    /// `cb_`, present when the info flag is set.
    pub info: Option<String>,
}

/// A decoded micro block announcement. Raw hashes are kept alongside the
/// encoded forms because the follow-up transaction fetch needs them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicroBlock {
    pub hash_raw: [u8; 32],
    /// `mh_` form of `hash_raw`.
    pub hash: String,
    pub version: u32,
    pub height: u64,
    pub prev_hash: String,
    pub prev_key_hash: String,
    pub state_hash: String,
    /// `bx_`
    pub txs_hash: String,
    pub time: u64,
    pub tx_hashes: Vec<[u8; 32]>,
    pub has_pof: bool,
}

/// Raw micro header fields before the light-micro body is folded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicroHeaderFields {
    pub version: u32,
    pub has_pof: bool,
    pub height: u64,
    pub prev_hash: [u8; 32],
    pub prev_key_hash: [u8; 32],
    pub state_hash: [u8; 32],
    pub txs_hash: [u8; 32],
    pub time: u64,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], HeaderError> {
        if self.buf.len() - self.pos < n {
            return Err(HeaderError::Truncated { got: self.buf.len(), need: self.pos + n });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, HeaderError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, HeaderError> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn hash(&mut self) -> Result<[u8; 32], HeaderError> {
        Ok(self.take(32)?.try_into().unwrap())
    }

    fn rest(self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

fn check_flags(flags: u32, expect_key: bool) -> Result<bool, HeaderError> {
    let is_key = flags & FLAG_KEY_HEADER != 0;
    if is_key != expect_key {
        return Err(HeaderError::WrongKind);
    }
    if flags & FLAG_RESERVED_MASK != 0 {
        return Err(HeaderError::ReservedFlags);
    }
    Ok(flags & FLAG_EXTRA != 0)
}

/// `mh_` for an ordinary previous block, `kh_` when the previous block is
/// the previous key block itself.
fn encode_prev_hash(prev_hash: &[u8; 32], prev_key_hash: &[u8; 32]) -> String {
    let tag = if prev_hash == prev_key_hash {
        IdTag::KeyBlockHash
    } else {
        IdTag::MicroBlockHash
    };
    ids::encode(tag, prev_hash)
}

pub fn parse_key_header(bytes: &[u8]) -> Result<KeyBlock, HeaderError> {
    let mut r = Reader::new(bytes);
    let version = r.u32()?;
    let has_info = check_flags(r.u32()?, true)?;
    let height = r.u64()?;
    let prev_hash = r.hash()?;
    let prev_key_hash = r.hash()?;
    let state_hash = r.hash()?;
    let miner = r.hash()?;
    let beneficiary = r.hash()?;
    let target = r.u32()?;
    let mut pow = Vec::with_capacity(POW_EVIDENCE_WORDS);
    for _ in 0..POW_EVIDENCE_WORDS {
        pow.push(r.u32()?);
    }
    let nonce = r.u64()?;
    let time = r.u64()?;
    let rest = r.rest();

    let info = if has_info {
        if rest.is_empty() {
            return Err(HeaderError::MissingInfo);
        }
        Some(ids::encode(IdTag::Bytearray, rest))
    } else {
        if !rest.is_empty() {
            return Err(HeaderError::TrailingBytes);
        }
        None
    };

    Ok(KeyBlock {
        hash: ids::encode(IdTag::KeyBlockHash, &blake2b256(bytes)),
        version,
        height,
        prev_hash: encode_prev_hash(&prev_hash, &prev_key_hash),
        prev_key_hash: ids::encode(IdTag::KeyBlockHash, &prev_key_hash),
        state_hash: ids::encode(IdTag::StateHash, &state_hash),
        miner: ids::encode(IdTag::Account, &miner),
        beneficiary: ids::encode(IdTag::Account, &beneficiary),
        target,
        pow,
        nonce,
        time,
        info,
    })
}

pub fn parse_micro_header(bytes: &[u8]) -> Result<MicroHeaderFields, HeaderError> {
    let mut r = Reader::new(bytes);
    let version = r.u32()?;
    let has_pof = check_flags(r.u32()?, false)?;
    let height = r.u64()?;
    let prev_hash = r.hash()?;
    let prev_key_hash = r.hash()?;
    let state_hash = r.hash()?;
    let txs_hash = r.hash()?;
    let time = r.u64()?;
    // A fraud-proof hash may trail the fixed fields; without the flag the
    // header must end exactly here.
    if !has_pof && !r.rest().is_empty() {
        return Err(HeaderError::TrailingBytes);
    }

    Ok(MicroHeaderFields {
        version,
        has_pof,
        height,
        prev_hash,
        prev_key_hash,
        state_hash,
        txs_hash,
        time,
    })
}

impl MicroBlock {
    /// Combine parsed header fields with the light-micro body. `header_bytes`
    /// is the raw header, hashed with Blake2b-256 to form the block hash.
    pub fn from_parts(
        fields: MicroHeaderFields,
        header_bytes: &[u8],
        tx_hashes: Vec<[u8; 32]>,
    ) -> Self {
        let hash_raw = blake2b256(header_bytes);
        MicroBlock {
            hash: ids::encode(IdTag::MicroBlockHash, &hash_raw),
            hash_raw,
            version: fields.version,
            height: fields.height,
            prev_hash: encode_prev_hash(&fields.prev_hash, &fields.prev_key_hash),
            prev_key_hash: ids::encode(IdTag::KeyBlockHash, &fields.prev_key_hash),
            state_hash: ids::encode(IdTag::StateHash, &fields.state_hash),
            txs_hash: ids::encode(IdTag::TxRootHash, &fields.txs_hash),
            time: fields.time,
            tx_hashes,
            has_pof: fields.has_pof,
        }
    }
}
