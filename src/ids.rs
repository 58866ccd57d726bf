//! Prefixed base58check identifiers.
//!
//! Binary hashes and keys cross the API boundary as `<tag>_<base58check>`
//! strings, e.g. `kh_…` for a key block hash. The checksum is the usual
//! 4-byte double-SHA256 suffix.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdTag {
    /// `kh_` key block hash
    KeyBlockHash,
    /// `mh_` micro block hash
    MicroBlockHash,
    /// `bs_` block state root
    StateHash,
    /// `bx_` block tx root
    TxRootHash,
    /// `ak_` account pubkey
    Account,
    /// `th_` transaction hash
    TxHash,
    /// `cb_` contract bytearray
    Bytearray,
    /// `pp_` peer pubkey
    PeerPubkey,
}

impl IdTag {
    pub fn prefix(self) -> &'static str {
        match self {
            IdTag::KeyBlockHash => "kh",
            IdTag::MicroBlockHash => "mh",
            IdTag::StateHash => "bs",
            IdTag::TxRootHash => "bx",
            IdTag::Account => "ak",
            IdTag::TxHash => "th",
            IdTag::Bytearray => "cb",
            IdTag::PeerPubkey => "pp",
        }
    }

    fn from_prefix(s: &str) -> Option<Self> {
        Some(match s {
            "kh" => IdTag::KeyBlockHash,
            "mh" => IdTag::MicroBlockHash,
            "bs" => IdTag::StateHash,
            "bx" => IdTag::TxRootHash,
            "ak" => IdTag::Account,
            "th" => IdTag::TxHash,
            "cb" => IdTag::Bytearray,
            "pp" => IdTag::PeerPubkey,
            _ => return None,
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("missing `_` separator")]
    MissingSeparator,
    #[error("unknown identifier prefix `{0}`")]
    UnknownPrefix(String),
    #[error("base58check payload invalid")]
    BadPayload,
}

pub fn encode(tag: IdTag, payload: &[u8]) -> String {
    format!(
        "{}_{}",
        tag.prefix(),
        bs58::encode(payload).with_check().into_string()
    )
}

pub fn decode(s: &str) -> Result<(IdTag, Vec<u8>), IdError> {
    let (prefix, body) = s.split_once('_').ok_or(IdError::MissingSeparator)?;
    let tag = IdTag::from_prefix(prefix)
        .ok_or_else(|| IdError::UnknownPrefix(prefix.to_string()))?;
    let payload = bs58::decode(body)
        .with_check(None)
        .into_vec()
        .map_err(|_| IdError::BadPayload)?;
    Ok((tag, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_tags() {
        let payload = [7u8; 32];
        for tag in [
            IdTag::KeyBlockHash,
            IdTag::MicroBlockHash,
            IdTag::StateHash,
            IdTag::TxRootHash,
            IdTag::Account,
            IdTag::TxHash,
            IdTag::Bytearray,
            IdTag::PeerPubkey,
        ] {
            let s = encode(tag, &payload);
            assert!(s.starts_with(&format!("{}_", tag.prefix())), "{s}");
            let (back_tag, back) = decode(&s).unwrap();
            assert_eq!(back_tag, tag);
            assert_eq!(back, payload);
        }
    }

    #[test]
    fn corrupted_checksum_rejected() {
        let mut s = encode(IdTag::Account, &[1u8; 32]);
        // flip the last base58 character to another alphabet member
        let last = s.pop().unwrap();
        s.push(if last == '2' { '3' } else { '2' });
        assert_eq!(decode(&s), Err(IdError::BadPayload));
    }

    #[test]
    fn unknown_prefix_rejected() {
        let s = encode(IdTag::Account, &[1u8; 32]).replacen("ak_", "zz_", 1);
        assert!(matches!(decode(&s), Err(IdError::UnknownPrefix(_))));
    }

    #[test]
    fn missing_separator_rejected() {
        assert_eq!(decode("akXYZ"), Err(IdError::MissingSeparator));
    }
}
