//! Recursive length-prefix codec: byte strings and arbitrarily nested lists.
//!
//! Wire layout (big-endian lengths):
//! - single byte < 0x80 encodes itself
//! - byte string up to 55 bytes: `0x80 + len` followed by the bytes
//! - longer byte string: `0xb7 + len_of_len`, the length, the bytes
//! - list with payload up to 55 bytes: `0xc0 + len` followed by the items
//! - longer list: `0xf7 + len_of_len`, the payload length, the items

use thiserror::Error;

/// Nesting limit for decoded values. The protocol never nests deeper than
/// four levels; anything past this is hostile input.
const MAX_DEPTH: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RlpError {
    #[error("input truncated")]
    Truncated,
    #[error("trailing bytes after value")]
    TrailingBytes,
    #[error("length prefix exceeds input")]
    LengthOverflow,
    #[error("nesting deeper than {MAX_DEPTH} levels")]
    TooDeep,
    #[error("expected a byte string")]
    ExpectedBytes,
    #[error("expected a list")]
    ExpectedList,
    #[error("list has {got} items, expected {want}")]
    Arity { want: usize, got: usize },
    #[error("integer field wider than 8 bytes")]
    IntWidth,
    #[error("byte string is not {want} bytes")]
    BadLength { want: usize },
}

/// A decoded RLP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rlp {
    Bytes(Vec<u8>),
    List(Vec<Rlp>),
}

impl Rlp {
    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        Rlp::Bytes(b.into())
    }

    pub fn list(items: Vec<Rlp>) -> Self {
        Rlp::List(items)
    }

    /// Unsigned integer as minimal big-endian bytes. Zero stays one `0x00`
    /// byte on the wire, matching the upstream protocol's integer encoding.
    pub fn uint(v: u64) -> Self {
        Rlp::Bytes(uint_to_be(v))
    }

    pub fn as_bytes(&self) -> Result<&[u8], RlpError> {
        match self {
            Rlp::Bytes(b) => Ok(b),
            Rlp::List(_) => Err(RlpError::ExpectedBytes),
        }
    }

    pub fn as_list(&self) -> Result<&[Rlp], RlpError> {
        match self {
            Rlp::List(items) => Ok(items),
            Rlp::Bytes(_) => Err(RlpError::ExpectedList),
        }
    }

    /// List accessor that also checks the item count.
    pub fn as_list_of(&self, want: usize) -> Result<&[Rlp], RlpError> {
        let items = self.as_list()?;
        if items.len() != want {
            return Err(RlpError::Arity { want, got: items.len() });
        }
        Ok(items)
    }

    /// Big-endian unsigned integer. The empty string decodes to zero.
    pub fn as_u64(&self) -> Result<u64, RlpError> {
        let b = self.as_bytes()?;
        if b.len() > 8 {
            return Err(RlpError::IntWidth);
        }
        let mut v = 0u64;
        for &byte in b {
            v = (v << 8) | u64::from(byte);
        }
        Ok(v)
    }

    pub fn as_hash32(&self) -> Result<[u8; 32], RlpError> {
        let b = self.as_bytes()?;
        b.try_into().map_err(|_| RlpError::BadLength { want: 32 })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_into(self, &mut out);
        out
    }
}

fn uint_to_be(v: u64) -> Vec<u8> {
    if v == 0 {
        return vec![0];
    }
    let bytes = v.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    bytes[skip..].to_vec()
}

fn encode_length(out: &mut Vec<u8>, len: usize, short_base: u8, long_base: u8) {
    if len <= 55 {
        out.push(short_base + len as u8);
    } else {
        let len_bytes = uint_to_be(len as u64);
        out.push(long_base + len_bytes.len() as u8);
        out.extend_from_slice(&len_bytes);
    }
}

fn encode_into(value: &Rlp, out: &mut Vec<u8>) {
    match value {
        Rlp::Bytes(b) => {
            if b.len() == 1 && b[0] < 0x80 {
                out.push(b[0]);
            } else {
                encode_length(out, b.len(), 0x80, 0xb7);
                out.extend_from_slice(b);
            }
        }
        Rlp::List(items) => {
            let mut payload = Vec::new();
            for item in items {
                encode_into(item, &mut payload);
            }
            encode_length(out, payload.len(), 0xc0, 0xf7);
            out.extend_from_slice(&payload);
        }
    }
}

/// Decode a single value consuming the entire input.
pub fn decode(input: &[u8]) -> Result<Rlp, RlpError> {
    let (value, used) = decode_at(input, 0)?;
    if used != input.len() {
        return Err(RlpError::TrailingBytes);
    }
    Ok(value)
}

fn read_long_length(input: &[u8], len_of_len: usize) -> Result<usize, RlpError> {
    if input.len() < len_of_len {
        return Err(RlpError::Truncated);
    }
    let mut len = 0usize;
    for &b in &input[..len_of_len] {
        len = len
            .checked_mul(256)
            .and_then(|l| l.checked_add(b as usize))
            .ok_or(RlpError::LengthOverflow)?;
    }
    Ok(len)
}

fn decode_at(input: &[u8], depth: usize) -> Result<(Rlp, usize), RlpError> {
    if depth > MAX_DEPTH {
        return Err(RlpError::TooDeep);
    }
    let first = *input.first().ok_or(RlpError::Truncated)?;

    let (is_list, len, header) = match first {
        0x00..=0x7f => return Ok((Rlp::Bytes(vec![first]), 1)),
        0x80..=0xb7 => (false, (first - 0x80) as usize, 1),
        0xb8..=0xbf => {
            let lol = (first - 0xb7) as usize;
            (false, read_long_length(&input[1..], lol)?, 1 + lol)
        }
        0xc0..=0xf7 => (true, (first - 0xc0) as usize, 1),
        0xf8..=0xff => {
            let lol = (first - 0xf7) as usize;
            (true, read_long_length(&input[1..], lol)?, 1 + lol)
        }
    };

    let end = header.checked_add(len).ok_or(RlpError::LengthOverflow)?;
    if end > input.len() {
        return Err(RlpError::LengthOverflow);
    }
    let payload = &input[header..end];

    if !is_list {
        return Ok((Rlp::Bytes(payload.to_vec()), end));
    }

    let mut items = Vec::new();
    let mut pos = 0;
    while pos < payload.len() {
        let (item, used) = decode_at(&payload[pos..], depth + 1)?;
        items.push(item);
        pos += used;
    }
    Ok((Rlp::List(items), end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn single_byte_encodes_itself() {
        assert_eq!(Rlp::bytes(vec![0x7f]).encode(), vec![0x7f]);
        assert_eq!(Rlp::bytes(vec![0x00]).encode(), vec![0x00]);
        // 0x80 needs a length prefix
        assert_eq!(Rlp::bytes(vec![0x80]).encode(), vec![0x81, 0x80]);
    }

    #[test]
    fn empty_string_and_list() {
        assert_eq!(Rlp::bytes(vec![]).encode(), vec![0x80]);
        assert_eq!(Rlp::list(vec![]).encode(), vec![0xc0]);
        assert_eq!(decode(&[0x80]).unwrap(), Rlp::Bytes(vec![]));
        assert_eq!(decode(&[0xc0]).unwrap(), Rlp::List(vec![]));
    }

    #[test]
    fn boundary_55_56() {
        let b55 = Rlp::bytes(vec![0xaa; 55]);
        let enc = b55.encode();
        assert_eq!(enc[0], 0x80 + 55);
        assert_eq!(enc.len(), 56);
        assert_eq!(decode(&enc).unwrap(), b55);

        let b56 = Rlp::bytes(vec![0xbb; 56]);
        let enc = b56.encode();
        assert_eq!(enc[0], 0xb8);
        assert_eq!(enc[1], 56);
        assert_eq!(decode(&enc).unwrap(), b56);
    }

    #[test]
    fn uint_minimal_bytes() {
        assert_eq!(Rlp::uint(0), Rlp::Bytes(vec![0]));
        assert_eq!(Rlp::uint(1), Rlp::Bytes(vec![1]));
        assert_eq!(Rlp::uint(0x1234), Rlp::Bytes(vec![0x12, 0x34]));
        assert_eq!(Rlp::uint(0x1234).as_u64().unwrap(), 0x1234);
        assert_eq!(Rlp::Bytes(vec![]).as_u64().unwrap(), 0);
    }

    #[test]
    fn nested_list_roundtrip() {
        let v = Rlp::list(vec![
            Rlp::uint(1),
            Rlp::bytes(b"hello".to_vec()),
            Rlp::list(vec![Rlp::bytes(vec![0xde, 0xad]), Rlp::list(vec![])]),
        ]);
        assert_eq!(decode(&v.encode()).unwrap(), v);
    }

    #[test]
    fn truncated_input_rejected() {
        assert_eq!(decode(&[]), Err(RlpError::Truncated));
        assert_eq!(decode(&[0x83, 0x01]), Err(RlpError::LengthOverflow));
        assert_eq!(decode(&[0xb8]), Err(RlpError::Truncated));
    }

    #[test]
    fn trailing_bytes_rejected() {
        assert_eq!(decode(&[0x01, 0x02]), Err(RlpError::TrailingBytes));
    }

    #[test]
    fn arity_check() {
        let v = Rlp::list(vec![Rlp::uint(1), Rlp::uint(2)]);
        assert!(v.as_list_of(2).is_ok());
        assert_eq!(v.as_list_of(3), Err(RlpError::Arity { want: 3, got: 2 }));
    }

    fn arb_rlp() -> impl Strategy<Value = Rlp> {
        let leaf = proptest::collection::vec(any::<u8>(), 0..64).prop_map(Rlp::Bytes);
        leaf.prop_recursive(4, 32, 8, |inner| {
            proptest::collection::vec(inner, 0..8).prop_map(Rlp::List)
        })
    }

    proptest! {
        #[test]
        fn roundtrip(v in arb_rlp()) {
            prop_assert_eq!(decode(&v.encode()).unwrap(), v);
        }

        #[test]
        fn bytes_roundtrip(b in proptest::collection::vec(any::<u8>(), 0..256)) {
            let v = Rlp::Bytes(b.clone());
            let decoded = decode(&v.encode()).unwrap();
            prop_assert_eq!(decoded.as_bytes().unwrap(), &b[..]);
        }
    }
}
