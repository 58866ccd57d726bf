//! Application-level fragmentation over the Noise datagram stream.
//!
//! A logical message that fits in one packet travels verbatim. Anything
//! larger is cut into `FRAGMENT_SIZE` chunks, each prefixed with
//! `[0x0000][index][total]` (u16s, index 1-based). Fragments must arrive
//! strictly in order; any gap, reorder, or total mismatch kills the
//! connection.

use crate::net::noise::{NoiseError, NoiseWriter};
use crate::net::types::{
    FRAGMENT_HEADER_SIZE, FRAGMENT_SIZE, MAX_PACKET_SIZE, MAX_REASSEMBLED_SIZE, MSG_FRAGMENT,
};
use thiserror::Error;

/// Largest datagram the reassembler will accept: one full fragment.
const MAX_DATAGRAM_SIZE: usize = FRAGMENT_SIZE + FRAGMENT_HEADER_SIZE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FragmentError {
    #[error("datagram of {0} bytes is too short")]
    TooShort(usize),
    #[error("datagram of {0} bytes exceeds the packet cap")]
    Oversize(usize),
    #[error("fragment {got} arrived, expected {expected}")]
    OutOfOrder { expected: u16, got: u16 },
    #[error("fragment total changed from {expected} to {got}")]
    TotalMismatch { expected: u16, got: u16 },
    #[error("fragment total of zero")]
    ZeroTotal,
    #[error("fragments would reassemble past {MAX_REASSEMBLED_SIZE} bytes")]
    TooLarge,
}

/// Send one logical message, fragmenting when it cannot fit a single
/// packet alongside its 2-byte type prefix.
pub async fn send_message(writer: &mut NoiseWriter, msg: &[u8]) -> Result<(), NoiseError> {
    for datagram in split_message(msg)? {
        writer.send(&datagram).await?;
    }
    Ok(())
}

/// The datagrams a logical message travels as: the message itself when it
/// fits, `⌈len/FRAGMENT_SIZE⌉` headed fragments otherwise.
fn split_message(msg: &[u8]) -> Result<Vec<Vec<u8>>, NoiseError> {
    if msg.len() <= MAX_PACKET_SIZE - 2 {
        return Ok(vec![msg.to_vec()]);
    }

    let total = msg.len().div_ceil(FRAGMENT_SIZE);
    if total > usize::from(u16::MAX) {
        return Err(NoiseError::MessageTooLarge(msg.len()));
    }

    Ok(msg
        .chunks(FRAGMENT_SIZE)
        .enumerate()
        .map(|(i, chunk)| {
            let mut datagram = Vec::with_capacity(FRAGMENT_HEADER_SIZE + chunk.len());
            datagram.extend_from_slice(&MSG_FRAGMENT.to_be_bytes());
            datagram.extend_from_slice(&((i + 1) as u16).to_be_bytes());
            datagram.extend_from_slice(&(total as u16).to_be_bytes());
            datagram.extend_from_slice(chunk);
            datagram
        })
        .collect())
}

/// Per-connection reassembly buffer: fragment payloads, oldest first.
#[derive(Default)]
pub struct Reassembler {
    chunks: Vec<Vec<u8>>,
    total: u16,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one inbound datagram. Returns a complete logical message when
    /// the datagram finishes one (or already was one).
    pub fn push(&mut self, datagram: Vec<u8>) -> Result<Option<Vec<u8>>, FragmentError> {
        if datagram.len() < 2 {
            return Err(FragmentError::TooShort(datagram.len()));
        }
        if datagram.len() > MAX_DATAGRAM_SIZE {
            return Err(FragmentError::Oversize(datagram.len()));
        }
        let msg_type = u16::from_be_bytes([datagram[0], datagram[1]]);
        if msg_type != MSG_FRAGMENT {
            return Ok(Some(datagram));
        }

        if datagram.len() < FRAGMENT_HEADER_SIZE {
            return Err(FragmentError::TooShort(datagram.len()));
        }
        let index = u16::from_be_bytes([datagram[2], datagram[3]]);
        let total = u16::from_be_bytes([datagram[4], datagram[5]]);
        if total == 0 {
            return Err(FragmentError::ZeroTotal);
        }

        let expected = self.chunks.len() as u16 + 1;
        if index != expected {
            self.reset();
            return Err(FragmentError::OutOfOrder { expected, got: index });
        }
        if index == 1 {
            if usize::from(total).saturating_mul(FRAGMENT_SIZE) > MAX_REASSEMBLED_SIZE {
                return Err(FragmentError::TooLarge);
            }
            self.total = total;
        } else if total != self.total {
            let expected = self.total;
            self.reset();
            return Err(FragmentError::TotalMismatch { expected, got: total });
        }

        self.chunks.push(datagram[FRAGMENT_HEADER_SIZE..].to_vec());

        if index == total {
            let msg = self.chunks.concat();
            self.reset();
            return Ok(Some(msg));
        }
        Ok(None)
    }

    fn reset(&mut self) {
        self.chunks.clear();
        self.total = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(index: u16, total: u16, chunk: &[u8]) -> Vec<u8> {
        let mut d = Vec::new();
        d.extend_from_slice(&MSG_FRAGMENT.to_be_bytes());
        d.extend_from_slice(&index.to_be_bytes());
        d.extend_from_slice(&total.to_be_bytes());
        d.extend_from_slice(chunk);
        d
    }

    #[test]
    fn passthrough_for_whole_messages() {
        let mut r = Reassembler::new();
        let msg = vec![0x00, 0x01, 0xaa, 0xbb];
        assert_eq!(r.push(msg.clone()).unwrap(), Some(msg));
    }

    #[test]
    fn boundary_message_stays_unfragmented() {
        let msg = vec![0x77; MAX_PACKET_SIZE - 2];
        assert_eq!(split_message(&msg).unwrap(), vec![msg]);

        let msg = vec![0x77; MAX_PACKET_SIZE - 1];
        let frags = split_message(&msg).unwrap();
        assert_eq!(frags.len(), 2);
        assert_eq!(&frags[0][..2], MSG_FRAGMENT.to_be_bytes());
    }

    #[test]
    fn fragment_count_matches_ceil_division() {
        let msg = vec![0x5a; 1500];
        let frags = split_message(&msg).unwrap();
        assert_eq!(frags.len(), 3);
        assert_eq!(frags[0].len(), FRAGMENT_HEADER_SIZE + 507);
        assert_eq!(frags[1].len(), FRAGMENT_HEADER_SIZE + 507);
        assert_eq!(frags[2].len(), FRAGMENT_HEADER_SIZE + 486);

        let mut r = Reassembler::new();
        assert_eq!(r.push(frags[0].clone()).unwrap(), None);
        assert_eq!(r.push(frags[1].clone()).unwrap(), None);
        assert_eq!(r.push(frags[2].clone()).unwrap(), Some(msg));
    }

    #[test]
    fn exact_fragment_multiple() {
        let msg = vec![0x11; FRAGMENT_SIZE * 2];
        let frags = split_message(&msg).unwrap();
        assert_eq!(frags.len(), 2);
        let mut r = Reassembler::new();
        assert_eq!(r.push(frags[0].clone()).unwrap(), None);
        assert_eq!(r.push(frags[1].clone()).unwrap(), Some(msg));
    }

    #[test]
    fn out_of_order_fragment_rejected() {
        let mut r = Reassembler::new();
        r.push(fragment(1, 3, &[1])).unwrap();
        assert_eq!(
            r.push(fragment(3, 3, &[3])).unwrap_err(),
            FragmentError::OutOfOrder { expected: 2, got: 3 }
        );
    }

    #[test]
    fn total_mismatch_rejected() {
        let mut r = Reassembler::new();
        r.push(fragment(1, 3, &[1])).unwrap();
        assert_eq!(
            r.push(fragment(2, 4, &[2])).unwrap_err(),
            FragmentError::TotalMismatch { expected: 3, got: 4 }
        );
    }

    #[test]
    fn restart_mid_stream_rejected() {
        let mut r = Reassembler::new();
        r.push(fragment(1, 2, &[1])).unwrap();
        assert!(matches!(
            r.push(fragment(1, 2, &[1])),
            Err(FragmentError::OutOfOrder { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn single_fragment_message_completes() {
        let mut r = Reassembler::new();
        assert_eq!(r.push(fragment(1, 1, &[7, 7])).unwrap(), Some(vec![7, 7]));
    }

    #[test]
    fn zero_total_rejected() {
        let mut r = Reassembler::new();
        assert_eq!(r.push(fragment(1, 0, &[])).unwrap_err(), FragmentError::ZeroTotal);
    }

    #[test]
    fn oversize_datagram_rejected() {
        let mut r = Reassembler::new();
        let big = vec![0u8; MAX_DATAGRAM_SIZE + 1];
        assert_eq!(r.push(big).unwrap_err(), FragmentError::Oversize(MAX_DATAGRAM_SIZE + 1));
    }

    #[test]
    fn runt_datagram_rejected() {
        let mut r = Reassembler::new();
        assert_eq!(r.push(vec![0]).unwrap_err(), FragmentError::TooShort(1));
    }
}
