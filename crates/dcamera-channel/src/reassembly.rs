//! Receive-side reassembly of fragmented messages
//!
//! State is only meaningful between a START packet and its matching END.
//! There is no reordering buffer: any gap, duplicate or foreign sequence
//! number discards the message in flight.

use crate::frame::{FragFlag, FrameHeader};
use dcamera_core::{DCameraError, Result};
use tracing::{debug, warn};

/// Reassembly state for one session
#[derive(Debug, Default)]
pub struct Reassembler {
    waiting: bool,
    now_seq: u32,
    now_sub_seq: u16,
    offset: usize,
    total_len: usize,
    buffer: Vec<u8>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a message is partially assembled
    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// Drop any partially assembled message
    pub fn reset(&mut self) {
        self.waiting = false;
        self.now_seq = 0;
        self.now_sub_seq = 0;
        self.offset = 0;
        self.total_len = 0;
        self.buffer = Vec::new();
    }

    /// Feed one decoded packet
    ///
    /// Returns the complete message once its last packet arrives. On error
    /// the in-flight message has already been discarded.
    pub fn push(&mut self, header: &FrameHeader, payload: &[u8]) -> Result<Option<Vec<u8>>> {
        match header.frag_flag {
            FragFlag::StartAndEnd => {
                if header.data_len != header.total_len {
                    return Err(DCameraError::Protocol(format!(
                        "single packet dataLen {} != totalLen {}",
                        header.data_len, header.total_len
                    )));
                }
                Ok(Some(payload.to_vec()))
            }
            FragFlag::Start => {
                if self.waiting {
                    warn!(
                        seq = self.now_seq,
                        "New message started before seq finished, discarding it"
                    );
                }
                if let Err(e) = self.start(header, payload) {
                    self.reset();
                    return Err(e);
                }
                Ok(None)
            }
            FragFlag::Mid | FragFlag::End => {
                if let Err(e) = self.check_continuation(header, payload.len()) {
                    self.reset();
                    return Err(e);
                }
                let end = self.offset + payload.len();
                self.buffer[self.offset..end].copy_from_slice(payload);
                self.offset = end;
                self.now_sub_seq = header.sub_seq;

                if header.frag_flag == FragFlag::Mid {
                    return Ok(None);
                }
                if self.offset != self.total_len {
                    let (got, want) = (self.offset, self.total_len);
                    self.reset();
                    return Err(DCameraError::Protocol(format!(
                        "message ended at {} of {} bytes",
                        got, want
                    )));
                }
                debug!(seq = self.now_seq, len = self.total_len, "Message reassembled");
                let message = std::mem::take(&mut self.buffer);
                self.reset();
                Ok(Some(message))
            }
            FragFlag::None => Err(DCameraError::Protocol("packet without fragment flag".into())),
        }
    }

    fn start(&mut self, header: &FrameHeader, payload: &[u8]) -> Result<()> {
        if payload.len() > header.total_len as usize {
            return Err(DCameraError::Protocol(format!(
                "start packet of {} bytes exceeds totalLen {}",
                payload.len(),
                header.total_len
            )));
        }
        self.total_len = header.total_len as usize;
        self.buffer = vec![0; self.total_len];
        self.buffer[..payload.len()].copy_from_slice(payload);
        self.offset = payload.len();
        self.now_seq = header.seq_num;
        self.now_sub_seq = header.sub_seq;
        self.waiting = true;
        Ok(())
    }

    fn check_continuation(&self, header: &FrameHeader, len: usize) -> Result<()> {
        if !self.waiting {
            return Err(DCameraError::Protocol(format!(
                "seq {} sub {} arrived without a start packet",
                header.seq_num, header.sub_seq
            )));
        }
        if header.seq_num != self.now_seq {
            return Err(DCameraError::Protocol(format!(
                "seq {} does not match message in flight {}",
                header.seq_num, self.now_seq
            )));
        }
        if header.sub_seq != self.now_sub_seq.wrapping_add(1) {
            return Err(DCameraError::Protocol(format!(
                "sub seq {} does not follow {}",
                header.sub_seq, self.now_sub_seq
            )));
        }
        if self.offset + len > self.total_len {
            return Err(DCameraError::Protocol(format!(
                "fragment overflows message: offset {} + {} > {}",
                self.offset, len, self.total_len
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{MAX_PACKET_LEN, PROTOCOL_VERSION, fragment};

    fn header(frag_flag: FragFlag, sub_seq: u16, total_len: u32, data_len: u32) -> FrameHeader {
        FrameHeader {
            version: PROTOCOL_VERSION,
            frag_flag,
            data_type: 1,
            seq_num: 5,
            total_len,
            sub_seq,
            data_len,
        }
    }

    fn feed(reassembler: &mut Reassembler, packets: &[Vec<u8>]) -> Vec<Result<Option<Vec<u8>>>> {
        packets
            .iter()
            .map(|p| {
                let (header, payload) = FrameHeader::decode(p).unwrap();
                reassembler.push(&header, payload)
            })
            .collect()
    }

    #[test]
    fn test_reassembles_fragmented_message() {
        let payload: Vec<u8> = (0..MAX_PACKET_LEN * 5 + 3).map(|i| (i * 7) as u8).collect();
        let packets = fragment(&payload, 1, 42).unwrap();
        let mut reassembler = Reassembler::new();

        let mut results = feed(&mut reassembler, &packets);
        let last = results.pop().unwrap().unwrap();
        assert!(results.iter().all(|r| matches!(r, Ok(None))));
        assert_eq!(last, Some(payload));
        assert!(!reassembler.is_waiting());
    }

    #[test]
    fn test_single_packet_bypasses_state() {
        let mut reassembler = Reassembler::new();
        let big = fragment(&vec![1u8; MAX_PACKET_LEN * 2 + 1], 1, 1).unwrap();
        feed(&mut reassembler, &big[..1]);
        assert!(reassembler.is_waiting());

        let small = fragment(b"ping", 0, 2).unwrap();
        let results = feed(&mut reassembler, &small);
        assert_eq!(results[0].as_ref().unwrap().as_deref(), Some(&b"ping"[..]));
        // the message in flight is untouched
        assert!(reassembler.is_waiting());
        let rest = feed(&mut reassembler, &big[1..]);
        assert!(matches!(rest.last(), Some(Ok(Some(_)))));
    }

    #[test]
    fn test_skipped_sub_seq_discards_message() {
        let payload = vec![3u8; MAX_PACKET_LEN * 3 + 1];
        let packets = fragment(&payload, 1, 9).unwrap();
        let mut reassembler = Reassembler::new();

        // START sub=0, then MID sub=2
        let results = feed(&mut reassembler, &[packets[0].clone(), packets[2].clone()]);
        assert!(matches!(results[0], Ok(None)));
        assert!(results[1].is_err());
        assert!(!reassembler.is_waiting());

        // the remaining packets cannot complete anything
        let rest = feed(&mut reassembler, &packets[3..]);
        assert!(rest.iter().all(|r| r.is_err()));
    }

    #[test]
    fn test_foreign_sequence_discards_message() {
        let a = fragment(&vec![1u8; MAX_PACKET_LEN + 1], 1, 1).unwrap();
        let b = fragment(&vec![2u8; MAX_PACKET_LEN + 1], 1, 2).unwrap();
        let mut reassembler = Reassembler::new();
        let results = feed(&mut reassembler, &[a[0].clone(), b[1].clone()]);
        assert!(results[1].is_err());
        assert!(!reassembler.is_waiting());
    }

    #[test]
    fn test_end_without_start_is_rejected() {
        let packets = fragment(&vec![1u8; MAX_PACKET_LEN + 1], 1, 1).unwrap();
        let mut reassembler = Reassembler::new();
        let results = feed(&mut reassembler, &packets[1..]);
        assert!(results[0].is_err());
    }

    #[test]
    fn test_restart_replaces_message_in_flight() {
        let a = fragment(&vec![1u8; MAX_PACKET_LEN + 1], 1, 1).unwrap();
        let b = fragment(&vec![2u8; MAX_PACKET_LEN + 5], 1, 2).unwrap();
        let mut reassembler = Reassembler::new();
        let results = feed(&mut reassembler, &[a[0].clone(), b[0].clone(), b[1].clone()]);
        let message = results[2].as_ref().unwrap().as_ref().unwrap();
        assert_eq!(message.len(), MAX_PACKET_LEN + 5);
        assert!(message.iter().all(|&b| b == 2));
    }

    #[test]
    fn test_end_overflowing_total_len_discards_message() {
        let mut reassembler = Reassembler::new();
        let first = reassembler.push(&header(FragFlag::Start, 0, 10, 6), &[1; 6]);
        assert!(matches!(first, Ok(None)));
        assert!(reassembler.is_waiting());

        // 6 + 6 > 10
        let result = reassembler.push(&header(FragFlag::End, 1, 10, 6), &[2; 6]);
        assert!(matches!(result, Err(DCameraError::Protocol(_))));
        assert!(!reassembler.is_waiting());
    }

    #[test]
    fn test_mid_overflowing_total_len_discards_message() {
        let mut reassembler = Reassembler::new();
        reassembler.push(&header(FragFlag::Start, 0, 8, 4), &[1; 4]).unwrap();
        let result = reassembler.push(&header(FragFlag::Mid, 1, 8, 5), &[2; 5]);
        assert!(result.is_err());
        assert!(!reassembler.is_waiting());
    }

    #[test]
    fn test_single_packet_length_mismatch_is_rejected() {
        let mut reassembler = Reassembler::new();
        let result = reassembler.push(&header(FragFlag::StartAndEnd, 0, 9, 4), &[1; 4]);
        assert!(matches!(result, Err(DCameraError::Protocol(_))));
        assert!(!reassembler.is_waiting());

        // A well-formed single packet still goes through afterwards
        let result = reassembler.push(&header(FragFlag::StartAndEnd, 0, 4, 4), &[1; 4]);
        assert_eq!(result.unwrap(), Some(vec![1; 4]));
    }
}
