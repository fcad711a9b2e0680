//! Fragmentation header for byte-mode sessions
//!
//! Every packet on a byte session starts with a 21-byte big-endian header:
//!
//! | Field    | Size | Offset |
//! |----------|------|--------|
//! | version  | u16  | 0      |
//! | fragFlag | u8   | 2      |
//! | dataType | u32  | 3      |
//! | seqNum   | u32  | 7      |
//! | totalLen | u32  | 11     |
//! | subSeq   | u16  | 15     |
//! | dataLen  | u32  | 17     |
//!
//! followed by `dataLen` payload bytes.

use dcamera_core::{DCameraError, Result};

/// Header protocol version
pub const PROTOCOL_VERSION: u16 = 1;
/// Encoded header size
pub const HEADER_LEN: usize = 21;
/// Largest payload carried by one sent packet
pub const MAX_PACKET_LEN: usize = 62 * 1024;
/// Largest payload accepted in one received packet
pub const MAX_FRAGMENT_LEN: usize = 1000 * 1024;
/// Largest logical message
pub const MAX_TOTAL_LEN: usize = 100 * 1024 * 1024;

/// Position of a packet within its logical message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragFlag {
    None,
    Start,
    Mid,
    End,
    StartAndEnd,
}

impl FragFlag {
    pub fn as_u8(self) -> u8 {
        match self {
            FragFlag::None => 0,
            FragFlag::Start => 1,
            FragFlag::Mid => 2,
            FragFlag::End => 3,
            FragFlag::StartAndEnd => 4,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(FragFlag::None),
            1 => Ok(FragFlag::Start),
            2 => Ok(FragFlag::Mid),
            3 => Ok(FragFlag::End),
            4 => Ok(FragFlag::StartAndEnd),
            other => Err(DCameraError::Protocol(format!(
                "unknown fragment flag {}",
                other
            ))),
        }
    }
}

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u16,
    pub frag_flag: FragFlag,
    pub data_type: u32,
    pub seq_num: u32,
    pub total_len: u32,
    pub sub_seq: u16,
    pub data_len: u32,
}

impl FrameHeader {
    /// Append the encoded header to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.push(self.frag_flag.as_u8());
        buf.extend_from_slice(&self.data_type.to_be_bytes());
        buf.extend_from_slice(&self.seq_num.to_be_bytes());
        buf.extend_from_slice(&self.total_len.to_be_bytes());
        buf.extend_from_slice(&self.sub_seq.to_be_bytes());
        buf.extend_from_slice(&self.data_len.to_be_bytes());
    }

    /// Parse a packet into its header and payload
    ///
    /// Rejects truncated packets, payloads that disagree with `dataLen`, and
    /// lengths beyond the protocol limits.
    pub fn decode(packet: &[u8]) -> Result<(FrameHeader, &[u8])> {
        if packet.len() < HEADER_LEN {
            return Err(DCameraError::Protocol(format!(
                "packet too short: {} bytes",
                packet.len()
            )));
        }

        let u16_at = |at: usize| u16::from_be_bytes([packet[at], packet[at + 1]]);
        let u32_at = |at: usize| {
            u32::from_be_bytes([packet[at], packet[at + 1], packet[at + 2], packet[at + 3]])
        };

        let header = FrameHeader {
            version: u16_at(0),
            frag_flag: FragFlag::from_u8(packet[2])?,
            data_type: u32_at(3),
            seq_num: u32_at(7),
            total_len: u32_at(11),
            sub_seq: u16_at(15),
            data_len: u32_at(17),
        };

        let payload = &packet[HEADER_LEN..];
        if payload.len() != header.data_len as usize {
            return Err(DCameraError::Protocol(format!(
                "dataLen {} does not match payload of {} bytes",
                header.data_len,
                payload.len()
            )));
        }
        if header.data_len > header.total_len {
            return Err(DCameraError::Protocol(format!(
                "dataLen {} exceeds totalLen {}",
                header.data_len, header.total_len
            )));
        }
        if header.total_len as usize > MAX_TOTAL_LEN || header.data_len as usize > MAX_FRAGMENT_LEN
        {
            return Err(DCameraError::Protocol(format!(
                "packet exceeds limits: totalLen {} dataLen {}",
                header.total_len, header.data_len
            )));
        }

        Ok((header, payload))
    }
}

/// Split one logical message into wire packets
///
/// Payloads up to `MAX_PACKET_LEN` become a single START_AND_END packet;
/// larger ones become START, MID..., END with `subSeq` counting from zero.
pub fn fragment(payload: &[u8], data_type: u32, seq_num: u32) -> Result<Vec<Vec<u8>>> {
    if payload.is_empty() {
        return Err(DCameraError::InvalidArgument("empty payload".into()));
    }
    if payload.len() > MAX_TOTAL_LEN {
        return Err(DCameraError::InvalidArgument(format!(
            "payload of {} bytes exceeds {} byte limit",
            payload.len(),
            MAX_TOTAL_LEN
        )));
    }

    let chunks: Vec<&[u8]> = payload.chunks(MAX_PACKET_LEN).collect();
    let last = chunks.len() - 1;
    let mut packets = Vec::with_capacity(chunks.len());

    for (i, chunk) in chunks.iter().enumerate() {
        let frag_flag = match (i, chunks.len()) {
            (_, 1) => FragFlag::StartAndEnd,
            (0, _) => FragFlag::Start,
            (i, _) if i == last => FragFlag::End,
            _ => FragFlag::Mid,
        };
        let header = FrameHeader {
            version: PROTOCOL_VERSION,
            frag_flag,
            data_type,
            seq_num,
            total_len: payload.len() as u32,
            sub_seq: i as u16,
            data_len: chunk.len() as u32,
        };
        let mut packet = Vec::with_capacity(HEADER_LEN + chunk.len());
        header.encode_into(&mut packet);
        packet.extend_from_slice(chunk);
        packets.push(packet);
    }

    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = FrameHeader {
            version: 1,
            frag_flag: FragFlag::Mid,
            data_type: 0x0102_0304,
            seq_num: 7,
            total_len: 300,
            sub_seq: 2,
            data_len: 3,
        };
        let mut buf = Vec::new();
        header.encode_into(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(&buf[0..2], &[0, 1]);
        assert_eq!(buf[2], 2);
        assert_eq!(&buf[3..7], &[1, 2, 3, 4]);
        assert_eq!(&buf[7..11], &[0, 0, 0, 7]);
        assert_eq!(&buf[11..15], &300u32.to_be_bytes());
        assert_eq!(&buf[15..17], &[0, 2]);
        assert_eq!(&buf[17..21], &[0, 0, 0, 3]);

        buf.extend_from_slice(b"abc");
        let (decoded, payload) = FrameHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(payload, b"abc");
    }

    #[test]
    fn test_small_payload_is_one_packet() {
        let payload = vec![9u8; MAX_PACKET_LEN];
        let packets = fragment(&payload, 1, 5).unwrap();
        assert_eq!(packets.len(), 1);
        let (header, body) = FrameHeader::decode(&packets[0]).unwrap();
        assert_eq!(header.frag_flag, FragFlag::StartAndEnd);
        assert_eq!(header.total_len, header.data_len);
        assert_eq!(body.len(), MAX_PACKET_LEN);
    }

    #[test]
    fn test_large_payload_flag_sequence() {
        let len = MAX_PACKET_LEN * 3 + 17;
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let packets = fragment(&payload, 2, 11).unwrap();
        assert_eq!(packets.len(), len.div_ceil(MAX_PACKET_LEN));

        let headers: Vec<FrameHeader> = packets
            .iter()
            .map(|p| FrameHeader::decode(p).unwrap().0)
            .collect();
        let flags: Vec<FragFlag> = headers.iter().map(|h| h.frag_flag).collect();
        assert_eq!(
            flags,
            vec![FragFlag::Start, FragFlag::Mid, FragFlag::Mid, FragFlag::End]
        );
        for (i, header) in headers.iter().enumerate() {
            assert_eq!(header.sub_seq as usize, i);
            assert_eq!(header.seq_num, 11);
            assert_eq!(header.total_len as usize, len);
        }
        assert_eq!(headers[3].data_len, 17);
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let payload = vec![1u8; MAX_PACKET_LEN * 2];
        let packets = fragment(&payload, 1, 0).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(FrameHeader::decode(&packets[1]).unwrap().0.frag_flag, FragFlag::End);
    }

    #[test]
    fn test_rejects_bad_sizes() {
        assert!(fragment(&[], 1, 0).is_err());

        let mut truncated = Vec::new();
        FrameHeader {
            version: 1,
            frag_flag: FragFlag::StartAndEnd,
            data_type: 1,
            seq_num: 0,
            total_len: 10,
            sub_seq: 0,
            data_len: 10,
        }
        .encode_into(&mut truncated);
        truncated.extend_from_slice(&[0; 4]);
        assert!(FrameHeader::decode(&truncated).is_err());
        assert!(FrameHeader::decode(&truncated[..10]).is_err());

        let mut oversized = Vec::new();
        FrameHeader {
            version: 1,
            frag_flag: FragFlag::Start,
            data_type: 1,
            seq_num: 0,
            total_len: (MAX_TOTAL_LEN + 1) as u32,
            sub_seq: 0,
            data_len: 1,
        }
        .encode_into(&mut oversized);
        oversized.push(0);
        assert!(FrameHeader::decode(&oversized).is_err());
    }
}
