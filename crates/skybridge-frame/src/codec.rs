use bytes::{BufMut, BytesMut};

use crate::crc::{crc_extra, Crc16};
use crate::error::{FrameError, Result};
use crate::message::{Generation, CHECKSUM_LEN, MAX_PAYLOAD_LEN};

/// Header fields for an outgoing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub generation: Generation,
    pub sequence: u8,
    pub system_id: u8,
    pub component_id: u8,
    pub message_id: u32,
}

impl FrameHeader {
    pub fn v1(sequence: u8, system_id: u8, component_id: u8, message_id: u8) -> Self {
        Self {
            generation: Generation::V1,
            sequence,
            system_id,
            component_id,
            message_id: u32::from(message_id),
        }
    }

    pub fn v2(sequence: u8, system_id: u8, component_id: u8, message_id: u32) -> Self {
        Self {
            generation: Generation::V2,
            sequence,
            system_id,
            component_id,
            message_id,
        }
    }
}

/// Encode one unsigned frame into `dst`.
///
/// Wire format:
/// ```text
/// v1: ┌─────┬─────┬─────┬────────┬───────┬───────┬─────────┬──────────┐
///     │ FE  │ len │ seq │ sysid  │ compid│ msgid │ payload │ crc (LE) │
///     └─────┴─────┴─────┴────────┴───────┴───────┴─────────┴──────────┘
/// v2: ┌─────┬─────┬────────┬────────┬─────┬───────┬────────┬──────────────┬─────────┬──────────┐
///     │ FD  │ len │ incompat│ compat │ seq │ sysid │ compid │ msgid (3B LE)│ payload │ crc (LE) │
///     └─────┴─────┴────────┴────────┴─────┴───────┴────────┴──────────────┴─────────┴──────────┘
/// ```
/// The checksum covers everything after the marker, then the message's seed.
pub fn encode_frame(header: &FrameHeader, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    if header.message_id > header.generation.max_message_id() {
        return Err(FrameError::MessageIdOutOfRange {
            id: header.message_id,
            generation: header.generation.name(),
        });
    }

    let start = dst.len();
    dst.reserve(header.generation.header_len() + payload.len() + CHECKSUM_LEN);
    dst.put_u8(header.generation.marker());
    dst.put_u8(payload.len() as u8);
    if header.generation == Generation::V2 {
        // incompat, compat
        dst.put_u8(0);
        dst.put_u8(0);
    }
    dst.put_u8(header.sequence);
    dst.put_u8(header.system_id);
    dst.put_u8(header.component_id);
    match header.generation {
        Generation::V1 => dst.put_u8(header.message_id as u8),
        Generation::V2 => {
            let id = header.message_id.to_le_bytes();
            dst.put_slice(&id[..3]);
        }
    }
    dst.put_slice(payload);

    let mut crc = Crc16::new();
    crc.accumulate_slice(&dst[start + 1..]);
    crc.accumulate(crc_extra(header.message_id));
    dst.put_u16_le(crc.value());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::checksum;

    #[test]
    fn encodes_v1_heartbeat_layout() {
        let mut buf = BytesMut::new();
        let payload = [0u8; 9];
        encode_frame(&FrameHeader::v1(7, 1, 1, 0), &payload, &mut buf).unwrap();

        assert_eq!(buf.len(), 6 + 9 + 2);
        assert_eq!(&buf[..6], &[0xFE, 9, 7, 1, 1, 0]);

        let mut expected = Crc16::new();
        expected.accumulate_slice(&buf[1..15]);
        expected.accumulate(50);
        assert_eq!(u16::from_le_bytes([buf[15], buf[16]]), expected.value());
    }

    #[test]
    fn encodes_v2_three_byte_message_id() {
        let mut buf = BytesMut::new();
        encode_frame(&FrameHeader::v2(0, 42, 200, 0x012345), b"ab", &mut buf).unwrap();

        assert_eq!(&buf[..10], &[0xFD, 2, 0, 0, 0, 42, 200, 0x45, 0x23, 0x01]);
        assert_eq!(&buf[10..12], b"ab");
        // unknown id, zero seed
        let mut crc = Crc16::new();
        crc.accumulate_slice(&buf[1..12]);
        crc.accumulate(0);
        assert_eq!(u16::from_le_bytes([buf[12], buf[13]]), crc.value());
        assert_ne!(crc.value(), checksum(&buf[1..12]));
    }

    #[test]
    fn appends_after_existing_bytes() {
        let mut buf = BytesMut::from(&b"xyz"[..]);
        encode_frame(&FrameHeader::v1(0, 1, 1, 0), &[], &mut buf).unwrap();
        assert_eq!(&buf[..3], b"xyz");
        assert_eq!(buf[3], 0xFE);
        assert_eq!(buf.len(), 3 + 8);
    }

    #[test]
    fn rejects_oversize_payload() {
        let mut buf = BytesMut::new();
        let payload = vec![0u8; 256];
        let err = encode_frame(&FrameHeader::v2(0, 1, 1, 0), &payload, &mut buf).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 256, max: 255 }));
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_wide_id_in_v1() {
        let mut buf = BytesMut::new();
        let header = FrameHeader {
            message_id: 300,
            ..FrameHeader::v1(0, 1, 1, 0)
        };
        let err = encode_frame(&header, &[], &mut buf).unwrap_err();
        assert!(matches!(err, FrameError::MessageIdOutOfRange { id: 300, .. }));
    }
}
