//! CRC-16/MCRF4XX (the X.25 accumulation used by MAVLink) and the
//! per-message checksum seed table.

/// Accumulator start value.
pub const CRC_INIT: u16 = 0xFFFF;

/// Running 16-bit checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16(u16);

impl Crc16 {
    pub const fn new() -> Self {
        Self(CRC_INIT)
    }

    /// Fold one byte into the checksum.
    pub fn accumulate(&mut self, byte: u8) {
        let mut tmp = byte ^ (self.0 & 0xFF) as u8;
        tmp ^= tmp << 4;
        let tmp = u16::from(tmp);
        self.0 = (self.0 >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4);
    }

    pub fn accumulate_slice(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.accumulate(byte);
        }
    }

    pub const fn value(&self) -> u16 {
        self.0
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksum of a whole buffer.
pub fn checksum(bytes: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.accumulate_slice(bytes);
    crc.value()
}

struct MessageInfo {
    id: u32,
    crc_extra: u8,
    name: &'static str,
}

// Sorted by id for binary search.
const MESSAGES: &[MessageInfo] = &[
    MessageInfo { id: 0, crc_extra: 50, name: "HEARTBEAT" },
    MessageInfo { id: 1, crc_extra: 124, name: "SYS_STATUS" },
    MessageInfo { id: 2, crc_extra: 137, name: "SYSTEM_TIME" },
    MessageInfo { id: 4, crc_extra: 237, name: "PING" },
    MessageInfo { id: 11, crc_extra: 89, name: "SET_MODE" },
    MessageInfo { id: 20, crc_extra: 214, name: "PARAM_REQUEST_READ" },
    MessageInfo { id: 21, crc_extra: 159, name: "PARAM_REQUEST_LIST" },
    MessageInfo { id: 22, crc_extra: 220, name: "PARAM_VALUE" },
    MessageInfo { id: 23, crc_extra: 168, name: "PARAM_SET" },
    MessageInfo { id: 24, crc_extra: 24, name: "GPS_RAW_INT" },
    MessageInfo { id: 30, crc_extra: 39, name: "ATTITUDE" },
    MessageInfo { id: 33, crc_extra: 104, name: "GLOBAL_POSITION_INT" },
    MessageInfo { id: 35, crc_extra: 244, name: "RC_CHANNELS_RAW" },
    MessageInfo { id: 36, crc_extra: 222, name: "SERVO_OUTPUT_RAW" },
    MessageInfo { id: 65, crc_extra: 118, name: "RC_CHANNELS" },
    MessageInfo { id: 66, crc_extra: 148, name: "REQUEST_DATA_STREAM" },
    MessageInfo { id: 69, crc_extra: 243, name: "MANUAL_CONTROL" },
    MessageInfo { id: 74, crc_extra: 20, name: "VFR_HUD" },
    MessageInfo { id: 76, crc_extra: 152, name: "COMMAND_LONG" },
    MessageInfo { id: 77, crc_extra: 143, name: "COMMAND_ACK" },
    MessageInfo { id: 147, crc_extra: 154, name: "BATTERY_STATUS" },
    MessageInfo { id: 253, crc_extra: 83, name: "STATUSTEXT" },
];

fn lookup(id: u32) -> Option<&'static MessageInfo> {
    MESSAGES
        .binary_search_by_key(&id, |info| info.id)
        .ok()
        .map(|idx| &MESSAGES[idx])
}

/// Checksum seed for a message id. Unknown ids contribute a zero seed.
pub fn crc_extra(message_id: u32) -> u8 {
    lookup(message_id).map_or(0, |info| info.crc_extra)
}

/// Human-readable name for a message id.
pub fn message_name(message_id: u32) -> &'static str {
    lookup(message_id).map_or("UNKNOWN", |info| info.name)
}
