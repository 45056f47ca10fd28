use crate::message::ProtocolMessage;

/// Message id of the liveness beacon.
pub const MSG_ID_HEARTBEAT: u32 = 0;

/// Wire length of the heartbeat payload.
pub const HEARTBEAT_LEN: usize = 9;

/// Vehicle type reported by ground-control stations.
pub const MAV_TYPE_GCS: u8 = 6;

/// Autopilot type for anything that is not a flight controller.
pub const MAV_AUTOPILOT_INVALID: u8 = 8;

/// `base_mode` bit set while the vehicle is armed.
pub const MAV_MODE_FLAG_SAFETY_ARMED: u8 = 0x80;

const MAV_STATE_ACTIVE: u8 = 4;
const PROTOCOL_VERSION: u8 = 3;

/// Decoded liveness beacon payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub vehicle_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
    pub protocol_version: u8,
}

impl Heartbeat {
    /// Decode a heartbeat payload.
    ///
    /// Generation-2 senders trim trailing zero bytes, so short payloads are
    /// zero-filled.
    pub fn decode(payload: &[u8]) -> Self {
        let mut bytes = [0u8; HEARTBEAT_LEN];
        let len = payload.len().min(HEARTBEAT_LEN);
        bytes[..len].copy_from_slice(&payload[..len]);
        Self {
            custom_mode: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            vehicle_type: bytes[4],
            autopilot: bytes[5],
            base_mode: bytes[6],
            system_status: bytes[7],
            protocol_version: bytes[8],
        }
    }

    /// Decode the payload if `message` is a heartbeat.
    pub fn from_message(message: &ProtocolMessage) -> Option<Self> {
        (message.message_id == MSG_ID_HEARTBEAT).then(|| Self::decode(&message.payload))
    }

    pub fn encode(&self) -> [u8; HEARTBEAT_LEN] {
        let mut bytes = [0u8; HEARTBEAT_LEN];
        bytes[..4].copy_from_slice(&self.custom_mode.to_le_bytes());
        bytes[4] = self.vehicle_type;
        bytes[5] = self.autopilot;
        bytes[6] = self.base_mode;
        bytes[7] = self.system_status;
        bytes[8] = self.protocol_version;
        bytes
    }

    pub fn is_armed(&self) -> bool {
        self.base_mode & MAV_MODE_FLAG_SAFETY_ARMED != 0
    }

    /// The beacon a ground-control station sends.
    pub fn gcs() -> Self {
        Self {
            custom_mode: 0,
            vehicle_type: MAV_TYPE_GCS,
            autopilot: MAV_AUTOPILOT_INVALID,
            base_mode: 0,
            system_status: MAV_STATE_ACTIVE,
            protocol_version: PROTOCOL_VERSION,
        }
    }
}
