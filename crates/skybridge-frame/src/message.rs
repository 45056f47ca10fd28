use bytes::Bytes;

/// Generation-1 start marker.
pub const STX_V1: u8 = 0xFE;

/// Generation-2 start marker.
pub const STX_V2: u8 = 0xFD;

/// Largest payload the length byte can describe.
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Marker + header bytes for generation 1.
pub const HEADER_LEN_V1: usize = 6;

/// Marker + header bytes for generation 2.
pub const HEADER_LEN_V2: usize = 10;

pub const CHECKSUM_LEN: usize = 2;

/// Trailing signature block on signed generation-2 frames.
pub const SIGNATURE_LEN: usize = 13;

/// Largest frame either generation can put on the wire.
pub const MAX_FRAME_LEN: usize = HEADER_LEN_V2 + MAX_PAYLOAD_LEN + CHECKSUM_LEN + SIGNATURE_LEN;

/// Incompatibility flag marking a signed generation-2 frame.
pub const INCOMPAT_FLAG_SIGNED: u8 = 0x01;

/// Framing generation, selected by the start marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    V1,
    V2,
}

impl Generation {
    pub fn from_marker(byte: u8) -> Option<Self> {
        match byte {
            STX_V1 => Some(Self::V1),
            STX_V2 => Some(Self::V2),
            _ => None,
        }
    }

    pub const fn marker(self) -> u8 {
        match self {
            Self::V1 => STX_V1,
            Self::V2 => STX_V2,
        }
    }

    /// Marker plus fixed header length.
    pub const fn header_len(self) -> usize {
        match self {
            Self::V1 => HEADER_LEN_V1,
            Self::V2 => HEADER_LEN_V2,
        }
    }

    /// Largest message id representable in this generation.
    pub const fn max_message_id(self) -> u32 {
        match self {
            Self::V1 => 0xFF,
            Self::V2 => 0x00FF_FFFF,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One checksum-verified protocol message.
///
/// Immutable once produced by the parser. `raw()` returns the exact bytes
/// that were on the wire, marker through signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    pub generation: Generation,
    /// Payload byte count as declared in the header.
    pub length: u8,
    /// Always zero for generation 1.
    pub incompat_flags: u8,
    /// Always zero for generation 1.
    pub compat_flags: u8,
    pub sequence: u8,
    pub system_id: u8,
    pub component_id: u8,
    /// 8-bit in generation 1, 24-bit in generation 2.
    pub message_id: u32,
    pub payload: Bytes,
    /// Checksum as received (and verified).
    pub checksum: u16,
    pub signature: Option<[u8; SIGNATURE_LEN]>,
    raw: Bytes,
}

impl ProtocolMessage {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        generation: Generation,
        incompat_flags: u8,
        compat_flags: u8,
        sequence: u8,
        system_id: u8,
        component_id: u8,
        message_id: u32,
        payload: Bytes,
        checksum: u16,
        signature: Option<[u8; SIGNATURE_LEN]>,
        raw: Bytes,
    ) -> Self {
        Self {
            generation,
            length: payload.len() as u8,
            incompat_flags,
            compat_flags,
            sequence,
            system_id,
            component_id,
            message_id,
            payload,
            checksum,
            signature,
            raw,
        }
    }

    /// The start marker byte.
    pub fn magic(&self) -> u8 {
        self.generation.marker()
    }

    /// Exact wire bytes of this message.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    pub fn wire_size(&self) -> usize {
        self.raw.len()
    }
}
