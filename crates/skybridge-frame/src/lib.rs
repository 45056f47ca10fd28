//! MAVLink framing for the skybridge gateway.
//!
//! Two framing generations share one logical protocol:
//! - generation 1: `0xFE` marker, 6-byte header, 8-bit message id
//! - generation 2: `0xFD` marker, 10-byte header, 24-bit message id, optional
//!   13-byte signature
//!
//! Both end in a 16-bit X.25 checksum over everything after the marker plus a
//! per-message seed byte. Only framing, checksum and the heartbeat payload are
//! understood here; every other payload travels opaquely.

pub mod codec;
pub mod crc;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod parser;
pub mod reader;
pub mod writer;

pub use codec::{encode_frame, FrameHeader};
pub use crc::{checksum, crc_extra, message_name, Crc16};
pub use error::{FrameError, Result};
pub use heartbeat::{Heartbeat, MSG_ID_HEARTBEAT};
pub use message::{
    Generation, ProtocolMessage, MAX_FRAME_LEN, MAX_PAYLOAD_LEN, SIGNATURE_LEN, STX_V1, STX_V2,
};
pub use parser::{ParseOutcome, Parser, ParserState, ParserStats};
pub use reader::FrameReader;
pub use writer::FrameWriter;
