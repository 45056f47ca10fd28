use std::collections::VecDeque;

use bytes::{BufMut, BytesMut};
use tracing::trace;

use crate::crc::{crc_extra, Crc16};
use crate::message::{
    Generation, ProtocolMessage, CHECKSUM_LEN, INCOMPAT_FLAG_SIGNED, MAX_FRAME_LEN, SIGNATURE_LEN,
};

/// Frames that may be opened inside an unfinished frame before the oldest is
/// dropped.
const MAX_CANDIDATES: usize = 4;

/// Position of the byte-at-a-time state machine: the field the next byte
/// belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Idle,
    Length,
    IncompatFlags,
    CompatFlags,
    Sequence,
    SystemId,
    ComponentId,
    MessageId,
    Payload,
    ChecksumLow,
    ChecksumHigh,
    Signature,
}

/// Result of feeding one byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Incomplete,
    Complete(ProtocolMessage),
    /// A whole frame was assembled but failed verification.
    BadChecksum,
}

/// Running parser counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStats {
    pub messages: u64,
    pub bad_checksums: u64,
    /// Frames recovered from a start marker seen inside another frame.
    pub resyncs: u64,
}

enum Step {
    Pending,
    Complete(ProtocolMessage),
    Bad,
}

/// Assembles a single frame that began at one start marker.
struct Assembler {
    generation: Generation,
    state: ParserState,
    raw: BytesMut,
    crc: Crc16,
    length: u8,
    incompat_flags: u8,
    compat_flags: u8,
    sequence: u8,
    system_id: u8,
    component_id: u8,
    message_id: u32,
    id_bytes: u8,
    payload_read: u8,
    received: u16,
    signature_read: usize,
}

impl Assembler {
    fn new(generation: Generation) -> Self {
        let mut raw = BytesMut::with_capacity(MAX_FRAME_LEN);
        raw.put_u8(generation.marker());
        Self {
            generation,
            state: ParserState::Length,
            raw,
            crc: Crc16::new(),
            length: 0,
            incompat_flags: 0,
            compat_flags: 0,
            sequence: 0,
            system_id: 0,
            component_id: 0,
            message_id: 0,
            id_bytes: 0,
            payload_read: 0,
            received: 0,
            signature_read: 0,
        }
    }

    fn id_len(&self) -> u8 {
        match self.generation {
            Generation::V1 => 1,
            Generation::V2 => 3,
        }
    }

    fn finish_payload(&mut self) {
        self.crc.accumulate(crc_extra(self.message_id));
        self.state = ParserState::ChecksumLow;
    }

    fn step(&mut self, byte: u8) -> Step {
        self.raw.put_u8(byte);
        match self.state {
            ParserState::Length => {
                self.crc.accumulate(byte);
                self.length = byte;
                self.state = match self.generation {
                    Generation::V1 => ParserState::Sequence,
                    Generation::V2 => ParserState::IncompatFlags,
                };
            }
            ParserState::IncompatFlags => {
                self.crc.accumulate(byte);
                self.incompat_flags = byte;
                self.state = ParserState::CompatFlags;
            }
            ParserState::CompatFlags => {
                self.crc.accumulate(byte);
                self.compat_flags = byte;
                self.state = ParserState::Sequence;
            }
            ParserState::Sequence => {
                self.crc.accumulate(byte);
                self.sequence = byte;
                self.state = ParserState::SystemId;
            }
            ParserState::SystemId => {
                self.crc.accumulate(byte);
                self.system_id = byte;
                self.state = ParserState::ComponentId;
            }
            ParserState::ComponentId => {
                self.crc.accumulate(byte);
                self.component_id = byte;
                self.state = ParserState::MessageId;
            }
            ParserState::MessageId => {
                self.crc.accumulate(byte);
                self.message_id |= u32::from(byte) << (8 * u32::from(self.id_bytes));
                self.id_bytes += 1;
                if self.id_bytes == self.id_len() {
                    if self.length == 0 {
                        self.finish_payload();
                    } else {
                        self.state = ParserState::Payload;
                    }
                }
            }
            ParserState::Payload => {
                self.crc.accumulate(byte);
                self.payload_read += 1;
                if self.payload_read == self.length {
                    self.finish_payload();
                }
            }
            ParserState::ChecksumLow => {
                self.received = u16::from(byte);
                self.state = ParserState::ChecksumHigh;
            }
            ParserState::ChecksumHigh => {
                self.received |= u16::from(byte) << 8;
                if self.received != self.crc.value() {
                    return Step::Bad;
                }
                if self.generation == Generation::V2
                    && self.incompat_flags & INCOMPAT_FLAG_SIGNED != 0
                {
                    self.state = ParserState::Signature;
                } else {
                    return Step::Complete(self.build(None));
                }
            }
            ParserState::Signature => {
                self.signature_read += 1;
                if self.signature_read == SIGNATURE_LEN {
                    let start = self.raw.len() - SIGNATURE_LEN;
                    let mut signature = [0u8; SIGNATURE_LEN];
                    signature.copy_from_slice(&self.raw[start..]);
                    return Step::Complete(self.build(Some(signature)));
                }
            }
            ParserState::Idle => {}
        }
        Step::Pending
    }

    fn build(&mut self, signature: Option<[u8; SIGNATURE_LEN]>) -> ProtocolMessage {
        let raw = std::mem::take(&mut self.raw).freeze();
        let start = self.generation.header_len();
        let payload = raw.slice(start..start + usize::from(self.length));
        debug_assert_eq!(
            raw.len(),
            start
                + usize::from(self.length)
                + CHECKSUM_LEN
                + signature.map_or(0, |_| SIGNATURE_LEN)
        );
        ProtocolMessage::from_parts(
            self.generation,
            self.incompat_flags,
            self.compat_flags,
            self.sequence,
            self.system_id,
            self.component_id,
            self.message_id,
            payload,
            self.received,
            signature,
            raw,
        )
    }
}

/// Byte-at-a-time frame parser for one input stream.
///
/// Bytes outside a frame are ignored until a start marker appears. A start
/// marker seen while a frame is still being assembled opens a candidate frame
/// at that marker; the in-progress frame keeps going, and whichever of them
/// verifies first is returned. A frame that fails verification sends the
/// parser back to idle and discards every candidate.
pub struct Parser {
    primary: Option<Assembler>,
    candidates: VecDeque<Assembler>,
    stats: ParserStats,
}

impl Parser {
    pub fn new() -> Self {
        Self {
            primary: None,
            candidates: VecDeque::with_capacity(MAX_CANDIDATES),
            stats: ParserStats::default(),
        }
    }

    /// Drop any partial frame and return to idle. Counters are kept.
    pub fn reset(&mut self) {
        self.primary = None;
        self.candidates.clear();
    }

    pub fn state(&self) -> ParserState {
        self.primary
            .as_ref()
            .map_or(ParserState::Idle, |assembler| assembler.state)
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Consume exactly one byte.
    pub fn feed(&mut self, byte: u8) -> ParseOutcome {
        let Some(primary) = self.primary.as_mut() else {
            if let Some(generation) = Generation::from_marker(byte) {
                self.primary = Some(Assembler::new(generation));
            }
            return ParseOutcome::Incomplete;
        };

        let primary_step = primary.step(byte);

        let mut recovered = None;
        self.candidates.retain_mut(|candidate| match candidate.step(byte) {
            Step::Pending => true,
            Step::Bad => false,
            Step::Complete(message) => {
                if recovered.is_none() {
                    recovered = Some(message);
                }
                false
            }
        });

        match primary_step {
            Step::Complete(message) => self.complete(message, false),
            Step::Bad => {
                self.stats.bad_checksums += 1;
                trace!(candidates = self.candidates.len(), "frame failed checksum");
                self.reset();
                ParseOutcome::BadChecksum
            }
            Step::Pending => {
                if let Some(message) = recovered {
                    return self.complete(message, true);
                }
                if let Some(generation) = Generation::from_marker(byte) {
                    self.open_candidate(generation);
                }
                ParseOutcome::Incomplete
            }
        }
    }

    fn open_candidate(&mut self, generation: Generation) {
        if self.candidates.len() == MAX_CANDIDATES {
            self.candidates.pop_front();
        }
        self.candidates.push_back(Assembler::new(generation));
    }

    /// Feed a whole buffer and collect every verified message.
    pub fn feed_slice(&mut self, bytes: &[u8]) -> Vec<ProtocolMessage> {
        bytes
            .iter()
            .filter_map(|&byte| match self.feed(byte) {
                ParseOutcome::Complete(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn complete(&mut self, message: ProtocolMessage, resynced: bool) -> ParseOutcome {
        self.reset();
        self.stats.messages += 1;
        if resynced {
            self.stats.resyncs += 1;
        }
        ParseOutcome::Complete(message)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Parser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("state", &self.state())
            .field("candidates", &self.candidates.len())
            .field("stats", &self.stats)
            .finish()
    }
}
