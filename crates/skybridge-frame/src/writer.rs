use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, FrameHeader};
use crate::error::{FrameError, Result};
use crate::message::{Generation, ProtocolMessage, MAX_FRAME_LEN};

/// Writes frames from one local system/component to any `Write` stream.
///
/// The sequence number advances (and wraps) with every frame sent.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    generation: Generation,
    system_id: u8,
    component_id: u8,
    sequence: u8,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T, generation: Generation, system_id: u8, component_id: u8) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(MAX_FRAME_LEN),
            generation,
            system_id,
            component_id,
            sequence: 0,
        }
    }

    /// Encode and send one message.
    pub fn send(&mut self, message_id: u32, payload: &[u8]) -> Result<()> {
        let header = FrameHeader {
            generation: self.generation,
            sequence: self.sequence,
            system_id: self.system_id,
            component_id: self.component_id,
            message_id,
        };

        self.buf.clear();
        encode_frame(&header, payload, &mut self.buf)?;
        self.sequence = self.sequence.wrapping_add(1);

        let buf = std::mem::take(&mut self.buf);
        let result = self.write_all(&buf);
        self.buf = buf;
        result
    }

    /// Forward an already-framed message verbatim.
    pub fn write_message(&mut self, message: &ProtocolMessage) -> Result<()> {
        self.write_all(message.raw())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.inner.write(&bytes[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Sequence number the next frame will carry.
    pub fn next_sequence(&self) -> u8 {
        self.sequence
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}
