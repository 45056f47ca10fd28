use std::io::{ErrorKind, Read};

use bytes::{Buf, BytesMut};
use tracing::debug;

use crate::error::{FrameError, Result};
use crate::message::ProtocolMessage;
use crate::parser::{ParseOutcome, Parser, ParserStats};

const INITIAL_BUFFER_CAPACITY: usize = 1024;
const READ_CHUNK_SIZE: usize = 512;

/// Reads verified messages from any `Read` stream.
///
/// Frames that fail verification are skipped (and counted in `stats()`);
/// callers only ever see good messages.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    parser: Parser,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            parser: Parser::new(),
        }
    }

    /// Read the next verified message (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached. Read
    /// timeouts from the underlying stream surface as `FrameError::Io`; the
    /// partial frame is kept and the next call resumes it.
    pub fn read_message(&mut self) -> Result<ProtocolMessage> {
        loop {
            while self.buf.has_remaining() {
                match self.parser.feed(self.buf.get_u8()) {
                    ParseOutcome::Complete(message) => return Ok(message),
                    ParseOutcome::BadChecksum => {
                        debug!(
                            bad_checksums = self.parser.stats().bad_checksums,
                            "skipping frame with bad checksum"
                        );
                    }
                    ParseOutcome::Incomplete => {}
                }
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    pub fn stats(&self) -> ParserStats {
        self.parser.stats()
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

impl<T: Read> Iterator for FrameReader<T> {
    type Item = Result<ProtocolMessage>;

    /// Yields messages until the stream closes; other errors are yielded once.
    fn next(&mut self) -> Option<Self::Item> {
        match self.read_message() {
            Err(FrameError::ConnectionClosed) => None,
            other => Some(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::{encode_frame, FrameHeader};

    fn wire(frames: &[(FrameHeader, &[u8])]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for (header, payload) in frames {
            encode_frame(header, payload, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn read_multiple_messages() {
        let bytes = wire(&[
            (FrameHeader::v1(0, 1, 1, 0), &[0; 9]),
            (FrameHeader::v2(1, 1, 1, 30), b"attitude"),
            (FrameHeader::v1(2, 1, 1, 253), b"hello"),
        ]);

        let mut reader = FrameReader::new(Cursor::new(bytes));
        let ids: Vec<u32> = (0..3)
            .map(|_| reader.read_message().unwrap().message_id)
            .collect();
        assert_eq!(ids, vec![0, 30, 253]);
        assert!(matches!(
            reader.read_message(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn partial_read_handling() {
        let bytes = wire(&[(FrameHeader::v2(4, 1, 1, 1), b"slow")]);
        let mut reader = FrameReader::new(ByteByByteReader { bytes, pos: 0 });

        let msg = reader.read_message().unwrap();
        assert_eq!(msg.sequence, 4);
        assert_eq!(msg.payload.as_ref(), b"slow");
    }

    #[test]
    fn corrupted_frame_is_skipped() {
        let mut bytes = wire(&[(FrameHeader::v1(0, 1, 1, 0), &[1; 9])]);
        bytes[8] ^= 0x10;
        bytes.extend(wire(&[(FrameHeader::v1(1, 1, 1, 0), &[2; 9])]));

        let mut reader = FrameReader::new(Cursor::new(bytes));
        let msg = reader.read_message().unwrap();
        assert_eq!(msg.sequence, 1);
        assert!(reader.stats().bad_checksums >= 1);
    }

    #[test]
    fn connection_closed_mid_frame() {
        let bytes = wire(&[(FrameHeader::v1(0, 1, 1, 0), &[0; 9])]);
        let mut reader = FrameReader::new(Cursor::new(bytes[..10].to_vec()));
        assert!(matches!(
            reader.read_message(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn iterator_stops_at_eof() {
        let bytes = wire(&[
            (FrameHeader::v1(0, 1, 1, 0), &[0; 9]),
            (FrameHeader::v1(1, 1, 1, 0), &[0; 9]),
        ]);
        let reader = FrameReader::new(Cursor::new(bytes));
        let messages: Vec<_> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn io_error_is_propagated() {
        let mut reader = FrameReader::new(FailingReader);
        assert!(matches!(reader.read_message(), Err(FrameError::Io(_))));
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::TimedOut, "no data"))
        }
    }
}
