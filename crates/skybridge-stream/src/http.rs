//! The small slice of HTTP/1.1 the stream server speaks.

use std::io::{self, ErrorKind, Read};
use std::net::TcpStream;
use std::time::Instant;

/// Multipart boundary token.
pub const BOUNDARY: &str = "frame";

/// Sent once at the start of every stream.
pub const STREAM_HEADER: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: multipart/x-mixed-replace;boundary=frame\r\n\
Cache-Control: no-cache, no-store, must-revalidate\r\n\
Pragma: no-cache\r\n\
Expires: 0\r\n\
Connection: close\r\n\
Access-Control-Allow-Origin: *\r\n\r\n";

pub const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";

pub const SERVICE_UNAVAILABLE: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\n\r\nServer busy\r\n";

/// Trailer written after every part body.
pub const PART_TRAILER: &[u8] = b"\r\n";

const MAX_REQUEST_LINE: usize = 1024;

/// Header introducing one part of the multipart stream.
pub fn part_header(content_type: &str, len: usize) -> String {
    format!("--{BOUNDARY}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\n\r\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
}

/// Why a request could not be read.
#[derive(Debug, PartialEq, Eq)]
pub enum RequestError {
    /// The peer closed or stayed silent past the read timeout.
    NoRequest,
    /// Something arrived but it is not a request line.
    Malformed,
}

/// Parse `METHOD TARGET [VERSION]`.
pub fn parse_request_line(line: &str) -> Result<RequestLine, RequestError> {
    let mut parts = line.split_ascii_whitespace();
    let method = parts.next().ok_or(RequestError::Malformed)?;
    let target = parts.next().unwrap_or("/");
    if !method.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(RequestError::Malformed);
    }
    Ok(RequestLine {
        method: method.to_string(),
        target: target.to_string(),
    })
}

/// Reads from a socket until a fixed point in time.
///
/// Each read waits at most for what is left before the deadline, so a client
/// trickling bytes cannot stretch the total wait.
pub struct DeadlineReader<'a> {
    stream: &'a TcpStream,
    deadline: Instant,
}

impl<'a> DeadlineReader<'a> {
    pub fn new(stream: &'a TcpStream, deadline: Instant) -> Self {
        Self { stream, deadline }
    }
}

impl Read for DeadlineReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(ErrorKind::TimedOut, "request deadline passed"));
        }
        self.stream.set_read_timeout(Some(remaining))?;
        let mut stream = self.stream;
        stream.read(buf)
    }
}

/// Read until the first line ending (or the buffer fills) and parse it.
///
/// Whatever else the client sent is ignored. A read error before the line
/// ends, timeouts included, counts as no request.
pub fn read_request_line<R: Read>(reader: &mut R) -> Result<RequestLine, RequestError> {
    let mut buf = [0u8; MAX_REQUEST_LINE];
    let mut filled = 0usize;

    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => {
                filled += n;
                if buf[..filled].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(_) => return Err(RequestError::NoRequest),
        }
    }

    if filled == 0 {
        return Err(RequestError::NoRequest);
    }

    let end = buf[..filled]
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(filled);
    let line = std::str::from_utf8(&buf[..end]).map_err(|_| RequestError::Malformed)?;
    parse_request_line(line.trim_end_matches('\r'))
}
