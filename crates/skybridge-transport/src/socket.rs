use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// Socket options applied to every accepted stream viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTuning {
    /// Disable Nagle so frame boundaries go out immediately.
    pub nodelay: bool,
    /// A write blocked longer than this fails and ends the session.
    pub write_timeout: Option<Duration>,
    /// Kernel send buffer size (`SO_SNDBUF`), unix only.
    pub send_buffer: Option<usize>,
}

impl Default for StreamTuning {
    fn default() -> Self {
        Self {
            nodelay: true,
            write_timeout: Some(Duration::from_secs(5)),
            send_buffer: Some(32 * 1024),
        }
    }
}

/// Returns true for the errors a timed read produces when no data arrived.
pub fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}

/// Bind a UDP socket whose receive calls time out after `read_timeout`.
pub fn bind_udp(addr: SocketAddr, read_timeout: Duration) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(addr).map_err(|source| TransportError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    socket.set_read_timeout(Some(read_timeout))?;
    info!(addr = %socket.local_addr()?, "bound telemetry socket");
    Ok(socket)
}

/// Bind a TCP listener in non-blocking mode so accept loops can observe shutdown.
pub fn bind_tcp(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).map_err(|source| TransportError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    listener.set_nonblocking(true)?;
    info!(addr = %listener.local_addr()?, "listening for stream viewers");
    Ok(listener)
}

/// Apply viewer socket options.
pub fn tune_stream(stream: &TcpStream, tuning: &StreamTuning) -> Result<()> {
    stream.set_nodelay(tuning.nodelay)?;
    stream.set_write_timeout(tuning.write_timeout)?;
    if let Some(size) = tuning.send_buffer {
        set_send_buffer(stream, size)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_send_buffer(stream: &TcpStream, size: usize) -> Result<()> {
    use std::os::fd::AsRawFd;

    let fd = stream.as_raw_fd();
    let value = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);

    // SAFETY: `value` lives for the duration of the call and its size is passed
    // alongside it; `fd` is an open TCP socket owned by `stream`.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            (&value as *const libc::c_int).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    if rc != 0 {
        return Err(TransportError::Io(std::io::Error::last_os_error()));
    }
    debug!(size, "set stream send buffer");
    Ok(())
}

#[cfg(not(unix))]
fn set_send_buffer(_stream: &TcpStream, _size: usize) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn udp_receive_times_out() {
        let socket = bind_udp("127.0.0.1:0".parse().unwrap(), Duration::from_millis(5)).unwrap();
        let mut buf = [0u8; 16];
        let err = socket.recv_from(&mut buf).unwrap_err();
        assert!(is_timeout(&err));
    }

    #[test]
    fn bind_reports_address_in_use() {
        let first = bind_udp("127.0.0.1:0".parse().unwrap(), Duration::from_millis(5)).unwrap();
        let taken = first.local_addr().unwrap();
        let err = bind_udp(taken, Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
    }

    #[test]
    fn tcp_listener_is_non_blocking() {
        let listener = bind_tcp("127.0.0.1:0".parse().unwrap()).unwrap();
        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn tuned_stream_still_carries_data() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();

        tune_stream(&server, &StreamTuning::default()).unwrap();
        assert!(server.nodelay().unwrap());
        assert_eq!(server.write_timeout().unwrap(), Some(Duration::from_secs(5)));

        (&server).write_all(b"ok").unwrap();
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ok");
    }
}
