use std::net::SocketAddr;

/// Notifications emitted by the stream server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    ClientConnected { id: u32, addr: SocketAddr },
    ClientDisconnected { id: u32, addr: SocketAddr },
    /// Turned away because every slot was taken.
    ClientRejected { addr: SocketAddr },
}
