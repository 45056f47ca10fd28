use std::net::SocketAddr;

use skybridge_frame::Heartbeat;

/// Notifications emitted by a running bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// A ground station sent its first datagram.
    PeerConnected(SocketAddr),
    /// A ground station was evicted after going quiet.
    PeerDisconnected(SocketAddr),
    /// A beacon arrived from the vehicle while it was not considered connected.
    VehicleDetected {
        system_id: u8,
        component_id: u8,
        heartbeat: Heartbeat,
    },
    /// The vehicle's beacon went stale.
    VehicleLost { system_id: u8, component_id: u8 },
}
