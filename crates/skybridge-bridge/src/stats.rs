use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Coarse bridge state, most connected first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Stopped,
    /// Forwarding loops running, nobody heard from yet.
    Running,
    /// The vehicle is beaconing but no ground station is fresh.
    VehicleConnected,
    /// At least one ground station is fresh.
    GroundStationConnected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::VehicleConnected => "vehicle-connected",
            Self::GroundStationConnected => "ground-station-connected",
        };
        f.write_str(name)
    }
}

/// Point-in-time copy of the bridge counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub state: LinkState,
    pub serial_rx_bytes: u64,
    pub serial_tx_bytes: u64,
    pub udp_rx_bytes: u64,
    pub udp_tx_bytes: u64,
    /// Verified messages parsed from the serial link.
    pub messages_received: u64,
    /// Messages delivered to at least one ground station.
    pub messages_forwarded: u64,
    pub datagrams_received: u64,
    /// Frames that failed checksum verification.
    pub parse_errors: u64,
    pub endpoints: usize,
    pub uptime_ms: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub serial_rx_bytes: AtomicU64,
    pub serial_tx_bytes: AtomicU64,
    pub udp_rx_bytes: AtomicU64,
    pub udp_tx_bytes: AtomicU64,
    pub messages_received: AtomicU64,
    pub messages_forwarded: AtomicU64,
    pub datagrams_received: AtomicU64,
    pub parse_errors: AtomicU64,
}

impl Counters {
    pub fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub fn snapshot(&self, state: LinkState, endpoints: usize, uptime_ms: u64) -> BridgeStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        BridgeStats {
            state,
            serial_rx_bytes: load(&self.serial_rx_bytes),
            serial_tx_bytes: load(&self.serial_tx_bytes),
            udp_rx_bytes: load(&self.udp_rx_bytes),
            udp_tx_bytes: load(&self.udp_tx_bytes),
            messages_received: load(&self.messages_received),
            messages_forwarded: load(&self.messages_forwarded),
            datagrams_received: load(&self.datagrams_received),
            parse_errors: load(&self.parse_errors),
            endpoints,
            uptime_ms,
        }
    }
}
