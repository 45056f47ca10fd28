use std::time::{Duration, Instant};

use skybridge_frame::Heartbeat;

/// Beacon silence after which the flight controller is presumed gone.
pub const DEFAULT_VEHICLE_TIMEOUT: Duration = Duration::from_secs(3);

/// Latest beacon from the flight controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VehicleStatus {
    pub system_id: u8,
    pub component_id: u8,
    pub heartbeat: Heartbeat,
    pub last_seen: Instant,
}

/// Liveness of the single vehicle on the serial side.
#[derive(Debug, Clone)]
pub struct VehicleLink {
    status: Option<VehicleStatus>,
    connected: bool,
    timeout: Duration,
}

impl VehicleLink {
    pub fn new(timeout: Duration) -> Self {
        Self {
            status: None,
            connected: false,
            timeout,
        }
    }

    /// Record a beacon. Returns true when this beacon (re)establishes the link.
    pub fn record(
        &mut self,
        system_id: u8,
        component_id: u8,
        heartbeat: Heartbeat,
        now: Instant,
    ) -> bool {
        self.status = Some(VehicleStatus {
            system_id,
            component_id,
            heartbeat,
            last_seen: now,
        });
        let detected = !self.connected;
        self.connected = true;
        detected
    }

    /// Mark the link lost once the beacon has gone stale.
    ///
    /// Returns the last status exactly once per loss.
    pub fn check_lost(&mut self, now: Instant) -> Option<VehicleStatus> {
        let status = self.status?;
        if self.connected && now.saturating_duration_since(status.last_seen) > self.timeout {
            self.connected = false;
            return Some(status);
        }
        None
    }

    pub fn is_connected(&self, now: Instant) -> bool {
        self.connected
            && self
                .status
                .is_some_and(|s| now.saturating_duration_since(s.last_seen) <= self.timeout)
    }

    /// Last beacon seen, stale or not.
    pub fn status(&self) -> Option<VehicleStatus> {
        self.status
    }
}
