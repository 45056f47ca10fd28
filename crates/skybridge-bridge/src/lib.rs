//! Serial to UDP telemetry bridge.
//!
//! One flight controller on a serial link, up to a handful of ground stations
//! over UDP. Ground stations are discovered by the datagrams they send and
//! forgotten once they go quiet; the vehicle is tracked by its heartbeat.

pub mod bridge;
pub mod endpoints;
pub mod error;
pub mod event;
pub mod stats;
pub mod vehicle;

pub use bridge::{Bridge, BridgeConfig, DEFAULT_TELEMETRY_PORT};
pub use endpoints::{EndpointTable, RemoteEndpoint, TouchOutcome};
pub use error::{BridgeError, Result};
pub use event::BridgeEvent;
pub use stats::{BridgeStats, LinkState};
pub use vehicle::{VehicleLink, VehicleStatus};
