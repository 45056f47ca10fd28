//! Companion-computer gateway for small unmanned vehicles.
//!
//! skybridge relays MAVLink telemetry between a flight controller's serial
//! port and ground stations on UDP, and serves the onboard camera as an MJPEG
//! stream over HTTP.
//!
//! # Crate Structure
//!
//! - [`transport`]: serial link, socket helpers and the event sink
//! - [`frame`]: MAVLink v1/v2 framing, checksums and the streaming parser
//! - [`bridge`]: serial/UDP relay with endpoint and vehicle tracking (behind `bridge` feature)
//! - [`stream`]: latest-frame buffer, capture producer and MJPEG server (behind `stream` feature)

/// Re-export transport types.
pub mod transport {
    pub use skybridge_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use skybridge_frame::*;
}

/// Re-export bridge types (requires `bridge` feature).
#[cfg(feature = "bridge")]
pub mod bridge {
    pub use skybridge_bridge::*;
}

/// Re-export stream types (requires `stream` feature).
#[cfg(feature = "stream")]
pub mod stream {
    pub use skybridge_stream::*;
}
