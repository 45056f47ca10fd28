//! Serial link and socket plumbing.
//!
//! This is the lowest layer of skybridge. It owns the details that differ
//! between a real UART and the stand-ins used on a bench or in tests:
//! - [`SerialLink`] wraps a serial port (or a Unix stream for SITL setups)
//! - [`socket`] binds and tunes the UDP/TCP sockets the services listen on
//! - [`EventSink`] delivers service notifications over a channel

pub mod error;
pub mod event;
pub mod serial;
pub mod socket;

pub use error::{Result, TransportError};
pub use event::{event_channel, EventSink};
pub use serial::{SerialConfig, SerialLink, DEFAULT_BAUD_RATE};
pub use socket::{bind_tcp, bind_udp, is_timeout, tune_stream, StreamTuning};
