use std::path::PathBuf;

/// Errors surfaced when starting the stream server or capture producer.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Listening socket could not be acquired.
    #[error("transport error: {0}")]
    Transport(#[from] skybridge_transport::TransportError),

    /// I/O error outside a client session.
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The supplied configuration cannot be used.
    #[error("invalid stream config: {0}")]
    InvalidConfig(String),

    /// A frame directory held nothing to replay.
    #[error("no frames found in {}", .0.display())]
    NoFrames(PathBuf),

    /// The frame source failed.
    #[error("capture failed: {0}")]
    Capture(String),
}

pub type Result<T> = std::result::Result<T, StreamError>;
