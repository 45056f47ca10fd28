/// Errors surfaced when starting or driving a bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Serial link or socket could not be acquired.
    #[error("transport error: {0}")]
    Transport(#[from] skybridge_transport::TransportError),

    /// I/O error outside the forwarding loops (thread spawn, manual sends).
    #[error("bridge I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The supplied configuration cannot be used.
    #[error("invalid bridge config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
