//! Common error types for Lancall.

use thiserror::Error;

/// Result type alias using Lancall's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Lancall operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Endpoint string does not match the supported address grammar
    #[error("invalid address format: {0}")]
    AddressFormat(String),

    /// Port outside the valid 1-65535 range
    #[error("port out of range: {0}")]
    PortRange(String),

    /// I/O error (connect, accept, read, write, mid-frame disconnect)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame: bad JSON, missing `type`, oversize length
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation attempted outside its valid state
    #[error("state error: {0}")]
    State(String),
}

impl Error {
    /// Create an address format error from any displayable type.
    pub fn address_format(msg: impl std::fmt::Display) -> Self {
        Self::AddressFormat(msg.to_string())
    }

    /// Create a port range error from any displayable type.
    pub fn port_range(msg: impl std::fmt::Display) -> Self {
        Self::PortRange(msg.to_string())
    }

    /// Create a protocol error from any displayable type.
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }

    /// Create a state error from any displayable type.
    pub fn state(msg: impl std::fmt::Display) -> Self {
        Self::State(msg.to_string())
    }

    /// True for faults that discard one frame without losing stream framing.
    ///
    /// A malformed JSON payload inside a complete frame is recoverable; an
    /// I/O failure or an unparseable length header is not.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}
