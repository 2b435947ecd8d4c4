//! Direct LAN signaling channel for peer-to-peer call sessions.
//!
//! This crate provides:
//! - Length-prefixed JSON frame codec for the signaling wire protocol
//! - Endpoint grammar and socket-direction role resolution
//! - A TCP transport with listener and connector modes
//! - The per-call signaling coordinator state machine
//! - A process-scoped session router that keeps a listener alive across calls
//!
//! No rendezvous server is involved: whichever side actively connects is the
//! Caller and initiates the offer; whichever side accepts is the Callee.

#![forbid(unsafe_code)]

pub mod codec;
pub mod coordinator;
pub mod endpoint;
pub mod router;
pub mod transport;

use std::time::Duration;

pub use lancall_common::{Error, IceCandidate, Result, SignalMessage};

pub use coordinator::{
    ConnectionState, MediaSession, SdpKind, SessionEvents, SignalingCoordinator,
};
pub use endpoint::{local_interface_addrs, resolve_mode, Endpoint, Role, SocketMode};
pub use router::{CallHooks, IncomingCallHandler, SessionRouter};
pub use transport::{Transport, TransportEvent};

/// Fixed well-known signaling port, used when an endpoint omits one.
pub const DEFAULT_SIGNALING_PORT: u16 = 38888;

/// Bound on an outbound connect attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between keep-alive frames when the heartbeat is enabled.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Delay between a caller-side connect and the offer request, letting the
/// freshly established transport settle.
pub const OFFER_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Tunables for one signaling channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Bound on the blocking outbound connect.
    pub connect_timeout: Duration,
    /// `Some` enables periodic keep-alive frames. Their presence or absence
    /// does not affect the relay protocol.
    pub heartbeat_interval: Option<Duration>,
    /// Caller-side delay before requesting the local offer.
    pub offer_settle_delay: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            heartbeat_interval: None,
            offer_settle_delay: OFFER_SETTLE_DELAY,
        }
    }
}
