//! Lancall command line: listen for and dial direct LAN calls.
//!
//! Ships a demo media engine that echoes a canned session description, so
//! two instances on one LAN can exercise the whole signaling exchange
//! without a real media stack.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::Notify;
use tracing::{info, warn};

use lancall_common::{force_sendrecv, IceCandidate};
use lancall_signaling::{
    local_interface_addrs, CallHooks, ChannelConfig, IncomingCallHandler, MediaSession, Role,
    SdpKind, SessionEvents, SessionRouter, SignalingCoordinator, DEFAULT_SIGNALING_PORT,
    HEARTBEAT_INTERVAL,
};

/// Placeholder description the demo engine hands out.
const DEMO_SDP: &str = "v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\ns=lancall\r\nt=0 0\r\n\
                        m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=inactive\r\n";

#[derive(Parser, Debug)]
#[command(name = "lancall")]
#[command(about = "Direct LAN call signaling")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wait for incoming calls on all interfaces
    Listen {
        /// Signaling port to listen on
        #[arg(short, long, default_value_t = DEFAULT_SIGNALING_PORT, env = "LANCALL_PORT")]
        port: u16,

        /// Send periodic keep-alive frames
        #[arg(long)]
        heartbeat: bool,
    },

    /// Dial a peer (host, host:port, or [ipv6]:port)
    Dial {
        /// Peer endpoint
        endpoint: String,

        /// Send periodic keep-alive frames
        #[arg(long)]
        heartbeat: bool,
    },

    /// List addresses a peer on the LAN can dial
    Interfaces,

    /// Show version information
    Version,
}

fn channel_config(heartbeat: bool) -> ChannelConfig {
    ChannelConfig {
        heartbeat_interval: heartbeat.then_some(HEARTBEAT_INTERVAL),
        ..ChannelConfig::default()
    }
}

/// Demo media engine: answers every offer with a canned description.
#[derive(Default)]
struct EchoEngine {
    call: Mutex<Option<Arc<SignalingCoordinator>>>,
}

impl EchoEngine {
    /// Give the engine its call handle and release any buffered state.
    fn bind(&self, call: &Arc<SignalingCoordinator>) {
        *self.call.lock().unwrap() = Some(Arc::clone(call));
        call.peer_session_ready();
    }

    fn call(&self) -> Option<Arc<SignalingCoordinator>> {
        self.call.lock().unwrap().clone()
    }
}

impl MediaSession for EchoEngine {
    fn apply_remote_description(&self, kind: SdpKind, sdp: &str) {
        info!(%kind, bytes = sdp.len(), "remote description applied");
        if kind != SdpKind::Offer {
            return;
        }
        if let Some(call) = self.call() {
            let answer = force_sendrecv(DEMO_SDP);
            if let Err(err) = call.local_description_ready(SdpKind::Answer, &answer) {
                warn!("failed to send answer: {err}");
            }
        }
    }

    fn apply_remote_candidate(&self, candidate: &IceCandidate) {
        info!(mid = %candidate.sdp_mid, "remote candidate applied");
    }

    fn remove_remote_candidates(&self, candidates: &[IceCandidate]) {
        info!(count = candidates.len(), "remote candidates removed");
    }

    fn request_offer(&self) {
        if let Some(call) = self.call() {
            if let Err(err) = call.local_description_ready(SdpKind::Offer, DEMO_SDP) {
                warn!("failed to send offer: {err}");
            }
        }
    }

    fn has_peer_session(&self) -> bool {
        self.call.lock().unwrap().is_some()
    }
}

/// Logs session events and wakes waiters when the channel ends.
#[derive(Default)]
struct LogEvents {
    ended: Arc<Notify>,
}

impl SessionEvents for LogEvents {
    fn on_connected_to_room(&self, role: Role) {
        info!(%role, "connected");
    }
    fn on_remote_description(&self, kind: SdpKind, _sdp: &str) {
        info!(%kind, "remote description received");
    }
    fn on_remote_ice_candidate(&self, candidate: &IceCandidate) {
        info!(mid = %candidate.sdp_mid, "remote candidate received");
    }
    fn on_remote_ice_candidates_removed(&self, candidates: &[IceCandidate]) {
        info!(count = candidates.len(), "remote candidates withdrawn");
    }
    fn on_channel_error(&self, reason: &str) {
        warn!("channel error: {reason}");
        self.ended.notify_one();
    }
    fn on_channel_closed(&self) {
        info!("channel closed");
        self.ended.notify_one();
    }
}

/// Hands every incoming call a fresh demo engine.
#[derive(Default)]
struct ListenHandler {
    pending: Mutex<Option<Arc<EchoEngine>>>,
}

impl IncomingCallHandler for ListenHandler {
    fn accept_call(&self, peer: std::net::SocketAddr) -> CallHooks {
        info!(%peer, "incoming call");
        let engine = Arc::new(EchoEngine::default());
        *self.pending.lock().unwrap() = Some(Arc::clone(&engine));
        CallHooks {
            media: engine,
            events: Arc::new(LogEvents::default()),
        }
    }

    fn call_started(&self, call: Arc<SignalingCoordinator>) {
        if let Some(engine) = self.pending.lock().unwrap().take() {
            engine.bind(&call);
        }
    }
}

async fn listen(port: u16, heartbeat: bool) -> Result<()> {
    let router = SessionRouter::spawn(
        port,
        channel_config(heartbeat),
        Arc::new(ListenHandler::default()),
    )
    .await?;

    let bound = router.local_addr().port();
    println!("Listening for calls on port {bound}. Peers can dial:");
    for ip in local_interface_addrs() {
        match ip {
            std::net::IpAddr::V6(v6) => println!("  [{v6}]:{bound}"),
            v4 => println!("  {v4}:{bound}"),
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    router.shutdown().await;
    Ok(())
}

async fn dial(endpoint: String, heartbeat: bool) -> Result<()> {
    let engine = Arc::new(EchoEngine::default());
    let events = Arc::new(LogEvents::default());
    let ended = Arc::clone(&events.ended);

    let call = SignalingCoordinator::connect(
        &endpoint,
        Arc::clone(&engine) as Arc<dyn MediaSession>,
        events as Arc<dyn SessionEvents>,
        channel_config(heartbeat),
    )
    .await?;
    engine.bind(&call);

    println!("Dialing {endpoint}... press Ctrl-C to hang up.");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("hanging up");
            call.disconnect();
        }
        _ = ended.notified() => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    lancall_common::init_tracing();

    let args = Args::parse();

    match args.command {
        Command::Listen { port, heartbeat } => listen(port, heartbeat).await?,
        Command::Dial {
            endpoint,
            heartbeat,
        } => dial(endpoint, heartbeat).await?,
        Command::Interfaces => {
            for ip in local_interface_addrs() {
                println!("{ip}");
            }
        }
        Command::Version => {
            println!("lancall {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
