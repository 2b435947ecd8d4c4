//! Process-scoped session router.
//!
//! Keeps one listening transport alive across calls: each adopted connection
//! becomes a call session handed to the application through
//! [`IncomingCallHandler`], and when that session ends the listener is torn
//! down and rebound in order, so the next caller can dial in. At most one
//! call is active at a time; the transport already rejects extra
//! connections while one is adopted.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use lancall_common::{Error, Result};

use crate::coordinator::{MediaSession, SessionEvents, SignalingCoordinator};
use crate::endpoint::Endpoint;
use crate::transport::{Transport, TransportEvent};
use crate::ChannelConfig;

/// How many times a listener rebind is retried before the router gives up.
const REBIND_ATTEMPTS: u32 = 20;
const REBIND_DELAY: Duration = Duration::from_millis(100);

/// Per-call collaborators supplied by the application when a call arrives.
pub struct CallHooks {
    pub media: Arc<dyn MediaSession>,
    pub events: Arc<dyn SessionEvents>,
}

/// Application-side contract for incoming calls.
pub trait IncomingCallHandler: Send + Sync {
    /// A peer connected; supply the media engine and event sink for the new
    /// session.
    fn accept_call(&self, peer: SocketAddr) -> CallHooks;
    /// The session is wired up and live.
    fn call_started(&self, call: Arc<SignalingCoordinator>);
}

struct ActiveCall {
    id: u64,
    call: Arc<SignalingCoordinator>,
}

/// Long-lived router owning the wildcard listener.
pub struct SessionRouter {
    shutdown_tx: watch::Sender<bool>,
    local_addr: SocketAddr,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionRouter {
    /// Bind the wildcard listener on `port` and start routing incoming
    /// calls. Bind failures surface here; everything later is reported to
    /// the per-call event sinks.
    pub async fn spawn(
        port: u16,
        config: ChannelConfig,
        handler: Arc<dyn IncomingCallHandler>,
    ) -> Result<Self> {
        let (transport, events_rx) = bind_listener(port, &config).await?;
        let local_addr = transport
            .local_addr()
            .ok_or_else(|| Error::state("listener has no bound address"))?;
        // Rebinds reuse the actual bound port, which matters when the caller
        // asked for port 0.
        let bound_port = local_addr.port();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(router_loop(
            transport,
            events_rx,
            bound_port,
            config,
            handler,
            shutdown_rx,
        ));

        Ok(Self {
            shutdown_tx,
            local_addr,
            task: Mutex::new(Some(task)),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop routing: ends any active call, closes the listener, and waits
    /// for the router task to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn bind_listener(
    port: u16,
    config: &ChannelConfig,
) -> Result<(Transport, mpsc::Receiver<TransportEvent>)> {
    let endpoint = Endpoint {
        address: "0.0.0.0".to_string(),
        port,
    };
    // The wildcard address resolves to GlobalListen regardless of the local
    // interface set.
    Transport::spawn_with_locals(endpoint, config, &[]).await
}

/// The port can linger briefly after the previous listener closes; retry.
async fn rebind_listener(
    port: u16,
    config: &ChannelConfig,
) -> Result<(Transport, mpsc::Receiver<TransportEvent>)> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match bind_listener(port, config).await {
            Ok(bound) => return Ok(bound),
            Err(err) if attempt < REBIND_ATTEMPTS => {
                debug!(port, attempt, "listener rebind failed: {err}");
                time::sleep(REBIND_DELAY).await;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn router_loop(
    mut transport: Transport,
    events_rx: mpsc::Receiver<TransportEvent>,
    port: u16,
    config: ChannelConfig,
    handler: Arc<dyn IncomingCallHandler>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (ended_tx, mut ended_rx) = mpsc::channel::<u64>(4);
    let mut events_rx = Some(events_rx);
    let mut active: Option<ActiveCall> = None;
    let mut next_id: u64 = 0;

    loop {
        tokio::select! {
            _ = async { let _ = shutdown_rx.wait_for(|stop| *stop).await; } => {
                if let Some(active) = active.take() {
                    active.call.disconnect();
                }
                transport.disconnect();
                transport.join().await;
                info!("session router stopped");
                break;
            }
            ended = ended_rx.recv() => {
                // ended_tx lives in this scope, so recv never yields None.
                let Some(session_id) = ended else { break };
                match &active {
                    Some(current) if current.id == session_id => {
                        debug!(session_id, "call ended; restarting listener");
                        active = None;
                        transport.disconnect();
                        transport.join().await;
                        match rebind_listener(port, &config).await {
                            Ok((next_transport, next_events)) => {
                                transport = next_transport;
                                events_rx = Some(next_events);
                            }
                            Err(err) => {
                                warn!(port, "giving up on listener rebind: {err}");
                                break;
                            }
                        }
                    }
                    // A signal from an already-replaced session must not
                    // restart the fresh listener.
                    _ => debug!(session_id, "ignoring stale session end signal"),
                }
            }
            event = next_event(&mut events_rx) => {
                match (&active, event) {
                    (Some(current), event) => {
                        // The active call owns every event from its
                        // transport, including the terminal ones.
                        current.call.handle_transport_event(event);
                    }
                    (None, TransportEvent::Connected { role, peer }) => {
                        next_id += 1;
                        let id = next_id;
                        info!(%peer, session_id = id, "incoming call");
                        let hooks = handler.accept_call(peer);
                        let call = SignalingCoordinator::attach(
                            transport.clone(),
                            hooks.media,
                            hooks.events,
                            config.clone(),
                            Some((id, ended_tx.clone())),
                        );
                        call.handle_transport_event(TransportEvent::Connected { role, peer });
                        handler.call_started(Arc::clone(&call));
                        active = Some(ActiveCall { id, call });
                    }
                    (None, TransportEvent::Error(err)) => {
                        // The listener itself failed; replace it.
                        warn!("listener transport failed: {err}");
                        transport.join().await;
                        match rebind_listener(port, &config).await {
                            Ok((next_transport, next_events)) => {
                                transport = next_transport;
                                events_rx = Some(next_events);
                            }
                            Err(err) => {
                                warn!(port, "giving up on listener rebind: {err}");
                                break;
                            }
                        }
                    }
                    (None, event) => {
                        debug!(?event, "dropping transport event with no active call");
                    }
                }
            }
        }
    }
}

/// Receive the next transport event; an exhausted channel parks this arm
/// until the listener is replaced.
async fn next_event(rx: &mut Option<mpsc::Receiver<TransportEvent>>) -> TransportEvent {
    loop {
        match rx {
            Some(receiver) => match receiver.recv().await {
                Some(event) => return event,
                None => *rx = None,
            },
            None => std::future::pending::<()>().await,
        }
    }
}
