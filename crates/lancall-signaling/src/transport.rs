//! TCP transport for the signaling channel.
//!
//! One transport owns one socket. The target address alone picks the mode:
//! wildcard targets listen globally, targets matching a local interface
//! listen as Callee, everything else dials out as Caller. Once a connection
//! is adopted, a dedicated reader task delivers decoded frames in arrival
//! order over a single event channel and a writer task drains the outbox.
//! Closing is cooperative: the close flag plus dropping the socket halves is
//! what unblocks pending reads.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use lancall_common::{Error, Result, SignalMessage};

use crate::codec::{encode_frame, read_frame};
use crate::endpoint::{local_interface_addrs, resolve_mode, Endpoint, Role, SocketMode};
use crate::ChannelConfig;

const EVENT_CAPACITY: usize = 64;
const OUTBOX_CAPACITY: usize = 64;

/// Events a transport delivers to its single consumer, in arrival order.
#[derive(Debug)]
pub enum TransportEvent {
    /// The socket was adopted; role is fixed from the connection direction.
    Connected { role: Role, peer: SocketAddr },
    /// One decoded inbound frame.
    Message(SignalMessage),
    /// A malformed frame was discarded; the stream continues.
    Fault(Error),
    /// Clean close: peer EOF at a frame boundary, or local `disconnect()`.
    Closed,
    /// Fatal connect/accept/read/write failure; no more events follow.
    Error(Error),
}

struct Shared {
    connected: AtomicBool,
    closed_tx: watch::Sender<bool>,
    outbox: Mutex<Option<mpsc::Sender<Bytes>>>,
    io_task: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    /// Idempotent close. Returns true on the first call.
    fn close(&self) -> bool {
        let was_closed = self.closed_tx.send_replace(true);
        *self.outbox.lock().unwrap() = None;
        !was_closed
    }
}

/// Handle to one signaling transport. Cheap to clone; all clones drive the
/// same socket.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
    local_addr: Option<SocketAddr>,
}

impl Transport {
    /// Resolve the socket mode for `endpoint` and spawn the transport.
    ///
    /// Listening modes bind before this returns, so bind failures surface
    /// here and [`Transport::local_addr`] is immediately meaningful. The
    /// connect attempt of the dialing mode runs on the spawned task and
    /// reports through the event channel.
    pub async fn spawn(
        endpoint: Endpoint,
        config: &ChannelConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let locals = local_interface_addrs();
        Self::spawn_with_locals(endpoint, config, &locals).await
    }

    /// [`Transport::spawn`] with an injected local interface set, keeping
    /// role resolution deterministic under test.
    pub async fn spawn_with_locals(
        endpoint: Endpoint,
        config: &ChannelConfig,
        local_addrs: &[std::net::IpAddr],
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let mode = resolve_mode(&endpoint, local_addrs);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (closed_tx, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(false),
            closed_tx,
            outbox: Mutex::new(None),
            io_task: Mutex::new(None),
        });
        let config = config.clone();

        let (local_addr, task) = match mode {
            SocketMode::GlobalListen | SocketMode::Listen => {
                // The original channel binds the wildcard in both listening
                // modes; the target address only selected the mode.
                let listener =
                    TcpListener::bind((Ipv4Addr::UNSPECIFIED, endpoint.port)).await?;
                let local_addr = listener.local_addr()?;
                info!(%local_addr, ?mode, "signaling listener bound");
                let shared = Arc::clone(&shared);
                let task = tokio::spawn(accept_loop(listener, shared, events_tx, config));
                (Some(local_addr), task)
            }
            SocketMode::Connect => {
                let shared = Arc::clone(&shared);
                let task = tokio::spawn(connect_task(endpoint, shared, events_tx, config));
                (None, task)
            }
        };

        *shared.io_task.lock().unwrap() = Some(task);
        Ok((Self { shared, local_addr }, events_rx))
    }

    /// Bound address in listening modes, `None` when dialing.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Queue one message for the adopted connection.
    ///
    /// Before a connection exists, or after `disconnect()`, this reports a
    /// `State` error without touching any socket.
    pub fn send(&self, msg: &SignalMessage) -> Result<()> {
        if *self.shared.closed_tx.borrow() {
            return Err(Error::state("transport closed"));
        }
        let sender = self.shared.outbox.lock().unwrap().clone();
        let Some(sender) = sender else {
            return Err(Error::state("not connected"));
        };
        let frame = encode_frame(msg)?;
        sender
            .try_send(frame)
            .map_err(|_| Error::state("send queue unavailable"))
    }

    /// Idempotent close: sets the closed flag and drops the socket halves,
    /// which unblocks the reader and fires `Closed` through the events.
    pub fn disconnect(&self) {
        if self.shared.close() {
            debug!("transport disconnect requested");
        }
    }

    /// Wait for the transport's accept-or-connect task to finish. Used for
    /// ordered listener restarts: the socket is confirmed closed once this
    /// returns.
    pub async fn join(&self) {
        let task = self.shared.io_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
                closed_tx,
                outbox: Mutex::new(None),
                io_task: Mutex::new(None),
            }),
            local_addr: None,
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    events_tx: mpsc::Sender<TransportEvent>,
    config: ChannelConfig,
) {
    let mut closed_rx = shared.closed_tx.subscribe();
    loop {
        tokio::select! {
            _ = async { let _ = closed_rx.wait_for(|closed| *closed).await; } => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    // First connect wins; simultaneous attempts are closed
                    // immediately.
                    if shared
                        .connected
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        debug!(%peer, "rejecting extra signaling connection");
                        drop(stream);
                        continue;
                    }
                    info!(%peer, "accepted signaling connection");
                    adopt(stream, peer, Role::Callee, &shared, &events_tx, &config).await;
                }
                Err(err) => {
                    warn!("signaling accept failed: {err}");
                    let _ = events_tx.send(TransportEvent::Error(err.into())).await;
                    shared.close();
                    break;
                }
            }
        }
    }
    // Dropping the listener here frees the port; `join()` observes it.
}

async fn connect_task(
    endpoint: Endpoint,
    shared: Arc<Shared>,
    events_tx: mpsc::Sender<TransportEvent>,
    config: ChannelConfig,
) {
    let target = endpoint.authority();
    debug!(%target, "dialing signaling peer");
    let mut closed_rx = shared.closed_tx.subscribe();

    let result = tokio::select! {
        _ = async { let _ = closed_rx.wait_for(|closed| *closed).await; } => return,
        result = time::timeout(config.connect_timeout, TcpStream::connect(target.clone())) => result,
    };

    match result {
        Ok(Ok(stream)) => {
            if shared
                .connected
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            let peer = match stream.peer_addr() {
                Ok(addr) => addr,
                Err(err) => {
                    let _ = events_tx.send(TransportEvent::Error(err.into())).await;
                    shared.close();
                    return;
                }
            };
            info!(%peer, "connected to signaling peer");
            adopt(stream, peer, Role::Caller, &shared, &events_tx, &config).await;
        }
        Ok(Err(err)) => {
            warn!(%target, "signaling connect failed: {err}");
            let _ = events_tx.send(TransportEvent::Error(err.into())).await;
            shared.close();
        }
        Err(_) => {
            warn!(%target, "signaling connect timed out");
            let _ = events_tx
                .send(TransportEvent::Error(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {target} timed out"),
                ))))
                .await;
            shared.close();
        }
    }
}

/// Adopt the connected socket: tune it, install the outbox, and spawn the
/// reader, writer, and optional heartbeat tasks.
async fn adopt(
    stream: TcpStream,
    peer: SocketAddr,
    role: Role,
    shared: &Arc<Shared>,
    events_tx: &mpsc::Sender<TransportEvent>,
    config: &ChannelConfig,
) {
    if *shared.closed_tx.borrow() {
        // disconnect() raced the connection establishment
        drop(stream);
        return;
    }
    if let Err(err) = stream.set_nodelay(true) {
        debug!("set_nodelay failed: {err}");
    }
    if let Err(err) = socket2::SockRef::from(&stream).set_keepalive(true) {
        debug!("set_keepalive failed: {err}");
    }

    let (read_half, write_half) = stream.into_split();
    let (outbox_tx, outbox_rx) = mpsc::channel::<Bytes>(OUTBOX_CAPACITY);
    *shared.outbox.lock().unwrap() = Some(outbox_tx.clone());

    if events_tx
        .send(TransportEvent::Connected { role, peer })
        .await
        .is_err()
    {
        shared.close();
        return;
    }

    tokio::spawn(writer_loop(
        write_half,
        outbox_rx,
        Arc::clone(shared),
        events_tx.clone(),
    ));
    tokio::spawn(reader_loop(
        read_half,
        Arc::clone(shared),
        events_tx.clone(),
    ));

    if let Some(interval) = config.heartbeat_interval {
        if let Ok(frame) = encode_frame(&SignalMessage::Heartbeat) {
            tokio::spawn(heartbeat_loop(interval, frame, outbox_tx, Arc::clone(shared)));
        }
    }
}

async fn reader_loop(
    mut read_half: OwnedReadHalf,
    shared: Arc<Shared>,
    events_tx: mpsc::Sender<TransportEvent>,
) {
    let mut closed_rx = shared.closed_tx.subscribe();
    loop {
        let frame = tokio::select! {
            _ = async { let _ = closed_rx.wait_for(|closed| *closed).await; } => {
                let _ = events_tx.send(TransportEvent::Closed).await;
                break;
            }
            frame = read_frame(&mut read_half) => frame,
        };
        match frame {
            Ok(Some(payload)) => match SignalMessage::from_json(&payload) {
                Ok(msg) => {
                    if events_tx.send(TransportEvent::Message(msg)).await.is_err() {
                        shared.close();
                        break;
                    }
                }
                Err(err) => {
                    // One malformed frame; framing is intact, keep reading.
                    warn!("discarding malformed signaling frame: {err}");
                    let _ = events_tx.send(TransportEvent::Fault(err)).await;
                }
            },
            Ok(None) => {
                debug!("signaling peer closed the stream");
                let _ = events_tx.send(TransportEvent::Closed).await;
                shared.close();
                break;
            }
            Err(err) => {
                let _ = events_tx.send(TransportEvent::Error(err)).await;
                shared.close();
                break;
            }
        }
    }
}

async fn writer_loop(
    mut write_half: OwnedWriteHalf,
    mut outbox_rx: mpsc::Receiver<Bytes>,
    shared: Arc<Shared>,
    events_tx: mpsc::Sender<TransportEvent>,
) {
    let mut closed_rx = shared.closed_tx.subscribe();
    loop {
        tokio::select! {
            _ = async { let _ = closed_rx.wait_for(|closed| *closed).await; } => break,
            maybe = outbox_rx.recv() => match maybe {
                None => break,
                Some(bytes) => {
                    if let Err(err) = write_half.write_all(&bytes).await {
                        warn!("signaling write failed: {err}");
                        let _ = events_tx.send(TransportEvent::Error(err.into())).await;
                        shared.close();
                        break;
                    }
                }
            }
        }
    }
    // Dropping the write half shuts the send direction down.
}

async fn heartbeat_loop(
    interval: std::time::Duration,
    frame: Bytes,
    outbox_tx: mpsc::Sender<Bytes>,
    shared: Arc<Shared>,
) {
    let mut closed_rx = shared.closed_tx.subscribe();
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = async { let _ = closed_rx.wait_for(|closed| *closed).await; } => break,
            _ = ticker.tick() => {
                if outbox_tx.try_send(frame.clone()).is_err() {
                    break;
                }
            }
        }
    }
}
