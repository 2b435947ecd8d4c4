//! Per-call signaling coordinator.
//!
//! Sits between one transport and the media engine: turns transport events
//! into session-level callbacks, buffers remote candidates until the engine
//! has a peer session to apply them to, and decides when the Caller side
//! should be asked for an offer.
//!
//! State machine: `New -> Connected -> {Closed | Error}`. The terminal
//! states are sinks; faults arriving after them are logged, never
//! re-reported.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};

use lancall_common::{Error, IceCandidate, Result, SignalMessage};

use crate::endpoint::{Endpoint, Role};
use crate::transport::{Transport, TransportEvent};
use crate::ChannelConfig;

/// Lifecycle of one signaling channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connected,
    Closed,
    Error,
}

/// Which kind of session description a payload carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offer => write!(f, "offer"),
            Self::Answer => write!(f, "answer"),
        }
    }
}

/// The media engine as seen by the coordinator.
///
/// The engine is expected to create and deliver a local answer only in
/// response to an applied remote *offer*, never to an answer, and to call
/// [`SignalingCoordinator::peer_session_ready`] once its peer session object
/// exists and may receive buffered state.
pub trait MediaSession: Send + Sync {
    fn apply_remote_description(&self, kind: SdpKind, sdp: &str);
    fn apply_remote_candidate(&self, candidate: &IceCandidate);
    fn remove_remote_candidates(&self, candidates: &[IceCandidate]);
    fn request_offer(&self);
    /// Whether a peer session object exists to take candidates right now.
    fn has_peer_session(&self) -> bool;
}

/// Session-owner callbacks.
pub trait SessionEvents: Send + Sync {
    fn on_connected_to_room(&self, role: Role);
    fn on_remote_description(&self, kind: SdpKind, sdp: &str);
    fn on_remote_ice_candidate(&self, candidate: &IceCandidate);
    fn on_remote_ice_candidates_removed(&self, candidates: &[IceCandidate]);
    fn on_channel_error(&self, reason: &str);
    fn on_channel_closed(&self);
}

/// One-shot "this session ended" notification consumed by the router.
pub(crate) type EndedSignal = (u64, mpsc::Sender<u64>);

struct Inner {
    state: ConnectionState,
    role: Option<Role>,
    /// Remote description that arrived before the engine had a peer session.
    held_description: Option<(SdpKind, String)>,
    /// Candidates awaiting the engine's peer session, FIFO.
    pending_candidates: VecDeque<IceCandidate>,
    /// Set once the one permitted drain has happened.
    drained: bool,
}

/// Coordinates one call session over one transport.
pub struct SignalingCoordinator {
    media: Arc<dyn MediaSession>,
    events: Arc<dyn SessionEvents>,
    transport: Transport,
    config: ChannelConfig,
    inner: Mutex<Inner>,
    ended: Mutex<Option<EndedSignal>>,
}

impl SignalingCoordinator {
    /// Dial (or listen for, if the target resolves to a local address) the
    /// given endpoint and drive a new call session over it.
    ///
    /// Endpoint grammar violations surface here as `AddressFormat` /
    /// `PortRange` errors; connect failures arrive later through
    /// [`SessionEvents::on_channel_error`].
    pub async fn connect(
        endpoint: &str,
        media: Arc<dyn MediaSession>,
        events: Arc<dyn SessionEvents>,
        config: ChannelConfig,
    ) -> Result<Arc<Self>> {
        let endpoint = Endpoint::parse(endpoint)?;
        let (transport, transport_events) = Transport::spawn(endpoint, &config).await?;
        let this = Arc::new(Self::new(transport, media, events, config, None));
        this.spawn_pump(transport_events);
        Ok(this)
    }

    /// Wrap an already-running transport; the caller feeds events in. Used
    /// by the session router for incoming calls.
    pub(crate) fn attach(
        transport: Transport,
        media: Arc<dyn MediaSession>,
        events: Arc<dyn SessionEvents>,
        config: ChannelConfig,
        ended: Option<EndedSignal>,
    ) -> Arc<Self> {
        Arc::new(Self::new(transport, media, events, config, ended))
    }

    fn new(
        transport: Transport,
        media: Arc<dyn MediaSession>,
        events: Arc<dyn SessionEvents>,
        config: ChannelConfig,
        ended: Option<EndedSignal>,
    ) -> Self {
        Self {
            media,
            events,
            transport,
            config,
            inner: Mutex::new(Inner {
                state: ConnectionState::New,
                role: None,
                held_description: None,
                pending_candidates: VecDeque::new(),
                drained: false,
            }),
            ended: Mutex::new(ended),
        }
    }

    fn spawn_pump(self: &Arc<Self>, mut rx: mpsc::Receiver<TransportEvent>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            // Single consumer: events reach the state machine in arrival order.
            while let Some(event) = rx.recv().await {
                this.handle_transport_event(event);
            }
        });
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().unwrap().state
    }

    /// Role fixed at connection establishment, if connected yet.
    pub fn role(&self) -> Option<Role> {
        self.inner.lock().unwrap().role
    }

    /// Explicitly end the session. Fires `on_channel_closed` exactly once.
    pub fn disconnect(&self) {
        self.enter_closed();
    }

    // ---- outbound (media engine -> wire) ----

    /// The engine produced a local description; relay it to the peer.
    pub fn local_description_ready(&self, kind: SdpKind, sdp: &str) -> Result<()> {
        match kind {
            SdpKind::Offer => self.send_offer(sdp),
            SdpKind::Answer => self.send_answer(sdp),
        }
    }

    /// The engine generated a local candidate; relay it to the peer.
    pub fn local_candidate_generated(&self, candidate: &IceCandidate) -> Result<()> {
        self.send_candidate(candidate)
    }

    /// The engine withdrew local candidates; relay the batch removal.
    pub fn local_candidates_removed(&self, candidates: &[IceCandidate]) -> Result<()> {
        self.send_candidate_removals(candidates)
    }

    pub fn send_offer(&self, sdp: &str) -> Result<()> {
        self.ensure_connected("offer")?;
        self.transport.send(&SignalMessage::Offer {
            sdp: sdp.to_string(),
        })
    }

    pub fn send_answer(&self, sdp: &str) -> Result<()> {
        self.ensure_connected("answer")?;
        self.transport.send(&SignalMessage::Answer {
            sdp: sdp.to_string(),
        })
    }

    pub fn send_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.ensure_connected("candidate")?;
        self.transport
            .send(&SignalMessage::Candidate(candidate.clone()))
    }

    pub fn send_candidate_removals(&self, candidates: &[IceCandidate]) -> Result<()> {
        self.ensure_connected("candidate removals")?;
        self.transport
            .send(&SignalMessage::RemoveCandidates(candidates.to_vec()))
    }

    fn ensure_connected(&self, what: &str) -> Result<()> {
        if self.state() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(Error::state(format!(
                "sending {what} in non connected state"
            )))
        }
    }

    // ---- media engine readiness ----

    /// The engine's peer session object exists; release buffered state.
    ///
    /// Applies a held remote description first, then drains pending
    /// candidates in arrival order. The drain happens at most once; repeat
    /// signals are no-ops and never redeliver candidates.
    pub fn peer_session_ready(&self) {
        let (description, batch) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.drained {
                debug!("peer session ready repeated; drain already done");
                return;
            }
            inner.drained = true;
            (
                inner.held_description.take(),
                std::mem::take(&mut inner.pending_candidates),
            )
        };

        if let Some((kind, sdp)) = description {
            debug!(%kind, "applying held remote description");
            self.media.apply_remote_description(kind, &sdp);
        }
        if !batch.is_empty() {
            info!(count = batch.len(), "draining pending remote candidates");
        }
        for candidate in &batch {
            self.media.apply_remote_candidate(candidate);
        }
    }

    // ---- transport events ----

    pub(crate) fn handle_transport_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Connected { role, peer } => {
                {
                    let mut inner = self.inner.lock().unwrap();
                    if inner.state != ConnectionState::New {
                        warn!(?role, "connected event in state {:?}", inner.state);
                        return;
                    }
                    inner.state = ConnectionState::Connected;
                    inner.role = Some(role);
                }
                info!(%peer, %role, "signaling channel connected");
                self.events.on_connected_to_room(role);
                if role == Role::Caller {
                    self.schedule_offer_request();
                }
            }
            TransportEvent::Message(msg) => self.handle_message(msg),
            TransportEvent::Fault(err) => {
                if self.is_terminal() {
                    debug!("fault after terminal state: {err}");
                    return;
                }
                // Policy: one malformed frame is reported but does not end
                // the call; well-formed frames keep flowing.
                warn!("non-fatal signaling fault: {err}");
                self.events.on_channel_error(&err.to_string());
            }
            TransportEvent::Closed => self.enter_closed(),
            TransportEvent::Error(err) => self.enter_error(&err.to_string()),
        }
    }

    fn handle_message(&self, msg: SignalMessage) {
        if self.is_terminal() {
            debug!(tag = msg.tag(), "dropping message after terminal state");
            return;
        }
        match msg {
            SignalMessage::Offer { sdp } => self.handle_description(SdpKind::Offer, sdp),
            SignalMessage::Answer { sdp } => self.handle_description(SdpKind::Answer, sdp),
            SignalMessage::Candidate(candidate) => {
                let ready = self.media.has_peer_session();
                let forward = {
                    let mut inner = self.inner.lock().unwrap();
                    if ready {
                        true
                    } else if !inner.drained {
                        debug!(
                            queued = inner.pending_candidates.len() + 1,
                            "buffering remote candidate until peer session exists"
                        );
                        inner.pending_candidates.push_back(candidate.clone());
                        false
                    } else {
                        // Drained already; the queue is never refilled.
                        true
                    }
                };
                if forward {
                    self.media.apply_remote_candidate(&candidate);
                }
                self.events.on_remote_ice_candidate(&candidate);
            }
            SignalMessage::RemoveCandidates(candidates) => {
                // Removals are never queued.
                self.media.remove_remote_candidates(&candidates);
                self.events.on_remote_ice_candidates_removed(&candidates);
            }
            SignalMessage::Heartbeat => debug!("heartbeat from peer"),
            SignalMessage::Unknown(tag) => {
                debug!(%tag, "ignoring unknown signaling message type");
            }
        }
    }

    fn handle_description(&self, kind: SdpKind, sdp: String) {
        if self.media.has_peer_session() {
            self.media.apply_remote_description(kind, &sdp);
        } else {
            // Hold it; peer_session_ready applies it exactly once.
            debug!(%kind, "holding remote description until peer session exists");
            let mut inner = self.inner.lock().unwrap();
            inner.held_description = Some((kind, sdp.clone()));
        }
        self.events.on_remote_description(kind, &sdp);
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Closed | ConnectionState::Error
        )
    }

    /// Caller side: wait for the transport to settle, then ask the engine
    /// for an offer, unless the state moved on meanwhile.
    fn schedule_offer_request(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let delay = self.config.offer_settle_delay;
        tokio::spawn(async move {
            time::sleep(delay).await;
            if this.state() == ConnectionState::Connected {
                debug!("requesting local offer from media engine");
                this.media.request_offer();
            } else {
                debug!("offer request suppressed; state is {:?}", this.state());
            }
        });
    }

    fn enter_closed(&self) {
        let fire = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                ConnectionState::Closed | ConnectionState::Error => false,
                _ => {
                    inner.state = ConnectionState::Closed;
                    true
                }
            }
        };
        if fire {
            info!("signaling channel closed");
            self.transport.disconnect();
            self.events.on_channel_closed();
            self.notify_ended();
        } else {
            debug!("close after terminal state");
        }
    }

    fn enter_error(&self, reason: &str) {
        let fire = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                ConnectionState::Closed | ConnectionState::Error => false,
                _ => {
                    inner.state = ConnectionState::Error;
                    true
                }
            }
        };
        if fire {
            warn!("signaling channel error: {reason}");
            self.transport.disconnect();
            self.events.on_channel_error(reason);
            self.notify_ended();
        } else {
            // Terminal states are sinks; log and swallow.
            warn!("fault after terminal state: {reason}");
        }
    }

    fn notify_ended(&self) {
        let signal = self.ended.lock().unwrap().take();
        if let Some((session_id, tx)) = signal {
            if tx.try_send(session_id).is_err() {
                debug!(session_id, "session end signal dropped; router gone");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingEngine {
        ready: AtomicBool,
        offer_requests: AtomicUsize,
        applied: Mutex<Vec<String>>,
    }

    impl RecordingEngine {
        fn applied(&self) -> Vec<String> {
            self.applied.lock().unwrap().clone()
        }
    }

    impl MediaSession for RecordingEngine {
        fn apply_remote_description(&self, kind: SdpKind, sdp: &str) {
            self.applied.lock().unwrap().push(format!("desc:{kind}:{sdp}"));
        }
        fn apply_remote_candidate(&self, candidate: &IceCandidate) {
            self.applied
                .lock()
                .unwrap()
                .push(format!("cand:{}", candidate.sdp));
        }
        fn remove_remote_candidates(&self, candidates: &[IceCandidate]) {
            self.applied
                .lock()
                .unwrap()
                .push(format!("remove:{}", candidates.len()));
        }
        fn request_offer(&self) {
            self.offer_requests.fetch_add(1, Ordering::SeqCst);
        }
        fn has_peer_session(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingEvents {
        connected: Mutex<Vec<Role>>,
        errors: Mutex<Vec<String>>,
        closed: AtomicUsize,
    }

    impl SessionEvents for RecordingEvents {
        fn on_connected_to_room(&self, role: Role) {
            self.connected.lock().unwrap().push(role);
        }
        fn on_remote_description(&self, _kind: SdpKind, _sdp: &str) {}
        fn on_remote_ice_candidate(&self, _candidate: &IceCandidate) {}
        fn on_remote_ice_candidates_removed(&self, _candidates: &[IceCandidate]) {}
        fn on_channel_error(&self, reason: &str) {
            self.errors.lock().unwrap().push(reason.to_string());
        }
        fn on_channel_closed(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn harness(
        config: ChannelConfig,
    ) -> (
        Arc<SignalingCoordinator>,
        Arc<RecordingEngine>,
        Arc<RecordingEvents>,
    ) {
        let engine = Arc::new(RecordingEngine::default());
        let events = Arc::new(RecordingEvents::default());
        let coordinator = SignalingCoordinator::attach(
            Transport::detached(),
            Arc::clone(&engine) as Arc<dyn MediaSession>,
            Arc::clone(&events) as Arc<dyn SessionEvents>,
            config,
            None,
        );
        (coordinator, engine, events)
    }

    fn quick_config() -> ChannelConfig {
        ChannelConfig {
            offer_settle_delay: Duration::from_millis(50),
            ..ChannelConfig::default()
        }
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 5], 38888))
    }

    fn connected(role: Role) -> TransportEvent {
        TransportEvent::Connected { role, peer: peer() }
    }

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate {
            sdp_mid: "audio".to_string(),
            sdp_mline_index: 0,
            sdp: format!("candidate:{n}"),
        }
    }

    fn io_error() -> TransportEvent {
        TransportEvent::Error(Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "peer vanished",
        )))
    }

    #[tokio::test]
    async fn caller_requests_offer_once_after_settle_delay() {
        let (coordinator, engine, events) = harness(quick_config());
        coordinator.handle_transport_event(connected(Role::Caller));
        assert_eq!(events.connected.lock().unwrap().as_slice(), &[Role::Caller]);

        // Not yet: the settle delay has not elapsed.
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.offer_requests.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.offer_requests.load(Ordering::SeqCst), 1);

        // And never again.
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.offer_requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn offer_request_suppressed_when_state_changes_during_delay() {
        let (coordinator, engine, events) = harness(quick_config());
        coordinator.handle_transport_event(connected(Role::Caller));
        coordinator.handle_transport_event(io_error());

        time::sleep(Duration::from_millis(120)).await;
        assert_eq!(engine.offer_requests.load(Ordering::SeqCst), 0);
        assert_eq!(events.errors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn callee_never_requests_offer() {
        let (coordinator, engine, events) = harness(quick_config());
        coordinator.handle_transport_event(connected(Role::Callee));
        assert_eq!(events.connected.lock().unwrap().as_slice(), &[Role::Callee]);

        time::sleep(Duration::from_millis(120)).await;
        assert_eq!(engine.offer_requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn early_offer_held_until_peer_session_ready() {
        let (coordinator, engine, _events) = harness(quick_config());
        coordinator.handle_transport_event(connected(Role::Callee));
        coordinator.handle_transport_event(TransportEvent::Message(SignalMessage::Offer {
            sdp: "v=0".to_string(),
        }));
        assert!(engine.applied().is_empty());

        engine.ready.store(true, Ordering::SeqCst);
        coordinator.peer_session_ready();
        assert_eq!(engine.applied(), vec!["desc:offer:v=0".to_string()]);

        // Repeat signals do not re-apply.
        coordinator.peer_session_ready();
        assert_eq!(engine.applied().len(), 1);
    }

    #[tokio::test]
    async fn candidates_drain_in_arrival_order_after_offer() {
        let (coordinator, engine, _events) = harness(quick_config());
        coordinator.handle_transport_event(connected(Role::Callee));
        coordinator
            .handle_transport_event(TransportEvent::Message(SignalMessage::Candidate(candidate(1))));
        coordinator
            .handle_transport_event(TransportEvent::Message(SignalMessage::Candidate(candidate(2))));
        coordinator.handle_transport_event(TransportEvent::Message(SignalMessage::Offer {
            sdp: "v=0".to_string(),
        }));
        assert!(engine.applied().is_empty());

        engine.ready.store(true, Ordering::SeqCst);
        coordinator.peer_session_ready();
        assert_eq!(
            engine.applied(),
            vec![
                "desc:offer:v=0".to_string(),
                "cand:candidate:1".to_string(),
                "cand:candidate:2".to_string(),
            ]
        );

        // Queue is empty now; candidates forward directly.
        coordinator
            .handle_transport_event(TransportEvent::Message(SignalMessage::Candidate(candidate(3))));
        assert_eq!(engine.applied().len(), 4);
        coordinator.peer_session_ready();
        assert_eq!(engine.applied().len(), 4);
    }

    #[tokio::test]
    async fn draining_empty_queue_is_noop() {
        let (coordinator, engine, _events) = harness(quick_config());
        coordinator.handle_transport_event(connected(Role::Callee));
        engine.ready.store(true, Ordering::SeqCst);
        coordinator.peer_session_ready();
        coordinator.peer_session_ready();
        assert!(engine.applied().is_empty());
    }

    #[tokio::test]
    async fn ready_engine_gets_candidates_immediately() {
        let (coordinator, engine, _events) = harness(quick_config());
        coordinator.handle_transport_event(connected(Role::Callee));
        engine.ready.store(true, Ordering::SeqCst);
        coordinator
            .handle_transport_event(TransportEvent::Message(SignalMessage::Candidate(candidate(7))));
        assert_eq!(engine.applied(), vec!["cand:candidate:7".to_string()]);
    }

    #[tokio::test]
    async fn candidate_removals_are_never_queued() {
        let (coordinator, engine, _events) = harness(quick_config());
        coordinator.handle_transport_event(connected(Role::Callee));
        // Engine not ready, removals still forward unconditionally.
        coordinator.handle_transport_event(TransportEvent::Message(
            SignalMessage::RemoveCandidates(vec![candidate(1), candidate(2)]),
        ));
        assert_eq!(engine.applied(), vec!["remove:2".to_string()]);
    }

    #[tokio::test]
    async fn heartbeat_and_unknown_are_ignored() {
        let (coordinator, engine, events) = harness(quick_config());
        coordinator.handle_transport_event(connected(Role::Callee));
        coordinator.handle_transport_event(TransportEvent::Message(SignalMessage::Heartbeat));
        coordinator.handle_transport_event(TransportEvent::Message(SignalMessage::Unknown(
            "bye".to_string(),
        )));
        assert!(engine.applied().is_empty());
        assert!(events.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn io_error_is_terminal_and_reported_once() {
        let (coordinator, _engine, events) = harness(quick_config());
        coordinator.handle_transport_event(connected(Role::Caller));
        coordinator.handle_transport_event(io_error());
        assert_eq!(coordinator.state(), ConnectionState::Error);
        assert_eq!(events.errors.lock().unwrap().len(), 1);

        // Later faults are swallowed, state stays put.
        coordinator.handle_transport_event(io_error());
        coordinator.handle_transport_event(TransportEvent::Closed);
        assert_eq!(coordinator.state(), ConnectionState::Error);
        assert_eq!(events.errors.lock().unwrap().len(), 1);
        assert_eq!(events.closed.load(Ordering::SeqCst), 0);

        // Sends after the terminal state report a state error.
        let err = coordinator.send_offer("v=0").unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[tokio::test]
    async fn protocol_fault_is_reported_but_not_fatal() {
        let (coordinator, engine, events) = harness(quick_config());
        coordinator.handle_transport_event(connected(Role::Callee));
        coordinator.handle_transport_event(TransportEvent::Fault(Error::protocol("bad frame")));
        assert_eq!(coordinator.state(), ConnectionState::Connected);
        assert_eq!(events.errors.lock().unwrap().len(), 1);

        // The channel keeps relaying afterwards.
        engine.ready.store(true, Ordering::SeqCst);
        coordinator
            .handle_transport_event(TransportEvent::Message(SignalMessage::Candidate(candidate(1))));
        assert_eq!(engine.applied().len(), 1);
    }

    #[tokio::test]
    async fn clean_close_fires_on_channel_closed_once() {
        let (coordinator, _engine, events) = harness(quick_config());
        coordinator.handle_transport_event(connected(Role::Callee));
        coordinator.handle_transport_event(TransportEvent::Closed);
        coordinator.handle_transport_event(TransportEvent::Closed);
        assert_eq!(coordinator.state(), ConnectionState::Closed);
        assert_eq!(events.closed.load(Ordering::SeqCst), 1);
        assert!(events.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sends_require_connected_state() {
        let (coordinator, _engine, _events) = harness(quick_config());
        assert!(matches!(
            coordinator.send_offer("v=0"),
            Err(Error::State(_))
        ));
        assert!(matches!(
            coordinator.send_answer("v=0"),
            Err(Error::State(_))
        ));
        assert!(matches!(
            coordinator.send_candidate(&candidate(1)),
            Err(Error::State(_))
        ));
        assert!(matches!(
            coordinator.send_candidate_removals(&[candidate(1)]),
            Err(Error::State(_))
        ));
    }

    #[tokio::test]
    async fn ended_signal_fires_once_with_session_id() {
        let (tx, mut rx) = mpsc::channel(4);
        let engine = Arc::new(RecordingEngine::default());
        let events = Arc::new(RecordingEvents::default());
        let coordinator = SignalingCoordinator::attach(
            Transport::detached(),
            engine as Arc<dyn MediaSession>,
            events as Arc<dyn SessionEvents>,
            quick_config(),
            Some((7, tx)),
        );
        coordinator.handle_transport_event(connected(Role::Callee));
        coordinator.handle_transport_event(TransportEvent::Closed);
        assert_eq!(rx.recv().await, Some(7));

        coordinator.handle_transport_event(io_error());
        assert!(rx.try_recv().is_err());
    }
}
