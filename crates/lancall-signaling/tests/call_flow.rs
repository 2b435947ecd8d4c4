//! End-to-end call flow over loopback: a dialing coordinator on one side,
//! the session router on the other.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time;

use lancall_signaling::{
    CallHooks, ChannelConfig, ConnectionState, IceCandidate, IncomingCallHandler, MediaSession,
    Role, SdpKind, SessionEvents, SessionRouter, SignalingCoordinator,
};

#[derive(Default)]
struct RecordingEngine {
    applied: Mutex<Vec<String>>,
}

impl RecordingEngine {
    fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }

    fn saw(&self, entry: &str) -> bool {
        self.applied().iter().any(|e| e == entry)
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
        self.applied.lock().unwrap().push("request-offer".to_string());
    }
    fn has_peer_session(&self) -> bool {
        true
    }
}

#[derive(Default)]
struct RecordingEvents {
    connected: Mutex<Vec<Role>>,
    closed: AtomicUsize,
}

impl SessionEvents for RecordingEvents {
    fn on_connected_to_room(&self, role: Role) {
        self.connected.lock().unwrap().push(role);
    }
    fn on_remote_description(&self, _kind: SdpKind, _sdp: &str) {}
    fn on_remote_ice_candidate(&self, _candidate: &IceCandidate) {}
    fn on_remote_ice_candidates_removed(&self, _candidates: &[IceCandidate]) {}
    fn on_channel_error(&self, _reason: &str) {}
    fn on_channel_closed(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct CalleeHandler {
    accepted: AtomicUsize,
    engine: Arc<RecordingEngine>,
    events: Arc<RecordingEvents>,
    calls: Mutex<Vec<Arc<SignalingCoordinator>>>,
}

impl CalleeHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            accepted: AtomicUsize::new(0),
            engine: Arc::new(RecordingEngine::default()),
            events: Arc::new(RecordingEvents::default()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn latest_call(&self) -> Option<Arc<SignalingCoordinator>> {
        self.calls.lock().unwrap().last().cloned()
    }
}

impl IncomingCallHandler for CalleeHandler {
    fn accept_call(&self, _peer: SocketAddr) -> CallHooks {
        self.accepted.fetch_add(1, Ordering::SeqCst);
        CallHooks {
            media: Arc::clone(&self.engine) as Arc<dyn MediaSession>,
            events: Arc::clone(&self.events) as Arc<dyn SessionEvents>,
        }
    }
    fn call_started(&self, call: Arc<SignalingCoordinator>) {
        self.calls.lock().unwrap().push(call);
    }
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn quick_config() -> ChannelConfig {
    ChannelConfig {
        offer_settle_delay: Duration::from_millis(30),
        ..ChannelConfig::default()
    }
}

fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        sdp_mid: "audio".to_string(),
        sdp_mline_index: 0,
        sdp: format!("candidate:{n}"),
    }
}

async fn dial(
    port: u16,
) -> (
    Arc<SignalingCoordinator>,
    Arc<RecordingEngine>,
    Arc<RecordingEvents>,
) {
    let engine = Arc::new(RecordingEngine::default());
    let events = Arc::new(RecordingEvents::default());
    let caller = SignalingCoordinator::connect(
        &format!("127.0.0.1:{port}"),
        Arc::clone(&engine) as Arc<dyn MediaSession>,
        Arc::clone(&events) as Arc<dyn SessionEvents>,
        quick_config(),
    )
    .await
    .unwrap();
    (caller, engine, events)
}

#[tokio::test]
async fn offer_answer_and_candidates_flow_between_peers() {
    let handler = CalleeHandler::new();
    let router = SessionRouter::spawn(
        0,
        quick_config(),
        Arc::clone(&handler) as Arc<dyn IncomingCallHandler>,
    )
    .await
    .unwrap();
    let port = router.local_addr().port();

    let (caller, caller_engine, caller_events) = dial(port).await;

    // Direction fixes the roles: the dialing side is the caller.
    wait_until("both sides to connect", || {
        caller.state() == ConnectionState::Connected
            && handler.latest_call().is_some_and(|call| call.state() == ConnectionState::Connected)
    })
    .await;
    assert_eq!(caller.role(), Some(Role::Caller));
    assert_eq!(
        caller_events.connected.lock().unwrap().as_slice(),
        &[Role::Caller]
    );
    assert_eq!(handler.latest_call().unwrap().role(), Some(Role::Callee));

    // The settle delay elapses and the caller engine is asked for an offer.
    let engine = Arc::clone(&caller_engine);
    wait_until("the offer request", move || engine.saw("request-offer")).await;

    // Offer over, answer back, candidates both ways, a removal for good
    // measure.
    caller.send_offer("v=offer").unwrap();
    let callee_engine = Arc::clone(&handler.engine);
    {
        let callee_engine = Arc::clone(&callee_engine);
        wait_until("the offer to arrive", move || {
            callee_engine.saw("desc:offer:v=offer")
        })
        .await;
    }

    let callee_call = handler.latest_call().unwrap();
    callee_call
        .local_description_ready(SdpKind::Answer, "v=answer")
        .unwrap();
    {
        let caller_engine = Arc::clone(&caller_engine);
        wait_until("the answer to arrive", move || {
            caller_engine.saw("desc:answer:v=answer")
        })
        .await;
    }

    caller.local_candidate_generated(&candidate(1)).unwrap();
    callee_call.local_candidate_generated(&candidate(2)).unwrap();
    caller.local_candidates_removed(&[candidate(1)]).unwrap();
    {
        let callee_engine = Arc::clone(&callee_engine);
        wait_until("the caller candidate and removal", move || {
            callee_engine.saw("cand:candidate:1") && callee_engine.saw("remove:1")
        })
        .await;
    }
    {
        let caller_engine = Arc::clone(&caller_engine);
        wait_until("the callee candidate", move || {
            caller_engine.saw("cand:candidate:2")
        })
        .await;
    }

    // Hang up from the caller side; both sides settle into Closed.
    caller.disconnect();
    assert_eq!(caller.state(), ConnectionState::Closed);
    wait_until("the callee to observe the close", || {
        handler.latest_call().is_some_and(|call| call.state() == ConnectionState::Closed)
    })
    .await;
    assert_eq!(handler.events.closed.load(Ordering::SeqCst), 1);

    router.shutdown().await;
}

#[tokio::test]
async fn router_takes_a_second_call_after_the_first_ends() {
    let handler = CalleeHandler::new();
    let router = SessionRouter::spawn(
        0,
        quick_config(),
        Arc::clone(&handler) as Arc<dyn IncomingCallHandler>,
    )
    .await
    .unwrap();
    let port = router.local_addr().port();

    let (first_caller, _engine, _events) = dial(port).await;
    wait_until("the first call", || {
        handler.accepted.load(Ordering::SeqCst) == 1
    })
    .await;
    first_caller.disconnect();
    wait_until("the first call to close", || {
        handler.latest_call().is_some_and(|call| call.state() == ConnectionState::Closed)
    })
    .await;

    // The listener comes back on the same port and takes the next caller.
    // Early dials can race the rebind, so retry until the call registers.
    let mut connected = false;
    for _ in 0..50 {
        let (second_caller, _engine, _events) = dial(port).await;
        time::sleep(Duration::from_millis(60)).await;
        if handler.accepted.load(Ordering::SeqCst) == 2 {
            wait_until("the second call to connect", || {
                second_caller.state() == ConnectionState::Connected
            })
            .await;
            connected = true;
            break;
        }
        second_caller.disconnect();
        time::sleep(Duration::from_millis(20)).await;
    }
    assert!(connected, "listener never accepted a second call");

    router.shutdown().await;
}
