//! Exercises the concrete scenarios of spec.md §8 directly against
//! `SessionActorState`, with the `UpstreamPoller`/`BootstrapClient` traits
//! substituted for scripted fakes — the same trait-object substitution
//! pattern the teacher uses for `MailboxBackend` in `fanout/mod.rs`. This
//! sidesteps both real network calls and ractor's scheduling entirely: the
//! tick body and heal procedure are plain async methods, so driving them
//! directly is both faster and more deterministic than spinning up the
//! actor and waiting on real timers.

use async_trait::async_trait;
use livechat_relay::adapter::Subscriber;
use livechat_relay::bootstrap::{BootstrapClient, BootstrapData};
use livechat_relay::error::CoreError;
use livechat_relay::session::state::SessionActorState;
use livechat_relay::session::{SessionActor, SessionActorArgs, SessionMessage};
use livechat_relay::upstream::{Badge, Event, EventKind, PollOutcome, TextMessage, UpstreamPoller};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct FakePoller {
    responses: Mutex<VecDeque<Result<PollOutcome, CoreError>>>,
    seen_continuations: Mutex<Vec<String>>,
}

impl FakePoller {
    fn new(responses: Vec<Result<PollOutcome, CoreError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            seen_continuations: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl UpstreamPoller for FakePoller {
    async fn poll(
        &self,
        _bootstrap: &BootstrapData,
        continuation: &str,
    ) -> Result<PollOutcome, CoreError> {
        self.seen_continuations
            .lock()
            .unwrap()
            .push(continuation.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(PollOutcome {
                    events: vec![],
                    next_token: Some(continuation.to_string()),
                    suggested_delay: None,
                    kind: None,
                })
            })
    }
}

struct FakeBootstrapClient {
    responses: Mutex<VecDeque<Result<BootstrapData, CoreError>>>,
}

impl FakeBootstrapClient {
    fn new(responses: Vec<Result<BootstrapData, CoreError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
        })
    }
}

#[async_trait]
impl BootstrapClient for FakeBootstrapClient {
    async fn scrape(&self, _video_id: &str) -> Result<BootstrapData, CoreError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("fake bootstrap client exhausted")
    }
}

fn bootstrap(token: &str) -> BootstrapData {
    BootstrapData {
        api_key: "KEY".to_string(),
        client_version: "1.0".to_string(),
        visitor_data: "VIS".to_string(),
        initial_continuation: Some(token.to_string()),
    }
}

fn text_event(id: &str, text: &str, timestamp_millis: i64) -> Event {
    Event {
        id: Some(id.to_string()),
        timestamp_millis,
        kind: EventKind::Text(TextMessage {
            id: id.to_string(),
            author_id: "c1".to_string(),
            author_name: "A".to_string(),
            badges: Vec::<Badge>::new(),
            text: text.to_string(),
        }),
    }
}

fn attach(state: &mut SessionActorState) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    state.attach(
        "json",
        Subscriber {
            id: state.next_subscriber_id,
            sender: tx,
        },
    );
    state.next_subscriber_id += 1;
    rx
}

fn state_with(poller: Arc<dyn UpstreamPoller>, bootstrap_client: Arc<dyn BootstrapClient>) -> SessionActorState {
    SessionActorState::new("dQw4w9WgXcQ".to_string(), poller, bootstrap_client)
}

/// Scenario 1: happy path — one text message delivered, next poll uses the
/// timed continuation the upstream returned.
#[tokio::test]
async fn happy_path_delivers_one_message_and_advances_continuation() {
    let poller = FakePoller::new(vec![Ok(PollOutcome {
        events: vec![text_event("m1", "hi", 1_700_000_000_000)],
        next_token: Some("T1".to_string()),
        suggested_delay: Some(Duration::from_millis(2500)),
        kind: None,
    })]);
    let bc = FakeBootstrapClient::new(vec![]);
    let mut state = state_with(poller.clone(), bc);
    state.init(bootstrap("T0"));
    let mut rx = attach(&mut state);

    // Greeting arrives first (scenario 5).
    let greeting = rx.recv().await.unwrap();
    assert!(greeting.contains("\"debug\":true"));

    let delay = state.tick().await.unwrap();
    assert_eq!(delay, Duration::from_millis(2500));
    assert_eq!(state.continuation.as_deref(), Some("T1"));

    let payload = rx.recv().await.unwrap();
    assert!(payload.contains("\"id\":\"m1\""));
    assert!(payload.contains("\"message\":\"hi\""));

    assert_eq!(
        poller.seen_continuations.lock().unwrap().as_slice(),
        &["T0".to_string()]
    );
}

/// §4.5 "events extracted from one upstream response are fanned out to
/// every sink in their upstream order before the next poll is issued": a
/// single poll response carrying several actions must deliver all of them,
/// in order, to the subscriber within the one tick that received them.
#[tokio::test]
async fn multiple_events_in_one_poll_are_delivered_in_upstream_order() {
    let poller = FakePoller::new(vec![Ok(PollOutcome {
        events: vec![
            text_event("m1", "first", 0),
            text_event("m2", "second", 0),
            text_event("m3", "third", 0),
        ],
        next_token: Some("T1".to_string()),
        suggested_delay: None,
        kind: None,
    })]);
    let bc = FakeBootstrapClient::new(vec![]);
    let mut state = state_with(poller, bc);
    state.init(bootstrap("T0"));
    let mut rx = attach(&mut state);
    rx.recv().await.unwrap(); // greeting

    state.tick().await;

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    let third = rx.recv().await.unwrap();
    assert!(first.contains("\"id\":\"m1\""));
    assert!(second.contains("\"id\":\"m2\""));
    assert!(third.contains("\"id\":\"m3\""));
}

/// Scenario 2: the same action id across two polls is delivered once.
#[tokio::test]
async fn duplicate_ids_across_polls_are_suppressed() {
    let poller = FakePoller::new(vec![
        Ok(PollOutcome {
            events: vec![text_event("m1", "hi", 0)],
            next_token: Some("T1".to_string()),
            suggested_delay: None,
            kind: None,
        }),
        Ok(PollOutcome {
            events: vec![text_event("m1", "hi", 0)],
            next_token: Some("T2".to_string()),
            suggested_delay: None,
            kind: None,
        }),
    ]);
    let bc = FakeBootstrapClient::new(vec![]);
    let mut state = state_with(poller, bc);
    state.init(bootstrap("T0"));
    let mut rx = attach(&mut state);
    rx.recv().await.unwrap(); // greeting

    state.tick().await;
    state.tick().await;

    let mut messages = 0;
    while let Ok(payload) = rx.try_recv() {
        if payload.contains("\"type\":\"message\"") {
            messages += 1;
        }
    }
    assert_eq!(messages, 1);
}

/// Scenario 3: deadman heal fires after the poll silence threshold and
/// replaces the bootstrap/continuation.
#[tokio::test]
async fn deadman_triggers_heal_and_adopts_fresh_bootstrap() {
    let poller = FakePoller::new(vec![Ok(PollOutcome {
        events: vec![],
        next_token: Some("T1_after_heal".to_string()),
        suggested_delay: None,
        kind: None,
    })]);
    let bc = FakeBootstrapClient::new(vec![Ok(bootstrap("T0_prime"))]);
    let mut state = state_with(poller.clone(), bc);
    state.init(bootstrap("T0"));
    let mut rx = attach(&mut state);
    rx.recv().await.unwrap(); // greeting

    // Simulate 45s+ of poll silence without advancing real time.
    state.last_ok_poll_at_millis -= 46_000;

    state.tick().await;

    assert_eq!(state.heal_backoff, Duration::from_millis(5_000));
    assert_eq!(
        poller.seen_continuations.lock().unwrap().as_slice(),
        &["T0_prime".to_string()]
    );

    let mut saw_refresh_debug = false;
    while let Ok(payload) = rx.try_recv() {
        if payload.contains("refreshing token") {
            saw_refresh_debug = true;
        }
    }
    assert!(saw_refresh_debug);
}

/// Scenario 4: repeated heal failures double the backoff up to the cap;
/// a subsequent success resets it.
#[tokio::test]
async fn heal_backoff_doubles_on_failure_and_resets_on_success() {
    let poller = FakePoller::new(vec![]);
    let bc = FakeBootstrapClient::new(vec![
        Err(CoreError::BootstrapFailed {
            video_id: "v".to_string(),
            reason: "down".to_string(),
        }),
        Err(CoreError::BootstrapFailed {
            video_id: "v".to_string(),
            reason: "down".to_string(),
        }),
        Err(CoreError::BootstrapFailed {
            video_id: "v".to_string(),
            reason: "down".to_string(),
        }),
        Ok(bootstrap("T_RECOVERED")),
    ]);
    let mut state = state_with(poller, bc);
    state.init(bootstrap("T0"));

    assert!(!state.run_heal().await);
    assert_eq!(state.heal_backoff, Duration::from_millis(10_000));

    assert!(!state.run_heal().await);
    assert_eq!(state.heal_backoff, Duration::from_millis(20_000));

    assert!(!state.run_heal().await);
    assert_eq!(state.heal_backoff, Duration::from_millis(40_000));

    assert!(state.run_heal().await);
    assert_eq!(state.heal_backoff, Duration::from_millis(5_000));
}

/// Scenario 7 / P6: once the last subscriber departs, `tick` returns `None`
/// (no further tick scheduled) without issuing another poll.
#[tokio::test]
async fn last_subscriber_leaving_stops_scheduling() {
    let poller = FakePoller::new(vec![Ok(PollOutcome {
        events: vec![],
        next_token: Some("T1".to_string()),
        suggested_delay: None,
        kind: None,
    })]);
    let bc = FakeBootstrapClient::new(vec![]);
    let mut state = state_with(poller.clone(), bc);
    state.init(bootstrap("T0"));
    let _rx = attach(&mut state);

    let now_empty = state.detach("json", 0);
    assert!(now_empty);

    let next = state.tick().await;
    assert!(next.is_none());
    assert!(poller.seen_continuations.lock().unwrap().is_empty());
}

/// P3: an event timestamped well before boot epoch minus the grace window
/// is never delivered.
#[tokio::test]
async fn time_barrier_rejects_stale_events() {
    let poller = FakePoller::new(vec![Ok(PollOutcome {
        events: vec![text_event("old", "ancient", 1)],
        next_token: Some("T1".to_string()),
        suggested_delay: None,
        kind: None,
    })]);
    let bc = FakeBootstrapClient::new(vec![]);
    let mut state = state_with(poller, bc);
    state.init(bootstrap("T0"));
    let mut rx = attach(&mut state);
    rx.recv().await.unwrap(); // greeting

    state.tick().await;

    assert!(rx.try_recv().is_err(), "no message should have been delivered");
}

/// Exercises the real `ractor::Actor` mailbox (pre_start + Init/Attach/
/// Snapshot/Detach dispatch), not just `SessionActorState` directly — the
/// generation-tagged `Tick`/`Keepalive` scheduling only exists in
/// `session/actor.rs`, so a test that only drives `SessionActorState`
/// can't catch a regression there.
#[tokio::test]
async fn actor_mailbox_attaches_reports_snapshot_and_detaches() {
    let poller = FakePoller::new(vec![]);
    let bc = FakeBootstrapClient::new(vec![]);

    let (actor_ref, handle) = ractor::Actor::spawn(
        None,
        SessionActor,
        SessionActorArgs {
            video_id: "dQw4w9WgXcQ".to_string(),
            poller,
            bootstrap_client: bc,
        },
    )
    .await
    .expect("actor spawns");

    actor_ref
        .cast(SessionMessage::Init(bootstrap("T0")))
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
    actor_ref
        .cast(SessionMessage::Attach {
            adapter_name: "json".to_string(),
            sender: tx,
            reply: reply_tx,
        })
        .unwrap();
    let (subscriber_id, resolved_name) = reply_rx.await.unwrap();
    assert_eq!(resolved_name, "json");

    // Greeting should already be queued.
    let greeting = rx.recv().await.unwrap();
    assert!(greeting.contains("connected"));

    let (snap_tx, snap_rx) = tokio::sync::oneshot::channel();
    actor_ref.cast(SessionMessage::Snapshot(snap_tx)).unwrap();
    let snapshot = snap_rx.await.unwrap();
    assert_eq!(snapshot.video_id, "dQw4w9WgXcQ");
    assert_eq!(snapshot.subscriber_counts.get("json"), Some(&1));

    actor_ref
        .cast(SessionMessage::Detach {
            adapter_name: resolved_name,
            subscriber_id,
        })
        .unwrap();

    // Give the mailbox a turn to process Detach before checking the
    // post-detach snapshot.
    let (snap_tx2, snap_rx2) = tokio::sync::oneshot::channel();
    actor_ref.cast(SessionMessage::Snapshot(snap_tx2)).unwrap();
    let snapshot2 = snap_rx2.await.unwrap();
    assert!(snapshot2.subscriber_counts.is_empty());

    actor_ref.stop(None);
    handle.await.unwrap();
}
