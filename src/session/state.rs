use crate::adapter::{self, Sink};
use crate::bootstrap::{BootstrapClient, BootstrapData};
use crate::clock::now_millis;
use crate::config;
use crate::dedup::DedupWindow;
use crate::error::CoreError;
use crate::time_barrier::TimeBarrier;
use crate::upstream::{ContinuationKind, Event, UpstreamPoller};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// `UNINIT -> READY -> (POLLING | HEALING) -> DRAINED` (§4.5). `Polling` and
/// `Healing` are transient and only ever observed within a single `Tick`
/// handler invocation — the mailbox never interleaves another message while
/// one of them is current, so they exist mainly for `snapshot()` and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Uninit,
    Ready,
    Polling,
    Healing,
    Drained,
}

impl State {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Uninit => "uninit",
            Self::Ready => "ready",
            Self::Polling => "polling",
            Self::Healing => "healing",
            Self::Drained => "drained",
        }
    }
}

/// Read-only view of a session's state, for `/healthz`-style introspection.
/// Has no effect on the documented state machine (§ session module note).
pub struct SessionSnapshot {
    pub video_id: String,
    pub state: &'static str,
    pub subscriber_counts: HashMap<String, usize>,
    pub heal_backoff_ms: u64,
    pub last_ok_poll_at_millis: i64,
}

pub struct SessionActorState {
    pub video_id: String,
    pub poller: Arc<dyn UpstreamPoller>,
    pub bootstrap_client: Arc<dyn BootstrapClient>,

    pub state: State,
    pub bootstrap: Option<BootstrapData>,
    pub continuation: Option<String>,
    pub boot_epoch_millis: i64,
    pub last_ok_poll_at_millis: i64,
    pub heal_backoff: Duration,
    pub next_heal_allowed_at_millis: i64,

    pub adapters: HashMap<String, Sink>,
    pub dedup: DedupWindow,
    pub time_barrier: TimeBarrier,

    pub next_subscriber_id: u64,
    pub tick_generation: u64,
    pub keepalive_generation: u64,
}

impl SessionActorState {
    pub fn new(
        video_id: String,
        poller: Arc<dyn UpstreamPoller>,
        bootstrap_client: Arc<dyn BootstrapClient>,
    ) -> Self {
        Self {
            video_id,
            poller,
            bootstrap_client,
            state: State::Uninit,
            bootstrap: None,
            continuation: None,
            boot_epoch_millis: 0,
            last_ok_poll_at_millis: 0,
            heal_backoff: config::heal_backoff_start(),
            next_heal_allowed_at_millis: 0,
            adapters: HashMap::new(),
            dedup: DedupWindow::new(config::dedup_capacity()),
            time_barrier: TimeBarrier::new(0, config::time_barrier_grace()),
            next_subscriber_id: 0,
            tick_generation: 0,
            keepalive_generation: 0,
        }
    }

    pub fn total_subscriber_count(&self) -> usize {
        self.adapters.values().map(Sink::subscriber_count).sum()
    }

    pub fn has_subscribers(&self) -> bool {
        self.total_subscriber_count() > 0
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            video_id: self.video_id.clone(),
            state: self.state.as_str(),
            subscriber_counts: self
                .adapters
                .iter()
                .map(|(name, sink)| (name.clone(), sink.subscriber_count()))
                .collect(),
            heal_backoff_ms: self.heal_backoff.as_millis() as u64,
            last_ok_poll_at_millis: self.last_ok_poll_at_millis,
        }
    }

    /// `init(bootstrap)` (§4.5): no-op if already past `Uninit`.
    pub fn init(&mut self, bootstrap: BootstrapData) {
        if self.state != State::Uninit {
            debug!(video_id = %self.video_id, "duplicate init ignored");
            return;
        }

        let now = now_millis();
        self.continuation = bootstrap.initial_continuation.clone();
        self.bootstrap = Some(bootstrap);
        self.boot_epoch_millis = now;
        self.last_ok_poll_at_millis = now;
        self.time_barrier.reset(now);
        self.state = State::Ready;

        info!(video_id = %self.video_id, "session initialized");
    }

    /// Registers `subscriber` on `adapter_name`'s sink, creating the sink if
    /// this is its first subscriber (§3 I5). Returns whether the session had
    /// zero subscribers before this call, whether it was `Drained`, and the
    /// resolved adapter name the caller must use for the matching `detach`
    /// (unrecognized names fall back to `"json"`).
    pub fn attach(
        &mut self,
        adapter_name: &str,
        subscriber: adapter::Subscriber,
    ) -> (bool, bool, String) {
        let had_subscribers = self.has_subscribers();
        let was_drained = self.state == State::Drained;

        let resolved_name = if adapter::lookup(adapter_name).is_some() {
            adapter_name.to_string()
        } else {
            "json".to_string()
        };

        let sink = self.adapters.entry(resolved_name.clone()).or_insert_with(|| {
            Sink::new(adapter::lookup(&resolved_name).expect("resolved adapter name must exist"))
        });
        sink.attach(subscriber);

        if was_drained {
            self.state = State::Ready;
            info!(video_id = %self.video_id, "session left DRAINED on new attach");
        }

        (had_subscribers, was_drained, resolved_name)
    }

    /// Removes `subscriber_id` from `adapter_name`'s sink (§4.4 `detach`),
    /// removing the sink entirely once it is empty (§3 I5). Returns whether
    /// the whole session is now subscriber-less.
    pub fn detach(&mut self, adapter_name: &str, subscriber_id: u64) -> bool {
        if let std::collections::hash_map::Entry::Occupied(mut entry) =
            self.adapters.entry(adapter_name.to_string())
        {
            if let adapter::DetachOutcome::Empty = entry.get_mut().detach(subscriber_id) {
                entry.remove();
            }
        }

        let now_empty = !self.has_subscribers();
        if now_empty {
            self.state = State::Drained;
            info!(video_id = %self.video_id, "session drained, last subscriber departed");
        }
        now_empty
    }

    /// Broadcasts a debug notice to every sink, bypassing `transform`
    /// (§4.4, §7 "subscribers see `{debug:true,...}` envelopes").
    pub async fn broadcast_debug(&mut self, message: impl Into<String>) {
        let payload = crate::adapter::json::debug_payload(&message.into());
        for sink in self.adapters.values_mut() {
            sink.offer_raw(payload.clone());
            sink.drain().await;
        }
    }

    /// Broadcasts the keepalive ping immediately to every sink, bypassing
    /// the outbox (§4.4, §6).
    pub fn broadcast_ping(&mut self) {
        let payload = crate::adapter::json::ping_payload();
        for sink in self.adapters.values_mut() {
            sink.broadcast_ping(&payload);
        }
    }

    /// Runs the auto-heal protocol (§4.5.1). Returns `true` on success.
    pub async fn run_heal(&mut self) -> bool {
        self.state = State::Healing;
        self.broadcast_debug("refreshing token…").await;

        match self.bootstrap_client.scrape(&self.video_id).await {
            Ok(fresh) => {
                let now = now_millis();
                self.continuation = fresh.initial_continuation.clone();
                self.bootstrap = Some(fresh);
                self.last_ok_poll_at_millis = now;
                self.boot_epoch_millis = now;
                self.time_barrier.reset(now);
                self.heal_backoff = config::heal_backoff_start();
                self.next_heal_allowed_at_millis = now + self.heal_backoff.as_millis() as i64;
                self.state = State::Ready;
                info!(video_id = %self.video_id, "heal succeeded");
                metrics::counter!("heal_attempts_total", "outcome" => "success").increment(1);
                true
            }
            Err(e) => {
                let now = now_millis();
                self.heal_backoff = std::cmp::min(self.heal_backoff * 2, config::heal_backoff_cap());
                self.next_heal_allowed_at_millis = now + self.heal_backoff.as_millis() as i64;
                self.broadcast_debug(format!("token refresh failed: {e}")).await;
                warn!(video_id = %self.video_id, error = %e, "heal failed");
                self.state = State::Ready;
                metrics::counter!("heal_attempts_total", "outcome" => "failure").increment(1);
                false
            }
        }
    }

    fn deadman_expired(&self, now: i64) -> bool {
        now - self.last_ok_poll_at_millis > config::deadman_threshold().as_millis() as i64
    }

    /// Runs one tick body (§4.5 "Tick body", five numbered steps). Returns
    /// the delay before the next tick should be scheduled, or `None` if no
    /// further tick should be scheduled (no subscribers remain).
    pub async fn tick(&mut self) -> Option<Duration> {
        // Step 1.
        let has_continuation = self
            .continuation
            .as_ref()
            .is_some_and(|c| !c.is_empty());
        if self.state != State::Ready || !has_continuation {
            return self.has_subscribers().then_some(config::not_ready_delay());
        }

        // Step 2.
        if !self.has_subscribers() {
            return None;
        }

        // Step 3.
        let now = now_millis();
        if self.deadman_expired(now) && now >= self.next_heal_allowed_at_millis {
            if !self.run_heal().await {
                return self.has_subscribers().then_some(self.heal_backoff);
            }
        }

        // Step 4.
        self.state = State::Polling;
        let Some(bootstrap) = self.bootstrap.clone() else {
            self.state = State::Ready;
            return self.has_subscribers().then_some(config::not_ready_delay());
        };

        let continuation = self.continuation.clone().expect("checked non-empty above");
        match self.poller.poll(&bootstrap, &continuation).await {
            Ok(outcome) => {
                self.state = State::Ready;
                self.last_ok_poll_at_millis = now_millis();
                metrics::counter!("upstream_polls_total", "outcome" => "ok").increment(1);

                match outcome.next_token {
                    Some(next) => self.continuation = Some(next),
                    None => {
                        debug!(video_id = %self.video_id, "poll succeeded with no continuation, healing");
                        if !self.run_heal().await {
                            return self.has_subscribers().then_some(self.heal_backoff);
                        }
                    }
                }

                self.fan_out(outcome.events).await;

                let delay = outcome
                    .suggested_delay
                    .map(|d| d.clamp(config::poll_delay_min(), config::poll_delay_max()))
                    .unwrap_or_else(config::poll_delay_default);

                self.has_subscribers().then_some(delay.max(Duration::from_millis(1000)))
            }
            Err(e) => {
                self.state = State::Ready;
                self.record_poll_error_metric(&e);
                self.handle_poll_error(e).await;
                self.has_subscribers().then_some(config::transient_error_delay())
            }
        }
    }

    fn record_poll_error_metric(&self, error: &CoreError) {
        let outcome = match error {
            CoreError::Throttled => "throttled",
            CoreError::Timeout => "timeout",
            CoreError::HttpStatus(_) => "http_error",
            _ => "transport",
        };
        metrics::counter!("upstream_polls_total", "outcome" => outcome).increment(1);
    }

    /// Enqueues every event from one poll onto every sink first, then drains
    /// each sink once (§4.5 "events extracted from one upstream response are
    /// fanned out to every sink in their upstream order before the next poll
    /// is issued"). Draining only once per sink, after all of this tick's
    /// events are queued, is what lets the outbox actually hold a backlog
    /// under a burst — offering and draining a single event at a time would
    /// leave the outbox empty before `drain`'s own pacing check ever saw
    /// more than one payload (§4.4 pacing, P4, P5).
    async fn fan_out(&mut self, events: Vec<Event>) {
        for event in events {
            if !self.time_barrier.accept(event.timestamp_millis) {
                continue;
            }
            if let Some(id) = &event.id {
                if !self.dedup.admit(id) {
                    continue;
                }
            }
            for sink in self.adapters.values_mut() {
                let queued = sink.offer(&event);
                if queued {
                    metrics::counter!("events_delivered_total", "adapter" => sink.name().to_string())
                        .increment(1);
                }
            }
        }

        for sink in self.adapters.values_mut() {
            sink.drain().await;
        }
    }

    async fn handle_poll_error(&mut self, error: CoreError) {
        warn!(video_id = %self.video_id, error = %error, "poll failed");
        let message = match &error {
            CoreError::Throttled => "rate limited by upstream, backing off…".to_string(),
            CoreError::Timeout => "upstream request timed out".to_string(),
            CoreError::HttpStatus(status) => format!("upstream returned status {status}"),
            CoreError::Transport(msg) => format!("transport error: {msg}"),
            other => other.to_string(),
        };
        self.broadcast_debug(message).await;
    }
}

/// Derives the `kind`-labeled metric value for an observed continuation, for
/// callers that want a label rather than the full enum (metrics wiring).
pub fn continuation_kind_label(kind: Option<ContinuationKind>) -> &'static str {
    kind.map(|k| k.as_str()).unwrap_or("none")
}
