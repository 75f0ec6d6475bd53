//! Pluggable output adapters and the per-adapter subscriber queue (§4.4).

pub mod json;

use crate::config;
use crate::upstream::Event;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::debug;

/// A serialized payload, ready to write to a subscriber's socket verbatim.
pub type Payload = String;

/// Capability set an output format must satisfy (§9 "Adapter polymorphism").
/// The core depends on nothing beyond this trait, never on a concrete
/// adapter.
pub trait Adapter: Send + Sync {
    /// Turns one event into a payload for this adapter, or `None` to filter
    /// it out entirely for subscribers of this sink.
    fn transform(&self, event: &Event) -> Option<Payload>;

    /// The payload a freshly attached subscriber sees first, if any.
    fn greeting(&self) -> Option<Payload>;

    /// Adapter identifier, matching the front door's `adapter` query param.
    fn name(&self) -> &'static str;
}

/// Returns the adapter for `name`, or `None` if unrecognized. Only `json`
/// ships today; other names are acknowledged extension points (§9) but are
/// not wired up here.
pub fn lookup(name: &str) -> Option<Box<dyn Adapter>> {
    match name {
        "json" => Some(Box::new(json::JsonAdapter)),
        _ => None,
    }
}

/// A live bidirectional connection plus its assigned adapter name.
pub struct Subscriber {
    pub id: u64,
    pub sender: mpsc::UnboundedSender<Payload>,
}

/// Per-adapter-class queue, drain loop, backpressure cap (§4.4).
pub struct Sink {
    name: String,
    adapter: Box<dyn Adapter>,
    subscribers: Vec<Subscriber>,
    outbox: VecDeque<Payload>,
    draining: bool,
}

/// Returned by [`Sink::detach`] so the owning [`crate::session`] knows
/// whether to deregister this sink (§3 I5).
pub enum DetachOutcome {
    StillHasSubscribers,
    Empty,
}

impl Sink {
    pub fn new(adapter: Box<dyn Adapter>) -> Self {
        Self {
            name: adapter.name().to_string(),
            adapter,
            subscribers: Vec::new(),
            outbox: VecDeque::new(),
            draining: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Adds a subscriber and queues the adapter's greeting, if any, so it is
    /// the first payload this subscriber receives (§8 scenario 5).
    pub fn attach(&mut self, subscriber: Subscriber) {
        if let Some(greeting) = self.adapter.greeting() {
            let _ = subscriber.sender.send(greeting);
        }
        self.subscribers.push(subscriber);
    }

    pub fn detach(&mut self, subscriber_id: u64) -> DetachOutcome {
        self.subscribers.retain(|s| s.id != subscriber_id);
        if self.subscribers.is_empty() {
            DetachOutcome::Empty
        } else {
            DetachOutcome::StillHasSubscribers
        }
    }

    /// Runs the adapter's `transform` and enqueues the result, if any
    /// (§4.4 `offer`). Returns whether a payload was actually queued (the
    /// transform may filter the event out entirely).
    pub fn offer(&mut self, event: &Event) -> bool {
        match self.adapter.transform(event) {
            Some(payload) => {
                self.enqueue(payload);
                true
            }
            None => false,
        }
    }

    /// Enqueues a pre-serialized payload directly, bypassing `transform`
    /// (debug notices; §4.4).
    pub fn offer_raw(&mut self, payload: Payload) {
        self.enqueue(payload);
    }

    /// Broadcasts a ping to every subscriber immediately, bypassing the
    /// outbox entirely (§4.4).
    pub fn broadcast_ping(&mut self, payload: &Payload) {
        self.subscribers.retain(|sub| sub.sender.send(payload.clone()).is_ok());
    }

    fn enqueue(&mut self, payload: Payload) {
        self.outbox.push_back(payload);
        let cap = config::outbox_cap();
        while self.outbox.len() > cap {
            self.outbox.pop_front();
            metrics::counter!("outbox_dropped_total", "sink" => self.name.clone()).increment(1);
        }
    }

    /// Drains the outbox at the documented pace, delivering every payload to
    /// every current subscriber, dropping subscribers whose send fails
    /// (§4.4, §5 "broadcasts must tolerate send failures").
    ///
    /// Self-terminates when the outbox empties or the sink loses its last
    /// subscriber. Callers are expected to hold the session lock for the
    /// duration (§5 suspension points) — this method does not spawn.
    pub async fn drain(&mut self) {
        if self.draining {
            return;
        }
        self.draining = true;

        while let Some(payload) = self.outbox.pop_front() {
            self.subscribers
                .retain(|sub| sub.sender.send(payload.clone()).is_ok());

            if self.subscribers.is_empty() {
                debug!(sink = %self.name, "drain stopping, sink emptied");
                break;
            }

            if !self.outbox.is_empty() {
                sleep(config::drain_pacing()).await;
            }
        }

        self.draining = false;
    }
}
