//! The default adapter: the raw JSON envelopes documented in §6.

use super::{Adapter, Payload};
use crate::upstream::{Event, EventKind};
use serde::Serialize;

pub struct JsonAdapter;

#[derive(Serialize)]
#[serde(tag = "type")]
enum Envelope<'a> {
    #[serde(rename = "message")]
    Message {
        id: &'a str,
        unix: i64,
        message: &'a str,
        author: AuthorEnvelope<'a>,
    },
}

#[derive(Serialize)]
struct AuthorEnvelope<'a> {
    id: &'a str,
    name: &'a str,
    badges: Vec<BadgeEnvelope<'a>>,
}

#[derive(Serialize)]
struct BadgeEnvelope<'a> {
    tooltip: &'a str,
    #[serde(rename = "type")]
    badge_type: &'a str,
    badge: &'a str,
}

impl Adapter for JsonAdapter {
    fn transform(&self, event: &Event) -> Option<Payload> {
        let EventKind::Text(msg) = &event.kind else {
            return None;
        };

        let envelope = Envelope::Message {
            id: &msg.id,
            unix: event.timestamp_millis,
            message: &msg.text,
            author: AuthorEnvelope {
                id: &msg.author_id,
                name: &msg.author_name,
                badges: msg
                    .badges
                    .iter()
                    .map(|b| BadgeEnvelope {
                        tooltip: &b.tooltip,
                        badge_type: &b.badge_type,
                        badge: &b.badge,
                    })
                    .collect(),
            },
        };

        serde_json::to_string(&envelope).ok()
    }

    fn greeting(&self) -> Option<Payload> {
        Some(debug_payload("connected"))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// Builds a `{"debug":true,"message":...}` envelope (§6), shared by every
/// adapter for operational notices.
pub fn debug_payload(message: &str) -> Payload {
    serde_json::json!({ "debug": true, "message": message }).to_string()
}

/// Builds the `{"type":"ping"}` keepalive envelope (§6).
pub fn ping_payload() -> Payload {
    r#"{"type":"ping"}"#.to_string()
}
