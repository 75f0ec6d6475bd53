//! Single-flight request to the upstream chat backend (§4.1).

pub mod types;

use crate::bootstrap::BootstrapData;
use crate::config;
use crate::error::CoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
pub use types::ContinuationKind;

const LIVE_CHAT_ENDPOINT: &str =
    "https://www.youtube.com/youtubei/v1/live_chat/get_live_chat";

/// A single text chat message, the only typed event view the core commits
/// to (§3: "a typed view for the common text-message variant").
#[derive(Debug, Clone, PartialEq)]
pub struct TextMessage {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub badges: Vec<Badge>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Badge {
    pub tooltip: String,
    pub badge_type: String,
    pub badge: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Text(TextMessage),
    Other,
}

/// A platform action plus the fields the core derives from it (§3).
#[derive(Debug, Clone)]
pub struct Event {
    pub id: Option<String>,
    pub timestamp_millis: i64,
    pub kind: EventKind,
}

/// Outcome of one poll (§4.1 contract).
pub struct PollOutcome {
    pub events: Vec<Event>,
    pub next_token: Option<String>,
    pub suggested_delay: Option<Duration>,
    pub kind: Option<ContinuationKind>,
}

/// Capability a session needs from whatever drives its polling (§4.1
/// contract). The production implementation below does the real POST; the
/// session depends on nothing beyond this trait, which is what lets tests
/// substitute a scripted fake (mirroring the teacher's `MailboxBackend`
/// pattern in `fanout/mod.rs`).
#[async_trait]
pub trait UpstreamPoller: Send + Sync {
    async fn poll(
        &self,
        bootstrap: &BootstrapData,
        continuation: &str,
    ) -> Result<PollOutcome, CoreError>;
}

/// Real upstream: POSTs to the live-chat continuation endpoint over HTTP.
pub struct HttpUpstreamPoller {
    pub client: reqwest::Client,
}

impl HttpUpstreamPoller {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UpstreamPoller for HttpUpstreamPoller {
    async fn poll(
        &self,
        bootstrap: &BootstrapData,
        continuation: &str,
    ) -> Result<PollOutcome, CoreError> {
        poll(&self.client, bootstrap, continuation).await
    }
}

/// Performs one POST against the upstream chat endpoint using the current
/// continuation token, under a hard 10s deadline.
pub async fn poll(
    client: &reqwest::Client,
    bootstrap: &BootstrapData,
    continuation: &str,
) -> Result<PollOutcome, CoreError> {
    let body = types::ChatContinuationRequest {
        context: types::RequestContext {
            client: types::ClientContext {
                client_name: "WEB",
                client_version: bootstrap.client_version.clone(),
                visitor_data: bootstrap.visitor_data.clone(),
                language: "en",
                geo: "US",
            },
        },
        continuation: continuation.to_string(),
        current_player_state: None,
    };

    let url = format!("{LIVE_CHAT_ENDPOINT}?key={}", bootstrap.api_key);

    let response = tokio::time::timeout(
        config::upstream_timeout(),
        client.post(&url).json(&body).send(),
    )
    .await
    .map_err(|_| CoreError::Timeout)?
    .map_err(|e| CoreError::Transport(e.to_string()))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| CoreError::Transport(e.to_string()))?;

    if !status.is_success() {
        if text.contains("Too many subrequests") {
            return Err(CoreError::Throttled);
        }
        return Err(CoreError::HttpStatus(status.as_u16()));
    }

    if text.contains("Too many subrequests") {
        return Err(CoreError::Throttled);
    }

    let root: Value = serde_json::from_str(&text).map_err(|e| CoreError::Transport(e.to_string()))?;

    Ok(parse_response(&root))
}

fn parse_response(root: &Value) -> PollOutcome {
    let (kind, next_token, suggested_delay_ms) =
        if let Some((kind, token, timeout_ms)) = types::find_typed_continuation(root) {
            (Some(kind), Some(token), timeout_ms)
        } else if let Some(token) = types::find_fallback_continuation(root) {
            (Some(ContinuationKind::Fallback), Some(token), None)
        } else {
            (None, None, None)
        };

    let now_millis = crate::clock::now_millis();
    let events = types::collect_actions(root)
        .iter()
        .filter_map(|action| parse_action(action, now_millis))
        .collect();

    PollOutcome {
        events,
        next_token,
        suggested_delay: suggested_delay_ms.map(Duration::from_millis),
        kind,
    }
}

/// Parses one action into an [`Event`]. Failures are swallowed: this
/// returns `None` and the caller simply drops the action (§4.1).
fn parse_action(action: &Value, now_millis: i64) -> Option<Event> {
    if let Some(renderer) = action
        .get("addChatItemAction")
        .and_then(|v| v.get("item"))
        .and_then(|v| v.get("liveChatTextMessageRenderer"))
    {
        return parse_text_message(renderer, now_millis);
    }

    // Unrecognized action kind: still produce an Event if we can find an id
    // somewhere in it, so dedup/time-barrier can still reason about it.
    // Otherwise treat as a swallowed parse failure.
    find_any_id(action).map(|id| Event {
        id: Some(id),
        timestamp_millis: find_any_timestamp_usec(action)
            .map(|usec| usec / 1000)
            .unwrap_or(now_millis),
        kind: EventKind::Other,
    })
}

fn parse_text_message(renderer: &Value, now_millis: i64) -> Option<Event> {
    let id = renderer.get("id")?.as_str()?.to_string();

    let author_name = renderer
        .get("authorName")
        .and_then(|v| v.get("simpleText"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let author_id = renderer
        .get("authorExternalChannelId")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let text = renderer
        .get("message")
        .and_then(|v| v.get("runs"))
        .and_then(|v| v.as_array())
        .map(|runs| {
            runs.iter()
                .filter_map(|run| run.get("text").and_then(|t| t.as_str()))
                .collect::<String>()
        })
        .unwrap_or_default();

    let badges = renderer
        .get("authorBadges")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|entry| entry.get("liveChatAuthorBadgeRenderer"))
                .map(|b| Badge {
                    tooltip: b
                        .get("tooltip")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    badge_type: b
                        .get("icon")
                        .and_then(|v| v.get("iconType"))
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    badge: b
                        .get("customThumbnail")
                        .and_then(|v| v.get("thumbnails"))
                        .and_then(|v| v.as_array())
                        .and_then(|arr| arr.last())
                        .and_then(|t| t.get("url"))
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let timestamp_millis = renderer
        .get("timestampUsec")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<i64>().ok())
        .map(|usec| usec / 1000)
        .unwrap_or(now_millis);

    Some(Event {
        id: Some(id.clone()),
        timestamp_millis,
        kind: EventKind::Text(TextMessage {
            id,
            author_id,
            author_name,
            badges,
            text,
        }),
    })
}

fn find_any_id(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(s)) = map.get("id") {
                return Some(s.clone());
            }
            map.values().find_map(find_any_id)
        }
        Value::Array(items) => items.iter().find_map(find_any_id),
        _ => None,
    }
}

fn find_any_timestamp_usec(value: &Value) -> Option<i64> {
    match value {
        Value::Object(map) => {
            if let Some(v) = map.get("timestampUsec") {
                if let Some(s) = v.as_str() {
                    if let Ok(n) = s.parse::<i64>() {
                        return Some(n);
                    }
                }
            }
            map.values().find_map(find_any_timestamp_usec)
        }
        Value::Array(items) => items.iter().find_map(find_any_timestamp_usec),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_text_message_happy_path() {
        let root = json!({
            "continuationContents": {
                "liveChatContinuation": {
                    "actions": [{
                        "addChatItemAction": {
                            "item": {
                                "liveChatTextMessageRenderer": {
                                    "id": "m1",
                                    "authorName": { "simpleText": "A" },
                                    "authorExternalChannelId": "c1",
                                    "message": { "runs": [{ "text": "hi" }] },
                                    "timestampUsec": "1700000000000000"
                                }
                            }
                        }
                    }],
                    "continuations": [{
                        "timedContinuationData": { "continuation": "T1", "timeoutMs": 2500 }
                    }]
                }
            }
        });

        let outcome = parse_response(&root);
        assert_eq!(outcome.events.len(), 1);
        match &outcome.events[0].kind {
            EventKind::Text(msg) => {
                assert_eq!(msg.id, "m1");
                assert_eq!(msg.author_name, "A");
                assert_eq!(msg.author_id, "c1");
                assert_eq!(msg.text, "hi");
            }
            EventKind::Other => panic!("expected text message"),
        }
        assert_eq!(outcome.events[0].timestamp_millis, 1_700_000_000_000);
        assert_eq!(outcome.next_token.as_deref(), Some("T1"));
        assert_eq!(outcome.suggested_delay, Some(Duration::from_millis(2500)));
        assert_eq!(outcome.kind, Some(ContinuationKind::Timed));
    }

    #[test]
    fn malformed_action_is_swallowed_not_fatal() {
        let root = json!({
            "continuationContents": {
                "liveChatContinuation": {
                    "actions": [
                        { "addChatItemAction": { "item": { "liveChatTextMessageRenderer": {} } } },
                        { "someOtherCommand": {} }
                    ]
                }
            }
        });
        let outcome = parse_response(&root);
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn no_continuation_anywhere_yields_none_token() {
        let root = json!({ "continuationContents": { "liveChatContinuation": {} } });
        let outcome = parse_response(&root);
        assert!(outcome.next_token.is_none());
        assert!(outcome.kind.is_none());
    }
}
