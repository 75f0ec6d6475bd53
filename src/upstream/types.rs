//! Wire types for the upstream chat continuation endpoint.
//!
//! Known paths (§4.1) are modeled as typed structs/enums. Actions are kept
//! as generic [`serde_json::Value`] and picked apart field-by-field, since
//! the renderer zoo is large and the spec only commits to the text-message
//! shape (§3, §6) — the "dynamic JSON traversal" design note calls for
//! eagerly typing only what's load-bearing and walking the rest.

use serde::Serialize;
use serde_json::Value;

/// Request body for a single poll (§4.1): client context block plus the
/// continuation token to echo back.
#[derive(Debug, Serialize)]
pub struct ChatContinuationRequest {
    pub context: RequestContext,
    pub continuation: String,
    #[serde(rename = "currentPlayerState", skip_serializing_if = "Option::is_none")]
    pub current_player_state: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct RequestContext {
    pub client: ClientContext,
}

#[derive(Debug, Serialize)]
pub struct ClientContext {
    #[serde(rename = "clientName")]
    pub client_name: &'static str,
    #[serde(rename = "clientVersion")]
    pub client_version: String,
    #[serde(rename = "visitorData")]
    pub visitor_data: String,
    #[serde(rename = "hl")]
    pub language: &'static str,
    #[serde(rename = "gl")]
    pub geo: &'static str,
}

/// The winning continuation variant, matching §4.1 step 1's priority walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationKind {
    Timed,
    Invalidation,
    Reload,
    Fallback,
}

impl ContinuationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timed => "timedContinuationData",
            Self::Invalidation => "invalidationContinuationData",
            Self::Reload => "reloadContinuationData",
            Self::Fallback => "fallback",
        }
    }
}

/// Result of parsing one poll response (§4.1 contract).
pub struct ParsedResponse {
    pub events: Vec<Value>,
    pub next_token: Option<String>,
    pub suggested_delay_ms: Option<u64>,
    pub kind: Option<ContinuationKind>,
}

/// Walk `continuationContents.liveChatContinuation.continuations[*]` and
/// return the first recognized variant (§4.1 step 1).
pub fn find_typed_continuation(root: &Value) -> Option<(ContinuationKind, String, Option<u64>)> {
    let continuations = root
        .get("continuationContents")?
        .get("liveChatContinuation")?
        .get("continuations")?
        .as_array()?;

    for entry in continuations {
        for (key, kind) in [
            ("timedContinuationData", ContinuationKind::Timed),
            (
                "invalidationContinuationData",
                ContinuationKind::Invalidation,
            ),
            ("reloadContinuationData", ContinuationKind::Reload),
        ] {
            if let Some(data) = entry.get(key) {
                let token = data.get("continuation").and_then(|v| v.as_str());
                if let Some(token) = token {
                    let timeout_ms = data.get("timeoutMs").and_then(|v| v.as_u64());
                    return Some((kind, token.to_string(), timeout_ms));
                }
            }
        }
    }

    None
}

/// Depth-first scan for any field literally named `continuation` whose
/// value is a string (§4.1 step 2).
pub fn find_fallback_continuation(root: &Value) -> Option<String> {
    fn walk(value: &Value) -> Option<String> {
        match value {
            Value::Object(map) => {
                if let Some(Value::String(s)) = map.get("continuation") {
                    return Some(s.clone());
                }
                for v in map.values() {
                    if let Some(found) = walk(v) {
                        return Some(found);
                    }
                }
                None
            }
            Value::Array(items) => {
                for item in items {
                    if let Some(found) = walk(item) {
                        return Some(found);
                    }
                }
                None
            }
            _ => None,
        }
    }

    walk(root)
}

/// Gather raw action objects from every documented location (§4.1 event
/// extraction paragraph).
pub fn collect_actions(root: &Value) -> Vec<Value> {
    let mut actions = Vec::new();

    if let Some(arr) = root
        .get("continuationContents")
        .and_then(|v| v.get("liveChatContinuation"))
        .and_then(|v| v.get("actions"))
        .and_then(|v| v.as_array())
    {
        actions.extend(arr.iter().cloned());
    }

    if let Some(endpoints) = root
        .get("onResponseReceivedEndpoints")
        .and_then(|v| v.as_array())
    {
        for endpoint in endpoints {
            for path in [
                ["appendContinuationItemsAction", "continuationItems"],
                ["reloadContinuationItemsCommand", "continuationItems"],
            ] {
                if let Some(arr) = endpoint
                    .get(path[0])
                    .and_then(|v| v.get(path[1]))
                    .and_then(|v| v.as_array())
                {
                    actions.extend(arr.iter().cloned());
                }
            }
        }
    }

    actions
}
