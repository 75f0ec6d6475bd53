//! Liveness/readiness endpoints (SPEC_FULL.md ambient "Health" section).

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::config;
use crate::registry::SessionRegistry;

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    ready: bool,
    active_sessions: usize,
    stalled_sessions: usize,
}

/// Unconditional 200: the process is alive and able to answer HTTP at all.
pub async fn liveness() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Reports the registry's active session count and flags `ready: false`
/// only when an unusually large fraction of sessions have gone past the
/// deadman threshold (§4.5.1) without a successful poll (SPEC_FULL.md
/// "Health"). A session's transient `Polling`/`Healing` states are not
/// useful here — they only exist within a single mailbox-serialized `Tick`
/// handler invocation, so a concurrently-read snapshot can never actually
/// observe one (the handler returns to `Ready` before the next message, a
/// `Snapshot` included, is processed). `last_ok_poll_at_millis` is the
/// durable field that actually reflects upstream health across reads. This
/// is an ambient operational signal, not part of the documented session
/// state machine — a new attach always succeeds regardless, since each
/// session heals independently and joins or creates its own actor — this
/// endpoint exists purely so an operator can tell "upstream is broken for
/// most videos right now" from dashboards.
pub async fn readiness(State(registry): State<SessionRegistry>) -> Json<ReadinessResponse> {
    let now = crate::clock::now_millis();
    let threshold_millis = config::deadman_threshold().as_millis() as i64;

    let snapshots = registry.snapshots().await;
    let stalled_sessions = snapshots
        .iter()
        .filter(|s| now - s.last_ok_poll_at_millis > threshold_millis)
        .count();

    let ready = if snapshots.is_empty() {
        true
    } else {
        (stalled_sessions as f64 / snapshots.len() as f64)
            <= config::readiness_degraded_stall_fraction()
    };

    Json(ReadinessResponse {
        ready,
        active_sessions: registry.active_count(),
        stalled_sessions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let (status, body) = liveness().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }
}
