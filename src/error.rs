//! Crate-wide error type for the chat relay core.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors surfaced by the bootstrap scraper and upstream poller.
///
/// Only `BootstrapFailed` ever crosses the HTTP boundary (at the initial
/// attach path, per the error handling design); every other variant is
/// handled internally by the session actor's retry/heal logic and is never
/// returned to a caller outside this crate.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("failed to bootstrap session for video {video_id}: {reason}")]
    BootstrapFailed { video_id: String, reason: String },

    #[error("upstream returned HTTP {0}")]
    HttpStatus(u16),

    #[error("upstream rate limit signal observed")]
    Throttled,

    #[error("upstream request exceeded its deadline")]
    Timeout,

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("failed to parse an individual action, skipping it")]
    ParseFailure,

    #[error("upstream response carried no continuation token")]
    NoContinuation,
}

impl CoreError {
    fn error_name(&self) -> &'static str {
        match self {
            Self::BootstrapFailed { .. } => "BootstrapFailed",
            Self::HttpStatus(_) => "UpstreamHttpStatus",
            Self::Throttled => "Throttled",
            Self::Timeout => "Timeout",
            Self::Transport(_) => "Transport",
            Self::ParseFailure => "ParseFailure",
            Self::NoContinuation => "NoContinuation",
        }
    }
}

/// Only reached from the front door's initial-attach handler; internal
/// callers (the session tick loop) match on `CoreError` directly and never
/// convert it into a response.
impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BootstrapFailed { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let error_name = self.error_name();
        tracing::warn!(error = %self, error_name, "core error surfaced to front door");
        (
            status,
            Json(json!({ "error": error_name, "message": self.to_string() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_failed_maps_to_bad_gateway() {
        let err = CoreError::BootstrapFailed {
            video_id: "dQw4w9WgXcQ".into(),
            reason: "missing ytInitialData".into(),
        };
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn display_includes_context() {
        let err = CoreError::HttpStatus(503);
        assert!(err.to_string().contains("503"));
    }
}
