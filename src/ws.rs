//! The HTTP front door's WebSocket upgrade handler (spec.md §6).
//!
//! Out of scope for hardening per spec.md §1 ("The HTTP front door ... routes
//! upgrade requests to the correct session instance"), but the core needs a
//! real call site, so this wiring is intentionally thin: validate, scrape,
//! `acquire_or_create`, attach, pump bytes. All of the interesting behavior
//! lives in [`crate::session`].

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::bootstrap::BootstrapClient;
use crate::session::SessionMessage;
use crate::SessionRegistry;

static VIDEO_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").unwrap());

#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    #[serde(default = "default_adapter")]
    pub adapter: String,
}

fn default_adapter() -> String {
    "json".to_string()
}

#[derive(Clone)]
pub struct WsState {
    pub registry: SessionRegistry,
    pub bootstrap_client: std::sync::Arc<dyn BootstrapClient>,
}

/// `GET /live/{videoId}` (spec.md §6). Validates the video id, scrapes a
/// fresh bootstrap, acquires or creates that video's session, and attaches
/// this connection to it.
pub async fn live_handler(
    ws: WebSocketUpgrade,
    Path(video_id): Path<String>,
    Query(query): Query<LiveQuery>,
    State(state): State<WsState>,
) -> Result<Response, StatusCode> {
    if !VIDEO_ID_RE.is_match(&video_id) {
        return Err(StatusCode::NOT_FOUND);
    }

    let bootstrap = state
        .bootstrap_client
        .scrape(&video_id)
        .await
        .map_err(|e| {
            warn!(video_id = %video_id, error = %e, "bootstrap failed at attach");
            StatusCode::BAD_GATEWAY
        })?;

    let session = state
        .registry
        .acquire_or_create(&video_id, bootstrap)
        .await
        .map_err(|e| {
            warn!(video_id = %video_id, error = %e, "failed to acquire session");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let adapter_name = query.adapter;
    info!(video_id = %video_id, adapter = %adapter_name, "client attaching");

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, session, video_id, adapter_name)))
}

async fn handle_socket(
    socket: WebSocket,
    session: ractor::ActorRef<SessionMessage>,
    video_id: String,
    adapter_name: String,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let (reply_tx, reply_rx) = oneshot::channel();

    if session
        .cast(SessionMessage::Attach {
            adapter_name: adapter_name.clone(),
            sender: tx,
            reply: reply_tx,
        })
        .is_err()
    {
        warn!(video_id = %video_id, "session actor gone before attach");
        return;
    }

    let Ok((subscriber_id, resolved_adapter_name)) = reply_rx.await else {
        warn!(video_id = %video_id, "attach reply dropped");
        return;
    };

    let send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sink.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    // Drain incoming frames purely to detect close/error; the core has no
    // upstream write path (spec.md §1 Non-goals).
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    send_task.abort();
    let _ = session.cast(SessionMessage::Detach {
        adapter_name: resolved_adapter_name,
        subscriber_id,
    });
    info!(video_id = %video_id, "client detached");
}
