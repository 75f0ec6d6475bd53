//! Maps video id to its `Session` actor, creating on first subscribe (§4.6).

use crate::bootstrap::{BootstrapClient, HttpBootstrapClient};
use crate::session::{SessionActor, SessionActorArgs, SessionMessage};
use crate::upstream::{HttpUpstreamPoller, UpstreamPoller};
use dashmap::DashMap;
use ractor::ActorRef;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Lock-free concurrent video id -> session actor map, mirroring the
/// teacher's `ActorRegistry` for conversations. Unlike the teacher's
/// `get_or_spawn`, creation itself is serialized per key (§4.6
/// "Creation is idempotent under concurrent callers (the registry must
/// serialize creation per key)") via a per-video-id `creation_locks` entry,
/// so two concurrent callers racing to create the same video's session
/// never both spawn an actor — the loser waits for the winner and reuses
/// its actor instead of clobbering the registry entry.
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, ActorRef<SessionMessage>>>,
    creation_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    poller: Arc<dyn UpstreamPoller>,
    bootstrap_client: Arc<dyn BootstrapClient>,
}

impl SessionRegistry {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            creation_locks: Arc::new(DashMap::new()),
            poller: Arc::new(HttpUpstreamPoller::new(http_client.clone())),
            bootstrap_client: Arc::new(HttpBootstrapClient::new(http_client)),
        }
    }

    /// Returns the session actor for `video_id`, spawning and initializing
    /// it with `bootstrap` if it doesn't exist yet (§4.6 `acquireOrCreate`).
    ///
    /// Creation is serialized per key: a racing caller for the same
    /// `video_id` blocks on the same per-key lock rather than spawning a
    /// second actor, then re-checks `sessions` once it acquires the lock and
    /// simply reuses whatever the winner created (§1 "each video has exactly
    /// one poller shared by all its subscribers").
    pub async fn acquire_or_create(
        &self,
        video_id: &str,
        bootstrap: crate::bootstrap::BootstrapData,
    ) -> anyhow::Result<ActorRef<SessionMessage>> {
        if let Some(existing) = self.sessions.get(video_id) {
            debug!(video_id, "reusing existing session");
            return Ok(existing.clone());
        }

        let lock = Arc::clone(
            &self
                .creation_locks
                .entry(video_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );
        let _creation_guard = lock.lock().await;

        // Re-check under the per-key lock: a racing caller may have already
        // created the session while this one was waiting for the lock.
        if let Some(existing) = self.sessions.get(video_id) {
            debug!(video_id, "reusing session created by a racing caller");
            return Ok(existing.clone());
        }

        let args = SessionActorArgs {
            video_id: video_id.to_string(),
            poller: Arc::clone(&self.poller),
            bootstrap_client: Arc::clone(&self.bootstrap_client),
        };

        let (actor_ref, _handle) = ractor::Actor::spawn(None, SessionActor, args)
            .await
            .map_err(|e| anyhow::anyhow!("failed to spawn session actor: {e}"))?;

        actor_ref
            .cast(SessionMessage::Init(bootstrap))
            .map_err(|e| anyhow::anyhow!("failed to initialize session actor: {e}"))?;

        self.sessions.insert(video_id.to_string(), actor_ref.clone());
        metrics::counter!("sessions_created_total").increment(1);
        metrics::gauge!("sessions_active").set(self.sessions.len() as f64);
        info!(video_id, active = self.sessions.len(), "session registered");

        // Drop the now-unneeded per-key lock entry so the map doesn't grow
        // unbounded; safe to remove since we still hold `lock` itself via
        // `_creation_guard`, and any future call for this key that doesn't
        // see `sessions` populated yet will simply re-create the entry.
        self.creation_locks.remove(video_id);

        Ok(actor_ref)
    }

    /// Idempotent; removes `video_id` from the registry (§4.6
    /// `deregister`). A registry may retain drained sessions for fast
    /// re-attach — this one does not, since re-attach via
    /// `acquire_or_create` simply respawns cheaply (a fresh `init` just
    /// re-scrapes the bootstrap).
    pub fn deregister(&self, video_id: &str) {
        if self.sessions.remove(video_id).is_some() {
            metrics::gauge!("sessions_active").set(self.sessions.len() as f64);
            info!(video_id, "session deregistered");
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, video_id: &str) -> Option<ActorRef<SessionMessage>> {
        self.sessions.get(video_id).map(|r| r.clone())
    }

    /// Collects a `Snapshot` from every registered session, for `/readyz`
    /// (SPEC_FULL.md "Health"). Sessions that don't answer within
    /// `config::snapshot_timeout` (wedged mailbox, actor already gone) are
    /// silently skipped rather than stalling the whole check.
    pub async fn snapshots(&self) -> Vec<crate::session::SessionSnapshot> {
        let actors: Vec<_> = self.sessions.iter().map(|e| e.value().clone()).collect();

        let mut snapshots = Vec::with_capacity(actors.len());
        for actor in actors {
            let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
            if actor.cast(SessionMessage::Snapshot(reply_tx)).is_err() {
                continue;
            }
            if let Ok(Ok(snapshot)) =
                tokio::time::timeout(crate::config::snapshot_timeout(), reply_rx).await
            {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }
}

impl Clone for SessionRegistry {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
            creation_locks: Arc::clone(&self.creation_locks),
            poller: Arc::clone(&self.poller),
            bootstrap_client: Arc::clone(&self.bootstrap_client),
        }
    }
}
