use crate::bootstrap::BootstrapData;
use tokio::sync::{mpsc, oneshot};

/// Protocol for a [`super::actor::SessionActor`]'s mailbox. All variants are
/// processed sequentially, which is what provides the session-wide
/// serialization lock (§5).
pub enum SessionMessage {
    /// `UNINIT -> READY` (§4.5). A duplicate `Init` on an already-initialized
    /// session is a no-op.
    Init(BootstrapData),

    /// Scheduled tick, tagged with the generation it was scheduled under.
    /// A generation mismatch means a newer schedule superseded this one, so
    /// the firing is stale and ignored — this is how the actor cancels a
    /// pending deadline without a cancellation handle.
    Tick(u64),

    /// Scheduled keepalive ping, same generation-tagging scheme as `Tick`.
    Keepalive(u64),

    /// Registers a new subscriber on the named adapter's sink. Replies with
    /// the subscriber id and the resolved adapter name (unrecognized names
    /// fall back to `"json"`, §4.6) needed to `Detach` later — the caller
    /// must use the resolved name, not whatever it originally requested.
    Attach {
        adapter_name: String,
        sender: mpsc::UnboundedSender<String>,
        reply: oneshot::Sender<(u64, String)>,
    },

    Detach {
        adapter_name: String,
        subscriber_id: u64,
    },

    /// Read-only state snapshot for the health endpoint (§ ambient Health).
    Snapshot(oneshot::Sender<super::state::SessionSnapshot>),
}
