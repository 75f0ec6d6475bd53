//! The per-video chat session actor (§4.5, §4.5.1).

pub mod actor;
pub mod messages;
pub mod state;

pub use actor::{SessionActor, SessionActorArgs};
pub use messages::SessionMessage;
pub use state::SessionSnapshot;
