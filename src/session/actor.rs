use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::messages::SessionMessage;
use super::state::SessionActorState;
use crate::adapter::Subscriber;
use crate::bootstrap::BootstrapClient;
use crate::config;
use crate::upstream::UpstreamPoller;

/// Owns the continuation token, the adaptive polling loop, the dedup and
/// time-barrier filters, and the per-adapter sinks for one video (§4.5).
///
/// The mailbox serializes `Init`, `Tick`, `Attach`, `Detach`, and
/// `Keepalive` — this ordering is the session-wide lock required by §5
/// (I1/I3). Scheduling uses `ActorRef::send_after` rather than a
/// long-lived loop, so at most one tick is ever outstanding (§4.5
/// "Scheduling").
pub struct SessionActor;

pub struct SessionActorArgs {
    pub video_id: String,
    pub poller: Arc<dyn UpstreamPoller>,
    pub bootstrap_client: Arc<dyn BootstrapClient>,
}

#[async_trait]
impl Actor for SessionActor {
    type Msg = SessionMessage;
    type State = SessionActorState;
    type Arguments = SessionActorArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        info!(video_id = %args.video_id, "session actor starting");
        Ok(SessionActorState::new(
            args.video_id,
            args.poller,
            args.bootstrap_client,
        ))
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SessionMessage::Init(bootstrap) => {
                state.init(bootstrap);
            }

            SessionMessage::Tick(generation) => {
                if generation != state.tick_generation {
                    return Ok(());
                }
                if let Some(delay) = state.tick().await {
                    schedule_tick(&myself, state, delay);
                }
            }

            SessionMessage::Keepalive(generation) => {
                if generation != state.keepalive_generation {
                    return Ok(());
                }
                if state.has_subscribers() {
                    state.broadcast_ping();
                    schedule_keepalive(&myself, state, config::keepalive_interval());
                }
            }

            SessionMessage::Attach {
                adapter_name,
                sender,
                reply,
            } => {
                let subscriber_id = state.next_subscriber_id;
                state.next_subscriber_id += 1;

                let (had_subscribers, _was_drained, resolved_name) = state.attach(
                    &adapter_name,
                    Subscriber {
                        id: subscriber_id,
                        sender,
                    },
                );
                let _ = reply.send((subscriber_id, resolved_name));

                if !had_subscribers {
                    schedule_tick(&myself, state, config::initial_attach_delay());
                    schedule_keepalive(&myself, state, config::keepalive_interval());
                }
            }

            SessionMessage::Detach {
                adapter_name,
                subscriber_id,
            } => {
                let now_empty = state.detach(&adapter_name, subscriber_id);
                if now_empty {
                    // Bumping both generations turns any pending Tick/Keepalive
                    // into a no-op when it fires, which is how a deadline gets
                    // "cleared" without a cancellation handle (§4.5 I3).
                    state.tick_generation = state.tick_generation.wrapping_add(1);
                    state.keepalive_generation = state.keepalive_generation.wrapping_add(1);
                }
            }

            SessionMessage::Snapshot(reply) => {
                let _ = reply.send(state.snapshot());
            }
        }

        Ok(())
    }
}

fn schedule_tick(myself: &ActorRef<SessionMessage>, state: &mut SessionActorState, delay: Duration) {
    state.tick_generation = state.tick_generation.wrapping_add(1);
    let generation = state.tick_generation;
    myself.send_after(delay, move || SessionMessage::Tick(generation));
}

fn schedule_keepalive(
    myself: &ActorRef<SessionMessage>,
    state: &mut SessionActorState,
    delay: Duration,
) {
    state.keepalive_generation = state.keepalive_generation.wrapping_add(1);
    let generation = state.keepalive_generation;
    myself.send_after(delay, move || SessionMessage::Keepalive(generation));
}
