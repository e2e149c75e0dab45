//! Change dispatch decision engine.
//!
//! This module is the **Functional Core** of push-based sync. It is a pure
//! state machine:
//! - **Input**: `EngineEvent` (subscription outcomes, session refreshes,
//!   change notifications).
//! - **Output**: `Vec<EngineCommand>` (side effects executed by the
//!   dispatcher shell).
//!
//! # Guarantees
//! * **No I/O**: never opens sockets, never touches the working set.
//! * **No async**: every handler is synchronous and cheap.
//! * **Deterministic**: the same event sequence yields the same commands.
//!
//! Per kind, a channel moves `Unsubscribed -> Subscribing -> Active`, and on
//! a lost connection `Active -> Reconnecting -> Active | Unsubscribed`. A
//! failed subscribe triggers one shared session refresh; a second failure
//! hands that kind to the poller (degraded mode).

mod logic;
pub mod state;
pub mod types;


pub use logic::MAX_RECONNECTS;
pub use types::{ChannelState, EngineCommand, EngineEvent};

use crate::records::EntityKind;

use state::EngineState;

#[derive(Debug, Default)]
pub struct DispatchEngine {
    state: EngineState,
}

impl DispatchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes an event and returns the commands the shell must execute.
    pub fn handle_event(&mut self, event: EngineEvent) -> Vec<EngineCommand> {
        match event {
            EngineEvent::Initialize { owner_id } => logic::on_initialize(&mut self.state, owner_id),
            EngineEvent::SubscribeConfirmed(kind) => {
                logic::on_subscribe_confirmed(&mut self.state, kind)
            }
            EngineEvent::SubscribeFailed {
                kind,
                session_invalid,
            } => logic::on_subscribe_failed(&mut self.state, kind, session_invalid),
            EngineEvent::SessionRefreshed => logic::on_session_refreshed(&mut self.state),
            EngineEvent::SessionRefreshFailed => logic::on_session_refresh_failed(&mut self.state),
            EngineEvent::ChannelLost { kind, reason } => {
                logic::on_channel_lost(&mut self.state, kind, &reason)
            }
            EngineEvent::Change(change) => logic::on_change(&mut self.state, change),
            EngineEvent::Cleanup => logic::on_cleanup(&mut self.state),
        }
    }

    pub fn channel_state(&self, kind: EntityKind) -> ChannelState {
        self.state
            .channels
            .get(&kind)
            .map_or(ChannelState::Unsubscribed, |s| s.state)
    }

    pub fn is_degraded(&self, kind: EntityKind) -> bool {
        self.state.channels.get(&kind).is_some_and(|s| s.degraded)
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.state.owner_id.as_deref()
    }
}
