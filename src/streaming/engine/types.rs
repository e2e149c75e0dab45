use crate::records::{EntityKind, Record};
use crate::state::UiSurface;
use crate::streaming::channel::ChannelSpec;
use crate::streaming::types::ChangeNotification;

/// Lifecycle of one per-kind push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unsubscribed,
    Subscribing,
    Active,
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Sign-in (or re-init) for an owner.
    Initialize { owner_id: String },
    SubscribeConfirmed(EntityKind),
    SubscribeFailed {
        kind: EntityKind,
        session_invalid: bool,
    },
    SessionRefreshed,
    SessionRefreshFailed,
    /// An open channel broke.
    ChannelLost { kind: EntityKind, reason: String },
    Change(ChangeNotification),
    Cleanup,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    OpenChannel(ChannelSpec),
    CloseChannel(EntityKind),
    RefreshSession,
    Upsert(Record),
    Remove { kind: EntityKind, id: String },
    RefreshSurfaces(Vec<UiSurface>),
    EnterDegradedMode(EntityKind),
}
