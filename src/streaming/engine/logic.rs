use crate::records::normalize::{row_id, row_owner};
use crate::records::{to_internal, EntityKind, Identified};
use crate::state::surfaces_for;
use crate::streaming::channel::ChannelSpec;
use crate::streaming::engine::state::{EngineState, RefreshState};
use crate::streaming::engine::types::{ChannelState, EngineCommand};
use crate::streaming::types::{ChangeNotification, ChangeOp};

/// Lost channels reopened per cycle before the kind is left to polling.
pub const MAX_RECONNECTS: u32 = 3;

pub fn on_initialize(state: &mut EngineState, owner_id: String) -> Vec<EngineCommand> {
    log::info!("[ENGINE] initialize for {}", owner_id);

    // tear down first so a re-init never leaves a second channel behind
    let mut cmds = on_cleanup(state);

    for kind in EntityKind::ALL {
        let slot = state.slot_mut(kind);
        slot.state = ChannelState::Subscribing;
        cmds.push(EngineCommand::OpenChannel(ChannelSpec::new(kind, owner_id.clone())));
    }
    state.owner_id = Some(owner_id);

    cmds
}

pub fn on_subscribe_confirmed(state: &mut EngineState, kind: EntityKind) -> Vec<EngineCommand> {
    let slot = state.slot_mut(kind);
    match slot.state {
        ChannelState::Subscribing | ChannelState::Reconnecting => {
            slot.state = ChannelState::Active;
            slot.failures = 0;
            log::debug!("[ENGINE] {} channel active", kind);
            Vec::new()
        }
        other => {
            // confirmation raced a cleanup or a degrade
            log::debug!("[ENGINE] stale confirmation for {} in {:?}, closing", kind, other);
            vec![EngineCommand::CloseChannel(kind)]
        }
    }
}

pub fn on_subscribe_failed(
    state: &mut EngineState,
    kind: EntityKind,
    session_invalid: bool,
) -> Vec<EngineCommand> {
    let refresh = state.refresh;
    let slot = state.slot_mut(kind);
    if !matches!(slot.state, ChannelState::Subscribing | ChannelState::Reconnecting) {
        return Vec::new();
    }
    slot.failures += 1;
    log::warn!(
        "[ENGINE] {} subscribe failed (attempt {}, session invalid: {})",
        kind,
        slot.failures,
        session_invalid
    );

    if slot.failures > 1 {
        return degrade(state, kind);
    }

    match refresh {
        RefreshState::NotTried => {
            state.refresh = RefreshState::InFlight;
            state.awaiting_refresh.insert(kind);
            vec![EngineCommand::RefreshSession]
        }
        RefreshState::InFlight => {
            state.awaiting_refresh.insert(kind);
            Vec::new()
        }
        // the credential was already renewed this cycle; one plain retry
        RefreshState::Succeeded => reopen(state, kind),
        RefreshState::Failed => degrade(state, kind),
    }
}

pub fn on_session_refreshed(state: &mut EngineState) -> Vec<EngineCommand> {
    state.refresh = RefreshState::Succeeded;
    let waiting = std::mem::take(&mut state.awaiting_refresh);
    log::info!("[ENGINE] session refreshed, retrying {} channel(s)", waiting.len());

    waiting
        .into_iter()
        .flat_map(|kind| reopen(state, kind))
        .collect()
}

pub fn on_session_refresh_failed(state: &mut EngineState) -> Vec<EngineCommand> {
    state.refresh = RefreshState::Failed;
    let waiting = std::mem::take(&mut state.awaiting_refresh);
    log::warn!("[ENGINE] session refresh failed");

    waiting
        .into_iter()
        .flat_map(|kind| degrade(state, kind))
        .collect()
}

pub fn on_channel_lost(state: &mut EngineState, kind: EntityKind, reason: &str) -> Vec<EngineCommand> {
    let slot = state.slot_mut(kind);
    if slot.state != ChannelState::Active {
        return Vec::new();
    }
    slot.reconnects += 1;
    log::warn!(
        "[ENGINE] {} channel lost ({}), reconnect {}/{}",
        kind,
        reason,
        slot.reconnects,
        MAX_RECONNECTS
    );

    if slot.reconnects > MAX_RECONNECTS {
        return degrade(state, kind);
    }

    slot.state = ChannelState::Reconnecting;
    let mut cmds = vec![EngineCommand::CloseChannel(kind)];
    cmds.extend(open_cmd(state, kind));
    cmds
}

pub fn on_change(state: &mut EngineState, change: ChangeNotification) -> Vec<EngineCommand> {
    let Some(owner) = state.owner_id.as_deref() else {
        log::debug!("[ENGINE] change before initialize, dropped");
        return Vec::new();
    };
    let kind = change.kind;

    // server-side filtering should make this unreachable
    if let Some(row_owner) = row_owner(&change.payload) {
        if row_owner != owner {
            log::warn!("[ENGINE] {} change for foreign owner dropped", kind);
            return Vec::new();
        }
    }

    let apply = match change.op {
        ChangeOp::Insert | ChangeOp::Update => match to_internal(kind, &change.payload) {
            Ok(mut record) => {
                if record.owner_id().is_empty() {
                    record.set_owner(owner);
                }
                log::debug!("[ENGINE] {:?} {} {}", change.op, kind, record.id());
                EngineCommand::Upsert(record)
            }
            Err(e) => {
                log::warn!("[ENGINE] ignoring {:?} on {}: {}", change.op, kind, e);
                return Vec::new();
            }
        },
        ChangeOp::Delete => match row_id(&change.payload) {
            Some(id) => {
                log::debug!("[ENGINE] delete {} {}", kind, id);
                EngineCommand::Remove { kind, id }
            }
            None => {
                log::warn!("[ENGINE] delete on {} without id ignored", kind);
                return Vec::new();
            }
        },
    };

    vec![apply, EngineCommand::RefreshSurfaces(surfaces_for(kind).to_vec())]
}

pub fn on_cleanup(state: &mut EngineState) -> Vec<EngineCommand> {
    let mut cmds = Vec::new();
    for (kind, slot) in state.channels.iter_mut() {
        if slot.state != ChannelState::Unsubscribed {
            cmds.push(EngineCommand::CloseChannel(*kind));
        }
        *slot = Default::default();
    }
    if !cmds.is_empty() {
        log::info!("[ENGINE] cleanup closing {} channel(s)", cmds.len());
    }
    state.owner_id = None;
    state.refresh = RefreshState::NotTried;
    state.awaiting_refresh.clear();
    cmds
}

fn open_cmd(state: &EngineState, kind: EntityKind) -> Option<EngineCommand> {
    state
        .owner_id
        .as_ref()
        .map(|owner| EngineCommand::OpenChannel(ChannelSpec::new(kind, owner.clone())))
}

fn reopen(state: &mut EngineState, kind: EntityKind) -> Vec<EngineCommand> {
    let slot = state.slot_mut(kind);
    if slot.state == ChannelState::Unsubscribed {
        return Vec::new();
    }
    slot.state = ChannelState::Subscribing;
    open_cmd(state, kind).into_iter().collect()
}

fn degrade(state: &mut EngineState, kind: EntityKind) -> Vec<EngineCommand> {
    let slot = state.slot_mut(kind);
    let was_open = slot.state == ChannelState::Active;
    slot.state = ChannelState::Unsubscribed;
    slot.degraded = true;
    state.awaiting_refresh.remove(&kind);
    log::info!("[ENGINE] {} falls back to polling", kind);

    let mut cmds = Vec::new();
    if was_open {
        cmds.push(EngineCommand::CloseChannel(kind));
    }
    cmds.push(EngineCommand::EnterDegradedMode(kind));
    cmds
}
