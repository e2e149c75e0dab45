use std::collections::{BTreeMap, BTreeSet};

use crate::records::EntityKind;

use super::types::ChannelState;

/// Progress of the single session refresh allowed per initialize cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    NotTried,
    InFlight,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ChannelSlot {
    pub state: ChannelState,
    /// Consecutive subscribe failures since the last confirmation.
    pub failures: u32,
    /// Reconnects after a lost channel in this cycle.
    pub reconnects: u32,
    pub degraded: bool,
}

impl Default for ChannelSlot {
    fn default() -> Self {
        Self {
            state: ChannelState::Unsubscribed,
            failures: 0,
            reconnects: 0,
            degraded: false,
        }
    }
}

#[derive(Debug)]
pub struct EngineState {
    pub owner_id: Option<String>,
    pub channels: BTreeMap<EntityKind, ChannelSlot>,
    pub refresh: RefreshState,
    /// Kinds waiting for the in-flight refresh before resubscribing.
    pub awaiting_refresh: BTreeSet<EntityKind>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            owner_id: None,
            channels: EntityKind::ALL
                .into_iter()
                .map(|k| (k, ChannelSlot::default()))
                .collect(),
            refresh: RefreshState::NotTried,
            awaiting_refresh: BTreeSet::new(),
        }
    }
}

impl EngineState {
    pub fn slot_mut(&mut self, kind: EntityKind) -> &mut ChannelSlot {
        self.channels.entry(kind).or_default()
    }
}
