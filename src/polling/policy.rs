//! Pure tick decisions for the two poll timers.

use chrono::{DateTime, Utc};

use crate::store::ActivityMarker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Background timer, armed while sync runs.
    Slow,
    /// Foreground timer, armed only while the surface is visible.
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// Nothing new.
    Idle,
    FullReload,
    IncrementalReload,
    /// New data while hidden: count it, do not pull it.
    MarkPending,
    /// Our own write: move the cursor, skip the reload.
    AdvanceOnly,
}

pub fn is_newer(marker: &ActivityMarker, cursor: Option<DateTime<Utc>>) -> bool {
    cursor.map_or(true, |c| marker.at > c)
}

pub fn decide_slow(
    marker: Option<&ActivityMarker>,
    cursor: Option<DateTime<Utc>>,
    visible: bool,
) -> PollDecision {
    match marker {
        Some(m) if is_newer(m, cursor) => {
            if visible {
                PollDecision::FullReload
            } else {
                PollDecision::MarkPending
            }
        }
        _ => PollDecision::Idle,
    }
}

pub fn decide_fast(
    marker: Option<&ActivityMarker>,
    cursor: Option<DateTime<Utc>>,
    actor_id: &str,
) -> PollDecision {
    match marker {
        Some(m) if is_newer(m, cursor) => {
            if m.author == actor_id {
                PollDecision::AdvanceOnly
            } else {
                PollDecision::IncrementalReload
            }
        }
        _ => PollDecision::Idle,
    }
}
