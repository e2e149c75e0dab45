use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::records::EntityKind;

use super::working_set::WorkingSet;

/// Display surfaces owned by the (external) UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UiSurface {
    Dashboard,
    HistoryList,
    SavingsDisplay,
}

impl UiSurface {
    pub const ALL: [UiSurface; 3] = [
        UiSurface::Dashboard,
        UiSurface::HistoryList,
        UiSurface::SavingsDisplay,
    ];
}

/// Surfaces that may show data of the given kind.
///
/// Savings are partly derived from transactions, so a transaction change
/// refreshes the savings display too.
pub fn surfaces_for(kind: EntityKind) -> &'static [UiSurface] {
    match kind {
        EntityKind::Transaction => &UiSurface::ALL,
        EntityKind::SavingsBalance => &[UiSurface::Dashboard, UiSurface::SavingsDisplay],
        EntityKind::SavingsHistoryEntry => &[UiSurface::SavingsDisplay],
    }
}

/// User-visible status messages.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncNotice {
    /// Dismissable failure; `retryable` asks the UI to offer a retry.
    TransientFailure { message: String, retryable: bool },
    /// Push channel for a kind gave up; polling carries on alone.
    Degraded { kind: EntityKind },
    /// New data arrived while the surface was hidden.
    PendingUpdates { count: u32 },
}

pub type RefreshCallback = Arc<dyn Fn(&WorkingSet) + Send + Sync>;
pub type NoticeCallback = Arc<dyn Fn(&SyncNotice) + Send + Sync>;

#[derive(Default)]
struct Registry {
    refresh: HashMap<UiSurface, Vec<RefreshCallback>>,
    notices: Vec<NoticeCallback>,
}

/// Observer list for UI refresh callbacks and notices.
///
/// A surface with no registered callback is simply skipped.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, surface: UiSurface, f: F)
    where
        F: Fn(&WorkingSet) + Send + Sync + 'static,
    {
        let mut reg = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        reg.refresh.entry(surface).or_default().push(Arc::new(f));
    }

    pub fn on_notice<F>(&self, f: F)
    where
        F: Fn(&SyncNotice) + Send + Sync + 'static,
    {
        let mut reg = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        reg.notices.push(Arc::new(f));
    }

    pub fn is_registered(&self, surface: UiSurface) -> bool {
        let reg = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        reg.refresh.get(&surface).is_some_and(|v| !v.is_empty())
    }

    /// Calls every callback registered for `surfaces`. Returns how many ran.
    pub fn notify(&self, surfaces: &[UiSurface], state: &WorkingSet) -> usize {
        // callbacks run outside the registry lock so they may register more
        let callbacks: Vec<RefreshCallback> = {
            let reg = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            surfaces
                .iter()
                .filter_map(|s| reg.refresh.get(s))
                .flatten()
                .cloned()
                .collect()
        };

        for cb in &callbacks {
            cb(state);
        }
        callbacks.len()
    }

    pub fn notice(&self, notice: SyncNotice) {
        let callbacks: Vec<NoticeCallback> = {
            let reg = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            reg.notices.clone()
        };
        log::debug!("[DISPATCH] notice: {:?}", notice);
        for cb in &callbacks {
            cb(&notice);
        }
    }
}
