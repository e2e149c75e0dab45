//! Full and per-kind reconciliation of the working set.
//!
//! All three sub-fetches always run. Whatever loaded is merged in a single
//! state update, so a failed fetch leaves its collection exactly as it was.
//! Only a missing identity halts the refresh; a failed transactions fetch
//! still merges the savings data but reports failure.

use std::sync::Arc;

use crate::auth::AuthProvider;
use crate::error::{Result, SyncError};
use crate::records::{EntityKind, Record};
use crate::state::{surfaces_for, ObserverRegistry, StateHandle, SyncNotice, UiSurface};
use crate::store::RecordStore;

/// Outcome of a successful [`Reconciler::refresh`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub transactions: usize,
    pub savings_balance: bool,
    pub savings_history: usize,
    /// Sub-fetches that failed and were skipped.
    pub skipped: Vec<EntityKind>,
}

#[derive(Clone)]
pub struct Reconciler {
    store: RecordStore,
    auth: Arc<dyn AuthProvider>,
    state: StateHandle,
    observers: ObserverRegistry,
}

impl Reconciler {
    pub fn new(
        store: RecordStore,
        auth: Arc<dyn AuthProvider>,
        state: StateHandle,
        observers: ObserverRegistry,
    ) -> Self {
        Self {
            store,
            auth,
            state,
            observers,
        }
    }

    /// Pulls every collection for `owner_id` and merges it into the working set.
    pub async fn refresh(&self, owner_id: &str) -> Result<RefreshReport> {
        self.require_identity(owner_id).await?;
        log::debug!(
            "[RECONCILE] refresh for {} from {} backend",
            owner_id,
            self.store.active_backend()
        );

        let transactions = self.fetch(EntityKind::Transaction, owner_id).await;
        let balances = self.fetch(EntityKind::SavingsBalance, owner_id).await;
        let history = self.fetch(EntityKind::SavingsHistoryEntry, owner_id).await;

        for fetched in [&transactions, &balances, &history] {
            if let Err(SyncError::NotAuthenticated) = fetched {
                log::error!("[RECONCILE] session rejected mid-refresh, nothing merged");
                return Err(SyncError::NotAuthenticated);
            }
        }

        let mut report = RefreshReport::default();
        let (transactions, tx_error) = match transactions {
            Ok(records) => (Some(typed(records, Record::into_transaction)), None),
            Err(e) => {
                log::error!("[RECONCILE] transactions fetch failed: {}", e);
                (None, Some(e))
            }
        };
        let balances = skip_on_error(
            EntityKind::SavingsBalance,
            balances,
            &mut report,
            Record::into_savings_balance,
        );
        let history = skip_on_error(
            EntityKind::SavingsHistoryEntry,
            history,
            &mut report,
            Record::into_savings_history,
        );

        self.state.update(|ws| {
            if let Some(txs) = &transactions {
                ws.merge_transactions(txs);
            }
            if let Some(rows) = balances {
                ws.merge_savings_balance(rows);
            }
            if let Some(entries) = &history {
                ws.merge_savings_history(entries);
            }
            report.transactions = ws.transactions.len();
            report.savings_balance = ws.savings_balance.is_some();
            report.savings_history = ws.savings_history.len();
        });

        let snapshot = self.state.snapshot();
        let notified = self.observers.notify(&UiSurface::ALL, &snapshot);
        log::debug!("[RECONCILE] {} surface callbacks ran", notified);

        if let Some(e) = tx_error {
            self.observers.notice(SyncNotice::TransientFailure {
                message: e.to_string(),
                retryable: e.is_retryable(),
            });
            return Err(e);
        }

        log::info!(
            "[RECONCILE] {} transactions, {} history entries, balance {}",
            report.transactions,
            report.savings_history,
            if report.savings_balance { "present" } else { "absent" }
        );
        Ok(report)
    }

    /// Reloads a single collection and refreshes the surfaces that show it.
    pub async fn refresh_kind(&self, owner_id: &str, kind: EntityKind) -> Result<usize> {
        self.require_identity(owner_id).await?;
        let records = self.fetch(kind, owner_id).await?;

        let len = self.state.update(|ws| {
            match kind {
                EntityKind::Transaction => {
                    ws.merge_transactions(&typed(records, Record::into_transaction))
                }
                EntityKind::SavingsBalance => {
                    ws.merge_savings_balance(typed(records, Record::into_savings_balance))
                }
                EntityKind::SavingsHistoryEntry => {
                    ws.merge_savings_history(&typed(records, Record::into_savings_history))
                }
            }
            ws.len(kind)
        });

        let snapshot = self.state.snapshot();
        self.observers.notify(surfaces_for(kind), &snapshot);
        log::debug!("[RECONCILE] incremental {} reload, {} held", kind, len);
        Ok(len)
    }

    async fn require_identity(&self, owner_id: &str) -> Result<()> {
        match self.auth.current_user().await {
            Some(user) if user.id == owner_id => Ok(()),
            Some(user) => {
                log::error!("[RECONCILE] signed in as {}, refusing refresh for {}", user.id, owner_id);
                Err(SyncError::NotAuthenticated)
            }
            None => {
                log::error!("[RECONCILE] no signed-in user");
                Err(SyncError::NotAuthenticated)
            }
        }
    }

    async fn fetch(&self, kind: EntityKind, owner_id: &str) -> Result<Vec<Record>> {
        self.store.fetch_all(kind, owner_id).await
    }
}

fn skip_on_error<T>(
    kind: EntityKind,
    fetched: Result<Vec<Record>>,
    report: &mut RefreshReport,
    pick: fn(Record) -> Option<T>,
) -> Option<Vec<T>> {
    match fetched {
        Ok(records) => Some(typed(records, pick)),
        Err(e) => {
            log::warn!("[RECONCILE] continuing without {}: {}", kind, e);
            report.skipped.push(kind);
            None
        }
    }
}

fn typed<T>(records: Vec<Record>, pick: fn(Record) -> Option<T>) -> Vec<T> {
    records.into_iter().filter_map(pick).collect()
}
