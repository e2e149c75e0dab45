use std::sync::{Arc, Mutex, PoisonError};

use crate::records::{
    merge, merge_scalar, remove_by_id, upsert, EntityKind, Identified, Record, SavingsBalance,
    SavingsHistoryEntry, Transaction, UpsertOutcome,
};

/// In-memory working set for the signed-in owner.
///
/// Only the reconciler and the change dispatcher mutate it, and only through
/// the merge rules in [`crate::records::merge`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkingSet {
    pub transactions: Vec<Transaction>,
    pub savings_balance: Option<SavingsBalance>,
    pub savings_history: Vec<SavingsHistoryEntry>,
}

impl WorkingSet {
    pub fn merge_transactions(&mut self, incoming: &[Transaction]) {
        self.transactions = merge(&self.transactions, incoming);
    }

    /// Several balance rows may come back; the most recently stamped one wins.
    pub fn merge_savings_balance(&mut self, incoming: Vec<SavingsBalance>) {
        let newest = incoming
            .into_iter()
            .reduce(|a, b| if b.created_at > a.created_at { b } else { a });
        self.savings_balance = merge_scalar(self.savings_balance.take(), newest);
    }

    pub fn merge_savings_history(&mut self, incoming: &[SavingsHistoryEntry]) {
        self.savings_history = merge(&self.savings_history, incoming);
    }

    /// Applies a single inserted or updated record.
    pub fn upsert(&mut self, record: Record) -> UpsertOutcome {
        match record {
            Record::Transaction(r) => upsert(&mut self.transactions, r),
            Record::SavingsHistoryEntry(r) => upsert(&mut self.savings_history, r),
            Record::SavingsBalance(r) => {
                let replaced = self.savings_balance.is_some();
                self.savings_balance = Some(r);
                if replaced {
                    UpsertOutcome::Replaced
                } else {
                    UpsertOutcome::Inserted
                }
            }
        }
    }

    pub fn remove(&mut self, kind: EntityKind, id: &str) -> bool {
        match kind {
            EntityKind::Transaction => remove_by_id(&mut self.transactions, id),
            EntityKind::SavingsHistoryEntry => remove_by_id(&mut self.savings_history, id),
            EntityKind::SavingsBalance => {
                if self.savings_balance.as_ref().map(|b| b.id()) == Some(id) {
                    self.savings_balance = None;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn get(&self, kind: EntityKind, id: &str) -> Option<Record> {
        match kind {
            EntityKind::Transaction => self
                .transactions
                .iter()
                .find(|r| r.id == id)
                .cloned()
                .map(Record::from),
            EntityKind::SavingsHistoryEntry => self
                .savings_history
                .iter()
                .find(|r| r.id == id)
                .cloned()
                .map(Record::from),
            EntityKind::SavingsBalance => self
                .savings_balance
                .as_ref()
                .filter(|b| b.id == id)
                .cloned()
                .map(Record::from),
        }
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Transaction => self.transactions.len(),
            EntityKind::SavingsHistoryEntry => self.savings_history.len(),
            EntityKind::SavingsBalance => usize::from(self.savings_balance.is_some()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
            && self.savings_balance.is_none()
            && self.savings_history.is_empty()
    }

    pub fn clear(&mut self) {
        *self = WorkingSet::default();
    }

    /// Savings implied by the history ledger.
    pub fn derived_savings(&self) -> f64 {
        self.savings_history.iter().map(|e| e.signed_amount()).sum()
    }

    /// Figure shown on the savings display: the stored balance if there is
    /// one, otherwise the derived one.
    pub fn savings_display(&self) -> f64 {
        self.savings_balance
            .as_ref()
            .map(|b| b.balance)
            .unwrap_or_else(|| self.derived_savings())
    }

    /// Income minus expenses over all loaded transactions.
    pub fn net_flow(&self) -> f64 {
        self.transactions.iter().map(|t| t.signed_amount()).sum()
    }
}

/// Shared handle to the working set.
///
/// The lock is never held across an await; callers compute outside and swap
/// in, so a failed operation leaves the previous state untouched.
#[derive(Debug, Clone, Default)]
pub struct StateHandle {
    inner: Arc<Mutex<WorkingSet>>,
}

impl StateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<R>(&self, f: impl FnOnce(&WorkingSet) -> R) -> R {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut WorkingSet) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn snapshot(&self) -> WorkingSet {
        self.read(WorkingSet::clone)
    }

    pub fn clear(&self) {
        self.update(WorkingSet::clear)
    }
}
