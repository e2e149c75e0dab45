use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Which collection a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Transaction,
    SavingsBalance,
    SavingsHistoryEntry,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Transaction,
        EntityKind::SavingsBalance,
        EntityKind::SavingsHistoryEntry,
    ];

    /// Table (hosted) or collection (local) name.
    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Transaction => "transactions",
            EntityKind::SavingsBalance => "savings",
            EntityKind::SavingsHistoryEntry => "savings_history",
        }
    }

    pub fn from_table(table: &str) -> Option<Self> {
        EntityKind::ALL.into_iter().find(|k| k.table() == table)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Anything stored in a collection keyed by a string identifier.
pub trait Identified {
    fn id(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    /// "income" or "expense".
    #[serde(rename = "type")]
    pub tx_type: String,
    pub amount: f64,
    pub category: String,
    pub date: Option<NaiveDate>,
    pub description: String,
    pub cost_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Signed contribution to a balance: income adds, everything else subtracts.
    pub fn signed_amount(&self) -> f64 {
        if self.tx_type.eq_ignore_ascii_case("income") {
            self.amount
        } else {
            -self.amount
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsBalance {
    pub id: String,
    pub user_id: String,
    pub balance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsHistoryEntry {
    pub id: String,
    pub user_id: String,
    /// "deposit" or "withdraw".
    #[serde(rename = "type")]
    pub entry_type: String,
    pub amount: f64,
    pub date: Option<NaiveDate>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl SavingsHistoryEntry {
    pub fn signed_amount(&self) -> f64 {
        if self.entry_type.eq_ignore_ascii_case("withdraw")
            || self.entry_type.eq_ignore_ascii_case("withdrawal")
        {
            -self.amount
        } else {
            self.amount
        }
    }
}

/// One record of any kind, in the internal (camelCase) shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Record {
    Transaction(Transaction),
    SavingsBalance(SavingsBalance),
    SavingsHistoryEntry(SavingsHistoryEntry),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Transaction(_) => EntityKind::Transaction,
            Record::SavingsBalance(_) => EntityKind::SavingsBalance,
            Record::SavingsHistoryEntry(_) => EntityKind::SavingsHistoryEntry,
        }
    }

    pub fn owner_id(&self) -> &str {
        match self {
            Record::Transaction(r) => &r.user_id,
            Record::SavingsBalance(r) => &r.user_id,
            Record::SavingsHistoryEntry(r) => &r.user_id,
        }
    }

    pub fn set_id(&mut self, id: String) {
        match self {
            Record::Transaction(r) => r.id = id,
            Record::SavingsBalance(r) => r.id = id,
            Record::SavingsHistoryEntry(r) => r.id = id,
        }
    }

    pub fn set_owner(&mut self, owner_id: &str) {
        let owner = owner_id.to_string();
        match self {
            Record::Transaction(r) => r.user_id = owner,
            Record::SavingsBalance(r) => r.user_id = owner,
            Record::SavingsHistoryEntry(r) => r.user_id = owner,
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Record::Transaction(r) => r.created_at,
            Record::SavingsBalance(r) => r.created_at,
            Record::SavingsHistoryEntry(r) => r.created_at,
        }
    }

    pub fn into_transaction(self) -> Option<Transaction> {
        match self {
            Record::Transaction(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_savings_balance(self) -> Option<SavingsBalance> {
        match self {
            Record::SavingsBalance(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_savings_history(self) -> Option<SavingsHistoryEntry> {
        match self {
            Record::SavingsHistoryEntry(r) => Some(r),
            _ => None,
        }
    }
}

impl Identified for Transaction {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for SavingsBalance {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for SavingsHistoryEntry {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for Record {
    fn id(&self) -> &str {
        match self {
            Record::Transaction(r) => &r.id,
            Record::SavingsBalance(r) => &r.id,
            Record::SavingsHistoryEntry(r) => &r.id,
        }
    }
}

impl From<Transaction> for Record {
    fn from(r: Transaction) -> Self {
        Record::Transaction(r)
    }
}

impl From<SavingsBalance> for Record {
    fn from(r: SavingsBalance) -> Self {
        Record::SavingsBalance(r)
    }
}

impl From<SavingsHistoryEntry> for Record {
    fn from(r: SavingsHistoryEntry) -> Self {
        Record::SavingsHistoryEntry(r)
    }
}
