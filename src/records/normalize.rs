//! Field mapping between remote rows and internal records.
//!
//! Remote rows use snake_case (`user_id`, `cost_type`); internal records use
//! camelCase when serialized. Both backends exchange rows in the remote shape,
//! so this is the only place the two conventions meet.
//!
//! Mapping is total: a missing field is defaulted and logged, never fatal.
//! The one exception is `id`, without which a row cannot take part in a merge.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Number, Value};

use crate::error::{Result, SyncError};

use super::model::{EntityKind, Record, SavingsBalance, SavingsHistoryEntry, Transaction};

/// A row as stored by either backend.
pub type RemoteRow = Map<String, Value>;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub const TRANSACTION_FIELDS: &[&str] = &[
    "id",
    "user_id",
    "type",
    "amount",
    "category",
    "date",
    "description",
    "cost_type",
];

pub const SAVINGS_FIELDS: &[&str] = &["id", "user_id", "balance"];

pub const SAVINGS_HISTORY_FIELDS: &[&str] =
    &["id", "user_id", "type", "amount", "date", "description"];

/// Writable fields of the remote schema for a kind.
pub fn remote_fields(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Transaction => TRANSACTION_FIELDS,
        EntityKind::SavingsBalance => SAVINGS_FIELDS,
        EntityKind::SavingsHistoryEntry => SAVINGS_HISTORY_FIELDS,
    }
}

/// Converts a remote row into an internal record.
pub fn to_internal(kind: EntityKind, row: &RemoteRow) -> Result<Record> {
    let id = match lookup(row, &["id"]) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(SyncError::ShapeMismatch { kind, field: "id" }),
    };

    let record = match kind {
        EntityKind::Transaction => Record::Transaction(Transaction {
            id,
            user_id: text(row, kind, &["user_id", "userId"]),
            tx_type: text(row, kind, &["type"]),
            amount: number(row, kind, &["amount"]),
            category: text(row, kind, &["category"]),
            date: date(row, kind),
            description: text(row, kind, &["description"]),
            cost_type: text(row, kind, &["cost_type", "costType"]),
            created_at: timestamp(row),
        }),
        EntityKind::SavingsBalance => Record::SavingsBalance(SavingsBalance {
            id,
            user_id: text(row, kind, &["user_id", "userId"]),
            balance: number(row, kind, &["balance"]),
            created_at: timestamp(row),
        }),
        EntityKind::SavingsHistoryEntry => Record::SavingsHistoryEntry(SavingsHistoryEntry {
            id,
            user_id: text(row, kind, &["user_id", "userId"]),
            entry_type: text(row, kind, &["type"]),
            amount: number(row, kind, &["amount"]),
            date: date(row, kind),
            description: text(row, kind, &["description"]),
            created_at: timestamp(row),
        }),
    };

    Ok(record)
}

/// Converts an internal record into a remote row holding every writable field.
///
/// `created_at` is stamped by the backend and is not written back.
pub fn to_remote(record: &Record) -> RemoteRow {
    let mut row = Map::new();
    match record {
        Record::Transaction(r) => {
            row.insert("id".into(), Value::String(r.id.clone()));
            row.insert("user_id".into(), Value::String(r.user_id.clone()));
            row.insert("type".into(), Value::String(r.tx_type.clone()));
            row.insert("amount".into(), amount_value(r.amount));
            row.insert("category".into(), Value::String(r.category.clone()));
            row.insert("date".into(), date_value(r.date));
            row.insert("description".into(), Value::String(r.description.clone()));
            row.insert("cost_type".into(), Value::String(r.cost_type.clone()));
        }
        Record::SavingsBalance(r) => {
            row.insert("id".into(), Value::String(r.id.clone()));
            row.insert("user_id".into(), Value::String(r.user_id.clone()));
            row.insert("balance".into(), amount_value(r.balance));
        }
        Record::SavingsHistoryEntry(r) => {
            row.insert("id".into(), Value::String(r.id.clone()));
            row.insert("user_id".into(), Value::String(r.user_id.clone()));
            row.insert("type".into(), Value::String(r.entry_type.clone()));
            row.insert("amount".into(), amount_value(r.amount));
            row.insert("date".into(), date_value(r.date));
            row.insert("description".into(), Value::String(r.description.clone()));
        }
    }
    row
}

/// Identifier of a row, if it has a usable one.
pub fn row_id(row: &RemoteRow) -> Option<String> {
    match row.get("id") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Column naming the client session that last wrote a row.
pub const AUTHOR_FIELD: &str = "created_by";

/// Marks `row` as written by `actor_id`.
pub fn stamp_author(row: &mut RemoteRow, actor_id: &str) {
    row.insert(AUTHOR_FIELD.into(), Value::String(actor_id.to_string()));
}

pub fn row_author(row: &RemoteRow) -> Option<&str> {
    row.get(AUTHOR_FIELD).and_then(Value::as_str)
}

/// Owner of a row (`user_id`, falling back to legacy `userId`).
pub fn row_owner(row: &RemoteRow) -> Option<&str> {
    lookup(row, &["user_id", "userId"]).and_then(Value::as_str)
}

// ================================
// Field readers
// ================================

fn lookup<'a>(row: &'a RemoteRow, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|n| row.get(*n))
        .find(|v| !v.is_null())
}

fn text(row: &RemoteRow, kind: EntityKind, names: &[&'static str]) -> String {
    match lookup(row, names) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => {
            log::debug!("[STORE] {} row missing `{}`, defaulting to \"\"", kind, names[0]);
            String::new()
        }
    }
}

fn number(row: &RemoteRow, kind: EntityKind, names: &[&'static str]) -> f64 {
    let parsed = match lookup(row, names) {
        Some(Value::Number(n)) => n.as_f64(),
        // numeric columns sometimes arrive as strings
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.unwrap_or_else(|| {
        log::warn!("[STORE] {} row has no usable `{}`, defaulting to 0", kind, names[0]);
        0.0
    })
}

fn date(row: &RemoteRow, kind: EntityKind) -> Option<NaiveDate> {
    let raw = lookup(row, &["date"])?.as_str()?;
    let day = raw.get(..10).unwrap_or(raw);
    match NaiveDate::parse_from_str(day, DATE_FORMAT) {
        Ok(d) => Some(d),
        Err(e) => {
            log::warn!("[STORE] {} row has unparsable date {:?}: {}", kind, raw, e);
            None
        }
    }
}

fn timestamp(row: &RemoteRow) -> Option<DateTime<Utc>> {
    let raw = lookup(row, &["created_at", "createdAt"])?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ================================
// Field writers
// ================================

/// Integral amounts are written as integers, matching how a numeric column
/// comes back over REST. Round trips are exact numerically: `10.0` in a row
/// is written back as `10`.
fn amount_value(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() < 9.0e15 {
        Value::from(v as i64)
    } else {
        Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn date_value(d: Option<NaiveDate>) -> Value {
    match d {
        Some(d) => Value::String(d.format(DATE_FORMAT).to_string()),
        None => Value::Null,
    }
}
