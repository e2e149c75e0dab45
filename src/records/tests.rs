use serde_json::json;

use crate::error::SyncError;
use crate::records::normalize::{remote_fields, row_author, row_owner, stamp_author, AUTHOR_FIELD};
use crate::records::*;

// =========================================================================
// Helpers
// =========================================================================

fn tx(id: &str, amount: f64) -> Transaction {
    Transaction {
        id: id.to_string(),
        user_id: "u1".to_string(),
        tx_type: "expense".to_string(),
        amount,
        category: "food".to_string(),
        date: None,
        description: String::new(),
        cost_type: String::new(),
        created_at: None,
    }
}

fn ids(items: &[Transaction]) -> Vec<&str> {
    items.iter().map(|t| t.id.as_str()).collect()
}

fn row(v: serde_json::Value) -> RemoteRow {
    v.as_object().cloned().unwrap()
}

// =========================================================================
// Merge
// =========================================================================

#[test]
fn merge_is_idempotent() {
    let a = vec![tx("a", 1.0), tx("b", 2.0), tx("local", 3.0)];
    let b = vec![tx("b", 20.0), tx("c", 30.0), tx("a", 10.0)];

    let once = merge(&a, &b);
    let twice = merge(&once, &b);

    assert_eq!(once, twice);
}

#[test]
fn local_only_records_survive() {
    let existing = vec![tx("x", 7.0), tx("a", 1.0)];
    let incoming = vec![tx("a", 1.5)];

    let merged = merge(&existing, &incoming);

    let xs: Vec<_> = merged.iter().filter(|t| t.id == "x").collect();
    assert_eq!(xs.len(), 1);
    assert_eq!(xs[0], &existing[0]);
}

#[test]
fn incoming_wins_on_shared_id() {
    let existing = vec![tx("y", 1.0)];
    let incoming = vec![tx("y", 99.0)];

    let merged = merge(&existing, &incoming);

    assert_eq!(merged, vec![tx("y", 99.0)]);
}

#[test]
fn empty_fetch_never_shrinks() {
    let existing = vec![tx("a", 1.0), tx("b", 2.0)];
    assert_eq!(merge(&existing, &[]), existing);
}

#[test]
fn empty_existing_yields_deduped_incoming() {
    let incoming = vec![tx("a", 1.0), tx("b", 2.0), tx("a", 3.0)];

    let merged = merge(&[], &incoming);

    assert_eq!(ids(&merged), vec!["a", "b"]);
    assert_eq!(merged[0].amount, 3.0, "later duplicate in incoming wins");
}

#[test]
fn concurrent_insert_then_refresh_has_no_duplicates() {
    // event first, refresh second
    let mut state = vec![tx("a", 10.0)];
    upsert(&mut state, tx("b", 5.0));
    let state = merge(&state, &[tx("a", 10.0), tx("b", 5.0)]);
    assert_eq!(state.len(), 2);

    // refresh first, event second
    let mut other = merge(&[tx("a", 10.0)], &[tx("a", 10.0), tx("b", 5.0)]);
    assert_eq!(upsert(&mut other, tx("b", 5.0)), UpsertOutcome::Replaced);
    assert_eq!(other.len(), 2);

    let mut left = ids(&state);
    let mut right = ids(&other);
    left.sort();
    right.sort();
    assert_eq!(left, right);
}

#[test]
fn delete_then_stale_refresh_brings_record_back() {
    let mut state = vec![tx("a", 1.0), tx("b", 2.0)];
    assert!(remove_by_id(&mut state, "b"));
    assert_eq!(ids(&state), vec!["a"]);

    // lagging replica still reports "b"; incoming is authoritative
    let state = merge(&state, &[tx("a", 1.0), tx("b", 2.0)]);
    assert_eq!(ids(&state), vec!["a", "b"]);
}

#[test]
fn upsert_appends_when_missing() {
    let mut state = vec![tx("a", 1.0)];
    assert_eq!(upsert(&mut state, tx("c", 3.0)), UpsertOutcome::Inserted);
    assert_eq!(ids(&state), vec!["a", "c"]);
    assert!(!remove_by_id(&mut state, "zzz"));
}

#[test]
fn scalar_merge_keeps_existing_on_empty_fetch() {
    assert_eq!(merge_scalar(Some(1), None), Some(1));
    assert_eq!(merge_scalar(Some(1), Some(2)), Some(2));
    assert_eq!(merge_scalar::<i32>(None, None), None);
}

// =========================================================================
// Normalizer
// =========================================================================

#[test]
fn transaction_round_trip_preserves_remote_fields() {
    let remote = row(json!({
        "id": "t1",
        "user_id": "u1",
        "type": "expense",
        "amount": 12.5,
        "category": "groceries",
        "date": "2024-03-05",
        "description": "weekly shop",
        "cost_type": "variable",
        "created_at": "2024-03-05T10:00:00+00:00"
    }));

    let record = to_internal(EntityKind::Transaction, &remote).unwrap();
    let back = to_remote(&record);

    for field in remote_fields(EntityKind::Transaction) {
        assert_eq!(back.get(*field), remote.get(*field), "field {field}");
    }
    assert!(record.created_at().is_some());
}

#[test]
fn savings_and_history_round_trip() {
    let savings = row(json!({ "id": "s1", "user_id": "u1", "balance": 1500 }));
    let history = row(json!({
        "id": "h1",
        "user_id": "u1",
        "type": "withdraw",
        "amount": 40,
        "date": "2024-01-31",
        "description": "rent top-up"
    }));

    for (kind, remote) in [
        (EntityKind::SavingsBalance, savings),
        (EntityKind::SavingsHistoryEntry, history),
    ] {
        let back = to_remote(&to_internal(kind, &remote).unwrap());
        for field in remote_fields(kind) {
            assert_eq!(back.get(*field), remote.get(*field), "{kind} field {field}");
        }
    }
}

#[test]
fn integral_float_amounts_round_trip_numerically() {
    let remote = row(json!({
        "id": "t4", "user_id": "u1", "type": "expense", "amount": 10.0,
        "category": "", "date": null, "description": "", "cost_type": ""
    }));

    let back = to_remote(&to_internal(EntityKind::Transaction, &remote).unwrap());

    // written as an integer, equal as a number
    assert_eq!(back["amount"], json!(10));
    assert!(back["amount"].is_i64());
    assert_eq!(back["amount"].as_f64(), remote["amount"].as_f64());

    let mut fractional = remote.clone();
    fractional.insert("amount".into(), json!(10.25));
    let back = to_remote(&to_internal(EntityKind::Transaction, &fractional).unwrap());
    assert_eq!(back["amount"], json!(10.25));
}

#[test]
fn author_stamp_is_read_back() {
    let mut remote = row(json!({ "id": "t5", "user_id": "u1" }));
    assert_eq!(row_author(&remote), None);

    stamp_author(&mut remote, "session-a");
    assert_eq!(row_author(&remote), Some("session-a"));
    assert_eq!(remote[AUTHOR_FIELD], json!("session-a"));
}

#[test]
fn internal_shape_is_camel_case() {
    let remote = row(json!({
        "id": "t2", "user_id": "u9", "type": "income", "amount": 3,
        "category": "salary", "date": "2024-02-01", "description": "", "cost_type": "fixed"
    }));
    let record = to_internal(EntityKind::Transaction, &remote).unwrap();
    let internal = serde_json::to_value(&record).unwrap();

    assert_eq!(internal["userId"], "u9");
    assert_eq!(internal["costType"], "fixed");
    assert_eq!(internal["kind"], "transaction");
}

#[test]
fn missing_fields_are_defaulted() {
    let remote = row(json!({ "id": "t3", "userId": "legacy-owner", "amount": "7.25" }));

    let record = to_internal(EntityKind::Transaction, &remote).unwrap();
    let Record::Transaction(t) = record else {
        panic!("expected transaction");
    };

    assert_eq!(t.user_id, "legacy-owner");
    assert_eq!(t.cost_type, "");
    assert_eq!(t.category, "");
    assert_eq!(t.amount, 7.25);
    assert_eq!(t.date, None);
}

#[test]
fn row_without_id_is_a_shape_mismatch() {
    let remote = row(json!({ "user_id": "u1", "balance": 3 }));
    let err = to_internal(EntityKind::SavingsBalance, &remote).unwrap_err();
    assert!(matches!(err, SyncError::ShapeMismatch { field: "id", .. }));
    assert_eq!(row_owner(&remote), Some("u1"));
}
