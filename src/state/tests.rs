use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::records::{EntityKind, Record, SavingsBalance, SavingsHistoryEntry, Transaction};
use crate::state::*;

fn tx(id: &str, tx_type: &str, amount: f64) -> Transaction {
    Transaction {
        id: id.into(),
        user_id: "u1".into(),
        tx_type: tx_type.into(),
        amount,
        category: "misc".into(),
        date: None,
        description: String::new(),
        cost_type: String::new(),
        created_at: None,
    }
}

fn history(id: &str, entry_type: &str, amount: f64) -> SavingsHistoryEntry {
    SavingsHistoryEntry {
        id: id.into(),
        user_id: "u1".into(),
        entry_type: entry_type.into(),
        amount,
        date: None,
        description: String::new(),
        created_at: None,
    }
}

#[test]
fn savings_display_falls_back_to_history() {
    let mut ws = WorkingSet::default();
    ws.merge_savings_history(&[history("h1", "deposit", 100.0), history("h2", "withdraw", 30.0)]);
    assert_eq!(ws.savings_display(), 70.0);

    ws.merge_savings_balance(vec![SavingsBalance {
        id: "s1".into(),
        user_id: "u1".into(),
        balance: 500.0,
        created_at: None,
    }]);
    assert_eq!(ws.savings_display(), 500.0);

    // an empty fetch keeps the balance
    ws.merge_savings_balance(vec![]);
    assert_eq!(ws.savings_display(), 500.0);
}

#[test]
fn upsert_and_remove_route_by_kind() {
    let mut ws = WorkingSet::default();
    ws.upsert(Record::from(tx("t1", "income", 50.0)));
    ws.upsert(Record::from(tx("t2", "expense", 20.0)));
    assert_eq!(ws.net_flow(), 30.0);

    assert!(ws.remove(EntityKind::Transaction, "t2"));
    assert!(!ws.remove(EntityKind::SavingsBalance, "nope"));
    assert_eq!(ws.len(EntityKind::Transaction), 1);
    assert!(ws.get(EntityKind::Transaction, "t1").is_some());

    ws.clear();
    assert!(ws.is_empty());
}

#[test]
fn observers_only_fire_for_registered_surfaces() {
    let registry = ObserverRegistry::new();
    let dashboard_hits = Arc::new(AtomicUsize::new(0));

    let hits = dashboard_hits.clone();
    registry.register(UiSurface::Dashboard, move |_| {
        hits.fetch_add(1, Ordering::SeqCst);
    });

    let ws = WorkingSet::default();
    assert_eq!(registry.notify(surfaces_for(EntityKind::SavingsHistoryEntry), &ws), 0);
    assert_eq!(registry.notify(surfaces_for(EntityKind::Transaction), &ws), 1);
    assert_eq!(dashboard_hits.load(Ordering::SeqCst), 1);
    assert!(!registry.is_registered(UiSurface::HistoryList));
}

#[test]
fn transaction_changes_refresh_savings_display() {
    assert!(surfaces_for(EntityKind::Transaction).contains(&UiSurface::SavingsDisplay));
}

#[tokio::test(start_paused = true)]
async fn write_gate_settles_then_idles() {
    let gate = WriteGate::new(Duration::from_millis(1500));
    assert_eq!(gate.phase(), GatePhase::Idle);

    let first = gate.begin();
    let second = gate.begin();
    assert_eq!(gate.phase(), GatePhase::Sending);

    drop(first);
    assert_eq!(gate.phase(), GatePhase::Sending, "one write still in flight");

    drop(second);
    assert_eq!(gate.phase(), GatePhase::Settling);
    assert!(gate.is_suppressed());

    tokio::time::advance(Duration::from_millis(1600)).await;
    assert_eq!(gate.phase(), GatePhase::Idle);
}
