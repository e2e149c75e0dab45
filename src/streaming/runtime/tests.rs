use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::auth::LocalAuth;
use crate::records::{EntityKind, RemoteRow, Transaction};
use crate::state::{ObserverRegistry, StateHandle, SyncNotice, UiSurface};
use crate::store::{LocalStore, RecordBackend};
use crate::streaming::channel::{ChannelEvent, LocalChangeFeed, MockChannelProvider, MockFailure};
use crate::streaming::engine::ChannelState;
use crate::streaming::runtime::ChangeDispatcher;
use crate::streaming::types::{ChangeNotification, ChangeOp};

// =========================================================================
// Helpers
// =========================================================================

struct Harness {
    provider: Arc<MockChannelProvider>,
    auth: Arc<LocalAuth>,
    state: StateHandle,
    observers: ObserverRegistry,
    dispatcher: ChangeDispatcher,
}

fn harness() -> Harness {
    let provider = Arc::new(MockChannelProvider::new());
    let auth = Arc::new(LocalAuth::new("u1"));
    let state = StateHandle::new();
    let observers = ObserverRegistry::new();
    let dispatcher = ChangeDispatcher::new(
        provider.clone(),
        auth.clone(),
        state.clone(),
        observers.clone(),
    );
    Harness {
        provider,
        auth,
        state,
        observers,
        dispatcher,
    }
}

fn row(v: serde_json::Value) -> RemoteRow {
    v.as_object().cloned().unwrap()
}

fn tx_change(op: ChangeOp, id: &str, amount: i64) -> ChannelEvent {
    ChannelEvent::Change(ChangeNotification {
        op,
        kind: EntityKind::Transaction,
        payload: row(json!({
            "id": id,
            "user_id": "u1",
            "type": "expense",
            "amount": amount,
            "category": "food",
            "date": "2024-05-01",
            "description": "",
            "cost_type": "variable",
        })),
    })
}

fn tx(id: &str, amount: f64) -> Transaction {
    Transaction {
        id: id.into(),
        user_id: "u1".into(),
        tx_type: "expense".into(),
        amount,
        category: "food".into(),
        date: chrono::NaiveDate::from_ymd_opt(2024, 5, 1),
        description: String::new(),
        cost_type: "variable".into(),
        created_at: None,
    }
}

/// Lets the pump and driver tasks run until `cond` holds.
async fn wait_for(cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn initialize_subscribes_every_kind() {
    let h = harness();
    h.dispatcher.initialize("u1").await;

    assert_eq!(h.provider.active_channels(), 3);
    for kind in EntityKind::ALL {
        assert_eq!(h.dispatcher.channel_state(kind), ChannelState::Active);
    }
    assert!(h
        .provider
        .subscribe_calls()
        .iter()
        .all(|spec| spec.owner_id == "u1"));
}

#[tokio::test]
async fn double_initialize_leaves_one_channel_per_kind() {
    let h = harness();
    h.dispatcher.initialize("u1").await;
    h.dispatcher.initialize("u1").await;

    assert_eq!(h.provider.subscribe_calls().len(), 6);
    assert_eq!(h.provider.active_channels(), 3);
}

#[tokio::test]
async fn cleanup_releases_everything_and_is_idempotent() {
    let h = harness();
    h.dispatcher.cleanup().await;

    h.dispatcher.initialize("u1").await;
    h.dispatcher.cleanup().await;
    h.dispatcher.cleanup().await;

    assert_eq!(h.provider.active_channels(), 0);
    assert_eq!(
        h.dispatcher.channel_state(EntityKind::Transaction),
        ChannelState::Unsubscribed
    );
}

// =========================================================================
// Failure handling
// =========================================================================

#[tokio::test]
async fn expired_session_is_refreshed_once() {
    let h = harness();
    h.provider
        .fail_next(EntityKind::Transaction, MockFailure::SessionExpired, 1);

    h.dispatcher.initialize("u1").await;

    assert_eq!(h.auth.refresh_count(), 1);
    assert_eq!(
        h.dispatcher.channel_state(EntityKind::Transaction),
        ChannelState::Active
    );
    assert!(h.dispatcher.degraded_kinds().is_empty());
}

#[tokio::test]
async fn repeated_rejection_degrades_and_notifies() {
    let h = harness();
    let notices = Arc::new(Mutex::new(Vec::new()));
    let sink = notices.clone();
    h.observers.on_notice(move |n| sink.lock().unwrap().push(n.clone()));
    h.provider
        .fail_next(EntityKind::SavingsBalance, MockFailure::Rejected, 2);

    h.dispatcher.initialize("u1").await;

    assert!(h.dispatcher.is_degraded(EntityKind::SavingsBalance));
    assert_eq!(h.dispatcher.degraded_kinds(), vec![EntityKind::SavingsBalance]);
    assert_eq!(
        *notices.lock().unwrap(),
        vec![SyncNotice::Degraded {
            kind: EntityKind::SavingsBalance
        }]
    );
    assert_eq!(h.provider.active_channels(), 2);
}

#[tokio::test]
async fn refresh_failure_degrades_without_failing_sync() {
    let h = harness();
    h.auth.fail_refresh(true);
    h.provider
        .fail_next(EntityKind::Transaction, MockFailure::SessionExpired, 1);

    h.dispatcher.initialize("u1").await;

    assert!(h.dispatcher.is_degraded(EntityKind::Transaction));
    assert_eq!(
        h.dispatcher.channel_state(EntityKind::SavingsHistoryEntry),
        ChannelState::Active
    );
}

#[tokio::test]
async fn broken_channel_is_reopened() {
    let h = harness();
    h.dispatcher.initialize("u1").await;

    assert!(h
        .provider
        .emit(EntityKind::Transaction, ChannelEvent::Error("socket closed".into())));

    let provider = h.provider.clone();
    wait_for(|| provider.subscribe_calls().len() == 4).await;
    wait_for(|| h.dispatcher.channel_state(EntityKind::Transaction) == ChannelState::Active).await;
    assert_eq!(h.provider.active_channels(), 3);
}

// =========================================================================
// Applying changes
// =========================================================================

#[tokio::test]
async fn insert_update_delete_reach_the_working_set() {
    let h = harness();
    let dashboard = Arc::new(Mutex::new(0));
    let savings = Arc::new(Mutex::new(0));
    let d = dashboard.clone();
    let s = savings.clone();
    h.observers
        .register(UiSurface::Dashboard, move |_| *d.lock().unwrap() += 1);
    h.observers
        .register(UiSurface::SavingsDisplay, move |_| *s.lock().unwrap() += 1);

    h.dispatcher.initialize("u1").await;

    h.provider
        .emit(EntityKind::Transaction, tx_change(ChangeOp::Insert, "a", 10));
    let state = h.state.clone();
    wait_for(|| state.read(|ws| ws.transactions.len()) == 1).await;

    h.provider
        .emit(EntityKind::Transaction, tx_change(ChangeOp::Update, "a", 12));
    wait_for(|| state.read(|ws| ws.transactions.first().map(|t| t.amount)) == Some(12.0)).await;

    h.provider.emit(
        EntityKind::Transaction,
        ChannelEvent::Change(ChangeNotification {
            op: ChangeOp::Delete,
            kind: EntityKind::Transaction,
            payload: row(json!({ "id": "a" })),
        }),
    );
    wait_for(|| state.read(|ws| ws.transactions.is_empty())).await;

    // transactions feed the savings figure, so both surfaces were refreshed
    assert_eq!(*dashboard.lock().unwrap(), 3);
    assert_eq!(*savings.lock().unwrap(), 3);
}

#[tokio::test]
async fn update_for_missing_record_appends() {
    let h = harness();
    h.dispatcher.initialize("u1").await;

    h.provider
        .emit(EntityKind::Transaction, tx_change(ChangeOp::Update, "late", 4));
    let state = h.state.clone();
    wait_for(|| state.read(|ws| ws.transactions.len()) == 1).await;
}

#[tokio::test]
async fn insert_then_full_reload_does_not_duplicate() {
    let h = harness();
    h.state
        .update(|ws| ws.merge_transactions(&[tx("a", 10.0)]));
    h.dispatcher.initialize("u1").await;

    h.provider
        .emit(EntityKind::Transaction, tx_change(ChangeOp::Insert, "b", 5));
    let state = h.state.clone();
    wait_for(|| state.read(|ws| ws.transactions.len()) == 2).await;

    h.state
        .update(|ws| ws.merge_transactions(&[tx("a", 10.0), tx("b", 5.0)]));

    let ids: Vec<String> = h
        .state
        .read(|ws| ws.transactions.iter().map(|t| t.id.clone()).collect());
    assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn changes_after_cleanup_are_not_applied() {
    let h = harness();
    h.dispatcher.initialize("u1").await;
    h.dispatcher.cleanup().await;

    assert!(!h
        .provider
        .emit(EntityKind::Transaction, tx_change(ChangeOp::Insert, "a", 1)));
    assert!(h.state.read(|ws| ws.is_empty()));
}

#[tokio::test]
async fn local_store_writes_arrive_through_the_feed() {
    let feed = LocalChangeFeed::default();
    let store = LocalStore::open_in_memory().unwrap().with_feed(feed.clone());
    let state = StateHandle::new();
    let dispatcher = ChangeDispatcher::new(
        Arc::new(feed.clone()),
        Arc::new(LocalAuth::new("u1")),
        state.clone(),
        ObserverRegistry::new(),
    );
    dispatcher.initialize("u1").await;
    assert_eq!(feed.subscriber_count(), 3);

    let mut other = row(json!({ "id": "x", "user_id": "u2", "type": "income", "amount": 1 }));
    store.insert(EntityKind::Transaction, other.clone()).await.unwrap();
    other.insert("id".into(), json!("mine"));
    other.insert("user_id".into(), json!("u1"));
    store.insert(EntityKind::Transaction, other).await.unwrap();

    wait_for(|| state.read(|ws| ws.transactions.len()) == 1).await;
    assert_eq!(state.read(|ws| ws.transactions[0].id.clone()), "mine");

    dispatcher.cleanup().await;
    wait_for(|| feed.subscriber_count() == 0).await;
}
