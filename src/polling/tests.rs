use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::error::{Result, StoreOp, SyncError};
use crate::persistence::SettingsStore;
use crate::records::EntityKind;
use crate::state::{ObserverRegistry, SyncNotice, WriteGate};
use crate::store::ActivityMarker;

use super::*;

// =========================================================================
// Helpers
// =========================================================================

fn at(min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, min, 0).unwrap()
}

fn marker(min: u32, author: &str) -> ActivityMarker {
    ActivityMarker {
        at: at(min),
        author: author.into(),
    }
}

#[derive(Default)]
struct MockProbe {
    latest: Mutex<Option<(EntityKind, ActivityMarker)>>,
    fail: Mutex<bool>,
}

impl MockProbe {
    fn set(&self, kind: EntityKind, m: ActivityMarker) {
        *self.latest.lock().unwrap() = Some((kind, m));
    }
}

#[async_trait]
impl ActivityProbe for MockProbe {
    async fn latest(&self) -> Result<Option<(EntityKind, ActivityMarker)>> {
        if *self.fail.lock().unwrap() {
            return Err(SyncError::BackendUnavailable {
                kind: EntityKind::Transaction,
                op: StoreOp::LatestActivity,
                reason: "down".into(),
            });
        }
        Ok(self.latest.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct MockTarget {
    full: AtomicU32,
    incremental: Mutex<Vec<EntityKind>>,
}

#[async_trait]
impl ReloadTarget for MockTarget {
    async fn full_reload(&self) -> Result<()> {
        self.full.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn incremental_reload(&self, kind: EntityKind) -> Result<()> {
        self.incremental.lock().unwrap().push(kind);
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    settings: SettingsStore,
    observers: ObserverRegistry,
    probe: Arc<MockProbe>,
    target: Arc<MockTarget>,
    gate: WriteGate,
    scheduler: PollingScheduler,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let settings = SettingsStore::new(dir.path().join("settings.json"));
    let observers = ObserverRegistry::new();
    let gate = WriteGate::new(Duration::from_millis(1500));
    let scheduler = PollingScheduler::new(
        settings.clone(),
        observers.clone(),
        Some(gate.clone()),
        Duration::from_secs(20),
        Duration::from_secs(3),
    );
    Harness {
        _dir: dir,
        settings,
        observers,
        probe: Arc::new(MockProbe::default()),
        target: Arc::new(MockTarget::default()),
        gate,
        scheduler,
    }
}

impl Harness {
    fn start(&self) {
        self.scheduler
            .initialize(self.probe.clone(), self.target.clone(), "me");
    }
}

// =========================================================================
// Policy
// =========================================================================

#[test]
fn slow_policy() {
    let m = marker(10, "other");
    assert_eq!(decide_slow(None, None, true), PollDecision::Idle);
    assert_eq!(decide_slow(Some(&m), Some(at(10)), true), PollDecision::Idle);
    assert_eq!(decide_slow(Some(&m), Some(at(5)), true), PollDecision::FullReload);
    assert_eq!(decide_slow(Some(&m), Some(at(5)), false), PollDecision::MarkPending);
    assert_eq!(decide_slow(Some(&m), None, true), PollDecision::FullReload);
}

#[test]
fn fast_policy_skips_own_writes() {
    let mine = marker(10, "me");
    let theirs = marker(10, "other");
    assert_eq!(decide_fast(Some(&mine), Some(at(5)), "me"), PollDecision::AdvanceOnly);
    assert_eq!(
        decide_fast(Some(&theirs), Some(at(5)), "me"),
        PollDecision::IncrementalReload
    );
    assert_eq!(decide_fast(Some(&theirs), Some(at(11)), "me"), PollDecision::Idle);
}

// =========================================================================
// Timers
// =========================================================================

#[tokio::test(start_paused = true)]
async fn double_initialize_keeps_one_timer_set() {
    let h = harness();
    h.scheduler.set_visible(true).await;

    h.start();
    h.start();
    tokio::time::sleep(Duration::from_secs(61)).await;

    let stats = h.scheduler.stats();
    assert_eq!(stats.slow_ticks, 3);
    assert_eq!(stats.fast_ticks, 20);
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_and_final() {
    let h = harness();
    h.scheduler.stop();
    h.start();
    assert!(h.scheduler.is_running());

    h.scheduler.stop();
    h.scheduler.stop();
    assert!(!h.scheduler.is_running());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.scheduler.stats(), PollStats::default());
}

#[tokio::test(start_paused = true)]
async fn fast_timer_follows_visibility() {
    let h = harness();
    h.start();
    assert!(!h.scheduler.fast_armed());

    h.scheduler.set_visible(true).await;
    assert!(h.scheduler.fast_armed());
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.scheduler.stats().fast_ticks, 3);

    h.scheduler.set_visible(false).await;
    assert!(!h.scheduler.fast_armed());
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.scheduler.stats().fast_ticks, 3);
}

// =========================================================================
// Tick behaviour
// =========================================================================

#[tokio::test(start_paused = true)]
async fn own_writes_only_advance_the_cursor() {
    let h = harness();
    h.settings.advance_cursor(at(0)).unwrap();
    h.probe.set(EntityKind::Transaction, marker(5, "me"));
    h.scheduler.set_visible(true).await;
    h.start();

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(h.settings.cursor(), Some(at(5)));
    assert!(h.target.incremental.lock().unwrap().is_empty());

    h.probe.set(EntityKind::SavingsBalance, marker(6, "other"));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(
        *h.target.incremental.lock().unwrap(),
        vec![EntityKind::SavingsBalance]
    );
    assert_eq!(h.settings.cursor(), Some(at(6)));
    assert_eq!(h.target.full.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn visible_slow_tick_runs_a_full_reload() {
    let h = harness();
    // fast period longer than slow, so the slow timer sees the change first
    let scheduler = PollingScheduler::new(
        h.settings.clone(),
        h.observers.clone(),
        None,
        Duration::from_secs(20),
        Duration::from_secs(30),
    );
    h.settings.advance_cursor(at(0)).unwrap();
    h.probe.set(EntityKind::Transaction, marker(5, "other"));
    scheduler.set_visible(true).await;
    scheduler.initialize(h.probe.clone(), h.target.clone(), "me");

    tokio::time::sleep(Duration::from_secs(21)).await;
    assert_eq!(h.target.full.load(Ordering::SeqCst), 1);
    assert_eq!(h.settings.cursor(), Some(at(5)));
    assert_eq!(scheduler.stats().reloads, 1);

    // cursor caught up: the fast tick at +30s finds nothing
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(h.target.incremental.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn hidden_slow_tick_counts_pending_then_reloads_on_show() {
    let h = harness();
    let notices = Arc::new(Mutex::new(Vec::new()));
    let sink = notices.clone();
    h.observers.on_notice(move |n| sink.lock().unwrap().push(n.clone()));

    h.settings.advance_cursor(at(0)).unwrap();
    h.probe.set(EntityKind::Transaction, marker(5, "other"));
    h.start();

    tokio::time::sleep(Duration::from_secs(21)).await;
    assert_eq!(h.scheduler.pending(), 1);
    assert_eq!(h.target.full.load(Ordering::SeqCst), 0);
    assert_eq!(h.settings.cursor(), Some(at(5)));

    // no new data: the counter does not grow
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(h.scheduler.pending(), 1);
    assert_eq!(
        *notices.lock().unwrap(),
        vec![SyncNotice::PendingUpdates { count: 1 }]
    );

    h.scheduler.set_visible(true).await;
    assert_eq!(h.target.full.load(Ordering::SeqCst), 1);
    assert_eq!(h.scheduler.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn reloads_wait_for_the_write_gate() {
    let h = harness();
    h.settings.advance_cursor(at(0)).unwrap();
    h.probe.set(EntityKind::Transaction, marker(5, "other"));
    h.scheduler.set_visible(true).await;

    let ticket = h.gate.begin();
    h.start();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(h.target.incremental.lock().unwrap().is_empty());
    assert_eq!(h.settings.cursor(), Some(at(0)));

    drop(ticket);
    // the settle window closes at +5.5s, before the fast tick at +6s
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.target.incremental.lock().unwrap().len(), 1);
    assert_eq!(h.settings.cursor(), Some(at(5)));
}

#[tokio::test(start_paused = true)]
async fn persisted_cursor_prevents_spurious_reload() {
    let h = harness();
    h.settings.advance_cursor(at(5)).unwrap();
    h.probe.set(EntityKind::Transaction, marker(5, "other"));
    h.scheduler.set_visible(true).await;
    h.start();

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(h.target.full.load(Ordering::SeqCst), 0);
    assert!(h.target.incremental.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn probe_failures_are_survived() {
    let h = harness();
    *h.probe.fail.lock().unwrap() = true;
    h.start();
    tokio::time::sleep(Duration::from_secs(41)).await;
    assert_eq!(h.scheduler.stats().slow_ticks, 2);
    assert!(h.scheduler.is_running());
}

#[tokio::test]
async fn prime_cursor_only_fills_an_empty_cursor() {
    let h = harness();
    h.probe.set(EntityKind::Transaction, marker(7, "x"));
    h.scheduler.prime_cursor(h.probe.as_ref()).await.unwrap();
    assert_eq!(h.settings.cursor(), Some(at(7)));

    h.probe.set(EntityKind::Transaction, marker(9, "x"));
    h.scheduler.prime_cursor(h.probe.as_ref()).await.unwrap();
    assert_eq!(h.settings.cursor(), Some(at(7)));
}
