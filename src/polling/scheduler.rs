//! Two-timer polling scheduler.
//!
//! Both timers compare the newest activity marker against the persisted
//! cursor. The slow timer runs whenever sync is active; the fast one only
//! while the surface is visible. Every `initialize()` clears both timers
//! before arming new ones, and `stop()` may be called any number of times.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::Result;
use crate::persistence::SettingsStore;
use crate::records::EntityKind;
use crate::state::{ObserverRegistry, SyncNotice, WriteGate};
use crate::store::ActivityMarker;

use super::policy::{decide_fast, decide_slow, PollDecision, TimerKind};

/// Cheap change detection: the newest row across the watched collections.
#[async_trait]
pub trait ActivityProbe: Send + Sync {
    async fn latest(&self) -> Result<Option<(EntityKind, ActivityMarker)>>;
}

/// What a tick triggers when it finds new data.
#[async_trait]
pub trait ReloadTarget: Send + Sync {
    async fn full_reload(&self) -> Result<()>;
    async fn incremental_reload(&self, kind: EntityKind) -> Result<()>;
}

#[derive(Debug, Default)]
struct PollCounters {
    slow_ticks: AtomicU64,
    fast_ticks: AtomicU64,
    reloads: AtomicU64,
}

/// Counters since the scheduler was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollStats {
    pub slow_ticks: u64,
    pub fast_ticks: u64,
    pub reloads: u64,
}

struct Shared {
    settings: SettingsStore,
    gate: Option<WriteGate>,
    observers: ObserverRegistry,
    visible: AtomicBool,
    pending: AtomicU32,
    counters: PollCounters,
}

struct TickContext {
    shared: Arc<Shared>,
    probe: Arc<dyn ActivityProbe>,
    target: Arc<dyn ReloadTarget>,
    actor_id: String,
}

#[derive(Default)]
struct Timers {
    ctx: Option<Arc<TickContext>>,
    slow: Option<JoinHandle<()>>,
    fast: Option<JoinHandle<()>>,
}

pub struct PollingScheduler {
    shared: Arc<Shared>,
    slow_period: Duration,
    fast_period: Duration,
    timers: Mutex<Timers>,
}

impl PollingScheduler {
    /// Reloads are deferred while `gate` reports a self-authored write.
    pub fn new(
        settings: SettingsStore,
        observers: ObserverRegistry,
        gate: Option<WriteGate>,
        slow_period: Duration,
        fast_period: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                gate,
                observers,
                visible: AtomicBool::new(false),
                pending: AtomicU32::new(0),
                counters: PollCounters::default(),
            }),
            slow_period,
            fast_period,
            timers: Mutex::new(Timers::default()),
        }
    }

    fn timers(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clears any existing timers and arms a fresh set, all under the timer
    /// lock, so concurrent calls still leave exactly one set.
    pub fn initialize(
        &self,
        probe: Arc<dyn ActivityProbe>,
        target: Arc<dyn ReloadTarget>,
        actor_id: &str,
    ) {
        let mut timers = self.timers();
        clear(&mut timers);

        let ctx = Arc::new(TickContext {
            shared: self.shared.clone(),
            probe,
            target,
            actor_id: actor_id.to_string(),
        });
        timers.slow = Some(spawn_timer(ctx.clone(), TimerKind::Slow, self.slow_period));
        if self.shared.visible.load(Ordering::SeqCst) {
            timers.fast = Some(spawn_timer(ctx.clone(), TimerKind::Fast, self.fast_period));
        }
        timers.ctx = Some(ctx);
        drop(timers);

        log::info!(
            "[POLL] timers armed (slow {:?}, fast {:?}) for {}",
            self.slow_period,
            self.fast_period,
            actor_id
        );
    }

    /// Clears both timers. Safe to call repeatedly.
    pub fn stop(&self) {
        let mut timers = self.timers();
        if timers.slow.is_some() || timers.fast.is_some() {
            log::info!("[POLL] timers stopped");
        }
        clear(&mut timers);
    }

    pub fn is_running(&self) -> bool {
        self.timers().slow.is_some()
    }

    pub fn fast_armed(&self) -> bool {
        self.timers().fast.is_some()
    }

    /// Arms or disarms the fast timer. Becoming visible with pending
    /// updates runs one full reload and clears the counter.
    pub async fn set_visible(&self, visible: bool) {
        let was = self.shared.visible.swap(visible, Ordering::SeqCst);

        let ctx = {
            let mut timers = self.timers();
            if visible {
                if timers.fast.is_none() {
                    if let Some(ctx) = timers.ctx.clone() {
                        timers.fast = Some(spawn_timer(ctx, TimerKind::Fast, self.fast_period));
                        log::debug!("[POLL] fast timer armed");
                    }
                }
            } else if let Some(fast) = timers.fast.take() {
                fast.abort();
                log::debug!("[POLL] fast timer disarmed");
            }
            timers.ctx.clone()
        };

        if !visible || was {
            return;
        }
        let pending = self.shared.pending.swap(0, Ordering::SeqCst);
        if pending == 0 {
            return;
        }
        if let Some(ctx) = ctx {
            log::info!("[POLL] surface visible with {} pending update(s), reloading", pending);
            if let Err(e) = ctx.target.full_reload().await {
                log::warn!("[POLL] pending reload failed: {}", e);
                self.shared.pending.fetch_add(pending, Ordering::SeqCst);
            } else {
                self.shared.counters.reloads.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    pub fn is_visible(&self) -> bool {
        self.shared.visible.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> u32 {
        self.shared.pending.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PollStats {
        let c = &self.shared.counters;
        PollStats {
            slow_ticks: c.slow_ticks.load(Ordering::SeqCst),
            fast_ticks: c.fast_ticks.load(Ordering::SeqCst),
            reloads: c.reloads.load(Ordering::SeqCst),
        }
    }

    /// Seeds an empty cursor with the current newest marker, so the first
    /// tick after a fresh login does not repeat the login reload.
    pub async fn prime_cursor(&self, probe: &dyn ActivityProbe) -> Result<()> {
        if self.shared.settings.cursor().is_some() {
            return Ok(());
        }
        if let Some((_, marker)) = probe.latest().await? {
            self.shared.settings.advance_cursor(marker.at)?;
            log::debug!("[POLL] cursor primed at {}", marker.at);
        }
        Ok(())
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        clear(&mut self.timers());
    }
}

fn clear(timers: &mut Timers) {
    if let Some(slow) = timers.slow.take() {
        slow.abort();
    }
    if let Some(fast) = timers.fast.take() {
        fast.abort();
    }
    timers.ctx = None;
}

fn spawn_timer(ctx: Arc<TickContext>, kind: TimerKind, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            ctx.tick(kind).await;
        }
    })
}

impl TickContext {
    async fn tick(&self, kind: TimerKind) {
        let counters = &self.shared.counters;
        match kind {
            TimerKind::Slow => counters.slow_ticks.fetch_add(1, Ordering::SeqCst),
            TimerKind::Fast => counters.fast_ticks.fetch_add(1, Ordering::SeqCst),
        };

        let latest = match self.probe.latest().await {
            Ok(latest) => latest,
            Err(e) => {
                log::warn!("[POLL] {:?} probe failed: {}", kind, e);
                return;
            }
        };
        let Some((entity, marker)) = latest else {
            return;
        };

        let cursor = self.shared.settings.cursor();
        let decision = match kind {
            TimerKind::Slow => decide_slow(
                Some(&marker),
                cursor,
                self.shared.visible.load(Ordering::SeqCst),
            ),
            TimerKind::Fast => decide_fast(Some(&marker), cursor, &self.actor_id),
        };
        if decision != PollDecision::Idle {
            log::debug!("[POLL] {:?} tick: {:?} ({} at {})", kind, decision, entity, marker.at);
        }

        match decision {
            PollDecision::Idle => {}
            PollDecision::AdvanceOnly => self.advance(marker.at),
            PollDecision::MarkPending => {
                let count = self.shared.pending.fetch_add(1, Ordering::SeqCst) + 1;
                self.advance(marker.at);
                self.shared
                    .observers
                    .notice(SyncNotice::PendingUpdates { count });
            }
            PollDecision::FullReload | PollDecision::IncrementalReload => {
                if self.shared.gate.as_ref().is_some_and(WriteGate::is_suppressed) {
                    log::debug!("[POLL] reload deferred, local write in flight");
                    return;
                }
                let res = if decision == PollDecision::FullReload {
                    self.target.full_reload().await
                } else {
                    self.target.incremental_reload(entity).await
                };
                match res {
                    Ok(()) => {
                        counters.reloads.fetch_add(1, Ordering::SeqCst);
                        self.advance(marker.at);
                    }
                    // cursor stays put; the next tick tries again
                    Err(e) => log::warn!("[POLL] {:?} reload failed: {}", decision, e),
                }
            }
        }
    }

    fn advance(&self, at: DateTime<Utc>) {
        if let Err(e) = self.shared.settings.advance_cursor(at) {
            log::warn!("[POLL] could not persist cursor: {}", e);
        }
    }
}
