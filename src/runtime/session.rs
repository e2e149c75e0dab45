//! Top-level sync session.
//!
//! Owns the working set and wires the adapter, the change dispatcher and the
//! polling scheduler together for one signed-in owner.
//!
//! ## Lifecycle
//! - `login()` runs one full reconciliation, then tears down and re-creates
//!   the push subscriptions and the polling timers. Repeating it for the
//!   same owner is a no-op.
//! - `switch_backend()` persists the selector flag and, if a session is
//!   active, rebuilds everything against the new backend.
//! - `logout()` and `shutdown()` stop every channel and timer.
//!
//! ## Local mutations
//! Optimistic: the working set changes first, the write happens inside a
//! write-gate ticket, and a failed write restores the prior entry.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::auth::{AuthProvider, AuthRouter, HostedAuth, LocalAuth};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::persistence::SettingsStore;
use crate::polling::{ActivityProbe, PollingScheduler, ReloadTarget};
use crate::records::{ensure_id, new_record_id, EntityKind, Identified, Record, SavingsBalance};
use crate::state::{
    surfaces_for, ObserverRegistry, StateHandle, SyncNotice, WorkingSet, WriteGate,
};
use crate::store::{ActivityMarker, BackendKind, HostedStore, LocalStore, RecordStore};
use crate::streaming::channel::{
    ChannelRouter, LocalChangeFeed, PushChannelProvider, RealtimeChannelProvider,
};
use crate::streaming::ChangeDispatcher;

use super::reconciler::{Reconciler, RefreshReport};

// =====================================================================
// Polling seams
// =====================================================================

/// Newest activity across every collection of one owner.
pub struct StoreProbe {
    store: RecordStore,
    owner_id: String,
}

impl StoreProbe {
    pub fn new(store: RecordStore, owner_id: impl Into<String>) -> Self {
        Self {
            store,
            owner_id: owner_id.into(),
        }
    }
}

#[async_trait]
impl ActivityProbe for StoreProbe {
    async fn latest(&self) -> Result<Option<(EntityKind, ActivityMarker)>> {
        let mut newest: Option<(EntityKind, ActivityMarker)> = None;
        let mut last_err = None;
        let mut answered = 0;

        for kind in EntityKind::ALL {
            match self.store.latest_activity(kind, &self.owner_id).await {
                Ok(marker) => {
                    answered += 1;
                    if let Some(m) = marker {
                        if newest.as_ref().map_or(true, |(_, cur)| m.at > cur.at) {
                            newest = Some((kind, m));
                        }
                    }
                }
                Err(e) => {
                    log::warn!("[POLL] probe of {} failed: {}", kind, e);
                    last_err = Some(e);
                }
            }
        }

        match (answered, last_err) {
            (0, Some(e)) => Err(e),
            _ => Ok(newest),
        }
    }
}

struct SessionReloader {
    reconciler: Reconciler,
    owner_id: String,
}

#[async_trait]
impl ReloadTarget for SessionReloader {
    async fn full_reload(&self) -> Result<()> {
        self.reconciler.refresh(&self.owner_id).await.map(|_| ())
    }

    async fn incremental_reload(&self, kind: EntityKind) -> Result<()> {
        self.reconciler
            .refresh_kind(&self.owner_id, kind)
            .await
            .map(|_| ())
    }
}

// =====================================================================
// Session
// =====================================================================

/// Whatever a failed optimistic write has to put back.
enum Prior {
    Entry(Record),
    Absent(EntityKind, String),
    Balance(Option<SavingsBalance>),
}

impl Prior {
    fn capture(ws: &WorkingSet, kind: EntityKind, id: &str) -> Self {
        match kind {
            EntityKind::SavingsBalance => Prior::Balance(ws.savings_balance.clone()),
            _ => match ws.get(kind, id) {
                Some(record) => Prior::Entry(record),
                None => Prior::Absent(kind, id.to_string()),
            },
        }
    }

    fn restore(self, ws: &mut WorkingSet) {
        match self {
            Prior::Entry(record) => {
                ws.upsert(record);
            }
            Prior::Absent(kind, id) => {
                ws.remove(kind, &id);
            }
            Prior::Balance(balance) => ws.savings_balance = balance,
        }
    }
}

pub struct SyncSession {
    settings: SettingsStore,
    store: RecordStore,
    auth: Arc<dyn AuthProvider>,
    state: StateHandle,
    observers: ObserverRegistry,
    gate: WriteGate,
    reconciler: Reconciler,
    dispatcher: ChangeDispatcher,
    scheduler: PollingScheduler,
    actor_id: String,
    active: Mutex<Option<String>>,
    last_report: StdMutex<Option<RefreshReport>>,
}

impl SyncSession {
    pub fn new(
        config: &SyncConfig,
        store: RecordStore,
        auth: Arc<dyn AuthProvider>,
        push: Arc<dyn PushChannelProvider>,
    ) -> Self {
        // rows stamped with this id are this session's own writes
        let actor_id = store
            .actor_id()
            .map(str::to_string)
            .unwrap_or_else(new_record_id);
        let store = store.with_actor(actor_id.clone());
        let settings = store.settings().clone();
        let state = StateHandle::new();
        let observers = ObserverRegistry::new();
        let gate = WriteGate::new(config.settle_window);

        let reconciler = Reconciler::new(
            store.clone(),
            auth.clone(),
            state.clone(),
            observers.clone(),
        );
        let dispatcher =
            ChangeDispatcher::new(push, auth.clone(), state.clone(), observers.clone());
        let scheduler = PollingScheduler::new(
            settings.clone(),
            observers.clone(),
            Some(gate.clone()),
            config.slow_interval,
            config.fast_interval,
        );

        Self {
            settings,
            store,
            auth,
            state,
            observers,
            gate,
            reconciler,
            dispatcher,
            scheduler,
            actor_id,
            active: Mutex::new(None),
            last_report: StdMutex::new(None),
        }
    }

    /// Builds both backends from `config`. The hosted side is only wired
    /// when a URL and key are configured.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let settings = SettingsStore::new(config.settings_path());
        let feed = LocalChangeFeed::default();
        let local = LocalStore::open(&config.database_path())
            .map_err(|e| SyncError::Io(std::io::Error::other(e.to_string())))?
            .with_feed(feed.clone());

        let mut store = RecordStore::new(Arc::new(local), settings.clone())
            .with_retry_delay(config.retry_delay);
        let mut auth = AuthRouter::new(Arc::new(LocalAuth::default()), settings.clone());
        let mut push = ChannelRouter::new(Arc::new(feed), settings.clone());

        if let (Some(url), Some(key)) = (&config.hosted_url, &config.anon_key) {
            let client = reqwest::Client::new();
            let hosted_auth: Arc<dyn AuthProvider> =
                Arc::new(HostedAuth::new(client.clone(), url.as_str(), key.as_str()));
            store = store.with_hosted(Arc::new(
                HostedStore::new(client, url.as_str(), key.as_str(), hosted_auth.clone())
                    .with_activity_column(config.activity_column.as_str()),
            ));
            push = push.with_hosted(Arc::new(RealtimeChannelProvider::new(
                url,
                key,
                hosted_auth.clone(),
                config.heartbeat,
            )));
            auth = auth.with_hosted(hosted_auth);
            log::info!("[SESSION] hosted backend available at {}", url);
        }

        Ok(Self::new(config, store, Arc::new(auth), Arc::new(push)))
    }

    // ================================
    // Accessors
    // ================================

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    pub fn dispatcher(&self) -> &ChangeDispatcher {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &PollingScheduler {
        &self.scheduler
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn auth(&self) -> &Arc<dyn AuthProvider> {
        &self.auth
    }

    pub fn write_gate(&self) -> &WriteGate {
        &self.gate
    }

    /// Author stamp written on this session's rows.
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// Report of the most recent successful reconciliation, including the
    /// one `login()` runs.
    pub fn last_refresh(&self) -> Option<RefreshReport> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record_report(&self, report: &RefreshReport) {
        *self.last_report.lock().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
    }

    pub async fn owner(&self) -> Option<String> {
        self.active.lock().await.clone()
    }

    // ================================
    // Lifecycle
    // ================================

    /// Signs in with the selected backend's provider, then sets up sync.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<String> {
        self.auth.sign_in(email, password).await?;
        self.login().await
    }

    /// Sets up sync for the signed-in user. Returns the owner id.
    pub async fn login(&self) -> Result<String> {
        let mut active = self.active.lock().await;
        let user = self
            .auth
            .current_user()
            .await
            .ok_or(SyncError::NotAuthenticated)?;

        if active.as_deref() == Some(user.id.as_str()) {
            log::debug!("[SESSION] already set up for {}", user.id);
            return Ok(user.id);
        }
        if active.is_some() {
            self.teardown().await;
            self.state.clear();
        }

        log::info!(
            "[SESSION] login as {} on {} backend",
            user.id,
            self.store.active_backend()
        );
        match self.reconciler.refresh(&user.id).await {
            Ok(report) => self.record_report(&report),
            Err(SyncError::NotAuthenticated) => return Err(SyncError::NotAuthenticated),
            // already surfaced as a notice; timers and channels still come up
            Err(e) => log::warn!("[SESSION] initial refresh incomplete: {}", e),
        }

        self.start(&user.id).await;
        *active = Some(user.id.clone());
        Ok(user.id)
    }

    /// Manual refresh for the active owner.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let owner = self.owner().await.ok_or(SyncError::NotAuthenticated)?;
        let report = self.reconciler.refresh(&owner).await?;
        self.record_report(&report);
        Ok(report)
    }

    /// Stops sync, clears the working set and signs out.
    pub async fn logout(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        self.teardown().await;
        self.state.clear();
        self.settings.reset_cursor()?;
        *active = None;
        self.last_report.lock().unwrap_or_else(PoisonError::into_inner).take();
        log::info!("[SESSION] logged out");
        self.auth.sign_out().await
    }

    /// Stops channels and timers but keeps the identity and the data.
    pub async fn shutdown(&self) {
        let mut active = self.active.lock().await;
        self.teardown().await;
        *active = None;
        log::info!("[SESSION] shut down");
    }

    /// Persists the selector flag. An active session is rebuilt against the
    /// newly selected backend before this returns.
    pub async fn switch_backend(&self, backend: BackendKind) -> Result<()> {
        if self.settings.backend() == backend {
            log::debug!("[SESSION] {} backend already selected", backend);
            return Ok(());
        }
        let was_active = {
            let mut active = self.active.lock().await;
            let was = active.take().is_some();
            if was {
                self.teardown().await;
            }
            was
        };

        self.settings.set_backend(backend)?;
        self.settings.reset_cursor()?;
        self.state.clear();
        log::info!("[SESSION] switched to {} backend", backend);

        if was_active {
            self.login().await?;
        }
        Ok(())
    }

    /// Forwards surface visibility to the scheduler.
    pub async fn set_visible(&self, visible: bool) {
        self.scheduler.set_visible(visible).await;
    }

    async fn start(&self, owner_id: &str) {
        self.dispatcher.initialize(owner_id).await;

        let probe = Arc::new(StoreProbe::new(self.store.clone(), owner_id));
        if let Err(e) = self.scheduler.prime_cursor(probe.as_ref()).await {
            log::warn!("[SESSION] could not prime the poll cursor: {}", e);
        }
        let target = Arc::new(SessionReloader {
            reconciler: self.reconciler.clone(),
            owner_id: owner_id.to_string(),
        });
        self.scheduler.initialize(probe, target, &self.actor_id);
    }

    async fn teardown(&self) {
        self.dispatcher.cleanup().await;
        self.scheduler.stop();
    }

    // ================================
    // Optimistic mutations
    // ================================

    /// Adds a record for the active owner. Returns the stored copy.
    pub async fn add_record(&self, mut record: Record) -> Result<Record> {
        let owner = self.owner().await.ok_or(SyncError::NotAuthenticated)?;
        record.set_owner(&owner);
        if ensure_id(&mut record) {
            log::trace!("[SESSION] minted id {}", record.id());
        }
        self.write_through(record.clone(), || self.store.insert(record))
            .await
    }

    /// Replaces a record in the working set and the backend.
    pub async fn update_record(&self, mut record: Record) -> Result<Record> {
        let owner = self.owner().await.ok_or(SyncError::NotAuthenticated)?;
        record.set_owner(&owner);
        self.write_through(record.clone(), || self.store.update(record))
            .await
    }

    pub async fn delete_record(&self, kind: EntityKind, id: &str) -> Result<()> {
        self.owner().await.ok_or(SyncError::NotAuthenticated)?;

        let prior = self.state.update(|ws| {
            let prior = Prior::capture(ws, kind, id);
            ws.remove(kind, id);
            prior
        });
        self.notify(kind);

        let res = {
            let _ticket = self.gate.begin();
            self.store.remove(kind, id).await
        };

        if let Err(e) = res {
            self.roll_back(kind, prior, &e);
            return Err(e);
        }
        log::debug!("[SESSION] deleted {} {}", kind, id);
        Ok(())
    }

    async fn write_through<F, Fut>(&self, optimistic: Record, write: F) -> Result<Record>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Record>>,
    {
        let kind = optimistic.kind();
        let prior = self.state.update(|ws| {
            let prior = Prior::capture(ws, kind, optimistic.id());
            ws.upsert(optimistic);
            prior
        });
        self.notify(kind);

        let res = {
            let _ticket = self.gate.begin();
            write().await
        };

        match res {
            Ok(saved) => {
                self.state.update(|ws| ws.upsert(saved.clone()));
                self.notify(kind);
                log::debug!("[SESSION] saved {} {}", kind, saved.id());
                Ok(saved)
            }
            Err(e) => {
                self.roll_back(kind, prior, &e);
                Err(e)
            }
        }
    }

    fn roll_back(&self, kind: EntityKind, prior: Prior, err: &SyncError) {
        log::error!("[SESSION] {} write failed, rolling back: {}", kind, err);
        self.state.update(|ws| prior.restore(ws));
        self.notify(kind);
        self.observers.notice(SyncNotice::TransientFailure {
            message: err.to_string(),
            retryable: err.is_retryable(),
        });
    }

    fn notify(&self, kind: EntityKind) {
        let snapshot = self.state.snapshot();
        self.observers.notify(surfaces_for(kind), &snapshot);
    }
}
