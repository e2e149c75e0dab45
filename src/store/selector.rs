//! The record store adapter: one interface over both backends.
//!
//! The backend selector flag is read from settings on every call, so a toggle
//! takes effect on the very next operation. Each operation gets at most one
//! retry, and only for transient failures.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{BackendError, Result, StoreOp, SyncError};
use crate::persistence::SettingsStore;
use crate::records::normalize::stamp_author;
use crate::records::{ensure_id, to_internal, to_remote, EntityKind, Record, RemoteRow};

use super::api::{ActivityMarker, BackendKind, RecordBackend};

#[derive(Clone)]
pub struct RecordStore {
    local: Arc<dyn RecordBackend>,
    hosted: Option<Arc<dyn RecordBackend>>,
    settings: SettingsStore,
    retry_delay: Duration,
    actor_id: Option<String>,
}

impl RecordStore {
    pub fn new(local: Arc<dyn RecordBackend>, settings: SettingsStore) -> Self {
        Self {
            local,
            hosted: None,
            settings,
            retry_delay: Duration::from_millis(500),
            actor_id: None,
        }
    }

    pub fn with_hosted(mut self, hosted: Arc<dyn RecordBackend>) -> Self {
        self.hosted = Some(hosted);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Stamps every inserted or updated row with `actor_id`.
    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn active_backend(&self) -> BackendKind {
        self.settings.backend()
    }

    fn select(&self, kind: EntityKind, op: StoreOp) -> Result<Arc<dyn RecordBackend>> {
        match self.settings.backend() {
            BackendKind::Local => Ok(self.local.clone()),
            BackendKind::Hosted => self
                .hosted
                .clone()
                .ok_or_else(|| SyncError::from_backend(kind, op, BackendError::NotConfigured)),
        }
    }

    /// Runs `call` against the selected backend, retrying once after
    /// `retry_delay` if the first failure is transient.
    async fn run<T, F, Fut>(&self, kind: EntityKind, op: StoreOp, call: F) -> Result<T>
    where
        F: Fn(Arc<dyn RecordBackend>) -> Fut,
        Fut: Future<Output = std::result::Result<T, BackendError>>,
    {
        let backend = self.select(kind, op)?;
        log::trace!("[STORE] {} {} via {}", kind, op, backend.kind());

        match call(backend.clone()).await {
            Ok(v) => Ok(v),
            Err(e) if e.is_transient() => {
                log::warn!("[STORE] {} {} failed ({}), retrying once", kind, op, e);
                tokio::time::sleep(self.retry_delay).await;
                call(backend)
                    .await
                    .map_err(|e| SyncError::from_backend(kind, op, e))
            }
            Err(e) => Err(SyncError::from_backend(kind, op, e)),
        }
    }

    /// All records of `kind` owned by `owner_id`, normalized.
    ///
    /// Rows that cannot be normalized are logged and skipped.
    pub async fn fetch_all(&self, kind: EntityKind, owner_id: &str) -> Result<Vec<Record>> {
        let rows = self
            .run(kind, StoreOp::FetchAll, |b| async move {
                b.fetch_all(kind, owner_id).await
            })
            .await?;

        let total = rows.len();
        let records: Vec<Record> = rows
            .iter()
            .filter_map(|row| match to_internal(kind, row) {
                Ok(r) => Some(r),
                Err(e) => {
                    log::warn!("[STORE] skipping row: {}", e);
                    None
                }
            })
            .collect();

        log::debug!("[STORE] fetched {}/{} {} rows for {}", records.len(), total, kind, owner_id);
        Ok(records)
    }

    /// Inserts a record, assigning an id first if it has none.
    ///
    /// A duplicate id means an earlier attempt already landed; the insert
    /// becomes an update so retried inserts are idempotent.
    pub async fn insert(&self, mut record: Record) -> Result<Record> {
        ensure_id(&mut record);
        let kind = record.kind();
        let row = self.outgoing(&record);

        let res = self
            .run(kind, StoreOp::Insert, |b| {
                let row = row.clone();
                async move { b.insert(kind, row).await }
            })
            .await;

        match res {
            Ok(saved) => Ok(to_internal(kind, &saved).unwrap_or(record)),
            Err(SyncError::DuplicateIdentifier { id, .. }) => {
                log::info!("[STORE] {} {} already exists, updating instead", kind, id);
                self.update(record).await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn update(&self, record: Record) -> Result<Record> {
        let kind = record.kind();
        let row = self.outgoing(&record);

        let saved = self
            .run(kind, StoreOp::Update, |b| {
                let row = row.clone();
                async move { b.update(kind, row).await }
            })
            .await?;
        Ok(to_internal(kind, &saved).unwrap_or(record))
    }

    fn outgoing(&self, record: &Record) -> RemoteRow {
        let mut row = to_remote(record);
        if let Some(actor) = &self.actor_id {
            stamp_author(&mut row, actor);
        }
        row
    }

    pub async fn remove(&self, kind: EntityKind, id: &str) -> Result<()> {
        self.run(kind, StoreOp::Remove, |b| async move { b.remove(kind, id).await })
            .await?;
        log::debug!("[STORE] removed {} {}", kind, id);
        Ok(())
    }

    /// Newest activity in a collection, for cheap change detection.
    pub async fn latest_activity(
        &self,
        kind: EntityKind,
        owner_id: &str,
    ) -> Result<Option<ActivityMarker>> {
        self.run(kind, StoreOp::LatestActivity, |b| async move {
            b.latest_activity(kind, owner_id).await
        })
        .await
    }
}
