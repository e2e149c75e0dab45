//! In-memory backend for tests: records calls and injects failures.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::{BackendError, StoreOp};
use crate::records::normalize::{row_id, row_owner};
use crate::records::{EntityKind, RemoteRow};

use super::api::{ActivityMarker, BackendKind, RecordBackend};

#[derive(Debug, Default)]
struct MockState {
    rows: HashMap<EntityKind, Vec<RemoteRow>>,
    calls: Vec<(StoreOp, EntityKind)>,
    /// (kind, op) -> remaining forced failures
    failures: HashMap<(EntityKind, StoreOp), (u32, fn() -> BackendError)>,
    activity: HashMap<EntityKind, ActivityMarker>,
}

#[derive(Debug)]
pub struct MockBackend {
    kind: BackendKind,
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn seed(&self, entity: EntityKind, rows: Vec<RemoteRow>) {
        self.state().rows.insert(entity, rows);
    }

    pub fn rows(&self, entity: EntityKind) -> Vec<RemoteRow> {
        self.state().rows.get(&entity).cloned().unwrap_or_default()
    }

    pub fn set_activity(&self, entity: EntityKind, marker: ActivityMarker) {
        self.state().activity.insert(entity, marker);
    }

    /// The next `times` calls of `op` on `entity` fail as transient outages.
    pub fn fail(&self, entity: EntityKind, op: StoreOp, times: u32) {
        self.fail_with(entity, op, times, || {
            BackendError::Unavailable("injected outage".into())
        });
    }

    pub fn fail_with(&self, entity: EntityKind, op: StoreOp, times: u32, err: fn() -> BackendError) {
        self.state().failures.insert((entity, op), (times, err));
    }

    pub fn calls(&self) -> Vec<(StoreOp, EntityKind)> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn enter(&self, op: StoreOp, entity: EntityKind) -> Result<MutexGuard<'_, MockState>, BackendError> {
        let mut s = self.state();
        s.calls.push((op, entity));
        if let Some((left, make_err)) = s.failures.get_mut(&(entity, op)) {
            if *left > 0 {
                *left -= 1;
                let make_err = *make_err;
                return Err(make_err());
            }
        }
        Ok(s)
    }
}

#[async_trait]
impl RecordBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn fetch_all(
        &self,
        entity: EntityKind,
        owner_id: &str,
    ) -> Result<Vec<RemoteRow>, BackendError> {
        let s = self.enter(StoreOp::FetchAll, entity)?;
        Ok(s.rows
            .get(&entity)
            .map(|rows| {
                rows.iter()
                    .filter(|r| row_owner(r).map_or(true, |o| o == owner_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, entity: EntityKind, row: RemoteRow) -> Result<RemoteRow, BackendError> {
        let mut s = self.enter(StoreOp::Insert, entity)?;
        let id = row_id(&row).unwrap_or_default();
        let rows = s.rows.entry(entity).or_default();
        if rows.iter().any(|r| row_id(r).as_deref() == Some(id.as_str())) {
            return Err(BackendError::Duplicate(id));
        }
        rows.push(row.clone());
        Ok(row)
    }

    async fn update(&self, entity: EntityKind, row: RemoteRow) -> Result<RemoteRow, BackendError> {
        let mut s = self.enter(StoreOp::Update, entity)?;
        let id = row_id(&row).unwrap_or_default();
        let rows = s.rows.entry(entity).or_default();
        match rows.iter_mut().find(|r| row_id(r).as_deref() == Some(id.as_str())) {
            Some(slot) => {
                *slot = row.clone();
                Ok(row)
            }
            None => Err(BackendError::NotFound(id)),
        }
    }

    async fn remove(&self, entity: EntityKind, id: &str) -> Result<(), BackendError> {
        let mut s = self.enter(StoreOp::Remove, entity)?;
        if let Some(rows) = s.rows.get_mut(&entity) {
            rows.retain(|r| row_id(r).as_deref() != Some(id));
        }
        Ok(())
    }

    async fn latest_activity(
        &self,
        entity: EntityKind,
        _owner_id: &str,
    ) -> Result<Option<ActivityMarker>, BackendError> {
        let s = self.enter(StoreOp::LatestActivity, entity)?;
        Ok(s.activity.get(&entity).cloned())
    }
}
