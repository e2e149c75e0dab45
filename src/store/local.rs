//! Embedded local backend: a generic collection store over SQLite.
//!
//! Exposes the get / get_all / add / put / delete collection primitive and
//! implements [`RecordBackend`] on top of it. Bodies are stored as JSON in
//! the remote row shape.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;

use crate::error::BackendError;
use crate::records::normalize::{row_id, row_owner};
use crate::records::{EntityKind, RemoteRow};
use crate::streaming::channel::LocalChangeFeed;
use crate::streaming::types::{ChangeNotification, ChangeOp};

use super::api::{ActivityMarker, BackendKind, RecordBackend};

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS collections (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    owner_id TEXT NOT NULL DEFAULT '',
    body TEXT NOT NULL,
    created_at TEXT NOT NULL,
    changed_at TEXT NOT NULL,
    PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_collections_owner
    ON collections (collection, owner_id, changed_at);
";

pub struct LocalStore {
    conn: Mutex<Connection>,
    feed: Option<LocalChangeFeed>,
}

impl LocalStore {
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| BackendError::Unavailable(format!("cannot create {}: {e}", dir.display())))?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, BackendError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, BackendError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            feed: None,
        })
    }

    /// Publishes every mutation on `feed`.
    pub fn with_feed(mut self, feed: LocalChangeFeed) -> Self {
        self.feed = Some(feed);
        self
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ================================
    // Collection primitives
    // ================================

    pub fn get(&self, collection: &str, id: &str) -> Result<Option<RemoteRow>, BackendError> {
        let body: Option<String> = self
            .conn()
            .query_row(
                "SELECT body FROM collections WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |r| r.get(0),
            )
            .optional()?;
        body.map(|b| parse_body(&b)).transpose()
    }

    pub fn get_all(&self, collection: &str) -> Result<Vec<RemoteRow>, BackendError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT body FROM collections WHERE collection = ?1 ORDER BY created_at DESC",
        )?;
        let bodies = stmt
            .query_map(params![collection], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        bodies.iter().map(|b| parse_body(b)).collect()
    }

    /// Inserts a new row; an existing id is a [`BackendError::Duplicate`].
    pub fn add(&self, collection: &str, mut row: RemoteRow) -> Result<RemoteRow, BackendError> {
        let id = require_id(&row)?;
        let now = now_stamp();
        row.entry("created_at")
            .or_insert_with(|| Value::String(now.clone()));
        let created_at = stamp_of(&row).unwrap_or_else(|| now.clone());
        let owner = row_owner(&row).unwrap_or_default().to_string();
        let body = serde_json::to_string(&row)?;

        let res = self.conn().execute(
            "INSERT INTO collections (collection, id, owner_id, body, created_at, changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![collection, id, owner, body, created_at, now],
        );

        match res {
            Ok(_) => Ok(row),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(BackendError::Duplicate(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Inserts or replaces a row, keeping the original `created_at`.
    pub fn put(&self, collection: &str, mut row: RemoteRow) -> Result<RemoteRow, BackendError> {
        let id = require_id(&row)?;
        let now = now_stamp();

        if !row.contains_key("created_at") {
            let created = self
                .get(collection, &id)?
                .and_then(|old| old.get("created_at").cloned())
                .unwrap_or_else(|| Value::String(now.clone()));
            row.insert("created_at".into(), created);
        }
        let created_at = stamp_of(&row).unwrap_or_else(|| now.clone());
        let owner = row_owner(&row).unwrap_or_default().to_string();
        let body = serde_json::to_string(&row)?;

        self.conn().execute(
            "INSERT INTO collections (collection, id, owner_id, body, created_at, changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (collection, id) DO UPDATE SET
                owner_id = excluded.owner_id,
                body = excluded.body,
                changed_at = excluded.changed_at",
            params![collection, id, owner, body, created_at, now],
        )?;
        Ok(row)
    }

    /// Removes a row, returning it if it existed.
    pub fn delete(&self, collection: &str, id: &str) -> Result<Option<RemoteRow>, BackendError> {
        let old = self.get(collection, id)?;
        self.conn().execute(
            "DELETE FROM collections WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        Ok(old)
    }

    fn publish(&self, op: ChangeOp, kind: EntityKind, payload: RemoteRow) {
        if let Some(feed) = &self.feed {
            feed.publish(ChangeNotification { op, kind, payload });
        }
    }
}

#[async_trait]
impl RecordBackend for LocalStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn fetch_all(
        &self,
        entity: EntityKind,
        owner_id: &str,
    ) -> Result<Vec<RemoteRow>, BackendError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT body FROM collections
             WHERE collection = ?1 AND owner_id = ?2
             ORDER BY created_at DESC",
        )?;
        let bodies = stmt
            .query_map(params![entity.table(), owner_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!("[LOCAL] fetch_all {} -> {} rows", entity, bodies.len());
        bodies.iter().map(|b| parse_body(b)).collect()
    }

    async fn insert(&self, entity: EntityKind, row: RemoteRow) -> Result<RemoteRow, BackendError> {
        let saved = self.add(entity.table(), row)?;
        self.publish(ChangeOp::Insert, entity, saved.clone());
        Ok(saved)
    }

    async fn update(&self, entity: EntityKind, row: RemoteRow) -> Result<RemoteRow, BackendError> {
        let saved = self.put(entity.table(), row)?;
        self.publish(ChangeOp::Update, entity, saved.clone());
        Ok(saved)
    }

    async fn remove(&self, entity: EntityKind, id: &str) -> Result<(), BackendError> {
        if let Some(old) = self.delete(entity.table(), id)? {
            self.publish(ChangeOp::Delete, entity, old);
        }
        Ok(())
    }

    async fn latest_activity(
        &self,
        entity: EntityKind,
        owner_id: &str,
    ) -> Result<Option<ActivityMarker>, BackendError> {
        let found: Option<(String, String)> = self
            .conn()
            .query_row(
                "SELECT body, changed_at FROM collections
                 WHERE collection = ?1 AND owner_id = ?2
                 ORDER BY changed_at DESC LIMIT 1",
                params![entity.table(), owner_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let Some((body, changed_at)) = found else {
            return Ok(None);
        };

        // updates count as activity locally, so stamp with changed_at
        let mut row = parse_body(&body)?;
        row.insert("created_at".into(), Value::String(changed_at));
        Ok(ActivityMarker::from_row(&row))
    }
}

fn parse_body(body: &str) -> Result<RemoteRow, BackendError> {
    match serde_json::from_str::<Value>(body)? {
        Value::Object(map) => Ok(map),
        other => Err(BackendError::Unavailable(format!(
            "stored body is not an object: {other}"
        ))),
    }
}

fn require_id(row: &RemoteRow) -> Result<String, BackendError> {
    row_id(row).ok_or_else(|| BackendError::Unavailable("row has no id".into()))
}

fn stamp_of(row: &RemoteRow) -> Option<String> {
    let raw = row.get("created_at")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
