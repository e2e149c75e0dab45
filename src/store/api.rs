use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BackendError;
use crate::records::normalize::row_author;
use crate::records::{EntityKind, RemoteRow};

/// Which of the two interchangeable backends serves an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Hosted,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => f.write_str("local"),
            BackendKind::Hosted => f.write_str("hosted"),
        }
    }
}

/// Newest change seen in a collection: when, and by whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityMarker {
    pub at: DateTime<Utc>,
    pub author: String,
}

impl ActivityMarker {
    /// Builds a marker from a row's `created_at` and its author stamp.
    pub fn from_row(row: &RemoteRow) -> Option<Self> {
        Self::from_row_at(row, "created_at")
    }

    /// Same, reading the timestamp from `column`.
    ///
    /// Rows written without an author stamp get an empty author, so they
    /// never pass for a write of the current session.
    pub fn from_row_at(row: &RemoteRow, column: &str) -> Option<Self> {
        let at = row
            .get(column)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())?
            .with_timezone(&Utc);
        let author = row_author(row).unwrap_or_default().to_string();
        Some(Self { at, author })
    }
}

/// Uniform row-level access to one backend.
///
/// Rows travel in the remote (snake_case) shape; normalization happens in
/// [`crate::store::RecordStore`].
#[async_trait]
pub trait RecordBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// All rows of `entity` owned by `owner_id`.
    async fn fetch_all(&self, entity: EntityKind, owner_id: &str)
        -> Result<Vec<RemoteRow>, BackendError>;

    /// Inserts a row; fails with [`BackendError::Duplicate`] if the id exists.
    async fn insert(&self, entity: EntityKind, row: RemoteRow) -> Result<RemoteRow, BackendError>;

    async fn update(&self, entity: EntityKind, row: RemoteRow) -> Result<RemoteRow, BackendError>;

    async fn remove(&self, entity: EntityKind, id: &str) -> Result<(), BackendError>;

    /// Timestamp and author of the newest row, without fetching the collection.
    async fn latest_activity(
        &self,
        entity: EntityKind,
        owner_id: &str,
    ) -> Result<Option<ActivityMarker>, BackendError>;
}
