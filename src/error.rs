use std::fmt;

use thiserror::Error;

use crate::records::EntityKind;

/// Operation attempted against a record backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    FetchAll,
    Insert,
    Update,
    Remove,
    LatestActivity,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoreOp::FetchAll => "fetch_all",
            StoreOp::Insert => "insert",
            StoreOp::Update => "update",
            StoreOp::Remove => "remove",
            StoreOp::LatestActivity => "latest_activity",
        };
        f.write_str(s)
    }
}

/// Leaf failure reported by one of the two record backends.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("row {0} already exists")]
    Duplicate(String),

    #[error("request was not authorized")]
    Unauthorized,

    #[error("row {0} not found")]
    NotFound(String),

    #[error("hosted backend is not configured")]
    NotConfigured,

    #[error("local store error: {0}")]
    Local(#[from] rusqlite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl BackendError {
    /// Failures worth a single retry.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Unavailable(_) => true,
            BackendError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

/// Error taxonomy surfaced by the sync core.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("{kind} {op} failed: {reason}")]
    BackendUnavailable {
        kind: EntityKind,
        op: StoreOp,
        reason: String,
    },

    #[error("{kind} row is missing `{field}`")]
    ShapeMismatch {
        kind: EntityKind,
        field: &'static str,
    },

    #[error("{kind} {id} already exists")]
    DuplicateIdentifier { kind: EntityKind, id: String },

    #[error("auth provider error: {0}")]
    Auth(String),

    #[error("settings error: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Wraps a backend failure with the kind and operation it belongs to.
    pub fn from_backend(kind: EntityKind, op: StoreOp, err: BackendError) -> Self {
        match err {
            BackendError::Unauthorized => SyncError::NotAuthenticated,
            BackendError::Duplicate(id) => SyncError::DuplicateIdentifier { kind, id },
            other => SyncError::BackendUnavailable {
                kind,
                op,
                reason: other.to_string(),
            },
        }
    }

    /// Whether a user-facing retry makes sense for this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::BackendUnavailable { .. } | SyncError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
