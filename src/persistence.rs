//! Durable client settings: the backend selector flag and the polling cursor.
//!
//! The file is re-read on every access so a toggle made by another process
//! (or another session object) takes effect on the next operation.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::store::BackendKind;

pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Backend selector: hosted relational store when true, local otherwise.
    #[serde(default)]
    pub use_hosted_backend: bool,

    /// Timestamp of the newest record already observed by the poller.
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Settings {
    pub fn backend(&self) -> BackendKind {
        if self.use_hosted_backend {
            BackendKind::Hosted
        } else {
            BackendKind::Local
        }
    }
}

/// File-backed settings store. Cheap to clone; clones share a write lock.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// `<config dir>/ledger-sync/settings.json`.
    pub fn default_location() -> Self {
        Self::new(default_config_dir().join(SETTINGS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable files yield defaults.
    pub fn load(&self) -> Settings {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_unlocked()
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_unlocked(settings)
    }

    /// Read-modify-write under the store lock.
    pub fn update(&self, f: impl FnOnce(&mut Settings)) -> Result<Settings> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut settings = self.read_unlocked();
        f(&mut settings);
        self.write_unlocked(&settings)?;
        Ok(settings)
    }

    pub fn backend(&self) -> BackendKind {
        self.load().backend()
    }

    pub fn set_backend(&self, backend: BackendKind) -> Result<()> {
        self.update(|s| s.use_hosted_backend = backend == BackendKind::Hosted)?;
        log::info!("[SETTINGS] backend selector set to {}", backend);
        Ok(())
    }

    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.load().last_seen_at
    }

    /// Moves the cursor forward only. Returns true if it moved.
    pub fn advance_cursor(&self, at: DateTime<Utc>) -> Result<bool> {
        let mut moved = false;
        self.update(|s| {
            if s.last_seen_at.map_or(true, |cur| at > cur) {
                s.last_seen_at = Some(at);
                moved = true;
            }
        })?;
        if moved {
            log::debug!("[SETTINGS] cursor advanced to {}", at);
        }
        Ok(moved)
    }

    pub fn reset_cursor(&self) -> Result<()> {
        self.update(|s| s.last_seen_at = None).map(|_| ())
    }

    fn read_unlocked(&self) -> Settings {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return Settings::default(),
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("[SETTINGS] {} is unreadable ({}), using defaults", self.path.display(), e);
            Settings::default()
        })
    }

    fn write_unlocked(&self, settings: &Settings) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(settings)
            .map_err(|e| SyncError::Settings(e.to_string()))?;
        std::fs::write(&self.path, format!("{json}\n"))?;
        Ok(())
    }
}

pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ledger-sync")
}
