use std::path::PathBuf;
use std::time::Duration;

use crate::persistence::default_config_dir;
use crate::store::hosted::DEFAULT_ACTIVITY_COLUMN;

pub const ENV_URL: &str = "LEDGER_SYNC_URL";
pub const ENV_ANON_KEY: &str = "LEDGER_SYNC_ANON_KEY";
pub const ENV_ACTIVITY_COLUMN: &str = "LEDGER_SYNC_ACTIVITY_COLUMN";

/// Runtime configuration for a sync session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the hosted backend (REST, auth and realtime share it).
    pub hosted_url: Option<String>,
    /// Public API key sent with every hosted request.
    pub anon_key: Option<String>,
    /// Hosted timestamp column the poller watches (`updated_at` if the
    /// schema has one).
    pub activity_column: String,
    /// Directory holding the local database and settings file.
    pub data_dir: PathBuf,
    /// Background poll period, armed whenever sync is running.
    pub slow_interval: Duration,
    /// Foreground poll period, armed only while the surface is visible.
    pub fast_interval: Duration,
    /// How long reloads stay suppressed after a self-authored write.
    pub settle_window: Duration,
    /// Delay before the adapter's single retry of a transient failure.
    pub retry_delay: Duration,
    /// Realtime socket heartbeat.
    pub heartbeat: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            hosted_url: None,
            anon_key: None,
            activity_column: DEFAULT_ACTIVITY_COLUMN.to_string(),
            data_dir: default_config_dir(),
            slow_interval: Duration::from_secs(20),
            fast_interval: Duration::from_secs(3),
            settle_window: Duration::from_millis(1500),
            retry_delay: Duration::from_millis(500),
            heartbeat: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    /// Defaults with the hosted endpoint taken from the environment.
    pub fn from_env() -> Self {
        Self {
            hosted_url: std::env::var(ENV_URL).ok().filter(|s| !s.is_empty()),
            anon_key: std::env::var(ENV_ANON_KEY).ok().filter(|s| !s.is_empty()),
            activity_column: std::env::var(ENV_ACTIVITY_COLUMN)
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_ACTIVITY_COLUMN.to_string()),
            ..Self::default()
        }
    }

    pub fn hosted_configured(&self) -> bool {
        self.hosted_url.is_some() && self.anon_key.is_some()
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("ledger.db")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(crate::persistence::SETTINGS_FILE)
    }
}
