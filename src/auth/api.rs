use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Authenticated owner identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Bearer credential for the hosted services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub user: UserIdentity,
}

impl Session {
    /// Expired, or about to expire within `leeway`.
    pub fn is_expired(&self, leeway: Duration) -> bool {
        self.expires_at
            .is_some_and(|at| at - leeway <= Utc::now())
    }
}

/// Identity source shared by the adapter, the dispatcher and the session.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Signed-in user, if any. Never touches the network.
    async fn current_user(&self) -> Option<UserIdentity>;

    /// Current session, if one exists (it may be expired).
    async fn session(&self) -> Option<Session>;

    /// Exchanges the refresh credential for a new session.
    async fn refresh_session(&self) -> Result<Session>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<UserIdentity>;

    async fn sign_out(&self) -> Result<()>;
}
