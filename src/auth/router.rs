use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Result, SyncError};
use crate::persistence::SettingsStore;
use crate::store::BackendKind;

use super::api::{AuthProvider, Session, UserIdentity};

/// Delegates to the auth provider of the selected backend.
pub struct AuthRouter {
    local: Arc<dyn AuthProvider>,
    hosted: Option<Arc<dyn AuthProvider>>,
    settings: SettingsStore,
}

impl AuthRouter {
    pub fn new(local: Arc<dyn AuthProvider>, settings: SettingsStore) -> Self {
        Self {
            local,
            hosted: None,
            settings,
        }
    }

    pub fn with_hosted(mut self, hosted: Arc<dyn AuthProvider>) -> Self {
        self.hosted = Some(hosted);
        self
    }

    fn selected(&self) -> Option<Arc<dyn AuthProvider>> {
        match self.settings.backend() {
            BackendKind::Local => Some(self.local.clone()),
            BackendKind::Hosted => self.hosted.clone(),
        }
    }

    fn require(&self) -> Result<Arc<dyn AuthProvider>> {
        self.selected()
            .ok_or_else(|| SyncError::Auth("hosted auth is not configured".into()))
    }
}

#[async_trait]
impl AuthProvider for AuthRouter {
    async fn current_user(&self) -> Option<UserIdentity> {
        self.selected()?.current_user().await
    }

    async fn session(&self) -> Option<Session> {
        self.selected()?.session().await
    }

    async fn refresh_session(&self) -> Result<Session> {
        self.require()?.refresh_session().await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        self.require()?.sign_in(email, password).await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<UserIdentity> {
        self.require()?.sign_up(email, password).await
    }

    async fn sign_out(&self) -> Result<()> {
        self.require()?.sign_out().await
    }
}
