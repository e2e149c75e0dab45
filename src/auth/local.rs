//! Auth for the local backend: a single fixed identity on this device.
//!
//! Also stands in for the hosted provider in tests, so sign-out and refresh
//! outcomes can be forced.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;

use crate::error::{Result, SyncError};

use super::api::{AuthProvider, Session, UserIdentity};

pub const LOCAL_USER_ID: &str = "local-user";

#[derive(Debug)]
pub struct LocalAuth {
    user: UserIdentity,
    signed_in: AtomicBool,
    refresh_fails: AtomicBool,
    refreshes: AtomicU32,
}

impl Default for LocalAuth {
    fn default() -> Self {
        Self::new(LOCAL_USER_ID)
    }
}

impl LocalAuth {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user: UserIdentity {
                id: user_id.into(),
                email: None,
            },
            signed_in: AtomicBool::new(true),
            refresh_fails: AtomicBool::new(false),
            refreshes: AtomicU32::new(0),
        }
    }

    pub fn signed_out(self) -> Self {
        self.signed_in.store(false, Ordering::SeqCst);
        self
    }

    /// Makes every following `refresh_session` fail.
    pub fn fail_refresh(&self, fail: bool) {
        self.refresh_fails.store(fail, Ordering::SeqCst);
    }

    /// How many times `refresh_session` was called.
    pub fn refresh_count(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn local_session(&self) -> Session {
        Session {
            access_token: format!("local:{}", self.user.id),
            refresh_token: None,
            expires_at: None,
            user: self.user.clone(),
        }
    }
}

#[async_trait]
impl AuthProvider for LocalAuth {
    async fn current_user(&self) -> Option<UserIdentity> {
        self.signed_in
            .load(Ordering::SeqCst)
            .then(|| self.user.clone())
    }

    async fn session(&self) -> Option<Session> {
        self.signed_in
            .load(Ordering::SeqCst)
            .then(|| self.local_session())
    }

    async fn refresh_session(&self) -> Result<Session> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.refresh_fails.load(Ordering::SeqCst) {
            return Err(SyncError::Auth("refresh rejected".into()));
        }
        if !self.signed_in.load(Ordering::SeqCst) {
            return Err(SyncError::NotAuthenticated);
        }
        log::debug!("[AUTH] local session refreshed for {}", self.user.id);
        Ok(self.local_session())
    }

    async fn sign_in(&self, _email: &str, _password: &str) -> Result<Session> {
        self.signed_in.store(true, Ordering::SeqCst);
        log::info!("[AUTH] local sign-in as {}", self.user.id);
        Ok(self.local_session())
    }

    async fn sign_up(&self, _email: &str, _password: &str) -> Result<UserIdentity> {
        Ok(self.user.clone())
    }

    async fn sign_out(&self) -> Result<()> {
        self.signed_in.store(false, Ordering::SeqCst);
        log::info!("[AUTH] local sign-out");
        Ok(())
    }
}
