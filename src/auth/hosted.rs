//! Password auth against the hosted service's `/auth/v1` endpoints.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::error::{Result, SyncError};

use super::api::{AuthProvider, Session, UserIdentity};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: UserIdentity,
}

impl From<TokenResponse> for Session {
    fn from(t: TokenResponse) -> Self {
        Session {
            access_token: t.access_token,
            refresh_token: t.refresh_token,
            expires_at: t.expires_in.map(|s| Utc::now() + Duration::seconds(s)),
            user: t.user,
        }
    }
}

/// Sign-up answers with either the bare user or a `{ user: .. }` envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Envelope { user: UserIdentity },
    User(UserIdentity),
}

pub struct HostedAuth {
    client: Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<Session>>,
}

impl HostedAuth {
    pub fn new(client: Client, base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            session: RwLock::new(None),
        }
    }

    /// Seeds the provider with a session obtained elsewhere.
    pub fn with_session(self, session: Session) -> Self {
        self.store(Some(session));
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn load(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, session: Option<Session>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    async fn token_grant(&self, grant: &str, body: serde_json::Value) -> Result<Session> {
        let resp = self
            .client
            .post(self.url(&format!("token?grant_type={grant}")))
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Auth(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::BAD_REQUEST
            || status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
        {
            return Err(SyncError::NotAuthenticated);
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SyncError::Auth(format!("{grant} grant failed ({status}): {text}")));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::Auth(e.to_string()))?;
        let session = Session::from(token);
        self.store(Some(session.clone()));
        Ok(session)
    }
}

#[async_trait]
impl AuthProvider for HostedAuth {
    async fn current_user(&self) -> Option<UserIdentity> {
        self.load().map(|s| s.user)
    }

    async fn session(&self) -> Option<Session> {
        self.load()
    }

    async fn refresh_session(&self) -> Result<Session> {
        let refresh_token = self
            .load()
            .and_then(|s| s.refresh_token)
            .ok_or(SyncError::NotAuthenticated)?;

        log::debug!("[AUTH] refreshing hosted session");
        match self
            .token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
        {
            Ok(session) => Ok(session),
            Err(SyncError::NotAuthenticated) => {
                // refresh token revoked; the stored session is useless now
                log::warn!("[AUTH] refresh token rejected, clearing session");
                self.store(None);
                Err(SyncError::NotAuthenticated)
            }
            Err(e) => Err(e),
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let session = self
            .token_grant("password", json!({ "email": email, "password": password }))
            .await?;
        log::info!("[AUTH] signed in as {}", session.user.id);
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<UserIdentity> {
        let resp = self
            .client
            .post(self.url("signup"))
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| SyncError::Auth(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SyncError::Auth(format!("sign-up failed ({status}): {text}")));
        }

        let user = match resp
            .json::<SignUpResponse>()
            .await
            .map_err(|e| SyncError::Auth(e.to_string()))?
        {
            SignUpResponse::Envelope { user } | SignUpResponse::User(user) => user,
        };
        log::info!("[AUTH] signed up {}", user.id);
        Ok(user)
    }

    async fn sign_out(&self) -> Result<()> {
        let Some(session) = self.load() else {
            return Ok(());
        };
        self.store(None);

        let res = self
            .client
            .post(self.url("logout"))
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await;

        // the local session is gone either way
        if let Err(e) = res {
            log::warn!("[AUTH] logout request failed: {}", e);
        }
        log::info!("[AUTH] signed out {}", session.user.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_becomes_session() {
        let raw = r#"{
            "access_token": "abc",
            "refresh_token": "def",
            "expires_in": 3600,
            "token_type": "bearer",
            "user": { "id": "u-1", "email": "a@b.c", "role": "authenticated" }
        }"#;
        let session = Session::from(serde_json::from_str::<TokenResponse>(raw).unwrap());
        assert_eq!(session.user.id, "u-1");
        assert_eq!(session.refresh_token.as_deref(), Some("def"));
        assert!(!session.is_expired(Duration::seconds(60)));
        assert!(session.is_expired(Duration::seconds(7200)));
    }

    #[test]
    fn sign_up_accepts_both_shapes() {
        let bare: SignUpResponse = serde_json::from_str(r#"{"id":"u-2","email":null}"#).unwrap();
        let wrapped: SignUpResponse =
            serde_json::from_str(r#"{"user":{"id":"u-3"},"session":null}"#).unwrap();
        assert!(matches!(bare, SignUpResponse::User(u) if u.id == "u-2"));
        assert!(matches!(wrapped, SignUpResponse::Envelope { user } if user.id == "u-3"));
    }

    #[tokio::test]
    async fn seeded_session_is_reported() {
        let auth = HostedAuth::new(Client::new(), "http://localhost:1/", "key").with_session(Session {
            access_token: "t".into(),
            refresh_token: None,
            expires_at: None,
            user: UserIdentity { id: "u-9".into(), email: None },
        });
        assert_eq!(auth.current_user().await.map(|u| u.id).as_deref(), Some("u-9"));
        assert_eq!(auth.url("logout"), "http://localhost:1/auth/v1/logout");
    }

    #[tokio::test]
    async fn refresh_without_token_is_not_authenticated() {
        let auth = HostedAuth::new(Client::new(), "http://localhost:1", "key");
        assert!(matches!(
            auth.refresh_session().await,
            Err(SyncError::NotAuthenticated)
        ));
    }
}
