//! Hosted relational backend over a PostgREST-style REST interface.
//!
//! Row-level security scopes every table to the bearer's owner, so the
//! session has to be valid before any request goes out.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;

use crate::auth::AuthProvider;
use crate::error::{BackendError, SyncError};
use crate::records::normalize::row_id;
use crate::records::{EntityKind, RemoteRow};

use super::api::{ActivityMarker, BackendKind, RecordBackend};

/// Sessions this close to expiry are refreshed before use.
const EXPIRY_LEEWAY_SECS: i64 = 30;

pub const DEFAULT_ACTIVITY_COLUMN: &str = "created_at";

pub struct HostedStore {
    client: Client,
    base_url: String,
    anon_key: String,
    auth: Arc<dyn AuthProvider>,
    activity_column: String,
}

impl HostedStore {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            auth,
            activity_column: DEFAULT_ACTIVITY_COLUMN.to_string(),
        }
    }

    /// Timestamp column the activity probe orders by. Point it at an
    /// `updated_at` column, where the schema has one, so edits to existing
    /// rows count as activity too.
    pub fn with_activity_column(mut self, column: impl Into<String>) -> Self {
        self.activity_column = column.into();
        self
    }

    fn table_url(&self, entity: EntityKind) -> String {
        format!("{}/rest/v1/{}", self.base_url, entity.table())
    }

    /// Access token for the current session, refreshing it once if stale.
    async fn bearer(&self) -> Result<String, BackendError> {
        match self.auth.session().await {
            Some(s) if !s.is_expired(Duration::seconds(EXPIRY_LEEWAY_SECS)) => Ok(s.access_token),
            Some(_) => {
                log::debug!("[HOSTED] session near expiry, refreshing");
                self.refresh().await
            }
            None => Err(BackendError::Unauthorized),
        }
    }

    async fn refresh(&self) -> Result<String, BackendError> {
        match self.auth.refresh_session().await {
            Ok(s) => Ok(s.access_token),
            Err(SyncError::NotAuthenticated) => Err(BackendError::Unauthorized),
            Err(e) => Err(BackendError::Unavailable(e.to_string())),
        }
    }

    fn request(&self, method: Method, url: &str, token: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
    }

    /// Sends a request; on 401 refreshes the session once and resends.
    async fn send(
        &self,
        build: impl Fn(&str) -> RequestBuilder,
        id: Option<&str>,
    ) -> Result<Response, BackendError> {
        let token = self.bearer().await?;
        let resp = build(&token).send().await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return check(resp, id).await;
        }

        log::debug!("[HOSTED] 401, retrying with a refreshed session");
        let token = self.refresh().await?;
        check(build(&token).send().await?, id).await
    }

    async fn rows(resp: Response) -> Result<Vec<RemoteRow>, BackendError> {
        let body: Value = resp.json().await?;
        rows_of(body)
    }
}

#[async_trait]
impl RecordBackend for HostedStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Hosted
    }

    async fn fetch_all(
        &self,
        entity: EntityKind,
        owner_id: &str,
    ) -> Result<Vec<RemoteRow>, BackendError> {
        let url = self.table_url(entity);
        let query = activity_query(owner_id, &self.activity_column);
        let resp = self
            .send(|t| self.request(Method::GET, &url, t).query(&query), None)
            .await?;
        Ok(Self::rows(resp)
            .await?
            .first()
            .and_then(|row| ActivityMarker::from_row_at(row, &self.activity_column)))
    }
}

/// Newest row of one owner by `column`.
pub fn activity_query(owner_id: &str, column: &str) -> [(&'static str, String); 4] {
    [
        ("user_id", format!("eq.{owner_id}")),
        ("select", "*".to_string()),
        ("order", format!("{column}.desc.nullslast")),
        ("limit", "1".to_string()),
    ]
}

async fn check(resp: Response, id: Option<&str>) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(classify_status(status, &body, id))
}

/// Maps a non-success HTTP status to a backend error.
pub fn classify_status(status: StatusCode, body: &str, id: Option<&str>) -> BackendError {
    match status {
        StatusCode::CONFLICT => BackendError::Duplicate(id.unwrap_or_default().to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthorized,
        StatusCode::NOT_FOUND => BackendError::NotFound(id.unwrap_or_default().to_string()),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            BackendError::Unavailable(format!("{status}: {body}"))
        }
        s if s.is_server_error() => BackendError::Unavailable(format!("{status}: {body}")),
        s => BackendError::Unavailable(format!("unexpected {s}: {body}")),
    }
}

fn rows_of(body: Value) -> Result<Vec<RemoteRow>, BackendError> {
    match body {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                other => {
                    log::warn!("[HOSTED] skipping non-object row: {}", other);
                    None
                }
            })
            .collect()),
        Value::Object(map) => Ok(vec![map]),
        Value::Null => Ok(Vec::new()),
        other => Err(BackendError::Unavailable(format!(
            "unexpected response body: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            classify_status(StatusCode::CONFLICT, "dup", Some("a")),
            BackendError::Duplicate(id) if id == "a"
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, "", None),
            BackendError::Unauthorized
        ));
        let unavailable = classify_status(StatusCode::BAD_GATEWAY, "upstream", None);
        assert!(unavailable.is_transient());
        assert!(!classify_status(StatusCode::CONFLICT, "", None).is_transient());
    }

    #[test]
    fn response_bodies_become_rows() {
        let rows = rows_of(json!([{ "id": "a" }, 3, { "id": "b" }])).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows_of(json!({ "id": "c" })).unwrap().len(), 1);
        assert!(rows_of(Value::Null).unwrap().is_empty());
        assert!(rows_of(json!("nope")).is_err());
    }

    #[test]
    fn activity_query_orders_by_the_configured_column() {
        let q = activity_query("u1", DEFAULT_ACTIVITY_COLUMN);
        assert!(q.contains(&("order", "created_at.desc.nullslast".to_string())));
        assert!(q.contains(&("user_id", "eq.u1".to_string())));

        let q = activity_query("u1", "updated_at");
        assert!(q.contains(&("order", "updated_at.desc.nullslast".to_string())));
    }

    #[test]
    fn edits_count_as_activity_with_an_update_column() {
        let row = json!({
            "id": "a",
            "user_id": "u1",
            "created_by": "device-2",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-06-01T00:00:00Z",
        });
        let row = row.as_object().unwrap();

        let created = ActivityMarker::from_row(row).unwrap();
        let updated = ActivityMarker::from_row_at(row, "updated_at").unwrap();
        assert!(updated.at > created.at);
        assert_eq!(updated.author, "device-2");
    }

    #[test]
    fn table_urls_are_trimmed() {
        let store = HostedStore::new(
            Client::new(),
            "https://db.example.com/",
            "key",
            Arc::new(crate::auth::LocalAuth::default()),
        );
        assert_eq!(
            store.table_url(EntityKind::SavingsHistoryEntry),
            "https://db.example.com/rest/v1/savings_history"
        );
    }
}
