//! HTTP backend for the hosted data platform.
//!
//! Talks to the platform's REST query interface, auth endpoints and object
//! storage with a blocking [`ureq`] agent bridged through `spawn_blocking`;
//! change-feed subscriptions are served by the realtime WebSocket client in
//! [`super::realtime`].

use super::realtime::RealtimeHandle;
use super::{AuthSession, EventFilter, Filter, Platform, SelectQuery, SortDir, Subscription};
use crate::config::Config;
use crate::error::{Error, Result};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// [`Platform`] implementation backed by the hosted service.
pub struct HttpPlatform {
    config: Config,
    agent: ureq::Agent,
    auth_token: Mutex<Option<String>>,
    // Spawned lazily on first subscribe so construction works outside a
    // runtime.
    realtime: OnceCell<RealtimeHandle>,
}

impl HttpPlatform {
    pub fn new(config: Config) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            config,
            agent,
            auth_token: Mutex::new(None),
            realtime: OnceCell::new(),
        }
    }

    async fn bearer(&self) -> String {
        self.auth_token
            .lock()
            .await
            .clone()
            .unwrap_or_else(|| self.config.service_key.clone())
    }

    async fn realtime(&self) -> &RealtimeHandle {
        self.realtime
            .get_or_init(|| async { RealtimeHandle::spawn(self.config.clone()) })
            .await
    }

    fn select_url(&self, query: &SelectQuery) -> String {
        let mut url = format!("{}?select=*", self.config.rest_url(&query.table));
        for filter in &query.filters {
            let (column, op) = filter.to_query_pair();
            url.push_str(&format!("&{column}={op}"));
        }
        if let Some(order) = &query.order {
            let dir = match order.dir {
                SortDir::Asc => "asc",
                SortDir::Desc => "desc",
            };
            url.push_str(&format!("&order={}.{}", order.column, dir));
        }
        if let Some(limit) = query.limit {
            url.push_str(&format!("&limit={limit}"));
        }
        url
    }

    fn filtered_url(&self, table: &str, filters: &[Filter]) -> String {
        let mut url = self.config.rest_url(table);
        let mut sep = '?';
        for filter in filters {
            let (column, op) = filter.to_query_pair();
            url.push(sep);
            url.push_str(&format!("{column}={op}"));
            sep = '&';
        }
        url
    }
}

/// Turn a `ureq` error into a readable message, including the response body
/// for status errors (the platform reports details there).
fn describe(err: ureq::Error) -> String {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            if body.is_empty() {
                format!("HTTP {code}")
            } else {
                format!("HTTP {code}: {body}")
            }
        }
        ureq::Error::Transport(transport) => transport.to_string(),
    }
}

/// Parse an auth response into a session.
///
/// Sign-in returns `{ access_token, user: {...} }`; sign-up returns the bare
/// user object while the address is still unconfirmed.
fn session_from_response(body: &Value) -> Result<AuthSession> {
    let access_token = body
        .get("access_token")
        .and_then(Value::as_str)
        .map(str::to_string);
    let user = match body.get("user") {
        Some(user) if user.is_object() => user,
        _ => body,
    };
    let user_id = user
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Auth("auth response carried no user id".into()))?
        .to_string();
    let email = user
        .get("email")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(AuthSession {
        user_id,
        email,
        access_token,
    })
}

async fn run_blocking<T, F>(op: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| Error::Transport(format!("blocking task failed: {e}")))?
}

#[async_trait::async_trait]
impl Platform for HttpPlatform {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn select(&self, query: SelectQuery) -> Result<Vec<Value>> {
        let url = self.select_url(&query);
        let agent = self.agent.clone();
        let key = self.config.service_key.clone();
        let bearer = self.bearer().await;
        run_blocking(move || {
            agent
                .get(&url)
                .set("apikey", &key)
                .set("Authorization", &format!("Bearer {bearer}"))
                .call()
                .map_err(|e| Error::Query(describe(e)))?
                .into_json::<Vec<Value>>()
                .map_err(|e| Error::Query(format!("invalid response body: {e}")))
        })
        .await
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        let url = self.config.rest_url(table);
        let agent = self.agent.clone();
        let key = self.config.service_key.clone();
        let bearer = self.bearer().await;
        run_blocking(move || {
            let rows: Vec<Value> = agent
                .post(&url)
                .set("apikey", &key)
                .set("Authorization", &format!("Bearer {bearer}"))
                .set("Prefer", "return=representation")
                .send_json(row)
                .map_err(|e| Error::Query(describe(e)))?
                .into_json()
                .map_err(|e| Error::Query(format!("invalid response body: {e}")))?;
            rows.into_iter()
                .next()
                .ok_or_else(|| Error::Query("insert returned no representation".into()))
        })
        .await
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<()> {
        let url = self.filtered_url(table, filters);
        let agent = self.agent.clone();
        let key = self.config.service_key.clone();
        let bearer = self.bearer().await;
        run_blocking(move || {
            agent
                .request("PATCH", &url)
                .set("apikey", &key)
                .set("Authorization", &format!("Bearer {bearer}"))
                .set("Prefer", "return=minimal")
                .send_json(patch)
                .map_err(|e| Error::Query(describe(e)))?;
            Ok(())
        })
        .await
    }

    async fn upsert(&self, table: &str, row: Value) -> Result<()> {
        let url = self.config.rest_url(table);
        let agent = self.agent.clone();
        let key = self.config.service_key.clone();
        let bearer = self.bearer().await;
        run_blocking(move || {
            agent
                .post(&url)
                .set("apikey", &key)
                .set("Authorization", &format!("Bearer {bearer}"))
                .set("Prefer", "resolution=merge-duplicates,return=minimal")
                .send_json(row)
                .map_err(|e| Error::Query(describe(e)))?;
            Ok(())
        })
        .await
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<String> {
        let url = self.config.storage_url(bucket, path);
        let public_url = self.config.public_object_url(bucket, path);
        let agent = self.agent.clone();
        let key = self.config.service_key.clone();
        let bearer = self.bearer().await;
        let content_type = content_type.to_string();
        run_blocking(move || {
            agent
                .post(&url)
                .set("apikey", &key)
                .set("Authorization", &format!("Bearer {bearer}"))
                .set("Content-Type", &content_type)
                .send_bytes(&data)
                .map_err(|e| Error::Storage(describe(e)))?;
            Ok(public_url)
        })
        .await
    }

    async fn subscribe(&self, table: &str, filter: Option<EventFilter>) -> Result<Subscription> {
        self.realtime().await.subscribe(table, filter).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let url = format!("{}?grant_type=password", self.config.auth_url("token"));
        let agent = self.agent.clone();
        let key = self.config.service_key.clone();
        let body = json!({ "email": email, "password": password });
        let response = run_blocking(move || {
            agent
                .post(&url)
                .set("apikey", &key)
                .send_json(body)
                .map_err(|e| Error::Auth(describe(e)))?
                .into_json::<Value>()
                .map_err(|e| Error::Auth(format!("invalid response body: {e}")))
        })
        .await?;
        session_from_response(&response)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<AuthSession> {
        let url = self.config.auth_url("signup");
        let agent = self.agent.clone();
        let key = self.config.service_key.clone();
        let body = json!({
            "email": email,
            "password": password,
            "data": { "display_name": display_name },
        });
        let response = run_blocking(move || {
            agent
                .post(&url)
                .set("apikey", &key)
                .send_json(body)
                .map_err(|e| Error::Auth(describe(e)))?
                .into_json::<Value>()
                .map_err(|e| Error::Auth(format!("invalid response body: {e}")))
        })
        .await?;
        session_from_response(&response)
    }

    async fn sign_out(&self, access_token: &str) -> Result<()> {
        let url = self.config.auth_url("logout");
        let agent = self.agent.clone();
        let key = self.config.service_key.clone();
        let bearer = access_token.to_string();
        run_blocking(move || {
            agent
                .post(&url)
                .set("apikey", &key)
                .set("Authorization", &format!("Bearer {bearer}"))
                .call()
                .map_err(|e| Error::Auth(describe(e)))?;
            Ok(())
        })
        .await
    }

    async fn set_auth(&self, access_token: Option<String>) {
        *self.auth_token.lock().await = access_token;
    }
}

// ==================== Tests ====================
