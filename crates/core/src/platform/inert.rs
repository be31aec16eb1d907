//! Inert backend used when no configuration is present.
//!
//! The application keeps running without a configured backend: reads come
//! back empty, writes and auth report [`Error::NotConfigured`], and
//! subscriptions stay open but never deliver. Front-ends surface the
//! degraded state through those errors instead of crashing at startup.

use super::{AuthSession, ChangeEvent, EventFilter, Filter, Platform, SelectQuery, Subscription};
use crate::error::{Error, Result};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

/// Backend that answers every call without touching the network.
#[derive(Default)]
pub struct InertPlatform {
    // Senders are parked here so subscriptions stay open (and silent)
    // instead of ending immediately.
    open_feeds: Mutex<Vec<mpsc::Sender<ChangeEvent>>>,
}

impl InertPlatform {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Platform for InertPlatform {
    fn name(&self) -> &'static str {
        "inert"
    }

    fn is_configured(&self) -> bool {
        false
    }

    async fn select(&self, _query: SelectQuery) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }

    async fn insert(&self, _table: &str, _row: Value) -> Result<Value> {
        Err(Error::NotConfigured)
    }

    async fn update(&self, _table: &str, _filters: &[Filter], _patch: Value) -> Result<()> {
        Err(Error::NotConfigured)
    }

    async fn upsert(&self, _table: &str, _row: Value) -> Result<()> {
        Err(Error::NotConfigured)
    }

    async fn upload(
        &self,
        _bucket: &str,
        _path: &str,
        _content_type: &str,
        _data: Vec<u8>,
    ) -> Result<String> {
        Err(Error::NotConfigured)
    }

    async fn subscribe(&self, _table: &str, _filter: Option<EventFilter>) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(1);
        self.open_feeds.lock().await.push(tx);
        Ok(Subscription::new(rx, || {}))
    }

    async fn sign_in(&self, _email: &str, _password: &str) -> Result<AuthSession> {
        Err(Error::NotConfigured)
    }

    async fn sign_up(
        &self,
        _email: &str,
        _password: &str,
        _display_name: &str,
    ) -> Result<AuthSession> {
        Err(Error::NotConfigured)
    }

    async fn sign_out(&self, _access_token: &str) -> Result<()> {
        Err(Error::NotConfigured)
    }
}
