//! Hosted backend platform abstraction.
//!
//! Everything remote (relational queries, object storage, authentication
//! and the realtime change feed) goes through the [`Platform`] trait, so
//! the chat core can run against the real HTTP backend, an in-memory
//! backend in tests, or an inert backend when no configuration is present.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        ChatGateway / SessionStore           │
//! └─────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────┐
//! │              Platform (trait)               │
//! │  select / insert / update / upsert          │
//! │  upload / subscribe / sign_in / sign_out    │
//! └─────────────────────────────────────────────┘
//!          │              │              │
//!          ▼              ▼              ▼
//!    ┌──────────┐   ┌──────────┐   ┌──────────┐
//!    │   HTTP   │   │  Memory  │   │  Inert   │
//!    │ (remote) │   │ (tests)  │   │(no conf.)│
//!    └──────────┘   └──────────┘   └──────────┘
//! ```

mod http;
mod inert;
mod memory;
mod realtime;
mod types;

pub use http::HttpPlatform;
pub use inert::InertPlatform;
pub use memory::MemoryPlatform;
pub use types::*;

use crate::config::{Config, ENV_SERVICE_KEY, ENV_SERVICE_URL};
use crate::error::Result;
use serde_json::Value;
use std::sync::Arc;

/// Remote backend operations used by the chat core.
///
/// Implementations are shared behind an [`Arc`]; all methods take `&self`
/// and synchronize internally.
#[async_trait::async_trait]
pub trait Platform: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// False for the disabled stand-in used when configuration is absent.
    fn is_configured(&self) -> bool {
        true
    }

    /// Run a select query, returning raw rows.
    async fn select(&self, query: SelectQuery) -> Result<Vec<Value>>;

    /// Insert a row, returning the stored representation.
    async fn insert(&self, table: &str, row: Value) -> Result<Value>;

    /// Apply a partial update to all rows matching the filters.
    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<()>;

    /// Insert a row, replacing an existing one with the same primary key.
    async fn upsert(&self, table: &str, row: Value) -> Result<()>;

    /// Upload an object and return its public URL.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<String>;

    /// Subscribe to the change feed of one table, optionally filtered.
    async fn subscribe(&self, table: &str, filter: Option<EventFilter>) -> Result<Subscription>;

    /// Sign in with email and password.
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession>;

    /// Register a new account.
    async fn sign_up(&self, email: &str, password: &str, display_name: &str)
        -> Result<AuthSession>;

    /// Invalidate the given access token.
    async fn sign_out(&self, access_token: &str) -> Result<()>;

    /// Attach an access token to subsequent requests (`None` reverts to the
    /// anonymous service key).
    async fn set_auth(&self, _access_token: Option<String>) {}
}

/// Connect to the configured backend, or fall back to the inert one.
///
/// A missing configuration must not crash the client: the application keeps
/// running with chat features disabled, and every remote operation reports
/// that state instead of panicking.
pub fn connect(config: Option<Config>) -> Arc<dyn Platform> {
    match config {
        Some(config) => Arc::new(HttpPlatform::new(config)),
        None => {
            tracing::warn!(
                "{ENV_SERVICE_URL} or {ENV_SERVICE_KEY} not set; chat backend disabled"
            );
            Arc::new(InertPlatform::new())
        }
    }
}
