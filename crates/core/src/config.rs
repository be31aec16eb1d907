//! Connection configuration for the hosted chat backend.

use serde::{Deserialize, Serialize};

/// Environment variable holding the backend project URL.
pub const ENV_SERVICE_URL: &str = "NATTER_SERVICE_URL";

/// Environment variable holding the backend API key.
pub const ENV_SERVICE_KEY: &str = "NATTER_SERVICE_KEY";

/// Connection settings for the hosted backend platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the backend project.
    pub service_url: String,

    /// API key sent with every request.
    pub service_key: String,
}

impl Config {
    /// Create a configuration from explicit values.
    ///
    /// Trailing slashes on the URL are stripped so endpoint paths join
    /// cleanly.
    pub fn new(service_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        let mut service_url = service_url.into();
        while service_url.ends_with('/') {
            service_url.pop();
        }
        Self {
            service_url,
            service_key: service_key.into(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Returns `None` when either variable is missing or blank. Callers are
    /// expected to fall back to a disabled backend rather than fail startup;
    /// the application keeps rendering with chat features inert.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var(ENV_SERVICE_URL).ok()?;
        let key = std::env::var(ENV_SERVICE_KEY).ok()?;
        if url.trim().is_empty() || key.trim().is_empty() {
            return None;
        }
        Some(Self::new(url, key))
    }

    /// REST endpoint for a table.
    pub fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.service_url, table)
    }

    /// Auth endpoint for a path under `/auth/v1`.
    pub fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.service_url, path)
    }

    /// Storage object endpoint for a bucket-relative path.
    pub fn storage_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.service_url, bucket, path)
    }

    /// Public download URL for an uploaded object.
    pub fn public_object_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.service_url, bucket, path
        )
    }

    /// WebSocket URL for the realtime change feed.
    pub fn realtime_url(&self) -> String {
        let ws_base = if let Some(rest) = self.service_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.service_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.service_url.clone()
        };
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            ws_base, self.service_key
        )
    }
}
