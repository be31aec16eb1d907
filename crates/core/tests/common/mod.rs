//! Common test utilities for integration tests.
//!
//! Shared helpers for arranging backend state on the in-memory platform and
//! for waiting on asynchronous store behaviour without fixed sleeps.

use natter_core::chat::ChatEvent;
use natter_core::platform::MemoryPlatform;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Default timeout for test operations.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Initialize test logging with appropriate filters.
///
/// Call this at the start of tests that need debug output.
/// Safe to call multiple times (subsequent calls are no-ops).
#[allow(dead_code)]
pub fn init_test_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("natter_core=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Run an async operation with a timeout.
///
/// Returns the result if the operation completes within the timeout,
/// or panics with a timeout message if it doesn't.
#[allow(dead_code)]
pub async fn with_timeout<T, F>(fut: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, fut)
        .await
        .expect("Test operation timed out")
}

/// Poll a condition until it holds, panicking after [`TEST_TIMEOUT`].
///
/// Feed tasks open their subscriptions asynchronously, so tests that want
/// to race an event against a live feed first wait here for the feed to be
/// attached.
#[allow(dead_code)]
pub async fn wait_until<F, Fut>(mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    loop {
        if probe().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within timeout");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait for the next store event matching a predicate, skipping the rest.
#[allow(dead_code)]
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<ChatEvent>,
    mut matches: F,
) -> ChatEvent
where
    F: FnMut(&ChatEvent) -> bool,
{
    let wanted = async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) => continue,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event feed closed while waiting"),
            }
        }
    };
    tokio::time::timeout(TEST_TIMEOUT, wanted)
        .await
        .expect("expected event did not arrive")
}

/// Seed a chat row and return its id.
#[allow(dead_code)]
pub async fn seed_chat(platform: &MemoryPlatform, name: &str, updated_at: &str) -> String {
    let row = platform
        .seed(
            "chats",
            json!({
                "name": name,
                "created_at": updated_at,
                "updated_at": updated_at,
                "is_group": false,
            }),
        )
        .await;
    row["id"].as_str().expect("seeded chat has an id").to_string()
}

/// Seed a membership row tying a user to a chat.
#[allow(dead_code)]
pub async fn seed_member(platform: &MemoryPlatform, chat_id: &str, user_id: &str) {
    platform
        .seed(
            "chat_members",
            json!({
                "chat_id": chat_id,
                "user_id": user_id,
                "joined_at": "2026-08-01T00:00:00Z",
            }),
        )
        .await;
}

/// Seed a message row and return its id.
#[allow(dead_code)]
pub async fn seed_message(
    platform: &MemoryPlatform,
    chat_id: &str,
    sender_id: &str,
    content: &str,
    created_at: &str,
) -> String {
    let row = platform
        .seed(
            "messages",
            json!({
                "chat_id": chat_id,
                "sender_id": sender_id,
                "content": content,
                "created_at": created_at,
            }),
        )
        .await;
    row["id"]
        .as_str()
        .expect("seeded message has an id")
        .to_string()
}

/// Seed a profile row in the user directory.
#[allow(dead_code)]
pub async fn seed_user(platform: &MemoryPlatform, id: &str, display_name: &str) -> Value {
    platform
        .seed(
            "users",
            json!({
                "id": id,
                "email": format!("{id}@example.test"),
                "display_name": display_name,
            }),
        )
        .await
}
