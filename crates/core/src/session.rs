//! Authenticated session state.
//!
//! [`SessionStore`] wraps the platform's auth endpoints and publishes the
//! signed-in identity over a `watch` channel so other components can react
//! to sign-in and sign-out without polling.

use crate::error::{Error, Result};
use crate::platform::{AuthSession, Platform};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

const TABLE_USERS: &str = "users";

/// An authenticated identity, valid until signed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub access_token: String,
}

/// Holds the current session and keeps the platform's auth state and the
/// `users` profile row in step with it.
pub struct SessionStore {
    platform: Arc<dyn Platform>,
    current: watch::Sender<Option<Session>>,
}

impl SessionStore {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        let (current, _) = watch::channel(None);
        Self { platform, current }
    }

    /// Sign in with email and password.
    ///
    /// On success the platform switches to the user's token, the `users`
    /// profile row is upserted (display name defaults to the email local
    /// part) and the session is published to watchers. The profile write is
    /// best effort; a failure there must not block the sign-in.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let auth = self.platform.sign_in(email, password).await?;
        let access_token = auth
            .access_token
            .ok_or_else(|| Error::Auth("sign-in succeeded without an access token".into()))?;
        self.platform.set_auth(Some(access_token.clone())).await;

        let local = auth.email.split('@').next().unwrap_or_default();
        let display_name = if local.is_empty() { "User" } else { local };
        let profile = json!({
            "id": auth.user_id,
            "email": auth.email,
            "display_name": display_name,
        });
        if let Err(e) = self.platform.upsert(TABLE_USERS, profile).await {
            warn!("failed to sync profile row on sign-in: {e}");
        }

        let session = Session {
            user_id: auth.user_id,
            email: auth.email,
            access_token,
        };
        self.current.send_replace(Some(session.clone()));
        info!("signed in as {}", session.email);
        Ok(session)
    }

    /// Create an account and its `users` profile row.
    ///
    /// Does not publish a session: the account may still be waiting on email
    /// confirmation, so callers route the user through [`sign_in`] once it
    /// is usable. The profile write is best effort, as on sign-in.
    ///
    /// [`sign_in`]: SessionStore::sign_in
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<AuthSession> {
        let auth = self.platform.sign_up(email, password, display_name).await?;
        let profile = json!({
            "id": auth.user_id,
            "email": auth.email,
            "display_name": display_name,
        });
        if let Err(e) = self.platform.insert(TABLE_USERS, profile).await {
            warn!("failed to create profile row on sign-up: {e}");
        }
        info!("account created for {}", auth.email);
        Ok(auth)
    }

    /// Sign out. The remote revocation must succeed before local state is
    /// cleared, so a failed request leaves the session usable.
    pub async fn sign_out(&self) -> Result<()> {
        let current = self.current.borrow().clone();
        let session = match current {
            Some(session) => session,
            None => return Ok(()),
        };
        self.platform.sign_out(&session.access_token).await?;
        self.platform.set_auth(None).await;
        self.current.send_replace(None);
        info!("signed out");
        Ok(())
    }

    /// The session right now, if signed in.
    pub fn session(&self) -> Option<Session> {
        self.current.borrow().clone()
    }

    /// Follow session changes. The receiver sees every sign-in and sign-out
    /// from the point of subscription on.
    pub fn watch(&self) -> watch::Receiver<Option<Session>> {
        self.current.subscribe()
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemoryPlatform;

    fn store(platform: &Arc<MemoryPlatform>) -> SessionStore {
        SessionStore::new(platform.clone() as Arc<dyn Platform>)
    }

    #[tokio::test]
    async fn test_sign_in_publishes_session_and_syncs_profile() {
        let platform = Arc::new(MemoryPlatform::new());
        platform.sign_up("ada@example.test", "pw", "Ada").await.unwrap();

        let store = store(&platform);
        let mut watcher = store.watch();
        assert!(store.session().is_none());

        let session = store.sign_in("ada@example.test", "pw").await.unwrap();
        assert_eq!(session.email, "ada@example.test");
        assert!(!session.access_token.is_empty());

        let users = platform.rows(TABLE_USERS).await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0]["display_name"], "ada");
        assert_eq!(users[0]["id"], session.user_id.as_str());

        watcher.changed().await.unwrap();
        let held = watcher.borrow().clone().unwrap();
        assert_eq!(held.user_id, session.user_id);
    }

    #[tokio::test]
    async fn test_sign_in_failure_leaves_no_session() {
        let platform = Arc::new(MemoryPlatform::new());
        let store = store(&platform);

        let err = store.sign_in("ghost@example.test", "pw").await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert!(store.session().is_none());
        assert!(platform.rows(TABLE_USERS).await.is_empty());
    }

    #[tokio::test]
    async fn test_sign_in_display_name_falls_back_when_local_part_empty() {
        let platform = Arc::new(MemoryPlatform::new());
        platform.sign_up("@example.test", "pw", "X").await.unwrap();

        let store = store(&platform);
        store.sign_in("@example.test", "pw").await.unwrap();

        let users = platform.rows(TABLE_USERS).await;
        assert_eq!(users[0]["display_name"], "User");
    }

    #[tokio::test]
    async fn test_sign_up_creates_profile_without_publishing() {
        let platform = Arc::new(MemoryPlatform::new());
        let store = store(&platform);

        let auth = store.sign_up("bo@example.test", "pw", "Bo").await.unwrap();
        assert!(!auth.user_id.is_empty());

        let users = platform.rows(TABLE_USERS).await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0]["display_name"], "Bo");
        assert_eq!(users[0]["id"], auth.user_id.as_str());
        assert!(store.session().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_clears_session() {
        let platform = Arc::new(MemoryPlatform::new());
        platform.sign_up("ada@example.test", "pw", "Ada").await.unwrap();

        let store = store(&platform);
        store.sign_in("ada@example.test", "pw").await.unwrap();
        assert!(store.session().is_some());

        store.sign_out().await.unwrap();
        assert!(store.session().is_none());

        // Signing out twice is a no-op.
        store.sign_out().await.unwrap();
    }
}
