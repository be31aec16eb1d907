//! Remote data gateway for chat tables and attachments.
//!
//! Thin, stateless wrapper over the [`Platform`]: every method is one
//! remote round trip or a fixed short sequence of them. No retries, no
//! caching; the state store layered on top decides what failures mean.

use crate::chat::types::{Chat, Message, OutgoingAttachment, User};
use crate::error::Result;
use crate::platform::{EventFilter, Filter, Platform, SelectQuery, Subscription};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

const TABLE_USERS: &str = "users";
const TABLE_CHATS: &str = "chats";
const TABLE_MEMBERS: &str = "chat_members";
const TABLE_MESSAGES: &str = "messages";
const BUCKET_ATTACHMENTS: &str = "attachments";

/// Remote operations for chats, messages and user profiles.
#[derive(Clone)]
pub struct ChatGateway {
    platform: Arc<dyn Platform>,
}

impl ChatGateway {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform }
    }

    /// Whether a real backend is wired up.
    pub fn is_configured(&self) -> bool {
        self.platform.is_configured()
    }

    /// All user profiles.
    ///
    /// Degrades to an empty list on failure; directory data is not worth
    /// failing a screen over.
    pub async fn list_users(&self) -> Vec<User> {
        match self.platform.select(SelectQuery::new(TABLE_USERS)).await {
            Ok(rows) => parse_rows(rows, "user"),
            Err(e) => {
                warn!("failed to load users: {e}");
                Vec::new()
            }
        }
    }

    /// Chats the user is a member of, most recently active first, each with
    /// its latest message attached.
    pub async fn list_chats_for_user(&self, user_id: &str) -> Result<Vec<Chat>> {
        let member_rows = self
            .platform
            .select(SelectQuery::new(TABLE_MEMBERS).filter(Filter::eq("user_id", user_id)))
            .await?;
        let chat_ids: Vec<String> = member_rows
            .iter()
            .filter_map(|row| row.get("chat_id").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        if chat_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self
            .platform
            .select(
                SelectQuery::new(TABLE_CHATS)
                    .filter(Filter::in_list("id", chat_ids))
                    .order_desc("updated_at"),
            )
            .await?;
        let mut chats: Vec<Chat> = parse_rows(rows, "chat");
        for chat in &mut chats {
            self.attach_last_message(chat).await;
        }
        Ok(chats)
    }

    /// One chat by id, with its latest message attached; `None` when the
    /// row does not exist (or is not visible to us).
    pub async fn fetch_chat(&self, chat_id: &str) -> Result<Option<Chat>> {
        let rows = self
            .platform
            .select(
                SelectQuery::new(TABLE_CHATS)
                    .filter(Filter::eq("id", chat_id))
                    .limit(1),
            )
            .await?;
        let mut chat = match parse_rows::<Chat>(rows, "chat").into_iter().next() {
            Some(chat) => chat,
            None => return Ok(None),
        };
        self.attach_last_message(&mut chat).await;
        Ok(Some(chat))
    }

    /// Full message history of one chat, oldest first.
    pub async fn list_messages(&self, chat_id: &str) -> Result<Vec<Message>> {
        let rows = self
            .platform
            .select(
                SelectQuery::new(TABLE_MESSAGES)
                    .filter(Filter::eq("chat_id", chat_id))
                    .order_asc("created_at"),
            )
            .await?;
        Ok(parse_rows(rows, "message"))
    }

    /// Send a message, optionally with an uploaded attachment.
    ///
    /// Runs in a fixed order: upload (when attached), then the message
    /// insert, then a bump of the chat's `updated_at`. A failed upload
    /// aborts before the insert; a failed insert aborts before the bump; a
    /// failed bump is logged but does not fail the already-committed send.
    pub async fn send_message(
        &self,
        chat_id: &str,
        sender_id: &str,
        content: &str,
        attachment: Option<OutgoingAttachment>,
    ) -> Result<Message> {
        let now = Utc::now();
        let mut attachment_url = None;
        let mut attachment_kind = None;
        if let Some(file) = attachment {
            let path = format!(
                "{sender_id}/{}.{}",
                now.timestamp_millis(),
                file.extension()
            );
            let kind = file.kind();
            let OutgoingAttachment { content_type, data, .. } = file;
            let url = self
                .platform
                .upload(BUCKET_ATTACHMENTS, &path, &content_type, data)
                .await?;
            debug!("uploaded attachment to {path}");
            attachment_kind = Some(kind);
            attachment_url = Some(url);
        }

        let row = json!({
            "chat_id": chat_id,
            "sender_id": sender_id,
            "content": content,
            "attachment_url": attachment_url,
            "attachment_type": attachment_kind,
            "created_at": now,
        });
        let stored = self.platform.insert(TABLE_MESSAGES, row).await?;
        let message: Message = serde_json::from_value(stored)?;

        // Recency ordering keys off updated_at; bump it last, best effort.
        // The message is already committed, so a failed bump must not turn
        // the send into an error.
        if let Err(e) = self
            .platform
            .update(
                TABLE_CHATS,
                &[Filter::eq("id", chat_id)],
                json!({ "updated_at": Utc::now() }),
            )
            .await
        {
            warn!("failed to bump recency of chat {chat_id}: {e}");
        }

        Ok(message)
    }

    /// Whether a user is a member of a chat.
    pub async fn is_member(&self, chat_id: &str, user_id: &str) -> Result<bool> {
        let rows = self
            .platform
            .select(
                SelectQuery::new(TABLE_MEMBERS)
                    .filter(Filter::eq("chat_id", chat_id))
                    .filter(Filter::eq("user_id", user_id))
                    .limit(1),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    /// Change feed over all chat rows.
    pub async fn subscribe_chats(&self) -> Result<Subscription> {
        self.platform.subscribe(TABLE_CHATS, None).await
    }

    /// Change feed over one chat's messages.
    pub async fn subscribe_messages(&self, chat_id: &str) -> Result<Subscription> {
        self.platform
            .subscribe(TABLE_MESSAGES, Some(EventFilter::eq("chat_id", chat_id)))
            .await
    }

    /// Attach the latest message, if any. Failures leave the field absent;
    /// the chat itself is still useful without a preview.
    async fn attach_last_message(&self, chat: &mut Chat) {
        let result = self
            .platform
            .select(
                SelectQuery::new(TABLE_MESSAGES)
                    .filter(Filter::eq("chat_id", chat.id.clone()))
                    .order_desc("created_at")
                    .limit(1),
            )
            .await;
        chat.last_message = match result {
            Ok(rows) => parse_rows(rows, "message").into_iter().next(),
            Err(e) => {
                warn!("failed to load last message for chat {}: {e}", chat.id);
                None
            }
        };
    }
}

/// Deserialize rows, skipping (and logging) any that do not fit the schema.
fn parse_rows<T: DeserializeOwned>(rows: Vec<Value>, kind: &str) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("skipping malformed {kind} row: {e}");
                None
            }
        })
        .collect()
}

// ==================== Tests ====================
