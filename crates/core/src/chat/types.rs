//! Core data types for the chat system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Presence reported on a user row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Online,
    Offline,
}

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Row id, shared with the auth identity.
    pub id: String,
    /// Sign-in address.
    pub email: String,
    /// Name shown in chat lists and message headers.
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// When the account row was created (UTC).
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<UserStatus>,
}

/// Category tag carried on a chat row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Demo,
    Internal,
    Signup,
    Content,
}

impl ChatKind {
    /// Badge label for list views.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Demo => "demo",
            ChatKind::Internal => "internal",
            ChatKind::Signup => "signup",
            ChatKind::Content => "content",
        }
    }
}

/// A chat the user participates in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    /// Row id.
    pub id: String,
    /// Display name; group chats usually have one, direct chats may not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// When the chat was created (UTC).
    pub created_at: DateTime<Utc>,
    /// Bumped on every sent message; recency ordering keys off this.
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_group: bool,
    /// Most recent message, attached client-side after fetch.
    /// Never part of the stored row.
    #[serde(skip)]
    pub last_message: Option<Message>,
    /// Derived client-side; never part of the stored row.
    #[serde(skip)]
    pub unread_count: Option<u32>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChatKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

impl Chat {
    /// Create a chat with fresh timestamps.
    pub fn new(name: Option<String>, is_group: bool) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            created_at: now,
            updated_at: now,
            is_group,
            last_message: None,
            unread_count: None,
            kind: None,
            labels: None,
        }
    }
}

/// Membership row tying a user to a chat.
///
/// Read-only here: membership is managed outside this client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMember {
    pub chat_id: String,
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MemberRole>,
}

/// Role within a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Member,
}

/// Kind of message attachment, derived from the uploaded file's MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    Document,
}

impl AttachmentKind {
    /// Classify a MIME type: `image/*` and `video/*` map to their kinds,
    /// everything else is a document.
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            AttachmentKind::Image
        } else if mime.starts_with("video/") {
            AttachmentKind::Video
        } else {
            AttachmentKind::Document
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::Image => "image",
            AttachmentKind::Video => "video",
            AttachmentKind::Document => "document",
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Row id.
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    /// Plain text body; attachment sends carry a caption here.
    pub content: String,
    /// When the message was sent (UTC).
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    /// Public URL of the uploaded file, when one was attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    /// Present exactly when `attachment_url` is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_type: Option<AttachmentKind>,
}

impl Message {
    /// Create a plain text message with fresh id and timestamp.
    pub fn new(
        chat_id: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.into(),
            sender_id: sender_id.into(),
            content: content.into(),
            created_at: Utc::now(),
            read_at: None,
            attachment_url: None,
            attachment_type: None,
        }
    }

    /// Check if this message was sent by us (vs received).
    pub fn is_outgoing(&self, our_user_id: &str) -> bool {
        self.sender_id == our_user_id
    }

    pub fn has_attachment(&self) -> bool {
        self.attachment_url.is_some()
    }
}

/// A file picked for sending, before upload.
#[derive(Debug, Clone)]
pub struct OutgoingAttachment {
    /// Original file name, used for the caption and the storage key.
    pub file_name: String,
    /// MIME type reported by the picker.
    pub content_type: String,
    pub data: Vec<u8>,
}

impl OutgoingAttachment {
    /// Maximum accepted size (10 MiB). Larger files are rejected before any
    /// upload is attempted.
    pub const MAX_SIZE_BYTES: usize = 10 * 1024 * 1024;

    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            data,
        }
    }

    /// File extension used for the storage key. A name with no dot yields
    /// the whole name.
    pub fn extension(&self) -> &str {
        self.file_name.rsplit('.').next().unwrap_or_default()
    }

    pub fn kind(&self) -> AttachmentKind {
        AttachmentKind::from_mime(&self.content_type)
    }

    pub fn exceeds_size_limit(&self) -> bool {
        self.data.len() > Self::MAX_SIZE_BYTES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attachment_kind_from_mime() {
        assert_eq!(AttachmentKind::from_mime("image/png"), AttachmentKind::Image);
        assert_eq!(AttachmentKind::from_mime("video/mp4"), AttachmentKind::Video);
        assert_eq!(
            AttachmentKind::from_mime("application/pdf"),
            AttachmentKind::Document
        );
        assert_eq!(
            AttachmentKind::from_mime("text/plain"),
            AttachmentKind::Document
        );
    }

    #[test]
    fn test_attachment_extension() {
        let png = OutgoingAttachment::new("photo.png", "image/png", vec![1]);
        assert_eq!(png.extension(), "png");

        let tarball = OutgoingAttachment::new("backup.tar.gz", "application/gzip", vec![1]);
        assert_eq!(tarball.extension(), "gz");

        let bare = OutgoingAttachment::new("README", "text/plain", vec![1]);
        assert_eq!(bare.extension(), "README");
    }

    #[test]
    fn test_attachment_size_boundary() {
        let at_limit = OutgoingAttachment::new(
            "big.bin",
            "application/octet-stream",
            vec![0; OutgoingAttachment::MAX_SIZE_BYTES],
        );
        assert!(!at_limit.exceeds_size_limit());

        let over = OutgoingAttachment::new(
            "bigger.bin",
            "application/octet-stream",
            vec![0; OutgoingAttachment::MAX_SIZE_BYTES + 1],
        );
        assert!(over.exceeds_size_limit());
    }

    #[test]
    fn test_message_is_outgoing() {
        let msg = Message::new("chat-1", "alice", "Hi");
        assert!(msg.is_outgoing("alice"));
        assert!(!msg.is_outgoing("bob"));
    }

    #[test]
    fn test_chat_row_round_trip() {
        let row = json!({
            "id": "c1",
            "name": "Support",
            "created_at": "2026-08-01T12:00:00Z",
            "updated_at": "2026-08-02T08:30:00+00:00",
            "is_group": true,
            "type": "internal",
        });
        let chat: Chat = serde_json::from_value(row).unwrap();
        assert_eq!(chat.kind, Some(ChatKind::Internal));
        assert!(chat.last_message.is_none());

        let back = serde_json::to_value(&chat).unwrap();
        assert_eq!(back["type"], "internal");
        assert!(back.get("last_message").is_none());
        assert!(back.get("unread_count").is_none());
    }

    #[test]
    fn test_message_row_parses_wire_timestamps() {
        let row = json!({
            "id": "m1",
            "chat_id": "c1",
            "sender_id": "u1",
            "content": "hello",
            "created_at": "2026-08-23T10:15:00.123456+00:00",
            "attachment_url": "https://example.test/f.png",
            "attachment_type": "image",
        });
        let msg: Message = serde_json::from_value(row).unwrap();
        assert_eq!(msg.attachment_type, Some(AttachmentKind::Image));
        assert!(msg.has_attachment());
        let expected: DateTime<Utc> = "2026-08-23T10:15:00.123456Z".parse().unwrap();
        assert_eq!(msg.created_at, expected);
    }
}
