//! Presentation helpers for chat surfaces.
//!
//! Pure functions deriving render-ready data from store state: sidebar
//! rows, the message timeline with its date dividers, attachment render
//! choices and composer validation. No remote calls, no mutation; a UI
//! layer calls these and draws the result.

use crate::chat::types::{AttachmentKind, Chat, ChatMember, Message, OutgoingAttachment, User};
use chrono::{DateTime, NaiveDate, Utc};

/// Longest last-message preview shown in the sidebar, in characters.
pub const PREVIEW_MAX_CHARS: usize = 30;

// ==================== Formatting ====================

/// Truncate a message body for the sidebar preview.
pub fn message_preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_MAX_CHARS {
        let cut: String = content.chars().take(PREVIEW_MAX_CHARS).collect();
        format!("{cut}...")
    } else {
        content.to_string()
    }
}

/// 24-hour clock label for a message bubble.
pub fn format_message_time(at: DateTime<Utc>) -> String {
    at.format("%H:%M").to_string()
}

/// "Today", "Yesterday", or the full date.
pub fn format_relative_date(at: DateTime<Utc>, today: NaiveDate) -> String {
    let day = at.date_naive();
    if day == today {
        "Today".to_string()
    } else if Some(day) == today.pred_opt() {
        "Yesterday".to_string()
    } else {
        day.format("%d/%m/%Y").to_string()
    }
}

/// Sidebar recency stamp: clock time for today, short date otherwise.
pub fn sidebar_time_label(at: DateTime<Utc>, today: NaiveDate) -> String {
    if at.date_naive() == today {
        at.format("%H:%M").to_string()
    } else {
        at.format("%d/%m/%y").to_string()
    }
}

/// Up to two uppercase initials for an avatar fallback.
pub fn user_initials(name: &str) -> String {
    name.split(' ')
        .filter_map(|part| part.chars().next())
        .collect::<String>()
        .to_uppercase()
        .chars()
        .take(2)
        .collect()
}

// ==================== Sidebar ====================

/// One row of the sidebar chat list, ready to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidebarRow {
    pub chat_id: String,
    /// Chat name; empty for unnamed direct chats.
    pub title: String,
    /// Avatar fallback initials; "CH" when the chat has no name.
    pub initials: String,
    pub time_label: String,
    /// Last-message preview, or the placeholder text.
    pub preview: String,
    /// True when `preview` is the "No messages yet" placeholder.
    pub preview_is_placeholder: bool,
    /// Badge label when the chat carries a kind tag.
    pub badge: Option<&'static str>,
    pub active: bool,
}

/// Derive sidebar rows from a chat list.
///
/// Rows keep the list's order; recency ordering comes from the fetch, not
/// from here.
pub fn sidebar_rows(chats: &[Chat], current_chat_id: Option<&str>, today: NaiveDate) -> Vec<SidebarRow> {
    chats
        .iter()
        .map(|chat| {
            let (preview, placeholder) = match &chat.last_message {
                Some(last) => (message_preview(&last.content), false),
                None => ("No messages yet".to_string(), true),
            };
            let initials = chat
                .name
                .as_deref()
                .map(user_initials)
                .filter(|initials| !initials.is_empty())
                .unwrap_or_else(|| "CH".to_string());
            SidebarRow {
                chat_id: chat.id.clone(),
                title: chat.name.clone().unwrap_or_default(),
                initials,
                time_label: sidebar_time_label(chat.updated_at, today),
                preview,
                preview_is_placeholder: placeholder,
                badge: chat.kind.map(|kind| kind.as_str()),
                active: current_chat_id == Some(chat.id.as_str()),
            }
        })
        .collect()
}

/// Chats sorted by `updated_at`, most recent first. Used at fetch time; push
/// upserts deliberately do not re-sort.
pub fn sort_chats_by_recent(chats: &[Chat]) -> Vec<Chat> {
    let mut sorted = chats.to_vec();
    sorted.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    sorted
}

/// Messages from other senders newer than the last-read mark. No mark means
/// nothing is counted as unread.
pub fn count_unread(
    messages: &[Message],
    user_id: &str,
    last_read: Option<DateTime<Utc>>,
) -> usize {
    let last_read = match last_read {
        Some(at) => at,
        None => return 0,
    };
    messages
        .iter()
        .filter(|m| m.sender_id != user_id && m.created_at > last_read)
        .count()
}

/// Members of a chat other than the current user, resolved against the user
/// directory.
pub fn chat_participants<'a>(
    users: &'a [User],
    members: &[ChatMember],
    current_user_id: &str,
) -> Vec<&'a User> {
    let participant_ids: Vec<&str> = members
        .iter()
        .filter(|member| member.user_id != current_user_id)
        .map(|member| member.user_id.as_str())
        .collect();
    users
        .iter()
        .filter(|user| participant_ids.contains(&user.id.as_str()))
        .collect()
}

// ==================== Message timeline ====================

/// How to render one attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentRender {
    /// Inline image.
    Image { url: String },
    /// Inline player.
    Video { url: String },
    /// Plain download link.
    Download { url: String },
}

/// Pick the render treatment for a message's attachment, if it has one.
/// Documents and untyped URLs both fall back to a download link.
pub fn attachment_render(message: &Message) -> Option<AttachmentRender> {
    let url = message.attachment_url.clone()?;
    Some(match message.attachment_type {
        Some(AttachmentKind::Image) => AttachmentRender::Image { url },
        Some(AttachmentKind::Video) => AttachmentRender::Video { url },
        _ => AttachmentRender::Download { url },
    })
}

/// One rendered message with its optional day divider.
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    /// Date label shown above this message when the day changed relative to
    /// the previous entry.
    pub divider: Option<String>,
    pub message: Message,
    pub outgoing: bool,
    /// Sender name, present for incoming messages in group chats.
    pub sender_name: Option<String>,
    pub time_label: String,
    pub attachment: Option<AttachmentRender>,
}

/// Derive the render timeline for the open chat.
///
/// Messages keep their given order (oldest first from the store). A divider
/// is emitted whenever the calendar-day label differs from the previous
/// message's.
pub fn message_timeline(
    messages: &[Message],
    users: &[User],
    chat: &Chat,
    user_id: &str,
    today: NaiveDate,
) -> Vec<TimelineEntry> {
    let mut last_label: Option<String> = None;
    messages
        .iter()
        .map(|message| {
            let label = format_relative_date(message.created_at, today);
            let divider = if last_label.as_deref() != Some(label.as_str()) {
                last_label = Some(label.clone());
                Some(label)
            } else {
                None
            };
            let outgoing = message.is_outgoing(user_id);
            let sender_name = if chat.is_group && !outgoing {
                let name = users
                    .iter()
                    .find(|user| user.id == message.sender_id)
                    .map(|user| user.display_name.clone())
                    .unwrap_or_else(|| "Unknown User".to_string());
                Some(name)
            } else {
                None
            };
            TimelineEntry {
                divider,
                outgoing,
                sender_name,
                time_label: format_message_time(message.created_at),
                attachment: attachment_render(message),
                message: message.clone(),
            }
        })
        .collect()
}

// ==================== Composer ====================

/// Why the composer refused an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ComposerError {
    #[error("message is empty")]
    Empty,
    #[error("file size exceeds the 10MB limit")]
    FileTooLarge,
}

/// Validate plain text input before sending.
pub fn validate_text(content: &str) -> Result<(), ComposerError> {
    if content.trim().is_empty() {
        Err(ComposerError::Empty)
    } else {
        Ok(())
    }
}

/// Validate a picked file and produce the caption its message will carry.
/// Rejected files never reach the network.
pub fn prepare_attachment(file: &OutgoingAttachment) -> Result<String, ComposerError> {
    if file.exceeds_size_limit() {
        return Err(ComposerError::FileTooLarge);
    }
    Ok(attachment_caption(file))
}

/// Caption text for an attachment send.
pub fn attachment_caption(file: &OutgoingAttachment) -> String {
    if file.content_type.starts_with("image/") {
        format!("Sent an image: {}", file.file_name)
    } else {
        format!("Sent a file: {}", file.file_name)
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;

    fn message_at(chat_id: &str, sender: &str, content: &str, at: &str) -> Message {
        let mut message = Message::new(chat_id, sender, content);
        message.created_at = at.parse().unwrap();
        message
    }

    fn chat_updated(name: Option<&str>, updated_at: &str) -> Chat {
        let mut chat = Chat::new(name.map(str::to_string), false);
        chat.updated_at = updated_at.parse().unwrap();
        chat
    }

    fn user(id: &str, name: &str) -> User {
        User {
            id: id.to_string(),
            email: format!("{id}@example.test"),
            display_name: name.to_string(),
            avatar_url: None,
            phone_number: None,
            created_at: None,
            last_seen: None,
            status: None,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 23).unwrap()
    }

    #[test]
    fn test_message_preview_truncates_past_thirty_chars() {
        let long = "x".repeat(45);
        let preview = message_preview(&long);
        assert_eq!(preview, format!("{}...", "x".repeat(30)));
        assert_eq!(preview.chars().count(), 33);

        // At the limit and below, the text passes through unchanged.
        let exact = "y".repeat(30);
        assert_eq!(message_preview(&exact), exact);
        assert_eq!(message_preview("hi"), "hi");
    }

    #[test]
    fn test_relative_date_labels() {
        let today = today();
        let noon_today: DateTime<Utc> = "2026-08-23T12:00:00Z".parse().unwrap();
        let noon_yesterday: DateTime<Utc> = "2026-08-22T12:00:00Z".parse().unwrap();
        let older: DateTime<Utc> = "2024-01-01T10:00:00Z".parse().unwrap();

        assert_eq!(format_relative_date(noon_today, today), "Today");
        assert_eq!(format_relative_date(noon_yesterday, today), "Yesterday");
        assert_eq!(format_relative_date(older, today), "01/01/2024");
    }

    #[test]
    fn test_sidebar_time_label_today_vs_older() {
        let today = today();
        let this_morning: DateTime<Utc> = "2026-08-23T09:05:00Z".parse().unwrap();
        let last_week: DateTime<Utc> = "2026-08-16T09:05:00Z".parse().unwrap();

        assert_eq!(sidebar_time_label(this_morning, today), "09:05");
        assert_eq!(sidebar_time_label(last_week, today), "16/08/26");
    }

    #[test]
    fn test_user_initials() {
        assert_eq!(user_initials("John Doe"), "JD");
        assert_eq!(user_initials("alice"), "A");
        assert_eq!(user_initials("Mary Jane Watson"), "MJ");
        assert_eq!(user_initials(""), "");
    }

    #[test]
    fn test_sidebar_rows_preview_and_placeholder() {
        let mut with_messages = chat_updated(Some("Team"), "2024-01-01T10:00:00Z");
        with_messages.last_message = Some(message_at(
            &with_messages.id.clone(),
            "u2",
            &"x".repeat(45),
            "2024-01-01T10:00:00Z",
        ));
        let silent = chat_updated(Some("Quiet"), "2024-01-01T10:00:00Z");

        let rows = sidebar_rows(&[with_messages, silent], None, today());
        assert_eq!(rows[0].preview, format!("{}...", "x".repeat(30)));
        assert!(!rows[0].preview_is_placeholder);
        assert_eq!(rows[1].preview, "No messages yet");
        assert!(rows[1].preview_is_placeholder);
        // Not today: the stamp falls back to the short date.
        assert_eq!(rows[0].time_label, "01/01/24");
    }

    #[test]
    fn test_sidebar_rows_unnamed_chat_fallbacks() {
        let unnamed = chat_updated(None, "2026-08-23T08:00:00Z");
        let rows = sidebar_rows(&[unnamed], None, today());
        assert_eq!(rows[0].title, "");
        assert_eq!(rows[0].initials, "CH");
        assert!(rows[0].badge.is_none());
    }

    #[test]
    fn test_sidebar_rows_active_and_badge() {
        let mut chat = chat_updated(Some("Deals"), "2026-08-23T08:00:00Z");
        chat.kind = Some(crate::chat::types::ChatKind::Demo);
        let id = chat.id.clone();

        let rows = sidebar_rows(&[chat], Some(id.as_str()), today());
        assert!(rows[0].active);
        assert_eq!(rows[0].badge, Some("demo"));
    }

    #[test]
    fn test_sort_chats_by_recent() {
        let older = chat_updated(Some("older"), "2026-08-20T00:00:00Z");
        let newest = chat_updated(Some("newest"), "2026-08-23T00:00:00Z");
        let middle = chat_updated(Some("middle"), "2026-08-21T00:00:00Z");

        let sorted = sort_chats_by_recent(&[older, newest, middle]);
        let names: Vec<&str> = sorted
            .iter()
            .filter_map(|c| c.name.as_deref())
            .collect();
        assert_eq!(names, vec!["newest", "middle", "older"]);
    }

    #[test]
    fn test_count_unread() {
        let messages = vec![
            message_at("c1", "them", "old", "2026-08-23T08:00:00Z"),
            message_at("c1", "them", "new", "2026-08-23T10:00:00Z"),
            message_at("c1", "me", "mine", "2026-08-23T11:00:00Z"),
        ];
        let mark: DateTime<Utc> = "2026-08-23T09:00:00Z".parse().unwrap();

        // Only other senders past the mark count.
        assert_eq!(count_unread(&messages, "me", Some(mark)), 1);
        // No mark, nothing unread.
        assert_eq!(count_unread(&messages, "me", None), 0);
    }

    #[test]
    fn test_chat_participants_excludes_self() {
        let users = vec![user("u1", "Me"), user("u2", "Ada"), user("u3", "Bo")];
        let joined: DateTime<Utc> = "2026-08-01T00:00:00Z".parse().unwrap();
        let members = vec![
            ChatMember {
                chat_id: "c1".into(),
                user_id: "u1".into(),
                joined_at: joined,
                role: None,
            },
            ChatMember {
                chat_id: "c1".into(),
                user_id: "u2".into(),
                joined_at: joined,
                role: None,
            },
        ];

        let participants = chat_participants(&users, &members, "u1");
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].display_name, "Ada");
    }

    #[test]
    fn test_timeline_dividers_follow_day_changes() {
        let chat = chat_updated(Some("Team"), "2026-08-23T00:00:00Z");
        let messages = vec![
            message_at(&chat.id, "u2", "first", "2026-08-22T09:00:00Z"),
            message_at(&chat.id, "u2", "same day", "2026-08-22T10:00:00Z"),
            message_at(&chat.id, "u2", "next day", "2026-08-23T07:00:00Z"),
        ];

        let timeline = message_timeline(&messages, &[], &chat, "u1", today());
        assert_eq!(timeline[0].divider.as_deref(), Some("Yesterday"));
        assert!(timeline[1].divider.is_none());
        assert_eq!(timeline[2].divider.as_deref(), Some("Today"));
        assert_eq!(timeline[2].time_label, "07:00");
    }

    #[test]
    fn test_timeline_sender_names_only_for_incoming_group_messages() {
        let mut group = chat_updated(Some("Team"), "2026-08-23T00:00:00Z");
        group.is_group = true;
        let users = vec![user("u2", "Ada")];
        let messages = vec![
            message_at(&group.id, "u2", "known sender", "2026-08-23T09:00:00Z"),
            message_at(&group.id, "u9", "unknown sender", "2026-08-23T09:01:00Z"),
            message_at(&group.id, "u1", "mine", "2026-08-23T09:02:00Z"),
        ];

        let timeline = message_timeline(&messages, &users, &group, "u1", today());
        assert_eq!(timeline[0].sender_name.as_deref(), Some("Ada"));
        assert!(!timeline[0].outgoing);
        assert_eq!(timeline[1].sender_name.as_deref(), Some("Unknown User"));
        assert!(timeline[2].outgoing);
        assert!(timeline[2].sender_name.is_none());

        // Direct chats never label senders.
        let direct = chat_updated(Some("Pair"), "2026-08-23T00:00:00Z");
        let direct_messages = vec![message_at(&direct.id, "u2", "hi", "2026-08-23T09:00:00Z")];
        let timeline = message_timeline(&direct_messages, &users, &direct, "u1", today());
        assert!(timeline[0].sender_name.is_none());
    }

    #[test]
    fn test_attachment_render_variants() {
        let mut message = message_at("c1", "u2", "", "2026-08-23T09:00:00Z");
        assert!(attachment_render(&message).is_none());

        message.attachment_url = Some("https://files.example.test/a.png".into());
        message.attachment_type = Some(AttachmentKind::Image);
        assert!(matches!(
            attachment_render(&message),
            Some(AttachmentRender::Image { .. })
        ));

        message.attachment_type = Some(AttachmentKind::Video);
        assert!(matches!(
            attachment_render(&message),
            Some(AttachmentRender::Video { .. })
        ));

        message.attachment_type = Some(AttachmentKind::Document);
        assert!(matches!(
            attachment_render(&message),
            Some(AttachmentRender::Download { .. })
        ));

        // A URL with no recorded type still gets a working download link.
        message.attachment_type = None;
        assert!(matches!(
            attachment_render(&message),
            Some(AttachmentRender::Download { .. })
        ));
    }

    #[test]
    fn test_attachment_caption_by_mime() {
        let image = OutgoingAttachment::new("photo.png", "image/png", vec![1]);
        assert_eq!(attachment_caption(&image), "Sent an image: photo.png");

        let pdf = OutgoingAttachment::new("report.pdf", "application/pdf", vec![1]);
        assert_eq!(attachment_caption(&pdf), "Sent a file: report.pdf");
    }

    #[test]
    fn test_composer_validation() {
        assert_eq!(validate_text("   "), Err(ComposerError::Empty));
        assert!(validate_text("hello").is_ok());

        let too_big = OutgoingAttachment::new(
            "big.bin",
            "application/octet-stream",
            vec![0u8; OutgoingAttachment::MAX_SIZE_BYTES + 1],
        );
        assert_eq!(prepare_attachment(&too_big), Err(ComposerError::FileTooLarge));

        let at_limit = OutgoingAttachment::new(
            "ok.bin",
            "application/octet-stream",
            vec![0u8; OutgoingAttachment::MAX_SIZE_BYTES],
        );
        assert_eq!(
            prepare_attachment(&at_limit).as_deref(),
            Ok("Sent a file: ok.bin")
        );
    }
}
