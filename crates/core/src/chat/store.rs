//! Reconciled chat state and its subscription lifecycle.
//!
//! [`ChatStore`] mirrors the remote chat tables for one signed-in user: the
//! chat list, the user directory, the open chat and its messages. Remote
//! truth arrives two ways, full fetches on load or selection and push events
//! from the change feeds, and the store merges both into one local view.
//! Components follow along through a broadcast of [`ChatEvent`]s.
//!
//! The store is never the system of record. Everything it holds can be
//! rebuilt from the remote tables at any time.

use crate::chat::gateway::ChatGateway;
use crate::chat::types::{Chat, Message, OutgoingAttachment, User};
use crate::error::{Error, Result};
use crate::platform::{ChangeEvent, ChangeOp};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Broadcast buffer for state-change events. A receiver that falls this far
/// behind re-reads the accessors anyway.
const EVENT_BUFFER: usize = 64;

/// State-change notifications broadcast to interested components.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// The chat list finished loading.
    ChatsLoaded { count: usize },
    /// The user directory finished loading.
    UsersLoaded { count: usize },
    /// A chat row arrived over the change feed and was merged.
    ChatUpserted { chat_id: String },
    /// History for the newly selected chat replaced the message list.
    MessagesLoaded { chat_id: String, count: usize },
    /// A live message was appended to the open chat.
    MessageAppended { message: Message },
    /// The selection changed; `None` means no chat is open.
    CurrentChatChanged { chat_id: Option<String> },
    /// A user-facing notice, the kind a UI surfaces as a toast.
    Notice { text: String },
}

#[derive(Default)]
struct StoreState {
    chats: Vec<Chat>,
    filtered_chats: Vec<Chat>,
    users: Vec<User>,
    current_chat: Option<Chat>,
    messages: Vec<Message>,
    loading: bool,
}

#[derive(Default)]
struct Tasks {
    chat_feed: Option<JoinHandle<()>>,
    message_feed: Option<JoinHandle<()>>,
    message_feed_generation: u64,
}

struct StoreInner {
    gateway: ChatGateway,
    user_id: String,
    state: Mutex<StoreState>,
    tasks: std::sync::Mutex<Tasks>,
    events: broadcast::Sender<ChatEvent>,
    /// Bumped on every selection change; work started under an older
    /// generation discards its result instead of applying it.
    generation: AtomicU64,
    initialized: AtomicBool,
}

/// Local mirror of one user's chats, driven by fetches and change feeds.
///
/// Constructed once per session; dropping it (or calling
/// [`close`](ChatStore::close)) tears down both change feeds.
pub struct ChatStore {
    inner: Arc<StoreInner>,
}

impl ChatStore {
    pub fn new(gateway: ChatGateway, user_id: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(StoreInner {
                gateway,
                user_id: user_id.into(),
                state: Mutex::new(StoreState::default()),
                tasks: std::sync::Mutex::new(Tasks::default()),
                events,
                generation: AtomicU64::new(0),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    /// Load the chat list and user directory, then start following
    /// chat-table changes. Later calls are no-ops.
    pub async fn initialize(&self) {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.inner.gateway.is_configured() {
            self.inner.emit(ChatEvent::Notice {
                text: "Chat functionality unavailable. Connection not configured.".into(),
            });
        }
        {
            let mut state = self.inner.state.lock().await;
            state.loading = true;
        }

        match self
            .inner
            .gateway
            .list_chats_for_user(&self.inner.user_id)
            .await
        {
            Ok(chats) => {
                let count = chats.len();
                let mut state = self.inner.state.lock().await;
                state.filtered_chats = chats.clone();
                state.chats = chats;
                state.loading = false;
                drop(state);
                self.inner.emit(ChatEvent::ChatsLoaded { count });
            }
            Err(e) => {
                warn!("failed to load chats: {e}");
                {
                    let mut state = self.inner.state.lock().await;
                    state.loading = false;
                }
                self.inner.emit(ChatEvent::Notice {
                    text: "Failed to load chats".into(),
                });
            }
        }

        let users = self.inner.gateway.list_users().await;
        let count = users.len();
        {
            let mut state = self.inner.state.lock().await;
            state.users = users;
        }
        self.inner.emit(ChatEvent::UsersLoaded { count });

        self.spawn_chat_feed();
    }

    /// Open a chat, or clear the selection with `None`.
    ///
    /// The previous chat's message feed is closed first, even if it never
    /// finished opening. History for the new chat replaces the message
    /// list; a history load that resolves after the selection has moved on
    /// again is discarded rather than applied.
    pub async fn select_chat(&self, chat: Option<Chat>) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.stop_message_feed();

        let chat_id = chat.as_ref().map(|c| c.id.clone());
        {
            let mut state = self.inner.state.lock().await;
            state.current_chat = chat;
            state.messages.clear();
        }
        self.inner.emit(ChatEvent::CurrentChatChanged {
            chat_id: chat_id.clone(),
        });

        let chat_id = match chat_id {
            Some(id) => id,
            None => return,
        };

        // Follow live inserts for the new chat. The subscription opens
        // inside the task so the handle exists from the first instant and
        // aborting it always tears the feed down, however early the next
        // switch comes.
        let inner = Arc::downgrade(&self.inner);
        let feed_chat_id = chat_id.clone();
        let handle = tokio::spawn(async move {
            let mut subscription = {
                let strong = match inner.upgrade() {
                    Some(strong) => strong,
                    None => return,
                };
                match strong.gateway.subscribe_messages(&feed_chat_id).await {
                    Ok(sub) => sub,
                    Err(e) => {
                        warn!("message feed unavailable for chat {feed_chat_id}: {e}");
                        return;
                    }
                }
            };
            while let Some(event) = subscription.recv().await {
                let strong = match inner.upgrade() {
                    Some(strong) => strong,
                    None => return,
                };
                strong.apply_message_change(generation, event).await;
            }
            debug!("message feed for chat {feed_chat_id} closed");
        });
        self.inner.install_message_feed(generation, handle);

        match self.inner.gateway.list_messages(&chat_id).await {
            Ok(messages) => {
                let mut state = self.inner.state.lock().await;
                if self.inner.generation.load(Ordering::SeqCst) != generation {
                    debug!("discarding stale history for chat {chat_id}");
                    return;
                }
                let count = messages.len();
                state.messages = messages;
                drop(state);
                self.inner.emit(ChatEvent::MessagesLoaded { chat_id, count });
            }
            Err(e) => {
                warn!("failed to load messages for chat {chat_id}: {e}");
                self.inner.emit(ChatEvent::Notice {
                    text: "Failed to load messages".into(),
                });
            }
        }
    }

    /// Send a message in the open chat.
    ///
    /// Validation failures and remote failures surface both as the returned
    /// error and as a [`ChatEvent::Notice`]; local state is never touched
    /// here. The sent message appears through the live feed, not from this
    /// call.
    pub async fn send_message(
        &self,
        content: &str,
        attachment: Option<OutgoingAttachment>,
    ) -> Result<Message> {
        let chat_id = {
            let state = self.inner.state.lock().await;
            state.current_chat.as_ref().map(|c| c.id.clone())
        };
        let chat_id = match chat_id {
            Some(id) => id,
            None => {
                self.inner.emit(ChatEvent::Notice {
                    text: "Chat functionality unavailable".into(),
                });
                return Err(Error::Chat("no chat is selected".into()));
            }
        };
        if content.trim().is_empty() && attachment.is_none() {
            self.inner.emit(ChatEvent::Notice {
                text: "Message is empty".into(),
            });
            return Err(Error::Chat("message is empty".into()));
        }
        if let Some(file) = &attachment {
            if file.exceeds_size_limit() {
                self.inner.emit(ChatEvent::Notice {
                    text: "File size exceeds 10MB limit".into(),
                });
                return Err(Error::Chat("attachment exceeds the size limit".into()));
            }
        }

        match self
            .inner
            .gateway
            .send_message(&chat_id, &self.inner.user_id, content, attachment)
            .await
        {
            Ok(message) => Ok(message),
            Err(Error::NotConfigured) => {
                self.inner.emit(ChatEvent::Notice {
                    text: "Chat functionality unavailable".into(),
                });
                Err(Error::NotConfigured)
            }
            Err(e) => {
                warn!("failed to send message in chat {chat_id}: {e}");
                self.inner.emit(ChatEvent::Notice {
                    text: "Failed to send message".into(),
                });
                Err(e)
            }
        }
    }

    /// Narrow the filtered list by case-insensitive name match. Blank
    /// queries restore the full list. Purely local.
    pub async fn filter_chats(&self, query: &str) {
        let mut state = self.inner.state.lock().await;
        let filtered = if query.trim().is_empty() {
            state.chats.clone()
        } else {
            let needle = query.to_lowercase();
            state
                .chats
                .iter()
                .filter(|chat| {
                    chat.name
                        .as_deref()
                        .map(|name| name.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };
        state.filtered_chats = filtered;
    }

    // ==================== Accessors ====================

    pub async fn chats(&self) -> Vec<Chat> {
        self.inner.state.lock().await.chats.clone()
    }

    pub async fn filtered_chats(&self) -> Vec<Chat> {
        self.inner.state.lock().await.filtered_chats.clone()
    }

    pub async fn users(&self) -> Vec<User> {
        self.inner.state.lock().await.users.clone()
    }

    pub async fn current_chat(&self) -> Option<Chat> {
        self.inner.state.lock().await.current_chat.clone()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.inner.state.lock().await.messages.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.inner.state.lock().await.loading
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// Follow state-change events. Receivers that lag past the buffer skip
    /// ahead; everything they miss is recoverable from the accessors.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.events.subscribe()
    }

    /// Stop both change feeds. Also runs on drop.
    pub fn close(&self) {
        self.inner.shutdown();
    }

    fn spawn_chat_feed(&self) {
        let inner = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut subscription = {
                let strong = match inner.upgrade() {
                    Some(strong) => strong,
                    None => return,
                };
                match strong.gateway.subscribe_chats().await {
                    Ok(sub) => sub,
                    Err(e) => {
                        warn!("chat change feed unavailable: {e}");
                        return;
                    }
                }
            };
            while let Some(event) = subscription.recv().await {
                let strong = match inner.upgrade() {
                    Some(strong) => strong,
                    None => return,
                };
                strong.apply_chat_change(event).await;
            }
            debug!("chat change feed closed");
        });
        if let Ok(mut tasks) = self.inner.tasks.lock() {
            if let Some(old) = tasks.chat_feed.replace(handle) {
                old.abort();
            }
        }
    }
}

impl Drop for ChatStore {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl StoreInner {
    /// Merge one chat-table change into the local lists.
    ///
    /// Only rows for chats the user is a member of are applied, and the row
    /// is re-fetched through the gateway so the merged copy carries its
    /// latest message. Deletions are not part of the product and are
    /// dropped.
    async fn apply_chat_change(&self, event: ChangeEvent) {
        if event.op == ChangeOp::Delete {
            return;
        }
        let chat_id = match event.row.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => return,
        };
        match self.gateway.is_member(&chat_id, &self.user_id).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!("membership check failed for chat {chat_id}: {e}");
                return;
            }
        }
        let chat = match self.gateway.fetch_chat(&chat_id).await {
            Ok(Some(chat)) => chat,
            Ok(None) => return,
            Err(e) => {
                warn!("failed to refresh chat {chat_id}: {e}");
                return;
            }
        };
        {
            // Replace in place or append; recency order is only restored by
            // the next full fetch.
            let mut state = self.state.lock().await;
            upsert_by_id(&mut state.chats, &chat);
            upsert_by_id(&mut state.filtered_chats, &chat);
        }
        self.emit(ChatEvent::ChatUpserted { chat_id });
    }

    /// Append one live message to the open chat.
    async fn apply_message_change(&self, generation: u64, event: ChangeEvent) {
        if event.op != ChangeOp::Insert {
            return;
        }
        let message: Message = match serde_json::from_value(event.row) {
            Ok(message) => message,
            Err(e) => {
                debug!("skipping malformed message event: {e}");
                return;
            }
        };
        let mut state = self.state.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let current = state.current_chat.as_ref().map(|c| c.id.as_str());
        if current != Some(message.chat_id.as_str()) {
            return;
        }
        // The send path never appends optimistically, so the feed is the
        // only writer here; the id check covers a message that raced into
        // the history fetch.
        if state.messages.iter().any(|m| m.id == message.id) {
            return;
        }
        state.messages.push(message.clone());
        drop(state);
        self.emit(ChatEvent::MessageAppended { message });
    }

    /// Store the new message-feed task, unless a later selection already
    /// installed its own.
    fn install_message_feed(&self, generation: u64, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            if generation < tasks.message_feed_generation {
                handle.abort();
                return;
            }
            tasks.message_feed_generation = generation;
            if let Some(old) = tasks.message_feed.replace(handle) {
                old.abort();
            }
        } else {
            handle.abort();
        }
    }

    fn stop_message_feed(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            if let Some(task) = tasks.message_feed.take() {
                task.abort();
            }
        }
    }

    fn shutdown(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            if let Some(task) = tasks.chat_feed.take() {
                task.abort();
            }
            if let Some(task) = tasks.message_feed.take() {
                task.abort();
            }
        }
    }

    fn emit(&self, event: ChatEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

fn upsert_by_id(list: &mut Vec<Chat>, chat: &Chat) {
    match list.iter_mut().find(|c| c.id == chat.id) {
        Some(slot) => *slot = chat.clone(),
        None => list.push(chat.clone()),
    }
}

// ==================== Tests ====================
