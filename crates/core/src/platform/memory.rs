//! In-memory backend.
//!
//! A complete stand-in for the hosted platform: tables, filtered and
//! ordered selects, change-feed fan-out, object storage and accounts all
//! live in process. The test-suite runs against this backend, and it doubles
//! as an offline demo target. Fault injection flags and call counters let
//! tests assert not just results but which remote operations ran.

use super::{
    AuthSession, ChangeEvent, ChangeOp, EventFilter, Filter, Platform, SelectQuery, SortDir,
    Subscription,
};
use crate::error::{Error, Result};
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

const EVENT_BUFFER: usize = 64;

struct Subscriber {
    id: u64,
    table: String,
    filter: Option<EventFilter>,
    tx: mpsc::Sender<ChangeEvent>,
}

struct Account {
    user_id: String,
    email: String,
    password: String,
    access_token: String,
}

struct Inner {
    tables: HashMap<String, Vec<Value>>,
    objects: HashMap<String, Vec<u8>>,
    accounts: Vec<Account>,
    subscribers: Vec<Subscriber>,
    unsub_rx: mpsc::UnboundedReceiver<u64>,
}

impl Inner {
    /// Apply unsubscribes queued by dropped [`Subscription`] guards.
    fn prune_unsubscribed(&mut self) {
        while let Ok(id) = self.unsub_rx.try_recv() {
            self.subscribers.retain(|s| s.id != id);
        }
    }
}

/// In-process [`Platform`] implementation.
pub struct MemoryPlatform {
    inner: Mutex<Inner>,
    unsub_tx: mpsc::UnboundedSender<u64>,
    next_sub_id: AtomicU64,

    fail_selects: AtomicBool,
    fail_inserts: AtomicBool,
    fail_updates: AtomicBool,
    fail_uploads: AtomicBool,

    select_calls: AtomicUsize,
    insert_calls: AtomicUsize,
    update_calls: AtomicUsize,
    upload_calls: AtomicUsize,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    pub fn new() -> Self {
        let (unsub_tx, unsub_rx) = mpsc::unbounded_channel();
        Self {
            inner: Mutex::new(Inner {
                tables: HashMap::new(),
                objects: HashMap::new(),
                accounts: Vec::new(),
                subscribers: Vec::new(),
                unsub_rx,
            }),
            unsub_tx,
            next_sub_id: AtomicU64::new(1),
            fail_selects: AtomicBool::new(false),
            fail_inserts: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            fail_uploads: AtomicBool::new(false),
            select_calls: AtomicUsize::new(0),
            insert_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            upload_calls: AtomicUsize::new(0),
        }
    }

    // ==================== Test instrumentation ====================

    /// Make every subsequent select fail until cleared.
    pub fn set_fail_selects(&self, fail: bool) {
        self.fail_selects.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent insert fail until cleared.
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent update fail until cleared.
    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent upload fail until cleared.
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Number of select attempts so far (failed ones included).
    pub fn select_calls(&self) -> usize {
        self.select_calls.load(Ordering::SeqCst)
    }

    /// Number of insert attempts so far (failed ones included).
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// Number of update attempts so far (failed ones included).
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Number of upload attempts so far (failed ones included).
    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    /// Live subscriptions on one table.
    pub async fn subscriber_count(&self, table: &str) -> usize {
        let mut inner = self.inner.lock().await;
        inner.prune_unsubscribed();
        inner.subscribers.iter().filter(|s| s.table == table).count()
    }

    /// Live subscriptions on one table whose filter would accept this row.
    ///
    /// Distinguishes which filtered subscription is attached when a test
    /// hands a feed over from one chat to another.
    pub async fn subscriber_count_for(&self, table: &str, row: &Value) -> usize {
        let mut inner = self.inner.lock().await;
        inner.prune_unsubscribed();
        inner
            .subscribers
            .iter()
            .filter(|s| s.table == table && s.filter.as_ref().map_or(true, |f| f.matches(row)))
            .count()
    }

    /// Insert a row without publishing a change event or counting a call.
    ///
    /// Intended for arranging initial state in tests and demos. Assigns a
    /// fresh id when the row has none; returns the stored row.
    pub async fn seed(&self, table: &str, row: Value) -> Value {
        let row = with_id(row);
        let mut inner = self.inner.lock().await;
        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        row
    }

    /// Snapshot of all rows currently in a table.
    pub async fn rows(&self, table: &str) -> Vec<Value> {
        let inner = self.inner.lock().await;
        inner.tables.get(table).cloned().unwrap_or_default()
    }

    /// Bytes of a stored object, if present.
    pub async fn object(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().await;
        inner.objects.get(&format!("{bucket}/{path}")).cloned()
    }

    // ==================== Internals ====================

    async fn publish(&self, event: ChangeEvent) {
        let targets: Vec<mpsc::Sender<ChangeEvent>> = {
            let mut inner = self.inner.lock().await;
            inner.prune_unsubscribed();
            inner
                .subscribers
                .iter()
                .filter(|s| {
                    s.table == event.table
                        && s.filter.as_ref().map_or(true, |f| f.matches(&event.row))
                })
                .map(|s| s.tx.clone())
                .collect()
        };
        // Deliver outside the lock so a consumer can call back into the
        // platform while handling the event.
        for tx in targets {
            let _ = tx.send(event.clone()).await;
        }
    }
}

fn with_id(mut row: Value) -> Value {
    if let Some(object) = row.as_object_mut() {
        if !object.contains_key("id") {
            object.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
        }
    }
    row
}

fn compare_fields(a: &Value, b: &Value, column: &str) -> CmpOrdering {
    let left = a.get(column);
    let right = b.get(column);
    match (left, right) {
        (Some(Value::String(l)), Some(Value::String(r))) => l.cmp(r),
        (Some(Value::Number(l)), Some(Value::Number(r))) => l
            .as_f64()
            .partial_cmp(&r.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Some(l), Some(r)) => l.to_string().cmp(&r.to_string()),
        (Some(_), None) => CmpOrdering::Less,
        (None, Some(_)) => CmpOrdering::Greater,
        (None, None) => CmpOrdering::Equal,
    }
}

#[async_trait::async_trait]
impl Platform for MemoryPlatform {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn select(&self, query: SelectQuery) -> Result<Vec<Value>> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_selects.load(Ordering::SeqCst) {
            return Err(Error::Query("injected select failure".into()));
        }

        let inner = self.inner.lock().await;
        let mut rows: Vec<Value> = inner
            .tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|f| f.matches(row)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(inner);

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ordering = compare_fields(a, b, &order.column);
                match order.dir {
                    SortDir::Asc => ordering,
                    SortDir::Desc => ordering.reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Error::Query("injected insert failure".into()));
        }

        let row = with_id(row);
        {
            let mut inner = self.inner.lock().await;
            inner
                .tables
                .entry(table.to_string())
                .or_default()
                .push(row.clone());
        }
        self.publish(ChangeEvent {
            table: table.to_string(),
            op: ChangeOp::Insert,
            row: row.clone(),
        })
        .await;
        Ok(row)
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Error::Query("injected update failure".into()));
        }

        let mut touched = Vec::new();
        {
            let mut inner = self.inner.lock().await;
            if let Some(rows) = inner.tables.get_mut(table) {
                for row in rows.iter_mut() {
                    if filters.iter().all(|f| f.matches(row)) {
                        if let (Some(target), Some(fields)) =
                            (row.as_object_mut(), patch.as_object())
                        {
                            for (key, value) in fields {
                                target.insert(key.clone(), value.clone());
                            }
                        }
                        touched.push(row.clone());
                    }
                }
            }
        }
        for row in touched {
            self.publish(ChangeEvent {
                table: table.to_string(),
                op: ChangeOp::Update,
                row,
            })
            .await;
        }
        Ok(())
    }

    async fn upsert(&self, table: &str, row: Value) -> Result<()> {
        let row = with_id(row);
        let id = row.get("id").cloned().unwrap_or(Value::Null);
        let replaced = {
            let mut inner = self.inner.lock().await;
            let rows = inner.tables.entry(table.to_string()).or_default();
            match rows.iter_mut().find(|r| r.get("id") == Some(&id)) {
                Some(existing) => {
                    *existing = row.clone();
                    true
                }
                None => {
                    rows.push(row.clone());
                    false
                }
            }
        };
        self.publish(ChangeEvent {
            table: table.to_string(),
            op: if replaced {
                ChangeOp::Update
            } else {
                ChangeOp::Insert
            },
            row,
        })
        .await;
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        _content_type: &str,
        data: Vec<u8>,
    ) -> Result<String> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(Error::Storage("injected upload failure".into()));
        }

        let mut inner = self.inner.lock().await;
        inner.objects.insert(format!("{bucket}/{path}"), data);
        Ok(format!("memory://{bucket}/{path}"))
    }

    async fn subscribe(&self, table: &str, filter: Option<EventFilter>) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let id = self.next_sub_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut inner = self.inner.lock().await;
            inner.prune_unsubscribed();
            inner.subscribers.push(Subscriber {
                id,
                table: table.to_string(),
                filter,
                tx,
            });
        }
        let unsub = self.unsub_tx.clone();
        Ok(Subscription::new(rx, move || {
            let _ = unsub.send(id);
        }))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let inner = self.inner.lock().await;
        inner
            .accounts
            .iter()
            .find(|a| a.email == email && a.password == password)
            .map(|a| AuthSession {
                user_id: a.user_id.clone(),
                email: a.email.clone(),
                access_token: Some(a.access_token.clone()),
            })
            .ok_or_else(|| Error::Auth("invalid login credentials".into()))
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        _display_name: &str,
    ) -> Result<AuthSession> {
        let mut inner = self.inner.lock().await;
        if inner.accounts.iter().any(|a| a.email == email) {
            return Err(Error::Auth("user already registered".into()));
        }
        let account = Account {
            user_id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            password: password.to_string(),
            access_token: Uuid::new_v4().to_string(),
        };
        let session = AuthSession {
            user_id: account.user_id.clone(),
            email: account.email.clone(),
            access_token: Some(account.access_token.clone()),
        };
        inner.accounts.push(account);
        Ok(session)
    }

    async fn sign_out(&self, access_token: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(account) = inner
            .accounts
            .iter_mut()
            .find(|a| a.access_token == access_token)
        {
            // Rotate the token so the old one stops working.
            account.access_token = Uuid::new_v4().to_string();
        }
        Ok(())
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_assigns_id_and_publishes() {
        let platform = MemoryPlatform::new();
        let mut sub = platform.subscribe("chats", None).await.unwrap();

        let stored = platform.insert("chats", json!({"name": "general"})).await.unwrap();
        assert!(stored.get("id").and_then(Value::as_str).is_some());

        let event = sub.recv().await.unwrap();
        assert_eq!(event.table, "chats");
        assert_eq!(event.op, ChangeOp::Insert);
        assert_eq!(event.row, stored);
    }

    #[tokio::test]
    async fn test_select_filters_orders_and_limits() {
        let platform = MemoryPlatform::new();
        platform.seed("messages", json!({"chat_id": "a", "created_at": "2026-01-02T00:00:00Z"})).await;
        platform.seed("messages", json!({"chat_id": "a", "created_at": "2026-01-01T00:00:00Z"})).await;
        platform.seed("messages", json!({"chat_id": "b", "created_at": "2026-01-03T00:00:00Z"})).await;

        let rows = platform
            .select(
                SelectQuery::new("messages")
                    .filter(Filter::eq("chat_id", "a"))
                    .order_desc("created_at")
                    .limit(1),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["created_at"], "2026-01-02T00:00:00Z");
    }

    #[tokio::test]
    async fn test_filtered_subscription_routing() {
        let platform = MemoryPlatform::new();
        let mut sub = platform
            .subscribe("messages", Some(EventFilter::eq("chat_id", "a")))
            .await
            .unwrap();

        platform.insert("messages", json!({"chat_id": "b", "content": "skip"})).await.unwrap();
        platform.insert("messages", json!({"chat_id": "a", "content": "take"})).await.unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.row["content"], "take");
        assert!(sub.try_recv().is_none());

        // The filter-aware count sees this subscription only through rows
        // it would route.
        assert_eq!(platform.subscriber_count_for("messages", &json!({"chat_id": "a"})).await, 1);
        assert_eq!(platform.subscriber_count_for("messages", &json!({"chat_id": "b"})).await, 0);
    }

    #[tokio::test]
    async fn test_dropping_subscription_unsubscribes() {
        let platform = MemoryPlatform::new();
        let sub = platform.subscribe("chats", None).await.unwrap();
        assert_eq!(platform.subscriber_count("chats").await, 1);

        drop(sub);
        assert_eq!(platform.subscriber_count("chats").await, 0);
    }

    #[tokio::test]
    async fn test_update_patches_matching_rows() {
        let platform = MemoryPlatform::new();
        let chat = platform.seed("chats", json!({"name": "a", "updated_at": "old"})).await;
        let id = chat["id"].as_str().unwrap().to_string();

        platform
            .update("chats", &[Filter::eq("id", id.clone())], json!({"updated_at": "new"}))
            .await
            .unwrap();

        let rows = platform.rows("chats").await;
        assert_eq!(rows[0]["updated_at"], "new");
        assert_eq!(rows[0]["name"], "a");
    }

    #[tokio::test]
    async fn test_fault_injection_and_counters() {
        let platform = MemoryPlatform::new();
        platform.set_fail_inserts(true);

        let result = platform.insert("messages", json!({"content": "x"})).await;
        assert!(result.is_err());
        assert_eq!(platform.insert_calls(), 1);
        assert!(platform.rows("messages").await.is_empty());

        platform.set_fail_inserts(false);
        platform.insert("messages", json!({"content": "x"})).await.unwrap();
        assert_eq!(platform.insert_calls(), 2);
    }

    #[tokio::test]
    async fn test_auth_round_trip() {
        let platform = MemoryPlatform::new();
        let signed_up = platform.sign_up("a@example.test", "pw", "A").await.unwrap();
        assert!(signed_up.access_token.is_some());

        let session = platform.sign_in("a@example.test", "pw").await.unwrap();
        assert_eq!(session.user_id, signed_up.user_id);

        let wrong = platform.sign_in("a@example.test", "nope").await;
        assert!(matches!(wrong, Err(Error::Auth(_))));

        let dup = platform.sign_up("a@example.test", "pw2", "A").await;
        assert!(matches!(dup, Err(Error::Auth(_))));
    }
}
