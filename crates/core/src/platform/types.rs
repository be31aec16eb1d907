//! Common types for the hosted backend platform.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Row filter understood by the query builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `column = value`
    Eq { column: String, value: String },
    /// `column IN (values...)`
    In { column: String, values: Vec<String> },
}

impl Filter {
    /// Equality filter.
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Membership filter.
    pub fn in_list(column: impl Into<String>, values: Vec<String>) -> Self {
        Filter::In {
            column: column.into(),
            values,
        }
    }

    /// Render as a REST query-string pair, e.g. `("chat_id", "eq.42")`.
    pub fn to_query_pair(&self) -> (String, String) {
        match self {
            Filter::Eq { column, value } => (column.clone(), format!("eq.{value}")),
            Filter::In { column, values } => (column.clone(), format!("in.({})", values.join(","))),
        }
    }

    /// Whether a JSON row satisfies this filter.
    ///
    /// Used by the in-memory backend; values are compared through their
    /// string form, which matches how they travel in query strings.
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Filter::Eq { column, value } => field_as_string(row, column).as_deref() == Some(value),
            Filter::In { column, values } => match field_as_string(row, column) {
                Some(field) => values.iter().any(|v| *v == field),
                None => false,
            },
        }
    }
}

fn field_as_string(row: &Value, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

/// Single-column ordering clause.
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub column: String,
    pub dir: SortDir,
}

/// A select query against one table.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    pub table: String,
    pub filters: Vec<Filter>,
    pub order: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl SelectQuery {
    /// Start a query against `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    /// Add a filter.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Order ascending by `column`.
    pub fn order_asc(mut self, column: impl Into<String>) -> Self {
        self.order = Some(OrderBy {
            column: column.into(),
            dir: SortDir::Asc,
        });
        self
    }

    /// Order descending by `column`.
    pub fn order_desc(mut self, column: impl Into<String>) -> Self {
        self.order = Some(OrderBy {
            column: column.into(),
            dir: SortDir::Desc,
        });
        self
    }

    /// Cap the number of returned rows.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Operation kind carried by a change-feed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// One change-feed event.
///
/// `row` is the new row image as reported by the backend, not yet validated
/// against any schema; consumers deserialize it into their own types and
/// decide what to do with rows that do not fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub op: ChangeOp,
    pub row: Value,
}

/// Server-side row filter for a subscription (single-column equality).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub column: String,
    pub value: String,
}

impl EventFilter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Wire form, e.g. `chat_id=eq.42`.
    pub fn to_wire(&self) -> String {
        format!("{}=eq.{}", self.column, self.value)
    }

    /// Whether a JSON row satisfies this filter.
    pub fn matches(&self, row: &Value) -> bool {
        field_as_string(row, &self.column).as_deref() == Some(self.value.as_str())
    }
}

/// Authenticated session returned by the platform's auth endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub user_id: String,
    pub email: String,
    /// `None` when the backend requires email confirmation before issuing
    /// a session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// A live change-feed subscription.
///
/// Events arrive on an internal channel. Dropping the subscription leaves
/// the channel and releases the server-side topic.
pub struct Subscription {
    events: mpsc::Receiver<ChangeEvent>,
    _guard: SubscriptionGuard,
}

impl Subscription {
    /// Wrap an event channel with a close action that runs exactly once,
    /// when the subscription is dropped.
    pub fn new(
        events: mpsc::Receiver<ChangeEvent>,
        on_close: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            _guard: SubscriptionGuard(Some(Box::new(on_close))),
        }
    }

    /// Receive the next event; `None` once the feed is closed.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Non-blocking receive, for tests and polling callers.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.events.try_recv().ok()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

struct SubscriptionGuard(Option<Box<dyn FnOnce() + Send>>);

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(on_close) = self.0.take() {
            on_close();
        }
    }
}

// ==================== Tests ====================
