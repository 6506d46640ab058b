//! Document store collaborator: documents, queries, and live queries.
//!
//! The backend is injected as `Arc<dyn DocumentStore>` so the sync core can
//! run against the hosted service (`FirestoreStore`) or the in-memory
//! implementation (`MemoryStore`) interchangeably.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from the document store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("store request failed: {0}")]
    Backend(String),
}

/// Sentinel value resolved to the server's clock at write time.
pub const SERVER_TIMESTAMP: &str = "__server_timestamp__";

/// A field value that the store replaces with the write time (epoch millis).
pub fn server_timestamp() -> Value {
    Value::String(SERVER_TIMESTAMP.to_string())
}

/// Current wall-clock time in epoch millis.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Equality filter tree over document fields.
#[derive(Debug, Clone)]
pub enum Filter {
    /// `field == value`
    Eq(String, Value),
    /// Every inner filter matches.
    And(Vec<Filter>),
    /// At least one inner filter matches.
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    /// Whether a document matches this filter.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::Eq(field, value) => doc.get(field) == Some(value),
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
        }
    }
}

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Ordering of query results by a single document field.
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Ascending,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Descending,
        }
    }
}

/// One result row: store-assigned document id plus the document body.
pub type DocEntry = (String, Value);

/// A fully materialized result set for one query.
///
/// Live queries always deliver the complete current result set, never a
/// partial patch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub docs: Vec<DocEntry>,
}

/// Sort entries by an order field, document id as tie-break.
pub(crate) fn sort_entries(entries: &mut [DocEntry], order: Option<&OrderBy>) {
    match order {
        Some(order) => entries.sort_by(|(a_id, a), (b_id, b)| {
            let cmp = compare_values(a.get(&order.field), b.get(&order.field));
            let cmp = match order.direction {
                Direction::Ascending => cmp,
                Direction::Descending => cmp.reverse(),
            };
            cmp.then_with(|| a_id.cmp(b_id))
        }),
        None => entries.sort_by(|(a_id, _), (b_id, _)| a_id.cmp(b_id)),
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering as O;
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            let a = a.as_f64().unwrap_or(0.0);
            let b = b.as_f64().unwrap_or(0.0);
            a.partial_cmp(&b).unwrap_or(O::Equal)
        }
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(_), None) => O::Greater,
        (None, Some(_)) => O::Less,
        _ => O::Equal,
    }
}

/// Cancellation handle for a live query.
///
/// `detach` is synchronous and idempotent; once it returns, the query
/// delivers no further snapshots. Dropping the handle detaches.
pub struct DetachHandle {
    detached: Arc<AtomicBool>,
    on_detach: Option<Box<dyn FnOnce() + Send>>,
}

impl DetachHandle {
    pub fn new(detached: Arc<AtomicBool>, on_detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detached,
            on_detach: Some(Box::new(on_detach)),
        }
    }

    pub fn detach(&mut self) {
        if !self.detached.swap(true, Ordering::SeqCst) {
            if let Some(f) = self.on_detach.take() {
                f();
            }
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}

impl Drop for DetachHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

/// A standing query: an unbounded stream of full snapshots plus its detach
/// handle. The current result set is delivered immediately on subscribe and
/// again after every matching change.
pub struct Subscription {
    pub rx: mpsc::UnboundedReceiver<Snapshot>,
    pub handle: DetachHandle,
}

impl Subscription {
    /// Next snapshot, or `None` once the query has terminated.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }

    pub fn detach(&mut self) {
        self.handle.detach();
    }
}

/// The document store collaborator consumed by the sync core.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document, returning its store-assigned id.
    async fn insert(&self, collection: &str, doc: Value) -> Result<String, StoreError>;

    /// Create `collection/{id}` or merge the patch fields into it.
    async fn upsert(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError>;

    /// Fetch one document by id.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// Delete one document by id.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// One-shot query.
    async fn query(
        &self,
        collection: &str,
        filter: &Filter,
        order: Option<&OrderBy>,
    ) -> Result<Vec<DocEntry>, StoreError>;

    /// Standing query delivering full snapshots.
    fn live_query(&self, collection: &str, filter: Filter, order: Option<OrderBy>) -> Subscription;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_eq() {
        let doc = json!({"senderId": "a", "recipientId": "b"});
        assert!(Filter::eq("senderId", "a").matches(&doc));
        assert!(!Filter::eq("senderId", "b").matches(&doc));
        assert!(!Filter::eq("missing", "a").matches(&doc));
    }

    #[test]
    fn test_filter_composition() {
        let doc = json!({"senderId": "a", "recipientId": "b"});
        let pair = Filter::or(vec![
            Filter::and(vec![Filter::eq("senderId", "a"), Filter::eq("recipientId", "b")]),
            Filter::and(vec![Filter::eq("senderId", "b"), Filter::eq("recipientId", "a")]),
        ]);
        assert!(pair.matches(&doc));

        let reversed = json!({"senderId": "b", "recipientId": "a"});
        assert!(pair.matches(&reversed));

        let unrelated = json!({"senderId": "a", "recipientId": "c"});
        assert!(!pair.matches(&unrelated));
    }

    #[test]
    fn test_sort_entries_by_field_then_id() {
        let mut entries = vec![
            ("m2".to_string(), json!({"sentAt": 200})),
            ("m1".to_string(), json!({"sentAt": 100})),
            ("m3".to_string(), json!({"sentAt": 200})),
        ];
        sort_entries(&mut entries, Some(&OrderBy::asc("sentAt")));
        let ids: Vec<&str> = entries.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);

        sort_entries(&mut entries, Some(&OrderBy::desc("sentAt")));
        let ids: Vec<&str> = entries.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3", "m1"]);
    }

    #[test]
    fn test_detach_handle_idempotent() {
        use std::sync::atomic::AtomicU32;

        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let mut handle = DetachHandle::new(Arc::new(AtomicBool::new(false)), move || {
            calls2.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!handle.is_detached());
        handle.detach();
        handle.detach();
        assert!(handle.is_detached());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
