//! In-memory document store.
//!
//! Implements the same subscription semantics as the hosted backend: every
//! mutation pushes a full snapshot to each matching live query. Used by the
//! test suite as the substitutable collaborator.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{
    now_millis, sort_entries, DetachHandle, DocEntry, DocumentStore, Filter, OrderBy, Snapshot,
    StoreError, Subscription, SERVER_TIMESTAMP,
};

struct Watcher {
    id: u64,
    collection: String,
    filter: Filter,
    order: Option<OrderBy>,
    tx: mpsc::UnboundedSender<Snapshot>,
    detached: Arc<AtomicBool>,
}

#[derive(Default)]
struct Inner {
    collections: BTreeMap<String, BTreeMap<String, Value>>,
    watchers: Vec<Watcher>,
}

impl Inner {
    fn result_set(&self, collection: &str, filter: &Filter, order: Option<&OrderBy>) -> Vec<DocEntry> {
        let mut entries: Vec<DocEntry> = self
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| filter.matches(doc))
                    .map(|(id, doc)| (id.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default();
        sort_entries(&mut entries, order);
        entries
    }

    /// Push the current result set to every live watcher of `collection`.
    fn notify(&self, collection: &str) {
        for watcher in &self.watchers {
            if watcher.collection != collection || watcher.detached.load(Ordering::SeqCst) {
                continue;
            }
            let snapshot = Snapshot {
                docs: self.result_set(collection, &watcher.filter, watcher.order.as_ref()),
            };
            let _ = watcher.tx.send(snapshot);
        }
    }
}

/// In-memory `DocumentStore` implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    next_watcher: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Replace server-timestamp sentinels in top-level fields with `now`.
fn resolve_timestamps(doc: &mut Value, now: i64) {
    if let Value::Object(fields) = doc {
        for value in fields.values_mut() {
            if value.as_str() == Some(SERVER_TIMESTAMP) {
                *value = Value::from(now);
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, collection: &str, mut doc: Value) -> Result<String, StoreError> {
        if !doc.is_object() {
            return Err(StoreError::Backend("document must be an object".to_string()));
        }
        resolve_timestamps(&mut doc, now_millis());

        let id = Uuid::new_v4().to_string();
        let mut inner = self.inner.lock().unwrap();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), doc);
        inner.notify(collection);
        Ok(id)
    }

    async fn upsert(&self, collection: &str, id: &str, mut patch: Value) -> Result<(), StoreError> {
        resolve_timestamps(&mut patch, now_millis());
        let Value::Object(patch_fields) = patch else {
            return Err(StoreError::Backend("patch must be an object".to_string()));
        };

        let mut inner = self.inner.lock().unwrap();
        let doc = inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .entry(id.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(fields) = doc {
            for (key, value) in patch_fields {
                fields.insert(key, value);
            }
        }
        inner.notify(collection);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id));
        if removed.is_some() {
            inner.notify(collection);
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        filter: &Filter,
        order: Option<&OrderBy>,
    ) -> Result<Vec<DocEntry>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.result_set(collection, filter, order))
    }

    fn live_query(&self, collection: &str, filter: Filter, order: Option<OrderBy>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let detached = Arc::new(AtomicBool::new(false));
        let watcher_id = self.next_watcher.fetch_add(1, Ordering::SeqCst);

        let mut inner = self.inner.lock().unwrap();
        // Initial snapshot before the watcher can observe any further change.
        let _ = tx.send(Snapshot {
            docs: inner.result_set(collection, &filter, order.as_ref()),
        });
        inner.watchers.push(Watcher {
            id: watcher_id,
            collection: collection.to_string(),
            filter,
            order,
            tx,
            detached: Arc::clone(&detached),
        });

        let registry = Arc::clone(&self.inner);
        let handle = DetachHandle::new(detached, move || {
            let mut inner = registry.lock().unwrap();
            inner.watchers.retain(|w| w.id != watcher_id);
        });

        Subscription { rx, handle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_assigns_unique_ids() {
        let store = MemoryStore::new();
        let a = store.insert("messages", json!({"text": "x"})).await.unwrap();
        let b = store.insert("messages", json!({"text": "y"})).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_server_timestamp_resolved_on_write() {
        let store = MemoryStore::new();
        let before = now_millis();
        let id = store
            .insert("messages", json!({"sentAt": crate::store::server_timestamp()}))
            .await
            .unwrap();
        let doc = store.get("messages", &id).await.unwrap().unwrap();
        let sent_at = doc["sentAt"].as_i64().unwrap();
        assert!(sent_at >= before);
    }

    #[tokio::test]
    async fn test_upsert_merges_fields() {
        let store = MemoryStore::new();
        store
            .upsert("users", "u1", json!({"displayName": "Ann", "email": "a@x.io"}))
            .await
            .unwrap();
        store.upsert("users", "u1", json!({"lastSeen": 42})).await.unwrap();

        let doc = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(doc["displayName"], "Ann");
        assert_eq!(doc["lastSeen"], 42);
    }

    #[tokio::test]
    async fn test_live_query_initial_and_update() {
        let store = MemoryStore::new();
        store
            .insert("messages", json!({"senderId": "a", "text": "one"}))
            .await
            .unwrap();

        let mut sub = store.live_query("messages", Filter::eq("senderId", "a"), None);
        let initial = sub.next().await.unwrap();
        assert_eq!(initial.docs.len(), 1);

        store
            .insert("messages", json!({"senderId": "a", "text": "two"}))
            .await
            .unwrap();
        let updated = sub.next().await.unwrap();
        assert_eq!(updated.docs.len(), 2);
    }

    #[tokio::test]
    async fn test_live_query_filters_out_non_matching() {
        let store = MemoryStore::new();
        let mut sub = store.live_query("messages", Filter::eq("senderId", "a"), None);
        let _ = sub.next().await.unwrap();

        store
            .insert("messages", json!({"senderId": "b", "text": "other"}))
            .await
            .unwrap();
        // The non-matching insert still triggers a snapshot; it must be empty.
        let snapshot = sub.next().await.unwrap();
        assert!(snapshot.docs.is_empty());
    }

    #[tokio::test]
    async fn test_detach_stops_emissions() {
        let store = MemoryStore::new();
        let mut sub = store.live_query("messages", Filter::eq("senderId", "a"), None);
        let _ = sub.next().await.unwrap();

        sub.detach();
        sub.detach(); // idempotent

        store
            .insert("messages", json!({"senderId": "a", "text": "late"}))
            .await
            .unwrap();
        // Channel must be closed with nothing queued after detach.
        assert!(sub.next().await.is_none());
    }
}
