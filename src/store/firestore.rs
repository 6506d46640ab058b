//! Hosted document store (Firestore REST API).
//!
//! Documents are read and written through the v1 REST endpoints with the
//! session's bearer token. The REST surface has no streaming listen channel,
//! so `live_query` polls `runQuery` and emits a snapshot whenever the result
//! set changes; the sync core sees the same subscription semantics as with
//! the in-memory store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{
    DetachHandle, DocEntry, DocumentStore, Filter, OrderBy, Snapshot, StoreError, Subscription,
    SERVER_TIMESTAMP,
};

const FIRESTORE_BASE: &str = "https://firestore.googleapis.com/v1";

/// How often standing queries are re-evaluated against the backend.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Firestore-backed `DocumentStore`.
#[derive(Clone)]
pub struct FirestoreStore {
    http: reqwest::Client,
    project_id: String,
    id_token: String,
    poll_interval: Duration,
}

impl FirestoreStore {
    pub fn new(project_id: &str, id_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            project_id: project_id.to_string(),
            id_token: id_token.to_string(),
            poll_interval: POLL_INTERVAL,
        }
    }

    /// `projects/{p}/databases/(default)/documents` resource path.
    fn parent(&self) -> String {
        format!(
            "projects/{}/databases/(default)/documents",
            self.project_id
        )
    }

    fn doc_name(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.parent(), collection, id)
    }

    async fn post(&self, url: &str, body: &Value) -> Result<reqwest::Response, StoreError> {
        tracing::debug!("Store POST {}", url);
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.id_token)
            .json(body)
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("POST {} failed: {}", url, e)))?;
        check_response(resp, url).await
    }

    /// Commit one write (update + optional mask and server-time transforms).
    async fn commit(&self, write: Value) -> Result<(), StoreError> {
        let url = format!("{}/{}:commit", FIRESTORE_BASE, self.parent());
        self.post(&url, &json!({ "writes": [write] })).await?;
        Ok(())
    }
}

/// Check HTTP response status and surface a clear error on failure.
async fn check_response(
    resp: reqwest::Response,
    url: &str,
) -> Result<reqwest::Response, StoreError> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(StoreError::Backend(format!(
            "401 Unauthorized for {} -- session may be stale, run 'pigeon login'",
            url
        )));
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(StoreError::Backend(format!(
            "HTTP {} for {}: {}",
            status.as_u16(),
            url,
            body
        )));
    }
    Ok(resp)
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn insert(&self, collection: &str, doc: Value) -> Result<String, StoreError> {
        let Value::Object(fields) = doc else {
            return Err(StoreError::Backend("document must be an object".to_string()));
        };
        // The backend assigns ids client-side on insert, same as its SDKs.
        let id = Uuid::new_v4().simple().to_string();
        let (encoded, transforms) = encode_fields(&fields);

        let mut write = json!({
            "update": { "name": self.doc_name(collection, &id), "fields": encoded },
            "currentDocument": { "exists": false },
        });
        if !transforms.is_empty() {
            write["updateTransforms"] = transform_list(&transforms);
        }
        self.commit(write).await?;
        Ok(id)
    }

    async fn upsert(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError> {
        let Value::Object(fields) = patch else {
            return Err(StoreError::Backend("patch must be an object".to_string()));
        };
        let (encoded, transforms) = encode_fields(&fields);
        let mask: Vec<&String> = fields
            .keys()
            .filter(|k| !transforms.contains(*k))
            .collect();

        let mut write = json!({
            "update": { "name": self.doc_name(collection, id), "fields": encoded },
            "updateMask": { "fieldPaths": mask },
        });
        if !transforms.is_empty() {
            write["updateTransforms"] = transform_list(&transforms);
        }
        self.commit(write).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let url = format!("{}/{}", FIRESTORE_BASE, self.doc_name(collection, id));
        tracing::debug!("Store GET {}", url);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.id_token)
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("GET {} failed: {}", url, e)))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check_response(resp, &url).await?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| StoreError::Backend(format!("parse of {} failed: {}", url, e)))?;
        Ok(body.get("fields").map(decode_fields))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let url = format!("{}/{}", FIRESTORE_BASE, self.doc_name(collection, id));
        tracing::debug!("Store DELETE {}", url);
        let resp = self
            .http
            .delete(&url)
            .bearer_auth(&self.id_token)
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("DELETE {} failed: {}", url, e)))?;
        check_response(resp, &url).await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        filter: &Filter,
        order: Option<&OrderBy>,
    ) -> Result<Vec<DocEntry>, StoreError> {
        let mut structured = json!({
            "from": [{ "collectionId": collection }],
            "where": encode_filter(filter),
        });
        if let Some(order) = order {
            let direction = match order.direction {
                super::Direction::Ascending => "ASCENDING",
                super::Direction::Descending => "DESCENDING",
            };
            structured["orderBy"] =
                json!([{ "field": { "fieldPath": order.field }, "direction": direction }]);
        }

        let url = format!("{}/{}:runQuery", FIRESTORE_BASE, self.parent());
        let resp = self.post(&url, &json!({ "structuredQuery": structured })).await?;
        let rows: Value = resp
            .json()
            .await
            .map_err(|e| StoreError::Backend(format!("parse of {} failed: {}", url, e)))?;

        let mut entries = Vec::new();
        if let Value::Array(rows) = rows {
            for row in &rows {
                let Some(document) = row.get("document") else {
                    continue;
                };
                let Some(name) = document.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let id = name.rsplit('/').next().unwrap_or(name).to_string();
                let doc = document
                    .get("fields")
                    .map(decode_fields)
                    .unwrap_or_else(|| Value::Object(Default::default()));
                entries.push((id, doc));
            }
        }
        Ok(entries)
    }

    fn live_query(&self, collection: &str, filter: Filter, order: Option<OrderBy>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let detached = Arc::new(AtomicBool::new(false));

        let store = self.clone();
        let collection = collection.to_string();
        let flag = Arc::clone(&detached);
        let task = tokio::spawn(async move {
            let mut last: Option<Vec<DocEntry>> = None;
            let mut ticker = tokio::time::interval(store.poll_interval);
            loop {
                ticker.tick().await;
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                match store.query(&collection, &filter, order.as_ref()).await {
                    Ok(docs) => {
                        if last.as_ref() == Some(&docs) {
                            continue;
                        }
                        if flag.load(Ordering::SeqCst) {
                            break;
                        }
                        if tx.send(Snapshot { docs: docs.clone() }).is_err() {
                            break;
                        }
                        last = Some(docs);
                    }
                    // A failed poll is fatal to this subscription; the user
                    // reselects to re-establish it.
                    Err(e) => {
                        tracing::warn!("live query on {} failed: {}", collection, e);
                        break;
                    }
                }
            }
        });

        let handle = DetachHandle::new(detached, move || task.abort());
        Subscription { rx, handle }
    }
}

// ---------------------------------------------------------------------------
// REST value codec
// ---------------------------------------------------------------------------

/// Encode plain JSON fields into typed REST values, splitting out
/// server-timestamp sentinel fields as transform targets.
fn encode_fields(fields: &Map<String, Value>) -> (Value, Vec<String>) {
    let mut encoded = Map::new();
    let mut transforms = Vec::new();
    for (key, value) in fields {
        if value.as_str() == Some(SERVER_TIMESTAMP) {
            transforms.push(key.clone());
        } else {
            encoded.insert(key.clone(), encode_value(value));
        }
    }
    (Value::Object(encoded), transforms)
}

fn encode_filter(filter: &Filter) -> Value {
    match filter {
        Filter::Eq(field, value) => json!({
            "fieldFilter": {
                "field": { "fieldPath": field },
                "op": "EQUAL",
                "value": encode_value(value),
            }
        }),
        Filter::And(filters) => json!({
            "compositeFilter": {
                "op": "AND",
                "filters": filters.iter().map(encode_filter).collect::<Vec<_>>(),
            }
        }),
        Filter::Or(filters) => json!({
            "compositeFilter": {
                "op": "OR",
                "filters": filters.iter().map(encode_filter).collect::<Vec<_>>(),
            }
        }),
    }
}

fn transform_list(fields: &[String]) -> Value {
    Value::Array(
        fields
            .iter()
            .map(|f| json!({ "fieldPath": f, "setToServerValue": "REQUEST_TIME" }))
            .collect(),
    )
}

fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) if n.is_i64() || n.is_u64() => {
            json!({ "integerValue": n.to_string() })
        }
        Value::Number(n) => json!({ "doubleValue": n.as_f64() }),
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(fields) => {
            let encoded: Map<String, Value> = fields
                .iter()
                .map(|(k, v)| (k.clone(), encode_value(v)))
                .collect();
            json!({ "mapValue": { "fields": encoded } })
        }
    }
}

fn decode_fields(fields: &Value) -> Value {
    let mut decoded = Map::new();
    if let Value::Object(fields) = fields {
        for (key, value) in fields {
            decoded.insert(key.clone(), decode_value(value));
        }
    }
    Value::Object(decoded)
}

fn decode_value(value: &Value) -> Value {
    let Value::Object(typed) = value else {
        return Value::Null;
    };
    if let Some((kind, inner)) = typed.iter().next() {
        match kind.as_str() {
            "nullValue" => Value::Null,
            "booleanValue" => inner.clone(),
            "integerValue" => inner
                .as_str()
                .and_then(|s| s.parse::<i64>().ok())
                .map(Value::from)
                .unwrap_or(Value::Null),
            "doubleValue" => inner.clone(),
            "stringValue" => inner.clone(),
            // Server-assigned times come back as RFC 3339; flatten to millis.
            "timestampValue" => inner
                .as_str()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|t| Value::from(t.timestamp_millis()))
                .unwrap_or(Value::Null),
            "arrayValue" => Value::Array(
                inner
                    .get("values")
                    .and_then(Value::as_array)
                    .map(|items| items.iter().map(decode_value).collect())
                    .unwrap_or_default(),
            ),
            "mapValue" => decode_fields(inner.get("fields").unwrap_or(&Value::Null)),
            _ => Value::Null,
        }
    } else {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_splits_timestamp_sentinels() {
        let Value::Object(fields) = json!({
            "text": "hi",
            "read": false,
            "sentAt": crate::store::server_timestamp(),
        }) else {
            unreachable!()
        };
        let (encoded, transforms) = encode_fields(&fields);
        assert_eq!(transforms, vec!["sentAt".to_string()]);
        assert_eq!(encoded["text"]["stringValue"], "hi");
        assert_eq!(encoded["read"]["booleanValue"], false);
        assert!(encoded.get("sentAt").is_none());
    }

    #[test]
    fn test_decode_typed_values() {
        let fields = json!({
            "text": { "stringValue": "hello" },
            "read": { "booleanValue": true },
            "count": { "integerValue": "42" },
            "sentAt": { "timestampValue": "2026-01-02T03:04:05.678Z" },
        });
        let doc = decode_fields(&fields);
        assert_eq!(doc["text"], "hello");
        assert_eq!(doc["read"], true);
        assert_eq!(doc["count"], 42);
        assert_eq!(doc["sentAt"], 1_767_323_045_678i64);
    }

    #[test]
    fn test_encode_filter_shapes() {
        let filter = Filter::or(vec![
            Filter::and(vec![Filter::eq("senderId", "a"), Filter::eq("recipientId", "b")]),
            Filter::and(vec![Filter::eq("senderId", "b"), Filter::eq("recipientId", "a")]),
        ]);
        let encoded = encode_filter(&filter);
        assert_eq!(encoded["compositeFilter"]["op"], "OR");
        let legs = encoded["compositeFilter"]["filters"].as_array().unwrap();
        assert_eq!(legs.len(), 2);
        assert_eq!(legs[0]["compositeFilter"]["op"], "AND");
        let eq = &legs[0]["compositeFilter"]["filters"][0]["fieldFilter"];
        assert_eq!(eq["field"]["fieldPath"], "senderId");
        assert_eq!(eq["op"], "EQUAL");
        assert_eq!(eq["value"]["stringValue"], "a");
    }
}
