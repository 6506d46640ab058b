//! Message composition, dispatch, and deletion.

use serde_json::json;
use thiserror::Error;

use crate::models::Message;
use crate::store::{server_timestamp, DocumentStore, StoreError};

/// Errors from validating or submitting a message operation.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("cannot send a message to yourself")]
    SelfRecipient,
    #[error("only the sender can delete a message")]
    NotSender,
    #[error("message not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Validate and submit a new message, returning its store-assigned id.
///
/// The local transcript is not touched here; the thread's live query
/// reflects the write once the store delivers it. On failure the caller
/// keeps the input text for retry.
pub async fn send_message(
    store: &dyn DocumentStore,
    sender_id: &str,
    recipient_id: &str,
    body: &str,
) -> Result<String, DispatchError> {
    let text = body.trim();
    if text.is_empty() {
        return Err(DispatchError::EmptyMessage);
    }
    if sender_id == recipient_id {
        return Err(DispatchError::SelfRecipient);
    }

    let doc = json!({
        "senderId": sender_id,
        "recipientId": recipient_id,
        "text": text,
        "sentAt": server_timestamp(),
        "read": false,
    });
    Ok(store.insert("messages", doc).await?)
}

/// Delete a message; permitted for its sender only. The store's access
/// rules enforce the same restriction authoritatively.
pub async fn delete_message(
    store: &dyn DocumentStore,
    message_id: &str,
    requester_id: &str,
) -> Result<(), DispatchError> {
    let doc = store
        .get("messages", message_id)
        .await?
        .ok_or_else(|| DispatchError::NotFound(message_id.to_string()))?;
    let message = Message::from_doc(message_id, &doc)
        .map_err(|e| DispatchError::Store(StoreError::Backend(e.to_string())))?;
    if message.sender_id != requester_id {
        return Err(DispatchError::NotSender);
    }
    store.delete("messages", message_id).await?;
    Ok(())
}

/// Flip the read flag on a delivered message.
pub async fn mark_read(store: &dyn DocumentStore, message_id: &str) -> Result<(), DispatchError> {
    store.upsert("messages", message_id, json!({ "read": true })).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Filter, MemoryStore};

    #[tokio::test]
    async fn test_empty_body_rejected_before_any_write() {
        let store = MemoryStore::new();
        let result = send_message(&store, "u", "v", "   \n  ").await;
        assert!(matches!(result, Err(DispatchError::EmptyMessage)));

        let docs = store
            .query("messages", &Filter::eq("senderId", "u"), None)
            .await
            .unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn test_self_recipient_rejected_before_any_write() {
        let store = MemoryStore::new();
        let result = send_message(&store, "u", "u", "hello").await;
        assert!(matches!(result, Err(DispatchError::SelfRecipient)));
    }

    #[tokio::test]
    async fn test_send_trims_and_stamps() {
        let store = MemoryStore::new();
        let id = send_message(&store, "u", "v", "  hello  ").await.unwrap();

        let doc = store.get("messages", &id).await.unwrap().unwrap();
        let message = Message::from_doc(&id, &doc).unwrap();
        assert_eq!(message.text, "hello");
        assert_eq!(message.sender_id, "u");
        assert!(!message.read);
        assert!(message.sent_at > 0);
    }

    #[tokio::test]
    async fn test_delete_by_non_sender_rejected() {
        let store = MemoryStore::new();
        let id = send_message(&store, "u", "v", "hello").await.unwrap();

        let result = delete_message(&store, &id, "v").await;
        assert!(matches!(result, Err(DispatchError::NotSender)));
        assert!(store.get("messages", &id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_by_sender_removes_message() {
        let store = MemoryStore::new();
        let id = send_message(&store, "u", "v", "hello").await.unwrap();

        delete_message(&store, &id, "u").await.unwrap();
        assert!(store.get("messages", &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_read_flips_flag_only() {
        let store = MemoryStore::new();
        let id = send_message(&store, "u", "v", "hello").await.unwrap();

        mark_read(&store, &id).await.unwrap();
        let doc = store.get("messages", &id).await.unwrap().unwrap();
        let message = Message::from_doc(&id, &doc).unwrap();
        assert!(message.read);
        assert_eq!(message.text, "hello");
    }
}
