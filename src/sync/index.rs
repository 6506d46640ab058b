//! Conversation index: the user's counterparts, ordered by recent activity.
//!
//! Two live queries cover the message collection (sent by the user, received
//! by the user). Counterpart ids are unioned into one set and resolved
//! against the user directory; the full list is re-emitted on every change.
//! The recomputation is set-based, so it is idempotent and insensitive to
//! the interleaving of the two legs.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::UserProfile;
use crate::store::{DetachHandle, DocumentStore, Filter, Snapshot, Subscription};

/// Live feed of the user's conversation list.
pub struct ContactFeed {
    rx: mpsc::UnboundedReceiver<Vec<UserProfile>>,
    sent_handle: DetachHandle,
    received_handle: DetachHandle,
    task: JoinHandle<()>,
}

impl ContactFeed {
    /// Establish both message live queries for `uid` and start emitting
    /// contact lists.
    pub fn subscribe(store: Arc<dyn DocumentStore>, uid: &str) -> Self {
        let Subscription {
            rx: sent_rx,
            handle: sent_handle,
        } = store.live_query("messages", Filter::eq("senderId", uid), None);
        let Subscription {
            rx: received_rx,
            handle: received_handle,
        } = store.live_query("messages", Filter::eq("recipientId", uid), None);

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(index_loop(store, uid.to_string(), sent_rx, received_rx, tx));

        Self {
            rx,
            sent_handle,
            received_handle,
            task,
        }
    }

    /// Next full contact list, or `None` once the feed has terminated.
    pub async fn next(&mut self) -> Option<Vec<UserProfile>> {
        self.rx.recv().await
    }

    /// Detach both underlying live queries; nothing is emitted afterwards.
    pub fn detach(&mut self) {
        self.sent_handle.detach();
        self.received_handle.detach();
        self.task.abort();
    }
}

impl Drop for ContactFeed {
    fn drop(&mut self) {
        self.detach();
    }
}

enum Leg {
    Sent(Option<Snapshot>),
    Received(Option<Snapshot>),
}

async fn index_loop(
    store: Arc<dyn DocumentStore>,
    uid: String,
    mut sent_rx: mpsc::UnboundedReceiver<Snapshot>,
    mut received_rx: mpsc::UnboundedReceiver<Snapshot>,
    tx: mpsc::UnboundedSender<Vec<UserProfile>>,
) {
    let mut counterparts: BTreeSet<String> = BTreeSet::new();

    loop {
        let leg = tokio::select! {
            snapshot = sent_rx.recv() => Leg::Sent(snapshot),
            snapshot = received_rx.recv() => Leg::Received(snapshot),
        };
        match leg {
            Leg::Sent(None) | Leg::Received(None) => break,
            Leg::Sent(Some(snapshot)) => {
                collect_counterparts(&mut counterparts, &uid, &snapshot, "recipientId")
            }
            Leg::Received(Some(snapshot)) => {
                collect_counterparts(&mut counterparts, &uid, &snapshot, "senderId")
            }
        }

        // Coalesce whatever the other leg queued in the same tick so one
        // recompute covers both and no duplicate entries can be emitted.
        while let Ok(snapshot) = sent_rx.try_recv() {
            collect_counterparts(&mut counterparts, &uid, &snapshot, "recipientId");
        }
        while let Ok(snapshot) = received_rx.try_recv() {
            collect_counterparts(&mut counterparts, &uid, &snapshot, "senderId");
        }

        let contacts = resolve_contacts(&*store, &counterparts).await;
        if tx.send(contacts).is_err() {
            break;
        }
    }
}

fn collect_counterparts(
    counterparts: &mut BTreeSet<String>,
    uid: &str,
    snapshot: &Snapshot,
    field: &str,
) {
    for (_, doc) in &snapshot.docs {
        if let Some(id) = doc.get(field).and_then(serde_json::Value::as_str) {
            if id != uid {
                counterparts.insert(id.to_string());
            }
        }
    }
}

/// Resolve counterpart ids to profiles, most recently active first.
///
/// A failed or empty lookup drops that counterpart from this emission only;
/// the feed itself never fails over it.
async fn resolve_contacts(
    store: &dyn DocumentStore,
    counterparts: &BTreeSet<String>,
) -> Vec<UserProfile> {
    let mut contacts = Vec::with_capacity(counterparts.len());
    for id in counterparts {
        match store.query("users", &Filter::eq("uid", id.as_str()), None).await {
            Ok(docs) => match docs.first() {
                Some((_, doc)) => match UserProfile::from_doc(doc) {
                    Ok(profile) => contacts.push(profile),
                    Err(e) => tracing::warn!("profile for {} does not parse: {}", id, e),
                },
                None => tracing::debug!("no profile for counterpart {}", id),
            },
            Err(e) => tracing::warn!("profile lookup for {} failed: {}", id, e),
        }
    }
    contacts.sort_by(|a, b| {
        b.last_seen
            .unwrap_or(0)
            .cmp(&a.last_seen.unwrap_or(0))
            .then_with(|| a.uid.cmp(&b.uid))
    });
    contacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    async fn seed_user(store: &MemoryStore, uid: &str, name: &str, last_seen: i64) {
        store
            .upsert(
                "users",
                uid,
                json!({
                    "uid": uid,
                    "email": format!("{}@example.com", uid),
                    "displayName": name,
                    "lastSeen": last_seen,
                }),
            )
            .await
            .unwrap();
    }

    async fn seed_message(store: &MemoryStore, sender: &str, recipient: &str, sent_at: i64) {
        store
            .insert(
                "messages",
                json!({
                    "senderId": sender,
                    "recipientId": recipient,
                    "text": "hi",
                    "sentAt": sent_at,
                }),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_new_sender_appears_in_recipients_index() {
        let store = Arc::new(MemoryStore::new());
        seed_user(&store, "a", "Alice", 500).await;

        let mut feed = ContactFeed::subscribe(store.clone(), "b");
        let initial = feed.next().await.unwrap();
        assert!(initial.is_empty());

        seed_message(&store, "a", "b", 100).await;
        let contacts = feed.next().await.unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].uid, "a");
    }

    #[tokio::test]
    async fn test_counterparts_ordered_by_recent_activity() {
        let store = Arc::new(MemoryStore::new());
        seed_user(&store, "a", "Alice", 500).await;
        seed_user(&store, "c", "Cara", 100).await;
        seed_message(&store, "b", "c", 50).await;
        seed_message(&store, "a", "b", 100).await;

        let mut feed = ContactFeed::subscribe(store.clone(), "b");
        let contacts = feed.next().await.unwrap();
        let uids: Vec<&str> = contacts.iter().map(|c| c.uid.as_str()).collect();
        // Alice was active more recently than Cara.
        assert_eq!(uids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_counterpart_deduplicated_across_both_legs() {
        let store = Arc::new(MemoryStore::new());
        seed_user(&store, "a", "Alice", 500).await;
        // Both directions exist, so "a" shows up via both legs.
        seed_message(&store, "a", "b", 100).await;
        seed_message(&store, "b", "a", 200).await;

        let mut feed = ContactFeed::subscribe(store.clone(), "b");
        let contacts = feed.next().await.unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].uid, "a");
    }

    #[tokio::test]
    async fn test_missing_profile_is_omitted_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        seed_user(&store, "a", "Alice", 500).await;
        seed_message(&store, "a", "b", 100).await;
        // "ghost" has messages but no profile document.
        seed_message(&store, "ghost", "b", 200).await;

        let mut feed = ContactFeed::subscribe(store.clone(), "b");
        let contacts = feed.next().await.unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].uid, "a");
    }

    #[tokio::test]
    async fn test_detach_stops_emissions() {
        let store = Arc::new(MemoryStore::new());
        seed_user(&store, "a", "Alice", 500).await;

        let mut feed = ContactFeed::subscribe(store.clone(), "b");
        let _ = feed.next().await.unwrap();

        feed.detach();
        seed_message(&store, "a", "b", 100).await;
        assert!(feed.next().await.is_none());
    }
}
