//! Live transcript for one conversation pair.
//!
//! One live query covers both directions of the pair; every notification
//! delivers a full snapshot which replaces the local transcript outright.
//! Emissions are tagged with their `ThreadKey` so a consumer can discard a
//! late snapshot from a subscription it has already switched away from.

use chrono::{Local, NaiveDate, TimeZone};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::Message;
use crate::store::{DetachHandle, DocumentStore, Filter, OrderBy, Snapshot, Subscription};

/// Normalized, unordered pair of user ids naming one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadKey(String, String);

impl ThreadKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self(a.to_string(), b.to_string())
        } else {
            Self(b.to_string(), a.to_string())
        }
    }
}

/// Filter matching every message exchanged between `a` and `b`.
pub fn pair_filter(a: &str, b: &str) -> Filter {
    Filter::or(vec![
        Filter::and(vec![Filter::eq("senderId", a), Filter::eq("recipientId", b)]),
        Filter::and(vec![Filter::eq("senderId", b), Filter::eq("recipientId", a)]),
    ])
}

/// Ordered, deduplicated messages of one conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    messages: Vec<Message>,
}

/// One row of the rendered transcript.
#[derive(Debug, PartialEq)]
pub enum TranscriptRow<'a> {
    /// Calendar-date separator, inserted where the local date changes.
    DateMarker(NaiveDate),
    Message(&'a Message),
}

impl Transcript {
    /// Rebuild from a full snapshot: ascending `(sent_at, id)` with duplicate
    /// ids dropped. Documents that do not parse as messages are skipped.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut messages: Vec<Message> = snapshot
            .docs
            .iter()
            .filter_map(|(id, doc)| Message::from_doc(id, doc).ok())
            .collect();
        messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then_with(|| a.id.cmp(&b.id)));
        messages.dedup_by(|a, b| a.id == b.id);
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Display rows: a date marker wherever the calendar date changes
    /// between consecutive messages.
    pub fn rows(&self) -> Vec<TranscriptRow<'_>> {
        let mut rows = Vec::new();
        let mut last_date: Option<NaiveDate> = None;
        for message in &self.messages {
            let date = local_date(message.sent_at);
            if last_date != Some(date) {
                rows.push(TranscriptRow::DateMarker(date));
                last_date = Some(date);
            }
            rows.push(TranscriptRow::Message(message));
        }
        rows
    }
}

fn local_date(millis: i64) -> NaiveDate {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|t| t.date_naive())
        .unwrap_or_default()
}

/// Display label for a date separator.
pub fn date_label(date: NaiveDate) -> String {
    date.format("%d %B %Y").to_string()
}

/// One keyed transcript emission from a thread feed.
#[derive(Debug)]
pub struct ThreadUpdate {
    pub key: ThreadKey,
    pub transcript: Transcript,
}

/// Live feed of transcripts for one conversation pair.
pub struct ThreadFeed {
    key: ThreadKey,
    rx: mpsc::UnboundedReceiver<ThreadUpdate>,
    handle: DetachHandle,
    task: JoinHandle<()>,
}

impl ThreadFeed {
    /// Establish the live query for the `(me, peer)` pair.
    pub fn open(store: &dyn DocumentStore, me: &str, peer: &str) -> Self {
        let key = ThreadKey::new(me, peer);
        let Subscription {
            rx: mut snapshots,
            handle,
        } = store.live_query("messages", pair_filter(me, peer), Some(OrderBy::asc("sentAt")));

        let (tx, rx) = mpsc::unbounded_channel();
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            while let Some(snapshot) = snapshots.recv().await {
                let update = ThreadUpdate {
                    key: task_key.clone(),
                    transcript: Transcript::from_snapshot(&snapshot),
                };
                if tx.send(update).is_err() {
                    break;
                }
            }
        });

        Self {
            key,
            rx,
            handle,
            task,
        }
    }

    pub fn key(&self) -> &ThreadKey {
        &self.key
    }

    /// Next keyed transcript, or `None` once the feed has terminated.
    pub async fn next(&mut self) -> Option<ThreadUpdate> {
        self.rx.recv().await
    }

    /// Detach the underlying live query; nothing is delivered afterwards.
    pub fn detach(&mut self) {
        self.handle.detach();
        self.task.abort();
    }
}

impl Drop for ThreadFeed {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Tracks the selected conversation and applies only matching updates.
///
/// Switching selections detaches the old feed before the new one attaches,
/// but a snapshot captured against the old selection may still be in flight;
/// the key comparison in `apply` discards it.
#[derive(Debug, Default)]
pub struct ActiveThread {
    key: Option<ThreadKey>,
    transcript: Transcript,
}

impl ActiveThread {
    /// Make `key` the active selection, clearing the transcript if the
    /// selection actually changed.
    pub fn select(&mut self, key: ThreadKey) {
        if self.key.as_ref() != Some(&key) {
            self.key = Some(key);
            self.transcript = Transcript::default();
        }
    }

    pub fn clear(&mut self) {
        self.key = None;
        self.transcript = Transcript::default();
    }

    /// Apply an update if it belongs to the active selection. Returns
    /// whether the transcript was replaced.
    pub fn apply(&mut self, update: ThreadUpdate) -> bool {
        if self.key.as_ref() == Some(&update.key) {
            self.transcript = update.transcript;
            true
        } else {
            false
        }
    }

    pub fn key(&self) -> Option<&ThreadKey> {
        self.key.as_ref()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Snapshot};
    use serde_json::json;

    fn entry(id: &str, sender: &str, recipient: &str, sent_at: i64) -> (String, serde_json::Value) {
        (
            id.to_string(),
            json!({
                "senderId": sender,
                "recipientId": recipient,
                "text": format!("msg {}", id),
                "sentAt": sent_at,
                "read": false,
            }),
        )
    }

    #[test]
    fn test_transcript_sorted_ascending() {
        let snapshot = Snapshot {
            docs: vec![
                entry("m3", "u", "v", 300),
                entry("m1", "u", "v", 100),
                entry("m2", "v", "u", 200),
            ],
        };
        let transcript = Transcript::from_snapshot(&snapshot);
        let ids: Vec<&str> = transcript.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_transcript_deduplicates_ids() {
        let snapshot = Snapshot {
            docs: vec![
                entry("m1", "u", "v", 100),
                entry("m1", "u", "v", 100),
                entry("m2", "v", "u", 200),
            ],
        };
        let transcript = Transcript::from_snapshot(&snapshot);
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn test_identical_timestamps_tie_break_on_id() {
        let snapshot = Snapshot {
            docs: vec![entry("mb", "u", "v", 500), entry("ma", "v", "u", 500)],
        };
        let transcript = Transcript::from_snapshot(&snapshot);
        let ids: Vec<&str> = transcript.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["ma", "mb"]);
    }

    #[test]
    fn test_snapshot_redelivery_is_idempotent() {
        let snapshot = Snapshot {
            docs: vec![entry("m1", "u", "v", 100), entry("m2", "v", "u", 200)],
        };
        let first = Transcript::from_snapshot(&snapshot);
        let second = Transcript::from_snapshot(&snapshot);
        assert_eq!(first, second);

        let mut active = ActiveThread::default();
        let key = ThreadKey::new("u", "v");
        active.select(key.clone());
        active.apply(ThreadUpdate {
            key: key.clone(),
            transcript: first.clone(),
        });
        active.apply(ThreadUpdate {
            key,
            transcript: second,
        });
        assert_eq!(active.transcript(), &first);
    }

    #[test]
    fn test_date_marker_inserted_on_calendar_change() {
        // Two days apart, so the local date differs in every timezone.
        let day_one = 1_600_000_000_000i64;
        let day_two = day_one + 2 * 24 * 3600 * 1000;
        let snapshot = Snapshot {
            docs: vec![
                entry("m1", "u", "v", day_one),
                entry("m2", "v", "u", day_one + 1000),
                entry("m3", "u", "v", day_two),
            ],
        };
        let transcript = Transcript::from_snapshot(&snapshot);
        let rows = transcript.rows();

        let markers = rows
            .iter()
            .filter(|r| matches!(r, TranscriptRow::DateMarker(_)))
            .count();
        assert_eq!(markers, 2);
        assert!(matches!(rows[0], TranscriptRow::DateMarker(_)));
        assert!(matches!(rows[3], TranscriptRow::DateMarker(_)));
    }

    #[test]
    fn test_thread_key_is_unordered() {
        assert_eq!(ThreadKey::new("u", "v"), ThreadKey::new("v", "u"));
        assert_ne!(ThreadKey::new("u", "v"), ThreadKey::new("u", "w"));
    }

    #[test]
    fn test_stale_snapshot_discarded_after_switch() {
        let mut active = ActiveThread::default();
        let key_v = ThreadKey::new("u", "v");
        let key_w = ThreadKey::new("u", "w");

        active.select(key_v.clone());
        let applied = active.apply(ThreadUpdate {
            key: key_v.clone(),
            transcript: Transcript::from_snapshot(&Snapshot {
                docs: vec![entry("m1", "u", "v", 100)],
            }),
        });
        assert!(applied);
        assert_eq!(active.transcript().len(), 1);

        // Switch to (u, w); a late (u, v) snapshot must not land.
        active.select(key_w);
        let stale = ThreadUpdate {
            key: key_v,
            transcript: Transcript::from_snapshot(&Snapshot {
                docs: vec![entry("m1", "u", "v", 100), entry("m2", "v", "u", 200)],
            }),
        };
        assert!(!active.apply(stale));
        assert!(active.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_feed_tracks_inserts_for_the_pair_only() {
        let store = MemoryStore::new();
        let mut feed = ThreadFeed::open(&store, "u", "v");

        // Initial empty snapshot.
        let update = feed.next().await.unwrap();
        assert!(update.transcript.is_empty());

        store
            .insert(
                "messages",
                json!({"senderId": "u", "recipientId": "v", "text": "hello", "sentAt": 100}),
            )
            .await
            .unwrap();
        let update = feed.next().await.unwrap();
        assert_eq!(update.transcript.len(), 1);

        // A message to a different peer triggers a snapshot that still
        // excludes it.
        store
            .insert(
                "messages",
                json!({"senderId": "u", "recipientId": "w", "text": "other", "sentAt": 200}),
            )
            .await
            .unwrap();
        let update = feed.next().await.unwrap();
        assert_eq!(update.transcript.len(), 1);

        feed.detach();
        assert!(feed.next().await.is_none());
    }
}
