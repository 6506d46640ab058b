//! Periodic last-seen republishing for the active session.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;

use crate::models::UserProfile;
use crate::store::{server_timestamp, DocumentStore, StoreError};

/// Interval between presence republishes.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that keeps the session's `lastSeen` fresh.
pub struct Heartbeat {
    task: JoinHandle<()>,
}

impl Heartbeat {
    /// Publish immediately, then on every interval tick until stopped.
    ///
    /// A failed beat is logged and the next tick is the retry; no backoff is
    /// needed at this period.
    pub fn start(store: Arc<dyn DocumentStore>, profile: UserProfile) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = beat(&*store, &profile).await {
                    tracing::warn!("heartbeat failed: {} (retrying next tick)", e);
                }
            }
        });
        Self { task }
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// One beat: merge the profile fields and a server-stamped `lastSeen` into
/// the user's directory document. Also used as the sign-out flush.
pub async fn beat(store: &dyn DocumentStore, profile: &UserProfile) -> Result<(), StoreError> {
    let mut patch = json!({
        "uid": profile.uid,
        "email": profile.email,
        "displayName": profile.display_name,
        "lastSeen": server_timestamp(),
    });
    if let Some(ref photo_url) = profile.photo_url {
        patch["photoUrl"] = json!(photo_url);
    }
    store.upsert("users", &profile.uid, patch).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn profile() -> UserProfile {
        UserProfile {
            uid: "u1".to_string(),
            email: "u1@example.com".to_string(),
            display_name: "User One".to_string(),
            photo_url: None,
            last_seen: None,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_beat_publishes_profile_and_last_seen() {
        let store = MemoryStore::new();
        let before = crate::store::now_millis();
        beat(&store, &profile()).await.unwrap();

        let doc = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(doc["displayName"], "User One");
        assert!(doc["lastSeen"].as_i64().unwrap() >= before);
    }

    #[tokio::test]
    async fn test_start_beats_immediately() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let heartbeat = Heartbeat::start(store.clone(), profile());

        // The first beat fires on start, not after the first interval.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let doc = store.get("users", "u1").await.unwrap();
        assert!(doc.is_some());

        heartbeat.stop();
    }
}
