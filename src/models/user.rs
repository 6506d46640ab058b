//! User-related models

use serde::{Deserialize, Serialize};

/// A registered user's profile document (`users/{uid}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    /// Last-activity time, epoch millis. Server-assigned; absent until the
    /// first heartbeat lands.
    #[serde(default)]
    pub last_seen: Option<i64>,
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl UserProfile {
    /// Parse a profile from a stored document.
    pub fn from_doc(doc: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(doc.clone())
    }

    /// Generated-avatar URL used when the user has no photo of their own.
    pub fn default_photo_url(display_name: &str) -> String {
        let name: String = display_name
            .chars()
            .map(|c| if c == ' ' { '+' } else { c })
            .filter(|c| c.is_ascii_alphanumeric() || *c == '+')
            .collect();
        format!(
            "https://ui-avatars.com/api/?name={}&background=00a884&color=fff&size=200",
            name
        )
    }
}
