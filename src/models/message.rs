//! Message-related models

use serde::{Deserialize, Serialize};

/// One directed message between two users (`messages/{id}`).
///
/// The document id is assigned by the store on insert; `sent_at` is the
/// server-assigned creation time in epoch millis. Immutable except for the
/// `read` flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(skip)]
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub text: String,
    #[serde(default)]
    pub sent_at: i64,
    #[serde(default)]
    pub read: bool,
}

impl Message {
    /// Parse a message from a stored document plus its store-assigned id.
    pub fn from_doc(id: &str, doc: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut msg: Message = serde_json::from_value(doc.clone())?;
        msg.id = id.to_string();
        Ok(msg)
    }
}
