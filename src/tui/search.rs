//! In-thread message search and contact filtering.
//!
//! Both are pure filters over data the sync core already holds locally;
//! nothing here talks to the store.

use crate::models::{Message, UserProfile};

/// State for the in-thread search input.
#[derive(Default)]
pub struct SearchState {
    /// Whether the search input is active (visible and capturing keys).
    pub active: bool,
    /// Current query string.
    pub query: String,
}

impl SearchState {
    pub fn activate(&mut self) {
        self.active = true;
        self.query.clear();
    }

    pub fn deactivate(&mut self) {
        self.active = false;
        self.query.clear();
    }

    pub fn insert_char(&mut self, c: char) {
        self.query.push(c);
    }

    pub fn backspace(&mut self) {
        self.query.pop();
    }
}

/// Messages whose text contains `query`, case-insensitive. An empty query
/// matches everything.
pub fn filter_messages<'a>(messages: &'a [Message], query: &str) -> Vec<&'a Message> {
    let query = query.to_lowercase();
    messages
        .iter()
        .filter(|m| query.is_empty() || m.text.to_lowercase().contains(&query))
        .collect()
}

/// Contacts whose display name or email contains `query`, case-insensitive.
pub fn filter_contacts<'a>(contacts: &'a [UserProfile], query: &str) -> Vec<&'a UserProfile> {
    let query = query.to_lowercase();
    contacts
        .iter()
        .filter(|c| {
            query.is_empty()
                || c.display_name.to_lowercase().contains(&query)
                || c.email.to_lowercase().contains(&query)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, text: &str) -> Message {
        Message {
            id: id.to_string(),
            sender_id: "u".to_string(),
            recipient_id: "v".to_string(),
            text: text.to_string(),
            sent_at: 0,
            read: false,
        }
    }

    fn contact(name: &str, email: &str) -> UserProfile {
        UserProfile {
            uid: email.to_string(),
            email: email.to_string(),
            display_name: name.to_string(),
            photo_url: None,
            last_seen: None,
            created_at: None,
        }
    }

    #[test]
    fn test_empty_query_matches_all() {
        let messages = vec![message("a", "one"), message("b", "two")];
        assert_eq!(filter_messages(&messages, "").len(), 2);
    }

    #[test]
    fn test_message_filter_is_case_insensitive() {
        let messages = vec![message("a", "Hello World"), message("b", "bye")];
        let hits = filter_messages(&messages, "hello");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[test]
    fn test_contact_filter_matches_name_or_email() {
        let contacts = vec![
            contact("Alice", "alice@example.com"),
            contact("Bob", "bob@example.com"),
        ];
        assert_eq!(filter_contacts(&contacts, "ALI").len(), 1);
        assert_eq!(filter_contacts(&contacts, "bob@").len(), 1);
        assert_eq!(filter_contacts(&contacts, "zzz").len(), 0);
    }
}
