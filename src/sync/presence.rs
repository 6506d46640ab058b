//! Presence derived from last-activity freshness.

use chrono::{Local, TimeZone};

/// A user counts as online while their last activity is fresher than this.
pub const ONLINE_WINDOW_MS: i64 = 60_000;

/// Whether a last-seen time counts as online at `now` (both epoch millis).
///
/// The window is exclusive: activity exactly `ONLINE_WINDOW_MS` old is
/// offline. A missing timestamp is offline.
pub fn is_online(last_seen: Option<i64>, now: i64) -> bool {
    match last_seen {
        Some(t) => now - t < ONLINE_WINDOW_MS,
        None => false,
    }
}

/// Header label for a contact: "online", or their local last-seen time.
pub fn presence_label(last_seen: Option<i64>, now: i64) -> String {
    if is_online(last_seen, now) {
        return "online".to_string();
    }
    match last_seen {
        Some(t) => format!("last seen {}", format_clock(t)),
        None => "offline".to_string(),
    }
}

/// Local wall-clock HH:MM for an epoch-millis timestamp.
pub fn format_clock(millis: i64) -> String {
    match Local.timestamp_millis_opt(millis).single() {
        Some(t) => t.format("%H:%M").to_string(),
        None => "--:--".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_within_window() {
        let now = 1_000_000;
        assert!(is_online(Some(now), now));
        assert!(is_online(Some(now - 1), now));
        assert!(is_online(Some(now - ONLINE_WINDOW_MS + 1), now));
    }

    #[test]
    fn test_offline_at_exact_boundary() {
        let now = 1_000_000_000;
        assert!(!is_online(Some(now - ONLINE_WINDOW_MS), now));
        assert!(!is_online(Some(now - ONLINE_WINDOW_MS - 1), now));
    }

    #[test]
    fn test_missing_timestamp_is_offline() {
        assert!(!is_online(None, 12345));
        assert_eq!(presence_label(None, 12345), "offline");
    }

    #[test]
    fn test_label_online() {
        let now = 5_000_000;
        assert_eq!(presence_label(Some(now - 10), now), "online");
    }
}
