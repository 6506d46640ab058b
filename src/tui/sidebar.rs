//! Sidebar widget: conversation list with presence and filtering.

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Widget},
};

use super::search::filter_contacts;
use crate::models::UserProfile;
use crate::sync::presence;

/// Sidebar state: owns the contact list and tracks navigation.
pub struct SidebarState {
    pub contacts: Vec<UserProfile>,
    /// Index into the filtered list (0-based).
    pub selected: usize,
    /// Whether data is still loading.
    pub loading: bool,
    /// Contact filter text ('/' to edit).
    pub filter: String,
    /// Whether the filter input is capturing keys.
    pub filter_active: bool,
}

impl Default for SidebarState {
    fn default() -> Self {
        Self {
            contacts: Vec::new(),
            selected: 0,
            loading: true,
            filter: String::new(),
            filter_active: false,
        }
    }
}

impl SidebarState {
    /// Replace the contact list with a fresh emission from the index.
    pub fn update_contacts(&mut self, contacts: Vec<UserProfile>) {
        self.contacts = contacts;
        self.loading = false;
        self.clamp_selection();
    }

    /// Contacts matching the current filter, in index order.
    pub fn visible(&self) -> Vec<&UserProfile> {
        filter_contacts(&self.contacts, &self.filter)
    }

    /// The currently selected contact, if any.
    pub fn selected_contact(&self) -> Option<UserProfile> {
        self.visible().get(self.selected).map(|c| (*c).clone())
    }

    pub fn move_up(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
        }
    }

    pub fn move_down(&mut self) {
        let count = self.visible().len();
        if count > 0 && self.selected < count - 1 {
            self.selected += 1;
        }
    }

    /// Clamp selected index to valid range after structural changes.
    pub fn clamp_selection(&mut self) {
        let count = self.visible().len();
        if count == 0 {
            self.selected = 0;
        } else if self.selected >= count {
            self.selected = count - 1;
        }
    }
}

/// Render the sidebar into the given area.
pub fn render(area: Rect, buf: &mut Buffer, state: &SidebarState, focused: bool, now: i64) {
    let border_style = if focused {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::DarkGray)
    };

    let border_type = if focused {
        BorderType::Double
    } else {
        BorderType::Plain
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(border_type)
        .border_style(border_style)
        .title(" chats ");

    let inner = block.inner(area);
    block.render(area, buf);

    if inner.height == 0 || inner.width == 0 {
        return;
    }

    // First row: filter input when active or non-empty.
    let mut list_area = inner;
    if state.filter_active || !state.filter.is_empty() {
        let filter_area = Rect::new(inner.x, inner.y, inner.width, 1);
        let style = if state.filter_active {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default().fg(Color::Gray)
        };
        let line = Line::from(Span::styled(format!(" /{}", state.filter), style));
        Paragraph::new(line).render(filter_area, buf);
        list_area = Rect::new(inner.x, inner.y + 1, inner.width, inner.height.saturating_sub(1));
    }

    if state.loading && state.contacts.is_empty() {
        if list_area.height > 0 {
            let line = Line::from(Span::styled(
                " Loading...",
                Style::default().fg(Color::DarkGray),
            ));
            Paragraph::new(line).render(
                Rect::new(list_area.x, list_area.y, list_area.width, 1),
                buf,
            );
        }
        return;
    }

    let visible = state.visible();
    let available_height = list_area.height as usize;
    if available_height == 0 {
        return;
    }

    if visible.is_empty() {
        let label = if state.filter.is_empty() {
            " (no conversations yet)"
        } else {
            " (no matches)"
        };
        let line = Line::from(Span::styled(label, Style::default().fg(Color::DarkGray)));
        Paragraph::new(line).render(Rect::new(list_area.x, list_area.y, list_area.width, 1), buf);
        return;
    }

    let scroll_offset = compute_scroll_offset(state.selected, available_height, visible.len());

    for (row_idx, item_idx) in (scroll_offset..visible.len())
        .take(available_height)
        .enumerate()
    {
        let contact = visible[item_idx];
        let row_area = Rect::new(
            list_area.x,
            list_area.y + row_idx as u16,
            list_area.width,
            1,
        );
        render_contact_row(buf, row_area, contact, item_idx == state.selected, now);
    }
}

/// Simple scroll offset: keep selected item visible.
fn compute_scroll_offset(selected: usize, height: usize, total: usize) -> usize {
    if total <= height {
        return 0;
    }
    if selected < height {
        return 0;
    }
    let max_offset = total.saturating_sub(height);
    let offset = selected.saturating_sub(height - 1);
    offset.min(max_offset)
}

/// One contact row: cursor, presence dot, name, last-seen clock.
fn render_contact_row(buf: &mut Buffer, area: Rect, contact: &UserProfile, selected: bool, now: i64) {
    let width = area.width as usize;
    if width == 0 {
        return;
    }

    let online = presence::is_online(contact.last_seen, now);
    let cursor = if selected { "\u{25BA}" } else { " " };
    let dot = if online { "*" } else { " " };
    let label = format!("{}{} {}", cursor, dot, contact.display_name);

    let badge = match (online, contact.last_seen) {
        (true, _) => String::new(),
        (false, Some(t)) => presence::format_clock(t),
        (false, None) => String::new(),
    };

    let text_style = if selected {
        Style::default()
            .fg(Color::White)
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    };

    let badge_style = if online {
        Style::default().fg(Color::Green)
    } else if selected {
        Style::default().fg(Color::DarkGray).bg(Color::DarkGray)
    } else {
        Style::default().fg(Color::DarkGray)
    };

    let dot_style = if online {
        Style::default().fg(Color::Green)
    } else {
        text_style
    };

    // Truncate name, leaving room for the badge.
    let badge_len = badge.chars().count();
    let max_left = if badge_len > 0 {
        width.saturating_sub(badge_len + 1)
    } else {
        width
    };
    let left_truncated: String = label.chars().take(max_left).collect();
    let left_len = left_truncated.chars().count();
    let pad = width.saturating_sub(left_len + badge_len);

    let line = Line::from(vec![
        Span::styled(left_truncated, if online { dot_style } else { text_style }),
        Span::styled(" ".repeat(pad), text_style),
        Span::styled(badge, badge_style),
    ]);
    Paragraph::new(line).render(area, buf);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(uid: &str, name: &str) -> UserProfile {
        UserProfile {
            uid: uid.to_string(),
            email: format!("{}@example.com", uid),
            display_name: name.to_string(),
            photo_url: None,
            last_seen: None,
            created_at: None,
        }
    }

    #[test]
    fn test_selection_clamped_when_list_shrinks() {
        let mut state = SidebarState::default();
        state.update_contacts(vec![contact("a", "A"), contact("b", "B"), contact("c", "C")]);
        state.selected = 2;

        state.update_contacts(vec![contact("a", "A")]);
        assert_eq!(state.selected, 0);
    }

    #[test]
    fn test_filter_narrows_visible_and_selection() {
        let mut state = SidebarState::default();
        state.update_contacts(vec![contact("a", "Alice"), contact("b", "Bob")]);
        state.selected = 1;

        state.filter = "ali".to_string();
        state.clamp_selection();
        assert_eq!(state.visible().len(), 1);
        assert_eq!(state.selected_contact().unwrap().uid, "a");
    }

    #[test]
    fn test_scroll_offset_keeps_selection_visible() {
        assert_eq!(compute_scroll_offset(0, 5, 3), 0);
        assert_eq!(compute_scroll_offset(4, 5, 10), 0);
        assert_eq!(compute_scroll_offset(7, 5, 10), 3);
        assert_eq!(compute_scroll_offset(9, 5, 10), 5);
    }
}
