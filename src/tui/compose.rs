//! Compose box: single-line text input for the active conversation.

use ratatui::{
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph},
    Frame,
};
use unicode_width::UnicodeWidthStr;

/// Height of the compose box: 1 border + 1 input + 1 border.
pub const COMPOSE_HEIGHT: u16 = 3;

/// State for the compose box.
#[derive(Default)]
pub struct ComposeState {
    /// Current input text.
    pub input: String,
    /// Cursor position (character offset into `input`).
    pub cursor_pos: usize,
}

impl ComposeState {
    /// Insert a character at the current cursor position.
    pub fn insert_char(&mut self, c: char) {
        let byte_pos = self.char_to_byte(self.cursor_pos);
        self.input.insert(byte_pos, c);
        self.cursor_pos += 1;
    }

    /// Delete the character before the cursor (backspace).
    pub fn backspace(&mut self) {
        if self.cursor_pos > 0 {
            let byte_pos = self.char_to_byte(self.cursor_pos);
            let prev_byte_pos = self.char_to_byte(self.cursor_pos - 1);
            self.input.drain(prev_byte_pos..byte_pos);
            self.cursor_pos -= 1;
        }
    }

    /// Delete the character at the cursor (delete key).
    pub fn delete(&mut self) {
        let char_count = self.input.chars().count();
        if self.cursor_pos < char_count {
            let byte_pos = self.char_to_byte(self.cursor_pos);
            let next_byte_pos = self.char_to_byte(self.cursor_pos + 1);
            self.input.drain(byte_pos..next_byte_pos);
        }
    }

    /// Move cursor left by one character.
    pub fn move_left(&mut self) {
        if self.cursor_pos > 0 {
            self.cursor_pos -= 1;
        }
    }

    /// Move cursor right by one character.
    pub fn move_right(&mut self) {
        let char_count = self.input.chars().count();
        if self.cursor_pos < char_count {
            self.cursor_pos += 1;
        }
    }

    pub fn move_home(&mut self) {
        self.cursor_pos = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor_pos = self.input.chars().count();
    }

    /// Clear all input text (Ctrl+U).
    pub fn clear(&mut self) {
        self.input.clear();
        self.cursor_pos = 0;
    }

    /// Replace the input (used to restore text after a failed send).
    pub fn set_text(&mut self, text: &str) {
        self.input = text.to_string();
        self.cursor_pos = self.input.chars().count();
    }

    /// Take the trimmed text and clear the box. Returns None when the input
    /// is empty or whitespace-only.
    pub fn take_text(&mut self) -> Option<String> {
        let text = self.input.trim().to_string();
        if text.is_empty() {
            return None;
        }
        self.clear();
        Some(text)
    }

    /// Convert a char-based cursor position to a byte offset.
    fn char_to_byte(&self, char_pos: usize) -> usize {
        self.input
            .char_indices()
            .nth(char_pos)
            .map(|(i, _)| i)
            .unwrap_or(self.input.len())
    }
}

/// Render the compose box and place the terminal cursor when focused.
pub fn render(area: Rect, frame: &mut Frame, state: &ComposeState, peer_name: &str, focused: bool) {
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

    let title = if peer_name.is_empty() {
        " no conversation selected ".to_string()
    } else {
        format!(" to: {} ", peer_name)
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(border_type)
        .border_style(border_style)
        .title(title);

    let inner = block.inner(area);
    frame.render_widget(block, area);

    if inner.height == 0 || inner.width == 0 {
        return;
    }

    let line = if state.input.is_empty() && !focused {
        Line::from(Span::styled(
            "type a message...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        Line::from(Span::raw(state.input.clone()))
    };
    frame.render_widget(Paragraph::new(line), inner);

    if focused {
        let prefix: String = state.input.chars().take(state.cursor_pos).collect();
        let cursor_x = inner.x + (prefix.width() as u16).min(inner.width.saturating_sub(1));
        frame.set_cursor_position((cursor_x, inner.y));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_cursor_movement() {
        let mut state = ComposeState::default();
        for c in "hey".chars() {
            state.insert_char(c);
        }
        state.move_left();
        state.insert_char('!');
        assert_eq!(state.input, "he!y");
        assert_eq!(state.cursor_pos, 3);
    }

    #[test]
    fn test_backspace_multibyte() {
        let mut state = ComposeState::default();
        for c in "héllo".chars() {
            state.insert_char(c);
        }
        state.move_home();
        state.move_right();
        state.move_right();
        state.backspace();
        assert_eq!(state.input, "hllo");
    }

    #[test]
    fn test_take_text_trims_and_clears() {
        let mut state = ComposeState::default();
        state.set_text("  hello  ");
        assert_eq!(state.take_text().as_deref(), Some("hello"));
        assert!(state.input.is_empty());
        assert_eq!(state.cursor_pos, 0);
    }

    #[test]
    fn test_take_text_rejects_whitespace_only() {
        let mut state = ComposeState::default();
        state.set_text("   ");
        assert_eq!(state.take_text(), None);
        // The input is kept so the user can keep editing.
        assert_eq!(state.input, "   ");
    }
}
