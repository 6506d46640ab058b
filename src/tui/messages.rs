//! Messages pane: the active conversation transcript.

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Widget},
};

use super::search::filter_messages;
use crate::models::Message;
use crate::sync::presence::format_clock;
use crate::sync::thread::{date_label, TranscriptRow};
use crate::sync::Transcript;

/// State for the messages pane.
#[derive(Default)]
pub struct MessagesState {
    pub transcript: Transcript,
    /// Index into the displayed (possibly filtered) message list.
    pub selected: usize,
    /// Text filter from the search input; empty shows everything.
    pub filter: String,
}

impl MessagesState {
    /// Drop the current transcript (when switching or closing threads).
    pub fn reset(&mut self) {
        self.transcript = Transcript::default();
        self.selected = 0;
    }

    /// Replace the transcript with a fresh snapshot and follow the newest
    /// message.
    pub fn set_transcript(&mut self, transcript: Transcript) {
        self.transcript = transcript;
        let count = self.displayed().len();
        self.selected = count.saturating_sub(1);
    }

    /// Messages after applying the search filter.
    pub fn displayed(&self) -> Vec<&Message> {
        filter_messages(self.transcript.messages(), &self.filter)
    }

    pub fn select_previous(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
        }
    }

    pub fn select_next(&mut self) {
        let count = self.displayed().len();
        if count > 0 && self.selected < count - 1 {
            self.selected += 1;
        }
    }

    pub fn clamp_selection(&mut self) {
        let count = self.displayed().len();
        if count == 0 {
            self.selected = 0;
        } else if self.selected >= count {
            self.selected = count - 1;
        }
    }

    /// The currently selected message, if any.
    pub fn selected_message(&self) -> Option<&Message> {
        self.displayed().get(self.selected).copied()
    }
}

/// Render the messages pane into the given area.
pub fn render(area: Rect, buf: &mut Buffer, state: &MessagesState, me_uid: &str, focused: bool) {
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
        .border_style(border_style);

    let inner = block.inner(area);
    block.render(area, buf);

    if inner.height == 0 || inner.width == 0 {
        return;
    }

    if state.transcript.is_empty() {
        let line = Line::from(Span::styled(
            " no messages yet -- say hello",
            Style::default().fg(Color::DarkGray),
        ));
        Paragraph::new(line).render(Rect::new(inner.x, inner.y, inner.width, 1), buf);
        return;
    }

    let (lines, ranges) = build_lines(state, me_uid, inner.width as usize);
    let total_lines = lines.len();
    let visible_height = inner.height as usize;

    let selected_range = ranges.get(state.selected).copied();
    let scroll = compute_scroll(selected_range, visible_height, total_lines);

    for (row, line_idx) in (scroll..total_lines).take(visible_height).enumerate() {
        let line_area = Rect::new(inner.x, inner.y + row as u16, inner.width, 1);
        Paragraph::new(lines[line_idx].clone()).render(line_area, buf);
    }
}

/// Build the flat line buffer and per-message line ranges in a single pass.
fn build_lines(
    state: &MessagesState,
    me_uid: &str,
    width: usize,
) -> (Vec<Line<'static>>, Vec<(usize, usize)>) {
    let mut lines: Vec<Line<'static>> = Vec::new();
    let mut ranges: Vec<(usize, usize)> = Vec::new();

    if state.filter.is_empty() {
        for row in state.transcript.rows() {
            match row {
                TranscriptRow::DateMarker(date) => {
                    lines.push(date_marker_line(date, width));
                }
                TranscriptRow::Message(message) => {
                    let start = lines.len();
                    let selected = ranges.len() == state.selected;
                    push_message_lines(&mut lines, message, me_uid, width, selected);
                    ranges.push((start, lines.len()));
                }
            }
        }
    } else {
        // Filtered view: matching messages only, no date separators.
        for message in state.displayed() {
            let start = lines.len();
            let selected = ranges.len() == state.selected;
            push_message_lines(&mut lines, message, me_uid, width, selected);
            ranges.push((start, lines.len()));
        }
    }

    (lines, ranges)
}

fn date_marker_line(date: chrono::NaiveDate, width: usize) -> Line<'static> {
    let label = format!(" {} ", date_label(date));
    let pad = width.saturating_sub(label.chars().count()) / 2;
    Line::from(vec![
        Span::raw(" ".repeat(pad)),
        Span::styled(label, Style::default().fg(Color::DarkGray)),
    ])
}

/// Push the rendered lines of one message: incoming left-aligned, own
/// messages right-aligned with read marks.
fn push_message_lines(
    lines: &mut Vec<Line<'static>>,
    message: &Message,
    me_uid: &str,
    width: usize,
    selected: bool,
) {
    let own = message.sender_id == me_uid;
    let clock = format_clock(message.sent_at);
    let marks = if own {
        if message.read {
            " \u{2713}\u{2713}"
        } else {
            " \u{2713}"
        }
    } else {
        ""
    };

    let body_style = if selected {
        Style::default()
            .fg(Color::White)
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD)
    } else if own {
        Style::default().fg(Color::Green)
    } else {
        Style::default().fg(Color::White)
    };
    let meta_style = Style::default().fg(Color::DarkGray);

    let wrap_width = width.saturating_sub(clock.chars().count() + marks.chars().count() + 4);
    if wrap_width == 0 {
        return;
    }

    for (i, chunk) in wrap_text(&message.text, wrap_width).into_iter().enumerate() {
        let meta = if i == 0 {
            format!(" {}{}", clock, marks)
        } else {
            String::new()
        };
        if own {
            let used = chunk.chars().count() + meta.chars().count();
            let pad = width.saturating_sub(used);
            lines.push(Line::from(vec![
                Span::raw(" ".repeat(pad)),
                Span::styled(chunk, body_style),
                Span::styled(meta, meta_style),
            ]));
        } else {
            lines.push(Line::from(vec![
                Span::styled(chunk, body_style),
                Span::styled(meta, meta_style),
            ]));
        }
    }
}

/// Simple word-wrapping: split content by newlines first, then wrap long lines.
fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    if max_width == 0 {
        return vec![];
    }
    let mut result = Vec::new();
    for line in text.lines() {
        if line.chars().count() <= max_width {
            result.push(line.to_string());
        } else {
            let words: Vec<&str> = line.split_whitespace().collect();
            let mut current = String::new();
            for word in words {
                if current.is_empty() {
                    current = word.to_string();
                } else if current.chars().count() + 1 + word.chars().count() <= max_width {
                    current.push(' ');
                    current.push_str(word);
                } else {
                    result.push(current);
                    current = word.to_string();
                }
            }
            if !current.is_empty() {
                result.push(current);
            }
        }
    }
    if result.is_empty() {
        result.push(String::new());
    }
    result
}

/// Scroll offset that keeps the selection visible, preferring the bottom of
/// the transcript.
fn compute_scroll(
    selected_range: Option<(usize, usize)>,
    visible_height: usize,
    total_lines: usize,
) -> usize {
    if total_lines <= visible_height {
        return 0;
    }
    let max_scroll = total_lines - visible_height;
    let mut scroll = max_scroll;
    if let Some((sel_start, _)) = selected_range {
        if sel_start < scroll {
            scroll = sel_start;
        }
    }
    scroll.min(max_scroll)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Snapshot;
    use serde_json::json;

    fn transcript(texts: &[(&str, i64)]) -> Transcript {
        let docs = texts
            .iter()
            .map(|(text, sent_at)| {
                (
                    format!("m{}", sent_at),
                    json!({
                        "senderId": "u",
                        "recipientId": "v",
                        "text": text,
                        "sentAt": sent_at,
                    }),
                )
            })
            .collect();
        Transcript::from_snapshot(&Snapshot { docs })
    }

    #[test]
    fn test_set_transcript_follows_newest() {
        let mut state = MessagesState::default();
        state.set_transcript(transcript(&[("one", 1), ("two", 2), ("three", 3)]));
        assert_eq!(state.selected, 2);
        assert_eq!(state.selected_message().unwrap().text, "three");
    }

    #[test]
    fn test_filter_narrows_displayed_messages() {
        let mut state = MessagesState::default();
        state.set_transcript(transcript(&[("hello world", 1), ("bye", 2)]));
        state.filter = "hello".to_string();
        state.clamp_selection();
        assert_eq!(state.displayed().len(), 1);
        assert_eq!(state.selected_message().unwrap().text, "hello world");
    }

    #[test]
    fn test_wrap_text_preserves_words() {
        let wrapped = wrap_text("the quick brown fox jumps", 10);
        assert_eq!(wrapped, vec!["the quick", "brown fox", "jumps"]);
    }

    #[test]
    fn test_scroll_prefers_bottom_but_reveals_selection() {
        // 20 lines, 5 visible: default to bottom.
        assert_eq!(compute_scroll(Some((18, 20)), 5, 20), 15);
        // Selection above the fold scrolls up to reveal it.
        assert_eq!(compute_scroll(Some((3, 4)), 5, 20), 3);
        // Everything fits: no scroll.
        assert_eq!(compute_scroll(Some((0, 2)), 5, 4), 0);
    }
}
