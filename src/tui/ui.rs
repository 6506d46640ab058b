//! UI rendering for the TUI

use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Paragraph, Widget},
    Frame,
};

use super::app::{App, Pane};
use super::compose;
use super::messages;
use super::sidebar;
use crate::store::now_millis;
use crate::sync::presence;

/// Main render function
pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();
    let now = now_millis();

    // Layout: header (1 line) + main content + status bar (1 line)
    let [header_area, main_area, status_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Fill(1),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(header_area, frame.buffer_mut(), app);

    // Split main area: sidebar (32 cols) + conversation
    let [sidebar_area, content_area] =
        Layout::horizontal([Constraint::Length(32), Constraint::Fill(1)]).areas(main_area);

    sidebar::render(
        sidebar_area,
        frame.buffer_mut(),
        &app.sidebar,
        app.active_pane == Pane::Sidebar,
        now,
    );

    // Conversation column: thread header + transcript + compose box
    let [thread_header_area, messages_area, compose_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Fill(1),
        Constraint::Length(compose::COMPOSE_HEIGHT),
    ])
    .areas(content_area);

    render_thread_header(thread_header_area, frame.buffer_mut(), app, now);

    messages::render(
        messages_area,
        frame.buffer_mut(),
        &app.messages,
        &app.me.uid,
        app.active_pane == Pane::Messages,
    );

    let peer_name = app
        .peer
        .as_ref()
        .map(|p| p.display_name.clone())
        .unwrap_or_default();
    compose::render(
        compose_area,
        frame,
        &app.compose,
        &peer_name,
        app.active_pane == Pane::Compose,
    );

    render_status(status_area, frame.buffer_mut(), app);
}

/// Render the header bar
fn render_header(area: Rect, buf: &mut Buffer, app: &App) {
    let title = Span::styled(
        " pigeon",
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    );

    let user = format!("* {} ", app.me.display_name);
    let left_width = " pigeon".chars().count();
    let right_width = user.chars().count();
    let padding_width = (area.width as usize).saturating_sub(left_width + right_width);

    let header_line = Line::from(vec![
        title,
        Span::raw(" ".repeat(padding_width)),
        Span::styled(user, Style::default().fg(Color::Green)),
    ]);

    Paragraph::new(header_line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}

/// Render the open conversation's header: peer name and presence.
fn render_thread_header(area: Rect, buf: &mut Buffer, app: &App, now: i64) {
    let line = match &app.peer {
        Some(peer) => {
            let label = presence::presence_label(peer.last_seen, now);
            let label_style = if presence::is_online(peer.last_seen, now) {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::Gray)
            };
            let mut spans = vec![
                Span::styled(
                    format!(" {} ", peer.display_name),
                    Style::default()
                        .fg(Color::White)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::styled(label, label_style),
            ];
            if app.search.active || !app.search.query.is_empty() {
                spans.push(Span::styled(
                    format!("   search: {}", app.search.query),
                    Style::default().fg(Color::Yellow),
                ));
            }
            Line::from(spans)
        }
        None => Line::from(Span::styled(
            " select a conversation",
            Style::default().fg(Color::DarkGray),
        )),
    };

    Paragraph::new(line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}

/// Render the status bar
fn render_status(area: Rect, buf: &mut Buffer, app: &App) {
    // If there's a status message, show it prominently.
    if let Some(ref msg) = app.status_message {
        let style = if app.status_is_error {
            Style::default().fg(Color::Red).bg(Color::DarkGray)
        } else {
            Style::default().fg(Color::Green).bg(Color::DarkGray)
        };
        let line = Line::from(Span::styled(format!(" {} ", msg), style));
        Paragraph::new(line)
            .style(Style::default().bg(Color::DarkGray))
            .render(area, buf);
        return;
    }

    let sep_style = Style::default().fg(Color::DarkGray);
    let pane = Span::styled(
        format!(" Tab: {} ", app.active_pane.as_str()),
        Style::default().fg(Color::Cyan),
    );
    let hints = Span::styled(
        "Enter: open/send | /: filter | d: delete | q: quit",
        Style::default().fg(Color::Gray),
    );

    let status_line = Line::from(vec![pane, Span::styled("| ", sep_style), hints]);

    Paragraph::new(status_line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}
