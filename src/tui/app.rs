//! TUI application state and main event loop

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use futures::StreamExt;
use ratatui::DefaultTerminal;

use super::backend::{Backend, BackendCommand, BackendEvent};
use super::compose::ComposeState;
use super::messages::MessagesState;
use super::search::SearchState;
use super::sidebar::SidebarState;
use super::ui;
use crate::models::UserProfile;
use crate::store::DocumentStore;
use crate::sync::{ActiveThread, ThreadKey};

/// Active pane in the TUI
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub enum Pane {
    #[default]
    Sidebar,
    Messages,
    Compose,
}

impl Pane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pane::Sidebar => "chats",
            Pane::Messages => "messages",
            Pane::Compose => "compose",
        }
    }

    fn next(&self) -> Self {
        match self {
            Pane::Sidebar => Pane::Messages,
            Pane::Messages => Pane::Compose,
            Pane::Compose => Pane::Sidebar,
        }
    }
}

/// Application state
pub struct App {
    /// Whether the app should exit
    pub should_exit: bool,
    /// The signed-in user's profile
    pub me: UserProfile,
    /// Active pane
    pub active_pane: Pane,
    pub sidebar: SidebarState,
    pub messages: MessagesState,
    pub compose: ComposeState,
    pub search: SearchState,
    /// Selection-guarded transcript of the open conversation
    pub active_thread: ActiveThread,
    /// The selected counterpart (header presence comes from here)
    pub peer: Option<UserProfile>,
    /// Transient status bar message
    pub status_message: Option<String>,
    pub status_is_error: bool,
}

impl App {
    pub fn new(me: UserProfile) -> Self {
        Self {
            should_exit: false,
            me,
            active_pane: Pane::default(),
            sidebar: SidebarState::default(),
            messages: MessagesState::default(),
            compose: ComposeState::default(),
            search: SearchState::default(),
            active_thread: ActiveThread::default(),
            peer: None,
            status_message: None,
            status_is_error: false,
        }
    }

    /// Render the UI
    pub fn render(&self, frame: &mut ratatui::Frame) {
        ui::render(frame, self);
    }

    fn set_status(&mut self, message: String, is_error: bool) {
        self.status_message = Some(message);
        self.status_is_error = is_error;
    }

    /// Open the conversation with the contact selected in the sidebar.
    fn open_selected_contact(&mut self, backend: &Backend) {
        let Some(peer) = self.sidebar.selected_contact() else {
            return;
        };
        self.active_thread
            .select(ThreadKey::new(&self.me.uid, &peer.uid));
        self.messages.reset();
        self.messages.filter.clear();
        self.search.deactivate();
        backend.send(BackendCommand::SelectThread {
            peer_uid: peer.uid.clone(),
        });
        self.peer = Some(peer);
        self.active_pane = Pane::Compose;
        self.status_message = None;
    }

    /// Deselect the open conversation and tear down its subscription.
    fn close_thread(&mut self, backend: &Backend) {
        if self.peer.is_none() {
            return;
        }
        backend.send(BackendCommand::CloseThread);
        self.active_thread.clear();
        self.messages.reset();
        self.peer = None;
    }

    fn send_current_input(&mut self, backend: &Backend) {
        let Some(peer) = self.peer.clone() else {
            self.set_status("select a conversation first".to_string(), true);
            return;
        };
        if let Some(text) = self.compose.take_text() {
            backend.send(BackendCommand::SendMessage {
                recipient_id: peer.uid,
                text,
            });
        }
    }

    fn delete_selected_message(&mut self, backend: &Backend) {
        let target = self
            .messages
            .selected_message()
            .map(|m| (m.id.clone(), m.sender_id.clone()));
        match target {
            Some((message_id, sender_id)) if sender_id == self.me.uid => {
                backend.send(BackendCommand::DeleteMessage { message_id });
            }
            Some(_) => self.set_status("only your own messages can be deleted".to_string(), true),
            None => {}
        }
    }

    /// Handle one key press.
    pub fn handle_key(&mut self, backend: &Backend, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_exit = true;
            return;
        }

        // Sidebar filter captures keys while active.
        if self.active_pane == Pane::Sidebar && self.sidebar.filter_active {
            match key.code {
                KeyCode::Esc => {
                    self.sidebar.filter_active = false;
                    self.sidebar.filter.clear();
                    self.sidebar.clamp_selection();
                }
                KeyCode::Enter => self.sidebar.filter_active = false,
                KeyCode::Backspace => {
                    self.sidebar.filter.pop();
                    self.sidebar.clamp_selection();
                }
                KeyCode::Char(c) => {
                    self.sidebar.filter.push(c);
                    self.sidebar.clamp_selection();
                }
                _ => {}
            }
            return;
        }

        // Thread search captures keys while active.
        if self.active_pane == Pane::Messages && self.search.active {
            match key.code {
                KeyCode::Esc => {
                    self.search.deactivate();
                    self.messages.filter.clear();
                    self.messages.clamp_selection();
                }
                KeyCode::Enter => self.search.active = false,
                KeyCode::Backspace => {
                    self.search.backspace();
                    self.messages.filter = self.search.query.clone();
                    self.messages.clamp_selection();
                }
                KeyCode::Char(c) => {
                    self.search.insert_char(c);
                    self.messages.filter = self.search.query.clone();
                    self.messages.clamp_selection();
                }
                _ => {}
            }
            return;
        }

        if key.code == KeyCode::Tab {
            self.active_pane = self.active_pane.next();
            return;
        }

        match self.active_pane {
            Pane::Sidebar => match key.code {
                KeyCode::Char('q') => self.should_exit = true,
                KeyCode::Up | KeyCode::Char('k') => self.sidebar.move_up(),
                KeyCode::Down | KeyCode::Char('j') => self.sidebar.move_down(),
                KeyCode::Enter => self.open_selected_contact(backend),
                KeyCode::Char('/') => self.sidebar.filter_active = true,
                KeyCode::Esc => self.close_thread(backend),
                _ => {}
            },
            Pane::Messages => match key.code {
                KeyCode::Char('q') => self.should_exit = true,
                KeyCode::Up | KeyCode::Char('k') => self.messages.select_previous(),
                KeyCode::Down | KeyCode::Char('j') => self.messages.select_next(),
                KeyCode::Char('d') => self.delete_selected_message(backend),
                KeyCode::Char('/') => {
                    self.search.activate();
                    self.messages.filter.clear();
                }
                KeyCode::Esc => {
                    self.search.deactivate();
                    self.messages.filter.clear();
                    self.messages.clamp_selection();
                }
                _ => {}
            },
            Pane::Compose => match key.code {
                KeyCode::Enter => self.send_current_input(backend),
                KeyCode::Esc => self.active_pane = Pane::Sidebar,
                KeyCode::Backspace => self.compose.backspace(),
                KeyCode::Delete => self.compose.delete(),
                KeyCode::Left => self.compose.move_left(),
                KeyCode::Right => self.compose.move_right(),
                KeyCode::Home => self.compose.move_home(),
                KeyCode::End => self.compose.move_end(),
                KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    self.compose.clear()
                }
                KeyCode::Char(c) => self.compose.insert_char(c),
                _ => {}
            },
        }
    }

    /// Apply one backend event to the view state.
    pub fn apply_event(&mut self, backend: &Backend, event: BackendEvent) {
        match event {
            BackendEvent::Contacts(contacts) => {
                // Keep the open conversation's header presence fresh.
                if let Some(peer) = &mut self.peer {
                    if let Some(updated) = contacts.iter().find(|c| c.uid == peer.uid) {
                        *peer = updated.clone();
                    }
                }
                self.sidebar.update_contacts(contacts);
            }
            BackendEvent::Thread(update) => {
                // A late snapshot from a previous selection is discarded here.
                if self.active_thread.apply(update) {
                    let transcript = self.active_thread.transcript().clone();
                    let unread: Vec<String> = transcript
                        .messages()
                        .iter()
                        .filter(|m| m.recipient_id == self.me.uid && !m.read)
                        .map(|m| m.id.clone())
                        .collect();
                    if !unread.is_empty() {
                        backend.send(BackendCommand::MarkRead {
                            message_ids: unread,
                        });
                    }
                    self.messages.set_transcript(transcript);
                }
            }
            BackendEvent::SendFailed { text, error } => {
                // Give the unsent text back for retry.
                if self.compose.input.is_empty() {
                    self.compose.set_text(&text);
                }
                self.set_status(format!("send failed: {}", error), true);
            }
            BackendEvent::Notice(message) => self.set_status(message, true),
            BackendEvent::Fatal(message) => self.set_status(message, true),
        }
    }
}

/// Run the TUI application, restoring the terminal on exit.
pub async fn run(store: Arc<dyn DocumentStore>, me: UserProfile) -> Result<()> {
    let mut terminal = ratatui::init();
    let result = run_app(&mut terminal, store, me).await;
    ratatui::restore();
    result
}

enum Step {
    Input(Option<std::io::Result<Event>>),
    Backend(Option<BackendEvent>),
    Tick,
}

async fn run_app(
    terminal: &mut DefaultTerminal,
    store: Arc<dyn DocumentStore>,
    me: UserProfile,
) -> Result<()> {
    let mut backend = Backend::start(store, me.clone());
    let mut app = App::new(me);
    let mut input = EventStream::new();

    while !app.should_exit {
        terminal.draw(|frame| app.render(frame))?;

        let step = tokio::select! {
            ev = input.next() => Step::Input(ev),
            ev = backend.recv() => Step::Backend(ev),
            // Periodic redraw so presence indicators age out.
            _ = tokio::time::sleep(Duration::from_secs(1)) => Step::Tick,
        };

        match step {
            Step::Input(Some(Ok(Event::Key(key)))) if key.kind == KeyEventKind::Press => {
                app.handle_key(&backend, key)
            }
            Step::Input(Some(Ok(_))) => {}
            Step::Input(Some(Err(e))) => return Err(e.into()),
            Step::Input(None) => break,
            Step::Backend(Some(event)) => app.apply_event(&backend, event),
            Step::Backend(None) => break,
            Step::Tick => {}
        }
    }

    Ok(())
}
