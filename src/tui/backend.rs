//! Async backend: bridges the TUI event loop with the sync core.
//!
//! Uses an mpsc channel pair. The TUI sends `BackendCommand` values, and a
//! background tokio task owns the heartbeat, the contact feed, and the
//! active thread feed, sending `BackendEvent` values back.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::models::UserProfile;
use crate::store::DocumentStore;
use crate::sync::{dispatch, ContactFeed, Heartbeat, ThreadFeed, ThreadUpdate};

/// Commands sent from the TUI event loop to the async backend.
pub enum BackendCommand {
    /// Switch the active thread to the conversation with `peer_uid`.
    SelectThread { peer_uid: String },
    CloseThread,
    SendMessage { recipient_id: String, text: String },
    DeleteMessage { message_id: String },
    MarkRead { message_ids: Vec<String> },
}

/// Events from the async backend to the TUI.
pub enum BackendEvent {
    /// Fresh conversation list.
    Contacts(Vec<UserProfile>),
    /// Keyed transcript from the active thread feed.
    Thread(ThreadUpdate),
    /// A send was rejected or failed; `text` comes back for retry.
    SendFailed { text: String, error: String },
    /// Non-fatal operation failure worth showing in the status bar.
    Notice(String),
    /// The backend cannot continue (subscription ended).
    Fatal(String),
}

/// Handle for interacting with the backend from the TUI side.
pub struct Backend {
    cmd_tx: mpsc::UnboundedSender<BackendCommand>,
    event_rx: mpsc::UnboundedReceiver<BackendEvent>,
}

impl Backend {
    /// Start the backend loop for the signed-in user.
    pub fn start(store: Arc<dyn DocumentStore>, me: UserProfile) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(backend_loop(store, me, cmd_rx, event_tx));

        Self { cmd_tx, event_rx }
    }

    /// Send a command to the backend (non-blocking).
    pub fn send(&self, cmd: BackendCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::error!("Backend channel closed -- command dropped");
        }
    }

    /// Receive the next event. Returns `None` only when the backend loop has
    /// exited. Designed to be used inside `tokio::select!`.
    pub async fn recv(&mut self) -> Option<BackendEvent> {
        self.event_rx.recv().await
    }
}

enum Step {
    Cmd(Option<BackendCommand>),
    Thread(Option<ThreadUpdate>),
    Contacts(Option<Vec<UserProfile>>),
}

async fn backend_loop(
    store: Arc<dyn DocumentStore>,
    me: UserProfile,
    mut cmd_rx: mpsc::UnboundedReceiver<BackendCommand>,
    event_tx: mpsc::UnboundedSender<BackendEvent>,
) {
    let _heartbeat = Heartbeat::start(store.clone(), me.clone());
    let mut contacts = ContactFeed::subscribe(store.clone(), &me.uid);
    let mut thread: Option<ThreadFeed> = None;

    loop {
        let step = tokio::select! {
            cmd = cmd_rx.recv() => Step::Cmd(cmd),
            update = next_update(&mut thread) => Step::Thread(update),
            list = contacts.next() => Step::Contacts(list),
        };

        match step {
            Step::Cmd(None) => break,
            Step::Cmd(Some(cmd)) => handle_command(&store, &me, &mut thread, &event_tx, cmd),
            Step::Thread(Some(update)) => {
                let _ = event_tx.send(BackendEvent::Thread(update));
            }
            Step::Thread(None) => {
                // The live query died; the user reselects to re-establish it.
                thread = None;
                let _ = event_tx.send(BackendEvent::Notice(
                    "thread subscription ended -- reselect the conversation".to_string(),
                ));
            }
            Step::Contacts(Some(list)) => {
                let _ = event_tx.send(BackendEvent::Contacts(list));
            }
            Step::Contacts(None) => {
                let _ = event_tx.send(BackendEvent::Fatal(
                    "conversation list subscription ended".to_string(),
                ));
                break;
            }
        }
    }
}

/// Resolve to the active feed's next update, or park when no thread is open.
async fn next_update(thread: &mut Option<ThreadFeed>) -> Option<ThreadUpdate> {
    match thread {
        Some(feed) => feed.next().await,
        None => std::future::pending().await,
    }
}

fn handle_command(
    store: &Arc<dyn DocumentStore>,
    me: &UserProfile,
    thread: &mut Option<ThreadFeed>,
    event_tx: &mpsc::UnboundedSender<BackendEvent>,
    cmd: BackendCommand,
) {
    match cmd {
        BackendCommand::SelectThread { peer_uid } => {
            // Detach before attach so the old feed cannot emit again.
            if let Some(mut old) = thread.take() {
                old.detach();
            }
            *thread = Some(ThreadFeed::open(&**store, &me.uid, &peer_uid));
        }
        BackendCommand::CloseThread => {
            if let Some(mut old) = thread.take() {
                old.detach();
            }
        }
        BackendCommand::SendMessage {
            recipient_id,
            text,
        } => {
            let store = Arc::clone(store);
            let sender_id = me.uid.clone();
            let event_tx = event_tx.clone();
            tokio::spawn(async move {
                if let Err(e) =
                    dispatch::send_message(&*store, &sender_id, &recipient_id, &text).await
                {
                    let _ = event_tx.send(BackendEvent::SendFailed {
                        text,
                        error: e.to_string(),
                    });
                }
            });
        }
        BackendCommand::DeleteMessage { message_id } => {
            let store = Arc::clone(store);
            let requester_id = me.uid.clone();
            let event_tx = event_tx.clone();
            tokio::spawn(async move {
                if let Err(e) = dispatch::delete_message(&*store, &message_id, &requester_id).await
                {
                    let _ = event_tx.send(BackendEvent::Notice(format!("delete failed: {}", e)));
                }
            });
        }
        BackendCommand::MarkRead { message_ids } => {
            let store = Arc::clone(store);
            tokio::spawn(async move {
                for id in message_ids {
                    if let Err(e) = dispatch::mark_read(&*store, &id).await {
                        tracing::debug!("mark read {} failed: {}", id, e);
                    }
                }
            });
        }
    }
}
