//! pigeon - Lightweight CLI client for a Firebase-backed 1:1 chat service
//!
//! A terminal chat client: account management, conversation list, message
//! threads, and a TUI, all synchronized through the hosted auth and
//! document store backends.

mod auth;
mod config;
mod models;
mod store;
mod sync;
mod tui;

use std::io::Write as _;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auth::{FirebaseAuth, IdentityProvider};
use config::{Config, StoredSession};
use models::UserProfile;
use store::{DocumentStore, Filter, FirestoreStore, OrderBy, Snapshot};
use sync::thread::{date_label, pair_filter};
use sync::{presence, ContactFeed, Transcript, TranscriptRow};

#[derive(Parser)]
#[command(name = "pigeon")]
#[command(about = "Lightweight CLI client for a Firebase-backed 1:1 chat service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the backend project id and web API key
    Setup {
        #[arg(long)]
        project_id: String,

        #[arg(long)]
        api_key: String,
    },

    /// Create an account and send the verification mail
    Register {
        /// Email address for the new account
        email: String,

        /// Display name shown to other users
        #[arg(short, long)]
        name: String,
    },

    /// Sign in (requires a verified email address)
    Login {
        /// Email address of the account
        email: String,
    },

    /// Log out and clear the cached session
    Logout,

    /// Show current session status
    Status,

    /// Show the signed-in user's profile
    Whoami,

    /// List conversations, most recently active counterpart first
    Contacts,

    /// Read the conversation with a user (email or uid)
    Read {
        /// Counterpart email or uid
        peer: String,

        /// Maximum number of messages to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Send a message
    Send {
        /// Recipient email or uid
        #[arg(short, long)]
        to: String,

        /// Message content
        message: String,
    },

    /// Delete one of your own messages
    Delete {
        /// Message id (from `read` output in verbose mode)
        message_id: String,
    },

    /// Launch the terminal user interface
    Tui,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = Config::load()?;

    match cli.command {
        Commands::Setup {
            project_id,
            api_key,
        } => {
            config.project_id = Some(project_id);
            config.api_key = Some(api_key);
            config.save()?;
            println!("Backend configured.");
        }
        Commands::Register { email, name } => {
            cmd_register(&config, &email, &name).await?;
        }
        Commands::Login { email } => {
            cmd_login(&mut config, &email).await?;
        }
        Commands::Logout => {
            cmd_logout(&mut config).await?;
        }
        Commands::Status => {
            cmd_status(&config);
        }
        Commands::Whoami => {
            cmd_whoami(&mut config).await?;
        }
        Commands::Contacts => {
            cmd_contacts(&mut config).await?;
        }
        Commands::Read { peer, limit } => {
            cmd_read(&mut config, &peer, limit).await?;
        }
        Commands::Send { to, message } => {
            cmd_send(&mut config, &to, &message).await?;
        }
        Commands::Delete { message_id } => {
            cmd_delete(&mut config, &message_id).await?;
        }
        Commands::Tui => {
            cmd_tui(&mut config).await?;
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Collaborator construction
// ---------------------------------------------------------------------------

fn build_provider(config: &Config) -> Result<FirebaseAuth> {
    let api_key = config
        .api_key
        .as_deref()
        .context("Backend not configured. Run 'pigeon setup' first.")?;
    Ok(FirebaseAuth::new(api_key))
}

fn project_id(config: &Config) -> Result<&str> {
    config
        .project_id
        .as_deref()
        .context("Backend not configured. Run 'pigeon setup' first.")
}

fn build_store(config: &Config, session: &StoredSession) -> Result<FirestoreStore> {
    Ok(FirestoreStore::new(
        project_id(config)?,
        &session.id_token.token,
    ))
}

/// Cached session, refreshed through the identity provider if expired.
async fn ensure_session(config: &mut Config, provider: &FirebaseAuth) -> Result<StoredSession> {
    let session = config
        .get_session()
        .context("Not signed in. Run 'pigeon login'.")?;
    if !session.id_token.is_expired() {
        return Ok(session);
    }

    tracing::info!("Session token expired, refreshing...");
    let fresh = provider
        .refresh(&session.refresh_token)
        .await
        .context("Token refresh failed. Run 'pigeon login'.")?;
    config.set_session(&fresh);
    config.save()?;
    Ok(config.get_session().expect("session was just stored"))
}

fn prompt_password() -> Result<String> {
    print!("Password: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn profile_from_session(session: &StoredSession) -> UserProfile {
    UserProfile {
        uid: session.uid.clone(),
        email: session.email.clone(),
        display_name: session.display_name.clone(),
        photo_url: Some(UserProfile::default_photo_url(&session.display_name)),
        last_seen: None,
        created_at: None,
    }
}

/// The signed-in user's directory profile, falling back to session fields.
async fn load_profile(store: &dyn DocumentStore, session: &StoredSession) -> UserProfile {
    match store.get("users", &session.uid).await {
        Ok(Some(doc)) => {
            UserProfile::from_doc(&doc).unwrap_or_else(|_| profile_from_session(session))
        }
        Ok(None) => profile_from_session(session),
        Err(e) => {
            tracing::warn!("profile load failed: {}", e);
            profile_from_session(session)
        }
    }
}

/// Resolve a counterpart by email or uid; chatting with yourself is refused.
async fn resolve_peer(
    store: &dyn DocumentStore,
    me_uid: &str,
    target: &str,
) -> Result<UserProfile> {
    let doc = if target.contains('@') {
        let docs = store
            .query("users", &Filter::eq("email", target.to_lowercase()), None)
            .await?;
        docs.into_iter()
            .next()
            .map(|(_, doc)| doc)
            .with_context(|| format!("No user registered with email {}", target))?
    } else {
        store
            .get("users", target)
            .await?
            .with_context(|| format!("No user with id {}", target))?
    };

    let profile = UserProfile::from_doc(&doc).context("User profile does not parse")?;
    if profile.uid == me_uid {
        bail!("You cannot start a conversation with yourself");
    }
    Ok(profile)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_register(config: &Config, email: &str, name: &str) -> Result<()> {
    let provider = build_provider(config)?;
    let email = email.to_lowercase();
    let password = prompt_password()?;

    let session = provider.register(&email, &password, name).await?;

    // Publish the profile document so other users can find us.
    let store_backend = FirestoreStore::new(project_id(config)?, &session.id_token);
    store_backend
        .upsert(
            "users",
            &session.uid,
            serde_json::json!({
                "uid": session.uid,
                "email": email,
                "displayName": name,
                "photoUrl": UserProfile::default_photo_url(name),
                "createdAt": store::server_timestamp(),
                "lastSeen": store::server_timestamp(),
            }),
        )
        .await?;

    provider.send_verification(&session).await?;

    // The session is not cached: sign-in requires a verified address.
    println!(
        "Account created. Check {} for the verification link, then run 'pigeon login'.",
        email
    );
    Ok(())
}

async fn cmd_login(config: &mut Config, email: &str) -> Result<()> {
    let provider = build_provider(config)?;
    let password = prompt_password()?;

    let session = auth::sign_in_verified(&provider, &email.to_lowercase(), &password).await?;
    config.set_session(&session);
    config.save()?;

    // Publish presence right away so we show as online.
    let stored = config.get_session().expect("session was just stored");
    let store_backend = build_store(config, &stored)?;
    let profile = load_profile(&store_backend, &stored).await;
    if let Err(e) = sync::heartbeat::beat(&store_backend, &profile).await {
        tracing::warn!("presence update failed: {}", e);
    }

    println!("Logged in as {} ({})", session.display_name, session.email);
    Ok(())
}

async fn cmd_logout(config: &mut Config) -> Result<()> {
    if let Some(session) = config.get_session() {
        // Final last-seen flush before the session goes away.
        if let Ok(store_backend) = build_store(config, &session) {
            let profile = load_profile(&store_backend, &session).await;
            if let Err(e) = sync::heartbeat::beat(&store_backend, &profile).await {
                tracing::debug!("last-seen flush failed: {}", e);
            }
        }
    }

    config.clear_session();
    config.save()?;
    println!("Logged out.");
    Ok(())
}

fn cmd_status(config: &Config) {
    match (&config.project_id, &config.api_key) {
        (Some(project), Some(_)) => println!("Backend: {}", project),
        _ => {
            println!("Backend: not configured (run 'pigeon setup')");
            return;
        }
    }
    match config.get_session() {
        Some(session) => {
            let state = if session.id_token.is_expired() {
                "expired (will refresh on next use)"
            } else {
                "valid"
            };
            println!("Session: {} ({})", session.email, state);
        }
        None => println!("Session: not signed in"),
    }
}

async fn cmd_whoami(config: &mut Config) -> Result<()> {
    let provider = build_provider(config)?;
    let session = ensure_session(config, &provider).await?;
    let store_backend = build_store(config, &session)?;
    let profile = load_profile(&store_backend, &session).await;

    println!("\nSigned in as:");
    println!("  Name:  {}", profile.display_name);
    println!("  Email: {}", profile.email);
    println!("  ID:    {}", profile.uid);
    if let Some(last_seen) = profile.last_seen {
        println!("  Last seen: {}", presence::format_clock(last_seen));
    }
    Ok(())
}

async fn cmd_contacts(config: &mut Config) -> Result<()> {
    let provider = build_provider(config)?;
    let session = ensure_session(config, &provider).await?;
    let store_backend: Arc<dyn DocumentStore> = Arc::new(build_store(config, &session)?);

    let mut feed = ContactFeed::subscribe(store_backend, &session.uid);
    let contacts = feed
        .next()
        .await
        .context("Conversation list subscription ended unexpectedly")?;

    println!("\nConversations:");
    println!("{:-<60}", "");

    if contacts.is_empty() {
        println!("  (none yet -- send someone a message)");
        return Ok(());
    }

    let now = store::now_millis();
    for contact in &contacts {
        println!(
            "{}  [{}]",
            contact.display_name,
            presence::presence_label(contact.last_seen, now)
        );
        println!("  ID: {}", contact.uid);
        println!("  Email: {}", contact.email);
        println!();
    }
    Ok(())
}

async fn cmd_read(config: &mut Config, peer: &str, limit: usize) -> Result<()> {
    let provider = build_provider(config)?;
    let session = ensure_session(config, &provider).await?;
    let store_backend = build_store(config, &session)?;
    let peer = resolve_peer(&store_backend, &session.uid, peer).await?;

    let mut docs = store_backend
        .query(
            "messages",
            &pair_filter(&session.uid, &peer.uid),
            Some(&OrderBy::asc("sentAt")),
        )
        .await?;
    if docs.len() > limit {
        docs.drain(..docs.len() - limit);
    }
    let transcript = Transcript::from_snapshot(&Snapshot { docs });

    if transcript.is_empty() {
        println!("(no messages)");
        return Ok(());
    }

    for row in transcript.rows() {
        match row {
            TranscriptRow::DateMarker(date) => println!("-- {} --", date_label(date)),
            TranscriptRow::Message(message) => {
                let who = if message.sender_id == session.uid {
                    "me"
                } else {
                    peer.display_name.as_str()
                };
                println!(
                    "[{}] {}: {}",
                    presence::format_clock(message.sent_at),
                    who,
                    message.text
                );
                tracing::debug!("message id {}", message.id);
            }
        }
    }
    Ok(())
}

async fn cmd_send(config: &mut Config, to: &str, message: &str) -> Result<()> {
    let provider = build_provider(config)?;
    let session = ensure_session(config, &provider).await?;
    let store_backend = build_store(config, &session)?;
    let peer = resolve_peer(&store_backend, &session.uid, to).await?;

    sync::dispatch::send_message(&store_backend, &session.uid, &peer.uid, message).await?;
    println!("Message sent.");
    Ok(())
}

async fn cmd_delete(config: &mut Config, message_id: &str) -> Result<()> {
    let provider = build_provider(config)?;
    let session = ensure_session(config, &provider).await?;
    let store_backend = build_store(config, &session)?;

    sync::dispatch::delete_message(&store_backend, message_id, &session.uid).await?;
    println!("Message deleted.");
    Ok(())
}

async fn cmd_tui(config: &mut Config) -> Result<()> {
    let provider = build_provider(config)?;
    let session = ensure_session(config, &provider).await?;
    let store_backend: Arc<dyn DocumentStore> = Arc::new(build_store(config, &session)?);
    let profile = load_profile(&*store_backend, &session).await;

    tui::run(store_backend, profile).await
}
