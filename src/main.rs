mod auth;
mod backend;
mod common;
mod config;
mod error;
mod feed;
mod roster;
mod storage;
mod ui;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use auth::{AuthService, LocalAuth};
use backend::ChatBackend;
use clap::{Parser, Subcommand};
use common::{MessageId, Session};
use config::AppConfig;
use dotenvy::dotenv;
use error::ChatError;
use feed::{FeedHandle, Scope};
use storage::{Database, MessageStore, ProfileFilter, SqliteStore};
use tokio::sync::mpsc;
use ui::ChatApp;

#[derive(Parser)]
#[command(name = "duochat", version, about = "Public and private chat client")]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Database file, overrides the config and the environment
    #[arg(long, value_name = "PATH")]
    database: Option<String>,
    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Clone, PartialEq, Eq)]
enum Mode {
    /// Print a feed to stdout (no UI) using the saved session, following
    /// messages sent from other windows until Ctrl-C
    Tail {
        /// Follow the private conversation with this user instead of the public channel
        #[arg(long, value_name = "USERNAME")]
        with: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut app_config = load_or_create_config(&cli.config).apply_env_overrides();
    if let Some(path) = cli.database {
        app_config.database_path = path;
    }
    let capacity = app_config.channel_capacity.max(1);

    let db = Arc::new(Database::open(&app_config.database_path)?);
    let store: Arc<dyn MessageStore> = Arc::new(
        SqliteStore::with_capacity(db.clone(), capacity)
            .with_poll_interval(Duration::from_millis(app_config.poll_interval_ms)),
    );
    let auth: Arc<dyn AuthService> = Arc::new(LocalAuth::new(db)?);
    log::info!("Using database {}", app_config.database_path);

    match cli.mode {
        Some(Mode::Tail { with }) => run_tail(store, auth, with).await?,
        None => run_full_client(&app_config, capacity, store, auth)?,
    }
    Ok(())
}

fn load_or_create_config(path: &str) -> AppConfig {
    if Path::new(path).exists() {
        return config::load_config(path);
    }

    let defaults = AppConfig::default();
    if let Err(err) = config::save_config(path, &defaults) {
        log::warn!("Could not write default config to {path}: {err}");
    }
    defaults
}

fn run_full_client(
    app_config: &AppConfig,
    capacity: usize,
    store: Arc<dyn MessageStore>,
    auth: Arc<dyn AuthService>,
) -> Result<(), eframe::Error> {
    // UI -> backend
    let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
    // backend -> UI
    let (event_tx, event_rx) = mpsc::channel(capacity);

    tokio::spawn(async move {
        let backend = ChatBackend::new(event_tx, cmd_rx, store, auth);
        if let Err(err) = backend.run().await {
            log::error!("Chat backend terminated: {err}");
        }
    });

    // UI chạy trên main thread
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(&app_config.window_title)
            .with_inner_size([900.0, 640.0]),
        ..Default::default()
    };

    eframe::run_native(
        &app_config.window_title,
        options,
        Box::new(move |cc| Ok(Box::new(ChatApp::new(cc, cmd_tx, event_rx)))),
    )
}

async fn run_tail(
    store: Arc<dyn MessageStore>,
    auth: Arc<dyn AuthService>,
    with: Option<String>,
) -> Result<(), ChatError> {
    let session = auth.get_session().ok_or(ChatError::AuthRequired)?;
    let scope = match with {
        None => Scope::Public,
        Some(username) => {
            let peer = store
                .select_profiles(ProfileFilter::Username(username.clone()))
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| ChatError::Validation(format!("no user named {username}")))?;
            Scope::private(session.user_id(), peer.id)
        }
    };

    let mut feed = feed::open(store, scope).await;
    if let Some(error) = &feed.state().error {
        return Err(ChatError::StoreUnavailable(error.clone()));
    }

    log::info!("Tailing {scope} feed as {}", session.user.username);
    let mut printed = HashSet::new();
    print_new_messages(&feed, &session, &mut printed);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            delivery = feed.next_delivery() => {
                let Some(delivery) = delivery else { break };
                match feed.handle(delivery).await {
                    Ok(true) => print_new_messages(&feed, &session, &mut printed),
                    Ok(false) => {}
                    Err(err) => log::warn!("Failed to apply delivery: {err}"),
                }
            }
        }
    }

    feed.close();
    Ok(())
}

fn print_new_messages(feed: &FeedHandle, session: &Session, printed: &mut HashSet<MessageId>) {
    let scope = feed.scope();
    for message in &feed.state().messages {
        if printed.insert(message.id) {
            println!(
                "[{}] {}: {}",
                ui::format_time(message.created_at),
                ui::sender_label(message, session.user_id(), &scope),
                message.content
            );
        }
    }
}
