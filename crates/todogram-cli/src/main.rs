//! Todogram CLI
//!
//! Command-line interface for the Todogram bot

mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use todogram_config::Config;
use todogram_core::{Dispatcher, PollLoop, PollSettings};
use todogram_storage::{ItemStore, SqliteStore};
use todogram_telegram::{BotIdentity, TelegramAdapter, TransportError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Parser)]
#[command(name = "todogram")]
#[command(about = "Personal todo lists over Telegram", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (overrides core.log_level, RUST_LOG wins over both)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot in the foreground until Ctrl-C
    Run,

    /// Validate config and bot token, print the bot identity
    Check,

    /// Show stored items
    Items {
        /// Only this owner's list
        #[arg(short, long)]
        owner: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            let config = load_config(cli.config.as_deref())?;
            let log_level = cli
                .log_level
                .clone()
                .or_else(|| config.core.log_level.clone())
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
            let _logging_guard = logging::init_logging(&config.log_dir(), &log_level)?;
            run_bot(config).await?;
        }

        Commands::Check => {
            let config = load_config(cli.config.as_deref())?;
            let adapter = TelegramAdapter::new(&config.telegram)?;
            let identity = verify_credential(&adapter).await?;
            println!("Config OK");
            println!("Bot: {} (id {})", identity.first_name, identity.id);
            if let Some(username) = identity.username {
                println!("Username: @{}", username);
            }
            println!("Database: {}", config.db_path().display());
        }

        Commands::Items { owner } => {
            let config = Config::resolve_offline(cli.config.as_deref())
                .context("Failed to load config")?;
            let db_path = config.db_path();
            let store = SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open {}", db_path.display()))?;
            match owner {
                Some(owner) => {
                    let items = store.list(&owner)?;
                    println!("{} ({} item(s))", owner, items.len());
                    for item in items {
                        println!("  • {}", item);
                    }
                }
                None => {
                    let owners = store.owners()?;
                    if owners.is_empty() {
                        println!("No items stored");
                    }
                    for (owner, count) in owners {
                        println!("{}: {}", owner, count);
                    }
                }
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::resolve(path).context("Failed to load config")
}

async fn verify_credential(adapter: &TelegramAdapter) -> Result<BotIdentity> {
    match adapter.get_me().await {
        Ok(identity) => Ok(identity),
        Err(TransportError::Unauthorized { status }) => {
            anyhow::bail!("Telegram rejected the bot token (HTTP {})", status)
        }
        Err(e) => Err(e).context("Failed to reach Telegram"),
    }
}

async fn run_bot(config: Config) -> Result<()> {
    let db_path = config.db_path();
    let store = Arc::new(
        SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open {}", db_path.display()))?,
    );

    let adapter = TelegramAdapter::new(&config.telegram)?;
    let identity = verify_credential(&adapter).await?;
    info!(
        "Connected as {} ({})",
        identity.first_name,
        identity.username.as_deref().unwrap_or("no username")
    );

    if let Err(e) = adapter.delete_webhook().await {
        warn!("Failed to clear webhook: {}", e);
    }
    if let Err(e) = adapter.sync_bot_commands().await {
        warn!("Failed to register bot commands: {}", e);
    }

    let mut dispatcher = Dispatcher::new(Arc::clone(&store));
    if let Some(username) = identity.username {
        dispatcher = dispatcher.with_bot_username(username);
    }

    let settings = PollSettings::from(&config.telegram);
    let mut poll = PollLoop::new(adapter, dispatcher, settings);
    if config.telegram.persist_cursor {
        let tag = format!("telegram:{}", config.telegram.account_tag());
        poll = poll.with_cursor_store(store.clone(), tag)?;
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => {
                error!("Failed to listen for Ctrl-C: {}", e);
                return;
            }
        }
        signal_token.cancel();
    });

    info!("Starting Todogram, database at {}", db_path.display());
    poll.run(shutdown)
        .await
        .context("Polling stopped on a fatal Telegram error")?;
    Ok(())
}
