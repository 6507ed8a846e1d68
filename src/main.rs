use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

mod client;
mod controller;
mod repl;
mod server;
mod session;
mod settings;
mod typing;

use client::{ChatBackend, HttpChatBackend};
use controller::ConversationController;
use settings::{resolve_client_settings, ClientSettings, SettingsLayer};

#[derive(Debug, Parser)]
#[command(name = "news_chat")]
#[command(about = "Terminal chat client for a news question-answering service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct ClientArgs {
    /// Service base URL (overrides CHAT_API_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,
    /// Pause between revealed characters, in milliseconds
    #[arg(long)]
    typing_pause_ms: Option<u64>,
    /// Per-request timeout in seconds; unset or 0 waits indefinitely
    #[arg(long)]
    request_timeout_secs: Option<u64>,
}

impl ClientArgs {
    fn settings(&self) -> anyhow::Result<ClientSettings> {
        let cli = SettingsLayer {
            base_url: self.base_url.clone(),
            typing_pause_ms: self.typing_pause_ms,
            request_timeout_secs: self.request_timeout_secs,
        };
        Ok(resolve_client_settings(&SettingsLayer::defaults(), &SettingsLayer::from_env()?, &cli)?)
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Interactive chat session
    Chat {
        #[command(flatten)]
        client: ClientArgs,
    },
    /// Check whether the service answers
    Health {
        #[command(flatten)]
        client: ClientArgs,
    },
    /// Run an in-memory stand-in for the service
    Stub {
        #[arg(long, default_value = "127.0.0.1:8186")]
        listen: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Chat { client } => {
            let settings = client.settings()?;
            tracing::info!(base_url = %settings.base_url, "starting chat");
            let backend = Arc::new(HttpChatBackend::new(&settings)?);
            let ctrl = Arc::new(ConversationController::new(backend, settings.typing_pause));
            repl::Repl::new(ctrl).run().await?;
        }
        Commands::Health { client } => {
            let settings = client.settings()?;
            let backend = HttpChatBackend::new(&settings)?;
            match backend.health_check().await {
                Ok(()) => println!("● Connected to {}", backend.base_url()),
                Err(e) => {
                    println!("○ Offline: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Stub { listen } => {
            let addr: SocketAddr = listen.parse()?;
            let state = server::AppState::default();
            server::serve(addr, state).await?;
        }
    }
    Ok(())
}
