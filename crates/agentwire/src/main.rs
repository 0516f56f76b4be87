//! AgentWire - real-time agent event streaming

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;
mod server;

use commands::{chat_command, init_command, replay_command, serve_command};

/// AgentWire - stream agent execution to the terminal
#[derive(Parser)]
#[command(name = "agentwire")]
#[command(about = "◆ Real-time agent event streaming")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config and chat store
    Init,
    /// Start the streaming server
    Serve {
        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Chat with a running server
    Chat {
        /// Message to send
        #[arg(short, long)]
        message: Option<String>,
        /// Chat ID
        #[arg(short, long, default_value = "default")]
        chat: String,
    },
    /// Reconstruct a captured event stream
    Replay {
        /// File holding the raw stream bytes
        file: PathBuf,
        /// Bytes fed to the parser per read
        #[arg(long, default_value_t = 4096)]
        chunk_size: usize,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { verbose: true } => "debug",
        Commands::Serve { verbose: false } => "info",
        _ => "warn",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => {
            if let Err(e) = init_command().await {
                error!("Init failed: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Serve { verbose: _ } => {
            if let Err(e) = serve_command().await {
                error!("Serve failed: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Chat { message, chat } => {
            if let Err(e) = chat_command(message, chat).await {
                error!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Replay { file, chunk_size } => {
            if let Err(e) = replay_command(file, chunk_size).await {
                error!("Replay failed: {:#}", e);
                std::process::exit(1);
            }
        }
    }
}
