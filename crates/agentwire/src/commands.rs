//! AgentWire command implementations

use anyhow::{Context, Result};
use futures::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use agentwire_client::{failure_block, ChatSession, Reconciler, StreamClient, Transition, TurnOutcome};
use agentwire_config::{self, Config};
use agentwire_engine::{AgentEngine, EchoEngine, ScriptedEngine};
use agentwire_protocol::decode_stream;
use agentwire_session::FileMessageStore;
use agentwire_stream::{ChatPipeline, EventNormalizer};

use crate::server::{self, AppState};

/// Initialize config and chat store
pub async fn init_command() -> Result<()> {
    println!("◆ Initializing AgentWire...");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = agentwire_config::init().await?;

    println!("\n◆ AgentWire initialized");
    println!("  Config: {}", agentwire_config::config_path().display());
    println!("  Chats:  {}", config.store_dir().display());
    println!("\nNext steps:");
    println!("  1. Start the server: agentwire serve");
    println!("  2. Start chatting:   agentwire chat -m \"Hello!\"");

    Ok(())
}

async fn build_engine(config: &Config) -> Result<Arc<dyn AgentEngine>> {
    match config.script_path() {
        Some(path) => {
            let engine = ScriptedEngine::load_from(&path)
                .await
                .with_context(|| format!("Failed to load trace script {}", path.display()))?
                .with_step_delay(config.step_delay());
            info!("◆ Replaying {} scripted steps", engine.steps().len());
            Ok(Arc::new(engine))
        }
        None => {
            info!("◆ No trace script configured, using echo engine");
            Ok(Arc::new(EchoEngine::new().with_step_delay(config.step_delay())))
        }
    }
}

/// Start the streaming server
pub async fn serve_command() -> Result<()> {
    println!("◆ Starting AgentWire server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = Config::load().await?;
    let engine = build_engine(&config).await?;
    let normalizer = EventNormalizer::new(
        config.stream.top_level_agent.clone(),
        config.stream.default_tool_name.clone(),
    );
    let store = FileMessageStore::with_max_messages(config.store_dir(), config.store.max_messages);
    debug!("Chat store at {:?}", store.dir());

    if !config.auth_required() {
        warn!("◆ NO AUTH TOKENS CONFIGURED, ACCEPTING ALL REQUESTS");
    }

    let state = AppState::new(
        ChatPipeline::new(engine, normalizer),
        Arc::new(store),
        config.auth.tokens.clone(),
        config.server.channel_capacity,
    );

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("◆ Listening on {}", addr);
    println!("◆ Listening on http://{}", addr);
    println!("Press Ctrl+C to stop");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("◆ Failed to listen for shutdown signal: {}", e);
            }
            info!("◆ Shutdown signal received");
        })
        .await?;

    println!("◆ Server shutdown complete");
    Ok(())
}

/// Length of the longest common prefix, on a char boundary
pub(crate) fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, x), y)| x != y)
        .map(|((idx, _), _)| idx)
        .unwrap_or_else(|| a.len().min(b.len()))
}

/// Prints only what changed since the previous render
struct LivePrinter<W: Write> {
    out: W,
    shown: String,
    failure: Option<std::io::Error>,
}

impl<W: Write> LivePrinter<W> {
    fn new(out: W) -> Self {
        Self {
            out,
            shown: String::new(),
            failure: None,
        }
    }

    fn update(&mut self, text: &str) {
        if self.failure.is_some() {
            return;
        }
        if let Err(e) = self.write_diff(text) {
            self.failure = Some(e);
        }
    }

    fn write_diff(&mut self, text: &str) -> std::io::Result<()> {
        let common = common_prefix_len(&self.shown, text);
        if common < self.shown.len() {
            write!(self.out, "\n{}", &text[common..])?;
        } else {
            write!(self.out, "{}", &text[common..])?;
        }
        self.out.flush()?;
        self.shown = text.to_string();
        Ok(())
    }

    /// First write error, if any
    fn finish(self) -> std::io::Result<W> {
        match self.failure {
            Some(e) => Err(e),
            None => Ok(self.out),
        }
    }
}

async fn run_turn(session: &mut ChatSession, client: &StreamClient, input: &str) -> Result<()> {
    let turn = session.submit(input)?;

    let outcome = match client.open(&turn.request).await {
        Ok(body) => {
            let mut printer = LivePrinter::new(std::io::stdout());
            let outcome = session.consume(turn, body, |text| printer.update(text)).await;
            printer.finish().context("Failed to write to terminal")?;
            outcome
        }
        Err(e) => session.abort(turn, e.to_string()),
    };

    match outcome {
        TurnOutcome::Completed { .. } => println!("\n"),
        TurnOutcome::Failed { display, .. } => println!("\n{}\n", display),
    }
    Ok(())
}

/// Chat with a running server
pub async fn chat_command(message: Option<String>, chat_id: String) -> Result<()> {
    let config = Config::load().await?;
    let store = FileMessageStore::with_max_messages(config.store_dir(), config.store.max_messages);
    let client = StreamClient::new(config.client.endpoint.clone(), config.client_token());

    let mut session = ChatSession::load(chat_id, Arc::new(store)).await?;

    if let Some(msg) = message {
        run_turn(&mut session, &client, &msg).await?;
    } else {
        println!("◆ Interactive mode (type 'exit' to quit)");
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        loop {
            print!("◆ ");
            std::io::stdout().flush()?;

            let mut input = String::new();
            if std::io::stdin().read_line(&mut input)? == 0 {
                break;
            }

            let input = input.trim();
            if input.is_empty() {
                continue;
            }
            if input == "exit" || input == "quit" {
                break;
            }

            run_turn(&mut session, &client, input).await?;
        }
    }

    Ok(())
}

/// Reconstruct a captured stream offline
pub async fn replay_command(file: PathBuf, chunk_size: usize) -> Result<()> {
    let text = replay_file(&file, chunk_size).await?;
    println!("{}", text);
    Ok(())
}

/// Final text of a captured stream, read `chunk_size` bytes at a time
pub(crate) async fn replay_file(file: &Path, chunk_size: usize) -> Result<String> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let chunks: Vec<std::result::Result<Vec<u8>, std::io::Error>> = bytes
        .chunks(chunk_size.max(1))
        .map(|c| Ok(c.to_vec()))
        .collect();
    let frames = decode_stream(futures::stream::iter(chunks));
    futures::pin_mut!(frames);

    let mut reconciler = Reconciler::new();
    while let Some(frame) = frames.next().await {
        let frame = frame.context("Captured stream is malformed")?;
        match reconciler.apply(frame)? {
            Transition::Completed { text } => return Ok(text),
            Transition::Failed { message } => return Ok(failure_block(&message)),
            Transition::Connected | Transition::Updated => {}
        }
    }

    anyhow::bail!(
        "Stream ended before completion; partial response:\n{}",
        reconciler.render()
    )
}
