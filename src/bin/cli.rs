//! CLI binary for colloquy.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use colloquy::backend::OpenAiBackend;
use colloquy::reaction::{PronunciationSpeaker, ShellRunner, SpeechOutcome, SpeechSink};
use colloquy::{ColloquyConfig, ConversationCoordinator, DialogueTurn};
use tokio::io::AsyncBufReadExt;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Delay between printed characters, so new input can interrupt speech.
const TYPE_DELAY: Duration = Duration::from_millis(12);

/// Colloquy: streaming conversational core in the terminal.
#[derive(Parser)]
#[command(name = "colloquy", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Chat from stdin; each new line interrupts the reply in progress.
    Chat,

    /// Write the default configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let path = cli
        .config
        .clone()
        .unwrap_or_else(ColloquyConfig::default_config_path);

    match cli.command.unwrap_or(Command::Chat) {
        Command::InitConfig { force } => init_config(&path, force),
        Command::Chat => {
            let config = load_config(&path, cli.config.is_some())?;
            // RUST_LOG wins over the configured filter.
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
                )
                .with_writer(std::io::stderr)
                .init();
            run_chat(config).await
        }
    }
}

/// Load `path`; a missing default path falls back to built-in defaults.
fn load_config(path: &Path, explicit: bool) -> anyhow::Result<ColloquyConfig> {
    if explicit || path.exists() {
        ColloquyConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))
    } else {
        Ok(ColloquyConfig::default())
    }
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    ColloquyConfig::default()
        .save_to_file(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

async fn run_chat(config: ColloquyConfig) -> anyhow::Result<()> {
    println!("Colloquy v{}", env!("CARGO_PKG_VERSION"));

    let backend = Arc::new(OpenAiBackend::new(&config.backend)?);
    let speaker = Arc::new(PronunciationSpeaker::from_config(
        TerminalSink,
        &config.speech,
    )?);
    let runner = Arc::new(ShellRunner::new(&config.execution));
    let coordinator = Arc::new(ConversationCoordinator::new(
        config.conversation.clone(),
        backend,
        speaker,
        runner,
    ));

    // Handle Ctrl+C
    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            shutdown_clone.cancel();
        }
    });

    if !config.execution.enabled {
        println!("Code execution is disabled; enable [execution] in the config to run code.");
    }
    println!("\nReady! Type a message and press Enter. Ctrl+C or Ctrl+D to quit.\n");

    let mut lines = LinesStream::new(tokio::io::BufReader::new(tokio::io::stdin()).lines());
    let mut in_flight: Option<tokio::task::JoinHandle<()>> = None;

    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => {
                coordinator.cancel_active();
                break;
            }
            line = lines.next() => line,
        };
        let Some(line) = line else { break };
        let line = line?;
        let line = line.trim().to_owned();
        if line.is_empty() {
            continue;
        }

        let coordinator = Arc::clone(&coordinator);
        in_flight = Some(tokio::spawn(async move {
            match coordinator.submit(&line, true).await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!(code = e.code(), "conversation failed: {e}"),
            }
        }));
    }

    // Let the last reply finish after stdin closes.
    if let Some(handle) = in_flight
        && !shutdown.is_cancelled()
    {
        tokio::select! {
            () = shutdown.cancelled() => coordinator.cancel_active(),
            _ = handle => {}
        }
    }

    Ok(())
}

/// Prints dialogue character by character, stopping when interrupted.
struct TerminalSink;

#[async_trait]
impl SpeechSink for TerminalSink {
    async fn say(
        &self,
        turn: &DialogueTurn,
        text: &str,
        cancel: CancellationToken,
    ) -> colloquy::Result<SpeechOutcome> {
        let mut out = std::io::stdout();
        match &turn.mood {
            Some(mood) => write!(out, "{} [{mood}]: ", turn.speaker)?,
            None => write!(out, "{}: ", turn.speaker)?,
        }

        for (spoken_chars, c) in text.chars().enumerate() {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    writeln!(out, " ...")?;
                    return Ok(SpeechOutcome::Interrupted { spoken_chars });
                }
                () = tokio::time::sleep(TYPE_DELAY) => {}
            }
            write!(out, "{c}")?;
            out.flush()?;
        }
        writeln!(out)?;
        Ok(SpeechOutcome::Completed)
    }
}
