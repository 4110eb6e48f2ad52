//! Local console front-end for the Ollama chat bridge.
//!
//! Drives the full runtime from stdin: every line is conversation 0 from
//! user `local`, streamed previews render in place, and all the gating,
//! context, and transcript machinery behaves exactly as it would behind a
//! real chat platform adapter.

use std::{
    collections::HashMap,
    io::Write as _,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bridge_access::AllowList;
use bridge_core::DEFAULT_MAX_MESSAGE_LENGTH;
use bridge_ollama::{OllamaClient, OllamaConfig};
use bridge_runtime::{
    BridgeRuntime, BridgeRuntimeConfig, ChatTransport, InboundMessage, MessageHandle,
    DEFAULT_INTER_CHUNK_DELAY_MS, DEFAULT_STREAM_EDIT_THRESHOLD,
};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

const CONSOLE_CONVERSATION_ID: u64 = 0;
const CONSOLE_USER_ID: &str = "local";

#[derive(Debug, Parser)]
#[command(name = "bridge-cli", about = "Console bridge to a local Ollama server", version)]
struct Settings {
    #[arg(
        long = "ollama-host",
        env = "OLLAMA_HOST",
        default_value = "http://localhost:11434",
        help = "Base URL of the Ollama server"
    )]
    ollama_host: String,

    #[arg(
        long,
        env = "OLLAMA_MODEL",
        default_value = "llama3",
        help = "Default model for chat completions"
    )]
    model: String,

    #[arg(
        long = "timeout-secs",
        env = "OLLAMA_TIMEOUT",
        default_value_t = 120,
        help = "Request timeout in seconds, including streaming reads"
    )]
    timeout_secs: u64,

    #[arg(
        long = "max-context-pairs",
        env = "MAX_CONTEXT_PAIRS",
        default_value_t = 10,
        help = "Retained user+assistant pairs per conversation"
    )]
    max_context_pairs: usize,

    #[arg(
        long = "rate-limit-requests",
        env = "RATE_LIMIT_REQUESTS",
        default_value_t = 5,
        help = "Requests allowed per user within the rate-limit window"
    )]
    rate_limit_requests: usize,

    #[arg(
        long = "rate-limit-window-secs",
        env = "RATE_LIMIT_WINDOW",
        default_value_t = 60,
        help = "Rate-limit window length in seconds"
    )]
    rate_limit_window_secs: u64,

    #[arg(
        long = "allowed-channel-ids",
        env = "ALLOWED_CHANNEL_IDS",
        default_value = "",
        help = "Comma-separated channel id allow-list; empty allows all"
    )]
    allowed_channel_ids: String,

    #[arg(
        long = "allowed-user-ids",
        env = "ALLOWED_USER_IDS",
        default_value = "",
        help = "Comma-separated user id allow-list; empty allows all"
    )]
    allowed_user_ids: String,

    #[arg(
        long = "transcript-dir",
        env = "TRANSCRIPT_DIR",
        default_value = "transcripts",
        help = "Directory for append-only per-conversation transcript logs"
    )]
    transcript_dir: PathBuf,
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

/// Renders runtime sends and edits on stdout. In-place edits print only
/// the appended suffix when the new text extends the last rendered text,
/// so streamed previews appear as continuous output.
#[derive(Default)]
struct ConsoleTransport {
    next_message_id: AtomicU64,
    rendered: Mutex<HashMap<u64, String>>,
}

impl ConsoleTransport {
    fn print_flush(text: &str) {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}

#[async_trait]
impl ChatTransport for ConsoleTransport {
    async fn send_message(&self, conversation: u64, text: &str) -> Result<MessageHandle> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        Self::print_flush(&format!("{text}\n"));
        lock_unpoisoned(&self.rendered).insert(message_id, text.to_string());
        Ok(MessageHandle {
            conversation_id: conversation,
            message_id,
        })
    }

    async fn edit_message(&self, handle: &MessageHandle, text: &str) -> Result<()> {
        let mut rendered = lock_unpoisoned(&self.rendered);
        let previous = rendered
            .get(&handle.message_id)
            .cloned()
            .unwrap_or_default();
        match text.strip_prefix(previous.as_str()) {
            Some(suffix) if !previous.is_empty() => Self::print_flush(suffix),
            _ => Self::print_flush(&format!("\n{text}")),
        }
        rendered.insert(handle.message_id, text.to_string());
        Ok(())
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn run(settings: Settings) -> Result<()> {
    let ollama = OllamaClient::new(OllamaConfig {
        host: settings.ollama_host.clone(),
        default_model: settings.model.clone(),
        request_timeout_secs: settings.timeout_secs,
    })
    .context("failed to build ollama client")?;

    if ollama.is_available().await {
        tracing::info!(host = %ollama.host(), model = %settings.model, "connected to ollama");
    } else {
        tracing::warn!(
            host = %ollama.host(),
            "ollama server is not reachable; requests will fail until it comes up"
        );
    }

    let runtime = BridgeRuntime::new(BridgeRuntimeConfig {
        ollama,
        transport: Arc::new(ConsoleTransport::default()),
        allow_list: AllowList::from_env_lists(
            &settings.allowed_channel_ids,
            &settings.allowed_user_ids,
        ),
        max_context_pairs: settings.max_context_pairs,
        rate_limit_requests: settings.rate_limit_requests,
        rate_limit_window_secs: settings.rate_limit_window_secs,
        transcript_dir: settings.transcript_dir,
        stream_edit_threshold: DEFAULT_STREAM_EDIT_THRESHOLD,
        max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        inter_chunk_delay_ms: DEFAULT_INTER_CHUNK_DELAY_MS,
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        ConsoleTransport::print_flush("> ");
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        runtime
            .handle_message(InboundMessage {
                conversation_id: CONSOLE_CONVERSATION_ID,
                user_id: CONSOLE_USER_ID.to_string(),
                user_is_bot: false,
                is_direct_message: true,
                content: line,
            })
            .await?;
    }

    tracing::info!("shutting down");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let settings = Settings::parse();
    run(settings).await
}
