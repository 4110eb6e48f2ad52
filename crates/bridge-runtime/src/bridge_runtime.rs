//! Per-message control flow: gate, resolve, stream, finalize.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use anyhow::Result;
use bridge_access::{AllowList, RateLimiter};
use bridge_context::{
    build_grounding_instruction, resolve_deterministic, ContextStore, ConversationId,
    ModelOverrides,
};
use bridge_core::{format_utc_timestamp, split_message, truncate};
use bridge_ollama::{ChatMessage, OllamaClient, OllamaError};

use crate::{
    transcript::TranscriptStore,
    transport::{ChatTransport, InboundMessage, MessageHandle},
};


/// Transient reply posted immediately, then edited in place as tokens
/// arrive.
pub const THINKING_PLACEHOLDER: &str = "💭 Thinking…";

/// Final reply body when the stream completed without producing any text.
pub const NO_RESPONSE_PLACEHOLDER: &str = "*(no response)*";

/// Minimum number of new characters accumulated before the placeholder is
/// edited again during streaming.
pub const DEFAULT_STREAM_EDIT_THRESHOLD: usize = 50;

/// Pause between sequential overflow chunks, to stay under platform
/// send-rate limits.
pub const DEFAULT_INTER_CHUNK_DELAY_MS: u64 = 300;

pub struct BridgeRuntimeConfig {
    pub ollama: OllamaClient,
    pub transport: Arc<dyn ChatTransport>,
    pub allow_list: AllowList,
    pub max_context_pairs: usize,
    pub rate_limit_requests: usize,
    pub rate_limit_window_secs: u64,
    pub transcript_dir: PathBuf,
    pub stream_edit_threshold: usize,
    pub max_message_length: usize,
    pub inter_chunk_delay_ms: u64,
}

/// Top-level orchestrator: one instance per process, shared across all
/// conversations.
///
/// Every inbound event flows through [`BridgeRuntime::handle_message`],
/// which owns the full exchange lifecycle. Inference and transport failures
/// are converted to user-visible text here and never propagate to the
/// caller.
pub struct BridgeRuntime {
    ollama: OllamaClient,
    transport: Arc<dyn ChatTransport>,
    allow_list: AllowList,
    rate_limiter: RateLimiter,
    context: ContextStore,
    overrides: ModelOverrides,
    transcript: TranscriptStore,
    stream_edit_threshold: usize,
    max_message_length: usize,
    inter_chunk_delay: Duration,
    exchange_locks: Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
}

enum Command<'a> {
    Ask(&'a str),
    Reset,
    Model(Option<&'a str>),
    Models,
}

impl BridgeRuntime {
    pub fn new(config: BridgeRuntimeConfig) -> Self {
        Self {
            ollama: config.ollama,
            transport: config.transport,
            allow_list: config.allow_list,
            rate_limiter: RateLimiter::new(
                config.rate_limit_requests,
                config.rate_limit_window_secs,
            ),
            context: ContextStore::new(config.max_context_pairs),
            overrides: ModelOverrides::new(),
            transcript: TranscriptStore::new(config.transcript_dir),
            stream_edit_threshold: config.stream_edit_threshold.max(1),
            max_message_length: config.max_message_length.max(1),
            inter_chunk_delay: Duration::from_millis(config.inter_chunk_delay_ms),
            exchange_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Processes one inbound chat event end to end.
    ///
    /// Disallowed senders are dropped silently; everything after the gates
    /// resolves to user-visible text, so this only errs on internal bugs.
    pub async fn handle_message(&self, inbound: InboundMessage) -> Result<()> {
        let conversation = inbound.conversation_id;
        let channel_key = conversation.to_string();
        if !self
            .allow_list
            .is_channel_allowed(&channel_key, inbound.is_direct_message)
        {
            return Ok(());
        }
        if !self
            .allow_list
            .is_user_allowed(&inbound.user_id, inbound.user_is_bot)
        {
            return Ok(());
        }

        let content = inbound.content.trim();
        if content.is_empty() {
            return Ok(());
        }

        if content.starts_with('!') {
            // Unknown commands are dropped silently; never forwarded to the
            // model.
            if let Some(command) = parse_command(content) {
                self.handle_command(conversation, command).await;
            }
            return Ok(());
        }

        if !self.rate_limiter.is_allowed(&inbound.user_id) {
            let wait = self.rate_limiter.retry_after(&inbound.user_id);
            let notice = format!(
                "You're sending requests too quickly. Try again in {} seconds.",
                wait.as_secs().max(1)
            );
            self.send_text(conversation, &notice).await;
            return Ok(());
        }

        // One in-flight exchange per conversation; concurrent messages for
        // the same conversation queue here.
        let exchange_lock = self.exchange_lock(conversation);
        let _exchange = exchange_lock.lock().await;

        self.run_exchange(conversation, content).await;
        Ok(())
    }

    async fn run_exchange(&self, conversation: ConversationId, content: &str) {
        tracing::debug!(
            conversation,
            preview = %truncate(content, 80, "…"),
            "handling chat message"
        );
        let history = self.context.history(conversation);
        let last_reset_at = self.context.last_reset_at(conversation);
        if let Some(answer) = resolve_deterministic(
            &history,
            last_reset_at,
            self.context.max_pairs(),
            content,
        ) {
            tracing::debug!(conversation, "answered deterministically from stored state");
            self.send_text(conversation, &answer).await;
            return;
        }

        self.context
            .append(conversation, ChatMessage::user(content));
        self.transcript.enqueue(conversation, "user", content);

        let handle = match self
            .transport
            .send_message(conversation, THINKING_PLACEHOLDER)
            .await
        {
            Ok(handle) => handle,
            Err(error) => {
                tracing::warn!(%error, conversation, "failed to send placeholder; dropping turn");
                self.context.pop_last(conversation);
                return;
            }
        };

        let history = self.context.history(conversation);
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(build_grounding_instruction(
            self.context.max_pairs(),
            history.len(),
            last_reset_at,
        )));
        messages.extend(history);
        let model = self.overrides.get(conversation);

        let mut stream = match self.ollama.chat_stream(&messages, model.as_deref()).await {
            Ok(stream) => stream,
            Err(error) => {
                self.abort_exchange(conversation, &handle, &error).await;
                return;
            }
        };

        let mut accumulated = String::new();
        let mut accumulated_chars = 0usize;
        let mut flushed_chars = 0usize;
        loop {
            match stream.next_token().await {
                Ok(Some(token)) => {
                    accumulated_chars += token.chars().count();
                    accumulated.push_str(&token);
                    if accumulated_chars - flushed_chars >= self.stream_edit_threshold {
                        let preview = split_message(&accumulated, self.max_message_length);
                        // Edit failures are non-fatal; the preview is best
                        // effort and the final flush will try again.
                        if self.transport.edit_message(&handle, &preview[0]).await.is_ok() {
                            flushed_chars = accumulated_chars;
                        }
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    self.abort_exchange(conversation, &handle, &error).await;
                    return;
                }
            }
        }

        let final_text = if accumulated.is_empty() {
            NO_RESPONSE_PLACEHOLDER.to_string()
        } else {
            accumulated
        };
        let chunks = split_message(&final_text, self.max_message_length);
        if let Err(error) = self.transport.edit_message(&handle, &chunks[0]).await {
            tracing::warn!(%error, conversation, "failed to finalize streamed reply");
        }
        for chunk in &chunks[1..] {
            tokio::time::sleep(self.inter_chunk_delay).await;
            if let Err(error) = self.transport.send_message(conversation, chunk).await {
                tracing::warn!(%error, conversation, "failed to send overflow chunk");
            }
        }

        self.context
            .append(conversation, ChatMessage::assistant(final_text.clone()));
        self.transcript.enqueue(conversation, "assistant", &final_text);
    }

    /// History never records an unanswered user turn: surface the error in
    /// place of the placeholder, then roll back the append.
    async fn abort_exchange(
        &self,
        conversation: ConversationId,
        handle: &MessageHandle,
        error: &OllamaError,
    ) {
        tracing::error!(%error, conversation, "inference failed; rolling back user turn");
        let notice = format!(
            "**Ollama error:** {error}\nMake sure Ollama is running and the model is available."
        );
        if let Err(edit_error) = self.transport.edit_message(handle, &notice).await {
            tracing::warn!(%edit_error, conversation, "failed to surface inference error");
        }
        self.context.pop_last(conversation);
    }

    async fn handle_command(&self, conversation: ConversationId, command: Command<'_>) {
        match command {
            Command::Ask(prompt) => self.handle_ask(conversation, prompt).await,
            Command::Reset => {
                // Reset mutates history, so it must wait for any in-flight
                // exchange; otherwise that exchange's final append or
                // rollback would land in the post-reset buffer.
                let reset_at = {
                    let exchange_lock = self.exchange_lock(conversation);
                    let _exchange = exchange_lock.lock().await;
                    self.context.reset(conversation)
                };
                let reply = format!(
                    "History cleared at {}; nothing retained.",
                    format_utc_timestamp(reset_at)
                );
                self.send_text(conversation, &reply).await;
            }
            Command::Model(None) => {
                let model = self
                    .overrides
                    .get(conversation)
                    .unwrap_or_else(|| self.ollama.default_model().to_string());
                self.send_text(conversation, &format!("Current model: `{model}`"))
                    .await;
            }
            Command::Model(Some(name)) => {
                self.overrides.set(conversation, name.to_string());
                self.send_text(
                    conversation,
                    &format!("Model for this channel set to `{name}`."),
                )
                .await;
            }
            Command::Models => {
                let reply = match self.ollama.list_models().await {
                    Ok(models) if models.is_empty() => {
                        "No models installed on the Ollama server.".to_string()
                    }
                    Ok(models) => {
                        let mut text = String::from("Available models:");
                        for model in models {
                            text.push_str("\n- ");
                            text.push_str(&model);
                        }
                        text
                    }
                    Err(error) => {
                        tracing::warn!(%error, conversation, "model listing failed");
                        format!("**Ollama error:** {error}")
                    }
                };
                self.send_text(conversation, &reply).await;
            }
        }
    }

    /// One-shot question: grounded like a normal exchange but never reads
    /// past the grounding counters and never mutates history.
    async fn handle_ask(&self, conversation: ConversationId, prompt: &str) {
        if prompt.is_empty() {
            self.send_text(conversation, "Usage: `!ask <prompt>`").await;
            return;
        }

        let history = self.context.history(conversation);
        let last_reset_at = self.context.last_reset_at(conversation);
        if let Some(answer) =
            resolve_deterministic(&history, last_reset_at, self.context.max_pairs(), prompt)
        {
            self.send_text(conversation, &answer).await;
            return;
        }

        let messages = vec![
            ChatMessage::system(build_grounding_instruction(
                self.context.max_pairs(),
                history.len(),
                last_reset_at,
            )),
            ChatMessage::user(prompt),
        ];
        let model = self.overrides.get(conversation);
        let reply = match self.ollama.chat(&messages, model.as_deref()).await {
            Ok(text) if text.is_empty() => NO_RESPONSE_PLACEHOLDER.to_string(),
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(%error, conversation, "one-shot ask failed");
                format!(
                    "**Ollama error:** {error}\nMake sure Ollama is running and the model is available."
                )
            }
        };
        self.send_text(conversation, &reply).await;
    }

    /// Chunks `text` and sends the pieces in order. Delivery failures are
    /// logged and stop the sequence; nothing propagates.
    async fn send_text(&self, conversation: ConversationId, text: &str) {
        let chunks = split_message(text, self.max_message_length);
        for (index, chunk) in chunks.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.inter_chunk_delay).await;
            }
            if let Err(error) = self.transport.send_message(conversation, chunk).await {
                tracing::warn!(%error, conversation, "failed to send message");
                return;
            }
        }
    }

    fn exchange_lock(&self, conversation: ConversationId) -> Arc<tokio::sync::Mutex<()>> {
        lock_unpoisoned(&self.exchange_locks)
            .entry(conversation)
            .or_default()
            .clone()
    }
}

fn parse_command(content: &str) -> Option<Command<'_>> {
    let stripped = content.strip_prefix('!')?;
    let (name, rest) = match stripped.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (stripped, ""),
    };
    match name {
        "ask" => Some(Command::Ask(rest)),
        "reset" => Some(Command::Reset),
        "model" => Some(Command::Model(if rest.is_empty() { None } else { Some(rest) })),
        "models" => Some(Command::Models),
        _ => {
            tracing::debug!(command = name, "ignoring unknown command");
            None
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
