//! Typed async client for the Ollama REST API.
//!
//! Wraps `/api/chat` (multi-turn, NDJSON streaming), `/api/tags` (model
//! listing), and a health probe, with a typed error taxonomy so callers
//! never have to inspect transport internals.

mod client;
mod types;

pub use client::{ChatStream, OllamaClient, OllamaConfig};
pub use types::{ChatMessage, MessageRole, OllamaError};
