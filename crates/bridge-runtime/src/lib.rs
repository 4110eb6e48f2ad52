//! Bridge runtime that routes chat events to Ollama and streams responses
//! back to the chat surface.
//!
//! The chat platform itself stays behind the narrow [`ChatTransport`]
//! interface; this crate owns the per-message control flow: permission and
//! rate-limit gating, deterministic resolution, history mutation with
//! rollback, the incremental edit/flush protocol, and transcript logging.

mod bridge_runtime;
mod transcript;
mod transport;

pub use bridge_runtime::{
    BridgeRuntime, BridgeRuntimeConfig, DEFAULT_INTER_CHUNK_DELAY_MS,
    DEFAULT_STREAM_EDIT_THRESHOLD, NO_RESPONSE_PLACEHOLDER, THINKING_PLACEHOLDER,
};
pub use transcript::TranscriptStore;
pub use transport::{ChatTransport, InboundMessage, MessageHandle};
