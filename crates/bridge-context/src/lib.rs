//! Per-conversation context: bounded message history, reset markers,
//! deterministic memory-grounding answers, and the grounding instruction
//! injected into every inference call.

mod grounding;
mod resolver;
mod store;

pub use grounding::build_grounding_instruction;
pub use resolver::{resolve_deterministic, NO_RESET_MARKER_REPLY};
pub use store::{ContextStore, ConversationId, ModelOverrides};
