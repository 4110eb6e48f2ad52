use anyhow::Result;
use async_trait::async_trait;
use bridge_context::ConversationId;

/// Reference to a message previously sent through the transport, used to
/// edit it in place during streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub conversation_id: ConversationId,
    pub message_id: u64,
}

/// One inbound chat event, normalized by the platform adapter.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub conversation_id: ConversationId,
    pub user_id: String,
    pub user_is_bot: bool,
    pub is_direct_message: bool,
    pub content: String,
}

#[async_trait]
/// Narrow interface to the chat platform: send and in-place edit.
///
/// Implementations are expected to enforce their own wire-level retry and
/// rate-limit policies; the runtime treats failures as delivery errors.
pub trait ChatTransport: Send + Sync {
    async fn send_message(
        &self,
        conversation: ConversationId,
        text: &str,
    ) -> Result<MessageHandle>;

    async fn edit_message(&self, handle: &MessageHandle, text: &str) -> Result<()>;
}
