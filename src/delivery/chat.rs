use async_trait::async_trait;
use thiserror::Error;

use crate::reminder::ReminderId;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Invalid chat id {0:?}")]
    InvalidId(String),

    #[error(transparent)]
    Telegram(#[from] teloxide::RequestError),

    #[error("Chat platform rejected the message: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub mention_role: Option<String>,
    /// Attach a control that lets the recipient snooze this reminder.
    pub snooze_action: Option<ReminderId>,
}

/// Outbound surface of the chat platform.
#[async_trait]
pub trait ChatClient: Send + Sync + 'static {
    /// Returns the id of the private channel with `user_id`, opening it if needed.
    async fn open_private_channel(&self, user_id: &str) -> Result<String, ChatError>;

    async fn send_message(&self, channel_id: &str, message: OutgoingMessage)
    -> Result<(), ChatError>;
}
