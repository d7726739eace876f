use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The user blocked the bot. Callers must treat this as a delivery
    /// problem, never as a failure of the business operation.
    #[error("User blocked the bot")]
    Blocked,
    #[error("Transport API error: {0}")]
    Api(String),
}

/// Telegram-like messaging boundary, fire-and-forget from the core's view.
/// `send_message` returns the transport's message id so a progress message
/// can later be edited in place.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send_message(&self, telegram_user_id: u64, text: &str) -> Result<i32, TransportError>;
    async fn edit_message(&self, telegram_user_id: u64, message_id: i32, text: &str)
        -> Result<(), TransportError>;
}
