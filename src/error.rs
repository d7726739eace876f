use crate::assistant::AssistantError;
use crate::config::ConfigError;
use crate::runtime::RuntimeError;
use crate::service::ServiceError;
use crate::storage::StorageError;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Runtime error: {0}")]
    RuntimeError(#[from] RuntimeError),

    #[error("Assistant error: {0}")]
    Assistant(#[from] AssistantError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Other(anyhow::Error),
}

impl From<anyhow::Error> for BotError {
    fn from(error: anyhow::Error) -> Self {
        BotError::Other(error)
    }
}

pub type BotResult<T> = Result<T, BotError>;
