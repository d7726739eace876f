use uuid::Uuid;

use crate::runtime::task::JobStatus;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("queue is full")]
    QueueFull,
    #[error("unknown job: {0}")]
    UnknownJob(Uuid),
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
    #[error("task error: {0}")]
    TaskError(String),
    #[error("other error: {0}")]
    Other(String),
}
