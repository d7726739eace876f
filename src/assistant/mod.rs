use async_trait::async_trait;

use crate::model::drug::DrugContent;

#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("Assistant unavailable: {0}")]
    Unavailable(String),
    #[error("Assistant returned an unusable response: {0}")]
    BadResponse(String),
}

#[derive(Debug, Clone)]
pub struct QueryValidation {
    pub exists: bool,
    /// Resolved substance name when `exists` is true.
    pub canonical_name: Option<String>,
}

/// LLM assistant boundary. Both calls are slow and fallible; the job queue
/// exists to bound how many `generate_drug_content` calls run per substance.
#[async_trait]
pub trait AssistantClient: Send + Sync + 'static {
    async fn validate_query(&self, text: &str) -> Result<QueryValidation, AssistantError>;
    async fn generate_drug_content(&self, canonical_name: &str) -> Result<DrugContent, AssistantError>;
}
