use crate::common::InternalFailure;

#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("Conversation not found")]
    NotFound,
    #[error("Conversation item not found")]
    ItemNotFound,
    #[error("Access to this conversation is denied")]
    AccessDenied,
    #[error("Invalid parameters: {0}")]
    InvalidRequest(String),
    #[error("Only {written} items were stored before the batch failed: {message}")]
    PartialWrite { written: usize, message: String },
    #[error(transparent)]
    Internal(#[from] InternalFailure),
}
