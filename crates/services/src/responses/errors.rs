use crate::{
    common::InternalFailure, conversations::ConversationError,
    inference_provider_pool::InferenceError, responses::models::ResponseStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("Response not found")]
    NotFound,
    #[error("Access to this response is denied")]
    AccessDenied,
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("Response cannot move from {from} to {to}")]
    InvalidResponseTransition {
        from: ResponseStatus,
        to: ResponseStatus,
    },
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Internal(#[from] InternalFailure),
}
