use crate::{
    middleware::RequestContext,
    models::{ErrorDetail, ErrorResponse, ListQuery},
    routes::api::AppState,
};
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, FromRequest},
    http::{
        header::{ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONNECTION, CONTENT_TYPE},
        StatusCode,
    },
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use services::{
    auth::{ApiKeyError, AuthError},
    common::{InternalFailure, Pagination, SortOrder, DEFAULT_PAGE_LIMIT},
    completions::{ByteStream, ConvCompletionError},
    conversations::ConversationError,
    id_prefixes::validate_id_format,
    inference_provider_pool::InferenceError,
    organization::OrganizationError,
    projects::ProjectError,
    providers::{ProviderError, ProviderSelection},
    responses::ResponseError,
};
use std::time::Duration;
use tracing::{error, warn};

/// An HTTP error rendered as `{"error": {message, type, param, code}}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, error_type: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse::new(message.into(), error_type.to_string()),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request_error", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "authentication_error", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "permission_error", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found_error", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict_error", message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "upstream_error", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, "timeout_error", message)
    }

    pub fn internal(failure: &InternalFailure) -> Self {
        error!(code = failure.code, error = %failure.message, "Internal failure");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            failure.message.clone(),
        )
        .with_code(failure.code)
    }

    pub fn with_param(mut self, param: &str) -> Self {
        self.body.error.param = Some(param.to_string());
        self
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.body.error.code = Some(code.to_string());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn detail(&self) -> &ErrorDetail {
        &self.body.error
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, axum::Json(self.body)).into_response()
    }
}

/// `axum::Json` whose body rejections render in the error envelope.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct Json<T>(pub T);

impl<T> IntoResponse for Json<T>
where
    axum::Json<T>: IntoResponse,
{
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::invalid_request(rejection.body_text())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingCredentials => ApiError::unauthorized(e.to_string()),
            AuthError::InvalidToken(_) => {
                ApiError::unauthorized(e.to_string()).with_code("invalid_token")
            }
            AuthError::InvalidApiKey => {
                ApiError::unauthorized(e.to_string()).with_code("invalid_api_key")
            }
            AuthError::UserNotRegistered => {
                ApiError::unauthorized(e.to_string()).with_code("user_not_registered")
            }
            AuthError::UserDisabled => ApiError::forbidden(e.to_string()),
            AuthError::Internal(failure) => ApiError::internal(&failure),
        }
    }
}

impl From<ApiKeyError> for ApiError {
    fn from(e: ApiKeyError) -> Self {
        match e {
            ApiKeyError::NotFound => ApiError::not_found(e.to_string()),
            ApiKeyError::InvalidRequest(_) => ApiError::invalid_request(e.to_string()),
            ApiKeyError::Internal(failure) => ApiError::internal(&failure),
        }
    }
}

impl From<OrganizationError> for ApiError {
    fn from(e: OrganizationError) -> Self {
        match e {
            OrganizationError::NotFound | OrganizationError::UserNotFound(_) => {
                ApiError::not_found(e.to_string())
            }
            OrganizationError::NotMember | OrganizationError::Forbidden => {
                ApiError::forbidden(e.to_string())
            }
            OrganizationError::AlreadyMember => ApiError::conflict(e.to_string()),
            OrganizationError::InvalidRequest(_) => ApiError::invalid_request(e.to_string()),
            OrganizationError::Internal(failure) => ApiError::internal(&failure),
        }
    }
}

impl From<ProjectError> for ApiError {
    fn from(e: ProjectError) -> Self {
        match e {
            ProjectError::NotFound | ProjectError::UserNotFound(_) => {
                ApiError::not_found(e.to_string())
            }
            ProjectError::NotMember => ApiError::forbidden(e.to_string()),
            ProjectError::AlreadyMember | ProjectError::Archived => ApiError::conflict(e.to_string()),
            ProjectError::InvalidRequest(_) => ApiError::invalid_request(e.to_string()),
            ProjectError::Internal(failure) => ApiError::internal(&failure),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::NotFound => ApiError::not_found(e.to_string()),
            ProviderError::NoProviderAvailable => {
                ApiError::not_found(e.to_string()).with_code("model_not_found")
            }
            ProviderError::InvalidVendorForType { .. } => ApiError::invalid_request(e.to_string())
                .with_param("vendor")
                .with_code("invalid_vendor_for_type"),
            ProviderError::MissingProviderKey => {
                ApiError::invalid_request(e.to_string()).with_param("api_key")
            }
            ProviderError::Conflict(_) => ApiError::conflict(e.to_string()),
            ProviderError::InvalidRequest(_) => ApiError::invalid_request(e.to_string()),
            ProviderError::Upstream { .. } => ApiError::upstream(e.to_string()),
            ProviderError::Internal(failure) => ApiError::internal(&failure),
        }
    }
}

impl From<InferenceError> for ApiError {
    fn from(e: InferenceError) -> Self {
        match e {
            InferenceError::Provider(e) => e.into(),
            InferenceError::Upstream { status, .. } => {
                let error = ApiError::upstream(e.to_string());
                match status {
                    Some(status) => error.with_code(&format!("upstream_{status}")),
                    None => error,
                }
            }
            InferenceError::Timeout { .. } => ApiError::timeout(e.to_string()),
        }
    }
}

impl From<ConversationError> for ApiError {
    fn from(e: ConversationError) -> Self {
        match e {
            ConversationError::NotFound | ConversationError::ItemNotFound => {
                ApiError::not_found(e.to_string())
            }
            ConversationError::AccessDenied => ApiError::forbidden(e.to_string()),
            ConversationError::InvalidRequest(_) => ApiError::invalid_request(e.to_string()),
            ConversationError::PartialWrite { .. } => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                e.to_string(),
            )
            .with_code("partial_write"),
            ConversationError::Internal(failure) => ApiError::internal(&failure),
        }
    }
}

impl From<ResponseError> for ApiError {
    fn from(e: ResponseError) -> Self {
        match e {
            ResponseError::NotFound => ApiError::not_found(e.to_string()),
            ResponseError::AccessDenied => ApiError::forbidden(e.to_string()),
            ResponseError::InvalidParams(_) => ApiError::invalid_request(e.to_string()),
            ResponseError::InvalidResponseTransition { .. } => ApiError::conflict(e.to_string()),
            ResponseError::Conversation(e) => e.into(),
            ResponseError::Inference(e) => e.into(),
            ResponseError::Internal(failure) => ApiError::internal(&failure),
        }
    }
}

impl From<ConvCompletionError> for ApiError {
    fn from(e: ConvCompletionError) -> Self {
        match e {
            ConvCompletionError::InvalidRequest(_) => ApiError::invalid_request(e.to_string()),
            ConvCompletionError::Provider(e) => e.into(),
            ConvCompletionError::Conversation(e) => e.into(),
            ConvCompletionError::Inference(e) => e.into(),
            ConvCompletionError::Internal(failure) => ApiError::internal(&failure),
        }
    }
}

/// Wraps an SSE body with the event-stream headers. The body is cut at
/// `deadline`; the producer behind it notices and stops.
pub fn event_stream(body: ByteStream, deadline: Duration, stream_id: String) -> Response {
    let deadline = tokio::time::sleep(deadline);
    let body = body
        .take_until(async move {
            deadline.await;
            warn!(stream_id = %stream_id, "Stream cut at request deadline");
        })
        .map(|chunk| chunk.map_err(std::io::Error::other));

    (
        [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, "no-cache"),
            (CONNECTION, "keep-alive"),
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// Rejects malformed public IDs before any lookup.
pub fn validate_id(id: &str, prefix: &str, param: &str) -> Result<(), ApiError> {
    if validate_id_format(id, prefix) {
        Ok(())
    } else {
        Err(ApiError::invalid_request(format!("invalid {param} '{id}'")).with_param(param))
    }
}

impl ListQuery {
    /// Limit and order; cursors are resolved by the caller since they are
    /// public IDs.
    pub fn pagination(&self, default_order: SortOrder) -> Result<Pagination, ApiError> {
        let order = match self.order.as_deref() {
            Some(order) => order
                .parse::<SortOrder>()
                .map_err(|e| ApiError::invalid_request(e).with_param("order"))?,
            None => default_order,
        };
        Ok(Pagination::new(self.limit.unwrap_or(DEFAULT_PAGE_LIMIT), order).validated())
    }
}

/// Adds the caller's organization and visible projects to a selection.
/// Callers without an organization only reach the built-in provider.
pub async fn caller_selection(
    state: &AppState,
    context: &RequestContext,
    mut selection: ProviderSelection,
) -> Result<ProviderSelection, ApiError> {
    let organization = match state
        .organization_service
        .resolve_for(&context.principal, &context.user)
        .await
    {
        Ok(organization) => organization,
        Err(OrganizationError::NotFound) => return Ok(selection),
        Err(e) => return Err(e.into()),
    };
    let Some(member) = state
        .organization_service
        .membership(&organization, &context.user)
        .await?
    else {
        return Ok(selection);
    };

    selection.project_ids = state
        .project_service
        .visible_project_ids(&organization, &context.user, Some(member.role))
        .await?;
    selection.organization_id = Some(organization.id);
    Ok(selection)
}
