use serde::{Deserialize, Serialize};
use serde_json::Value;
use services::{
    auth::ApiKeyType,
    completions::ConvModel,
    conversations::{Content, ItemRole, ItemStatus, ItemType},
    organization::OrganizationRole,
    projects::{ProjectRole, ProjectStatus},
    providers::{ProviderScope, ProviderType, ProviderVendor},
    responses::{ResponseFailure, ResponseStatus},
};
use std::collections::BTreeMap;

// ============================================
// Errors
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub param: Option<String>,
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(message: String, error_type: String) -> Self {
        Self {
            error: ErrorDetail {
                message,
                r#type: error_type,
                param: None,
                code: None,
            },
        }
    }
}

// ============================================
// Common envelopes
// ============================================

/// Cursor-paged list in the OpenAI shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub object: String,
    pub data: Vec<T>,
    pub first_id: Option<String>,
    pub last_id: Option<String>,
    pub has_more: bool,
}

impl<T> ListResponse<T> {
    pub fn new(data: Vec<T>, has_more: bool, id: impl Fn(&T) -> &str) -> Self {
        Self {
            object: "list".to_string(),
            first_id: data.first().map(|d| id(d).to_string()),
            last_id: data.last().map(|d| id(d).to_string()),
            data,
            has_more,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedObject {
    pub id: String,
    pub object: String,
    pub deleted: bool,
}

/// `limit`/`order`/`after`/`before` query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub order: Option<String>,
    pub after: Option<String>,
    pub before: Option<String>,
}

// ============================================
// Auth
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenResponse {
    pub object: String,
    pub access_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub object: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub is_guest: bool,
    pub created_at: i64,
}

// ============================================
// API keys
// ============================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateApiKeyRequest {
    #[serde(default)]
    pub description: Option<String>,
    /// Unix seconds
    #[serde(default)]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyObject {
    pub id: String,
    pub object: String,
    pub r#type: ApiKeyType,
    pub redacted_value: String,
    pub description: Option<String>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub last_used_at: Option<i64>,
}

/// Returned once, at creation. `value` is never shown again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedApiKeyResponse {
    #[serde(flatten)]
    pub key: ApiKeyObject,
    pub value: String,
}

// ============================================
// Completions
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<ConvModel>,
}

/// A provider as listed to model consumers: no URL, no scope details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSummaryObject {
    pub provider_id: String,
    pub object: String,
    pub name: String,
    pub r#type: ProviderType,
    pub vendor: ProviderVendor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_hint: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSummariesResponse {
    pub object: String,
    pub data: Vec<ProviderSummaryObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheInvalidationResponse {
    pub object: String,
    pub status: String,
    pub message: String,
    /// Number of cache entries removed.
    pub removed: u64,
}

// ============================================
// Conversations
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationObject {
    pub id: String,
    pub object: String,
    pub title: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
    /// Items to seed the conversation with
    #[serde(default)]
    pub items: Option<Vec<ItemInput>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
}

fn default_item_type() -> ItemType {
    ItemType::Message
}

/// Item content as sent by clients: a bare string or typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemContentInput {
    Text(String),
    Parts(Vec<Content>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemInput {
    #[serde(rename = "type", default = "default_item_type")]
    pub item_type: ItemType,
    #[serde(default)]
    pub role: Option<ItemRole>,
    #[serde(default)]
    pub content: Option<ItemContentInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddItemsRequest {
    pub items: Vec<ItemInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemObject {
    pub id: String,
    pub object: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ItemRole>,
    pub content: Vec<Content>,
    pub status: Option<ItemStatus>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchItemsQuery {
    pub query: String,
}

// ============================================
// Responses
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRef {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseObject {
    pub id: String,
    pub object: String,
    pub created_at: i64,
    pub status: ResponseStatus,
    pub model: String,
    pub instructions: Option<String>,
    pub previous_response_id: Option<String>,
    pub conversation: Option<ConversationRef>,
    pub output: Value,
    pub usage: Option<Value>,
    pub error: Option<ResponseFailure>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_output_tokens: Option<i64>,
    pub metadata: Option<Value>,
    pub completed_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub failed_at: Option<i64>,
}

// ============================================
// Organizations and projects
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationObject {
    pub id: String,
    pub object: String,
    pub name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberObject {
    pub id: String,
    pub object: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: OrganizationRole,
    pub is_primary: bool,
    pub added_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectNameRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectObject {
    pub id: String,
    pub object: String,
    pub name: String,
    pub status: ProjectStatus,
    pub created_at: i64,
    pub archived_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMemberObject {
    pub id: String,
    pub object: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: ProjectRole,
    pub added_at: i64,
}

// ============================================
// Providers
// ============================================

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProviderRequest {
    pub name: String,
    pub vendor: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProviderRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub active: Option<bool>,
}

/// A provider as exposed to administrators. The key only ever appears as
/// its hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderObject {
    pub provider_id: String,
    pub object: String,
    pub name: String,
    pub r#type: ProviderType,
    pub vendor: ProviderVendor,
    pub base_url: String,
    pub api_key_hint: Option<String>,
    pub active: bool,
    pub scope: ProviderScope,
    pub organization_id: String,
    pub project_id: Option<String>,
    pub metadata: Value,
    pub last_synced_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}
