use crate::models::*;
use serde_json::Value;
use services::{
    auth::{ApiKey, User},
    conversations::{Content, Conversation, Item, ItemRole, ItemStatus, NewItem},
    organization::{Organization, OrganizationMember},
    projects::{Project, ProjectMember},
    providers::ModelProvider,
    responses::Response,
};

// ============================================================================
// HTTP to Domain Conversions
// ============================================================================

impl From<ItemInput> for NewItem {
    fn from(input: ItemInput) -> Self {
        let content = match input.content {
            None => Vec::new(),
            Some(ItemContentInput::Parts(parts)) => parts,
            Some(ItemContentInput::Text(text)) if input.role == Some(ItemRole::Assistant) => {
                vec![Content::output_text(text, None)]
            }
            Some(ItemContentInput::Text(text)) => vec![Content::text(text)],
        };
        NewItem {
            public_id: None,
            response_id: None,
            item_type: input.item_type,
            role: input.role,
            content,
            status: Some(ItemStatus::Completed),
        }
    }
}

// ============================================================================
// Domain to HTTP Conversions
// ============================================================================

impl From<&Conversation> for ConversationObject {
    fn from(conversation: &Conversation) -> Self {
        Self {
            id: conversation.public_id.clone(),
            object: "conversation".to_string(),
            title: conversation.title.clone(),
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            metadata: conversation.metadata.clone(),
        }
    }
}

impl From<&Item> for ItemObject {
    fn from(item: &Item) -> Self {
        Self {
            id: item.public_id.clone(),
            object: "conversation.item".to_string(),
            item_type: item.item_type,
            role: item.role,
            content: item.content.clone(),
            status: item.status,
            created_at: item.created_at,
        }
    }
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.public_id.clone(),
            object: "user".to_string(),
            name: user.name.clone(),
            email: user.email.clone(),
            is_guest: user.is_guest,
            created_at: user.created_at,
        }
    }
}

impl From<&ApiKey> for ApiKeyObject {
    fn from(key: &ApiKey) -> Self {
        Self {
            id: key.public_id.clone(),
            object: "api_key".to_string(),
            r#type: key.key_type,
            redacted_value: key.plaintext_hint.clone(),
            description: key.description.clone(),
            created_at: key.created_at,
            expires_at: key.expires_at,
            last_used_at: key.last_used_at,
        }
    }
}

impl From<&Organization> for OrganizationObject {
    fn from(organization: &Organization) -> Self {
        Self {
            id: organization.public_id.clone(),
            object: "organization".to_string(),
            name: organization.name.clone(),
            created_at: organization.created_at,
        }
    }
}

impl From<&Project> for ProjectObject {
    fn from(project: &Project) -> Self {
        Self {
            id: project.public_id.clone(),
            object: "organization.project".to_string(),
            name: project.name.clone(),
            status: project.status,
            created_at: project.created_at,
            archived_at: project.archived_at,
        }
    }
}

pub fn member_object(member: &OrganizationMember, user: &User) -> MemberObject {
    MemberObject {
        id: user.public_id.clone(),
        object: "organization.user".to_string(),
        name: user.name.clone(),
        email: user.email.clone(),
        role: member.role,
        is_primary: member.is_primary,
        added_at: member.created_at,
    }
}

pub fn project_member_object(member: &ProjectMember, user: &User) -> ProjectMemberObject {
    ProjectMemberObject {
        id: user.public_id.clone(),
        object: "organization.project.user".to_string(),
        name: user.name.clone(),
        email: user.email.clone(),
        role: member.role,
        added_at: member.created_at,
    }
}

/// `project` must be the provider's project when it is project-scoped.
pub fn provider_object(
    provider: &ModelProvider,
    organization: &Organization,
    project: Option<&Project>,
) -> ProviderObject {
    ProviderObject {
        provider_id: provider.public_id.clone(),
        object: "provider".to_string(),
        name: provider.name.clone(),
        r#type: provider.provider_type,
        vendor: provider.vendor,
        base_url: provider.base_url.clone(),
        api_key_hint: provider.api_key_hint.clone(),
        active: provider.active,
        scope: provider.scope(),
        organization_id: organization.public_id.clone(),
        project_id: project
            .filter(|p| provider.project_id == Some(p.id))
            .map(|p| p.public_id.clone()),
        metadata: provider.metadata.clone(),
        last_synced_at: provider.last_synced_at,
        created_at: provider.created_at,
        updated_at: provider.updated_at,
    }
}

pub fn provider_summary(provider: &ModelProvider) -> ProviderSummaryObject {
    ProviderSummaryObject {
        provider_id: provider.public_id.clone(),
        object: "provider".to_string(),
        name: provider.name.clone(),
        r#type: provider.provider_type,
        vendor: provider.vendor,
        api_key_hint: provider.api_key_hint.clone(),
        active: provider.active,
    }
}

pub fn response_object(response: &Response, conversation_public_id: Option<String>) -> ResponseObject {
    ResponseObject {
        id: response.public_id.clone(),
        object: "response".to_string(),
        created_at: response.created_at,
        status: response.status,
        model: response.model.clone(),
        instructions: response.system_prompt.clone(),
        previous_response_id: response.previous_response_id.clone(),
        conversation: conversation_public_id.map(|id| ConversationRef { id }),
        output: response
            .output
            .clone()
            .unwrap_or_else(|| Value::Array(Vec::new())),
        usage: response.usage.clone(),
        error: response.error.clone(),
        temperature: response.params.temperature,
        top_p: response.params.top_p,
        max_output_tokens: response.params.max_tokens,
        metadata: response.params.metadata.clone(),
        completed_at: response.completed_at,
        cancelled_at: response.cancelled_at,
        failed_at: response.failed_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use services::conversations::ItemType;

    fn input(role: Option<ItemRole>, content: ItemContentInput) -> ItemInput {
        ItemInput {
            item_type: ItemType::Message,
            role,
            content: Some(content),
        }
    }

    #[test]
    fn test_text_input_becomes_role_appropriate_part() {
        let user: NewItem = input(Some(ItemRole::User), ItemContentInput::Text("hi".into())).into();
        assert_eq!(user.content, vec![Content::text("hi")]);

        let assistant: NewItem =
            input(Some(ItemRole::Assistant), ItemContentInput::Text("yo".into())).into();
        assert_eq!(assistant.content, vec![Content::output_text("yo", None)]);
        assert_eq!(assistant.status, Some(ItemStatus::Completed));
    }

    #[test]
    fn test_item_input_deserializes_string_and_parts() {
        let plain: ItemInput =
            serde_json::from_value(serde_json::json!({"role": "user", "content": "hello"})).unwrap();
        assert_eq!(plain.item_type, ItemType::Message);
        assert!(matches!(plain.content, Some(ItemContentInput::Text(_))));

        let parts: ItemInput = serde_json::from_value(serde_json::json!({
            "type": "message",
            "role": "user",
            "content": [{"type": "input_text", "text": "hello"}]
        }))
        .unwrap();
        let item: NewItem = parts.into();
        assert_eq!(item.content, vec![Content::text("hello")]);
    }
}
