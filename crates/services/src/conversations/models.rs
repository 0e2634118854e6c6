use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::conversations::errors::ConversationError;

/// Largest text part accepted in an item.
pub const MAX_TEXT_PART_BYTES: usize = 128 * 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Archived,
    Deleted,
}

/// Conversation model. `items` is only populated when explicitly loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: i64,
    pub public_id: String,
    pub title: Option<String>,
    pub user_id: i64,
    pub status: ConversationStatus,
    pub is_private: bool,
    pub metadata: BTreeMap<String, String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Item>>,
}

impl Conversation {
    pub fn is_owned_by(&self, user_id: i64) -> bool {
        self.user_id == user_id
    }

    /// Private conversations are visible to their owner only.
    pub fn is_readable_by(&self, user_id: i64) -> bool {
        !self.is_private || self.is_owned_by(user_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Message,
    FunctionCall,
    FunctionCallOutput,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemRole {
    System,
    User,
    Assistant,
}

impl ItemRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemRole::System => "system",
            ItemRole::User => "user",
            ItemRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    InProgress,
    Completed,
    Incomplete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncompleteDetails {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Annotation {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub start_index: usize,
    #[serde(default)]
    pub end_index: usize,
}

/// One part of an item's content, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    #[serde(rename = "input_text", alias = "text")]
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        annotations: Vec<Annotation>,
    },
    OutputText {
        text: String,
        #[serde(default)]
        annotations: Vec<Annotation>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        logprobs: Vec<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning_content: Option<String>,
    },
    #[serde(rename = "input_image", alias = "image")]
    Image {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    #[serde(rename = "input_file", alias = "file")]
    File {
        file_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    Reasoning { text: String },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text {
            text: text.into(),
            annotations: Vec::new(),
        }
    }

    pub fn output_text(text: impl Into<String>, reasoning_content: Option<String>) -> Self {
        Content::OutputText {
            text: text.into(),
            annotations: Vec::new(),
            logprobs: Vec::new(),
            reasoning_content,
        }
    }

    /// Text carried by text-bearing parts.
    pub fn text_value(&self) -> Option<&str> {
        match self {
            Content::Text { text, .. } | Content::OutputText { text, .. } | Content::Reasoning { text } => {
                Some(text)
            }
            Content::Image { .. } | Content::File { .. } => None,
        }
    }

    fn validate(&self) -> Result<(), ConversationError> {
        if let Some(text) = self.text_value() {
            if text.len() > MAX_TEXT_PART_BYTES {
                return Err(ConversationError::InvalidRequest(format!(
                    "text content exceeds {MAX_TEXT_PART_BYTES} bytes"
                )));
            }
        }
        match self {
            Content::Image {
                image_url, file_id, ..
            } if image_url.as_deref().is_none_or(str::is_empty)
                && file_id.as_deref().is_none_or(str::is_empty) =>
            {
                Err(ConversationError::InvalidRequest(
                    "image content requires image_url or file_id".to_string(),
                ))
            }
            Content::File { file_id, .. } if file_id.trim().is_empty() => Err(
                ConversationError::InvalidRequest("file content requires file_id".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: i64,
    pub public_id: String,
    pub conversation_id: i64,
    /// Response that produced the item, if any
    pub response_id: Option<i64>,
    pub item_type: ItemType,
    pub role: Option<ItemRole>,
    pub content: Vec<Content>,
    pub status: Option<ItemStatus>,
    pub incomplete_at: Option<i64>,
    pub incomplete_details: Option<IncompleteDetails>,
    pub completed_at: Option<i64>,
    pub created_at: i64,
}

impl Item {
    /// Concatenated text of every text-bearing part.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(Content::text_value)
            .collect::<Vec<_>>()
            .join("")
    }
}

/// An item to append. A pre-allocated `public_id` is kept as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub public_id: Option<String>,
    pub response_id: Option<i64>,
    pub item_type: ItemType,
    pub role: Option<ItemRole>,
    pub content: Vec<Content>,
    pub status: Option<ItemStatus>,
}

impl NewItem {
    pub fn message(role: ItemRole, content: Vec<Content>) -> Self {
        Self {
            public_id: None,
            response_id: None,
            item_type: ItemType::Message,
            role: Some(role),
            content,
            status: Some(ItemStatus::Completed),
        }
    }

    pub fn with_public_id(mut self, public_id: impl Into<String>) -> Self {
        self.public_id = Some(public_id.into());
        self
    }

    pub fn with_response(mut self, response_id: i64) -> Self {
        self.response_id = Some(response_id);
        self
    }

    /// Messages need a role and at least one part; function-call items
    /// accept only an assistant role.
    pub fn validate(&self) -> Result<(), ConversationError> {
        match (self.item_type, self.role) {
            (ItemType::Message, None) => {
                return Err(ConversationError::InvalidRequest(
                    "message items require a role".to_string(),
                ))
            }
            (ItemType::FunctionCall | ItemType::FunctionCallOutput, Some(role))
                if role != ItemRole::Assistant =>
            {
                return Err(ConversationError::InvalidRequest(format!(
                    "role '{}' is not valid for function call items",
                    role.as_str()
                )))
            }
            _ => {}
        }
        if self.item_type == ItemType::Message && self.content.is_empty() {
            return Err(ConversationError::InvalidRequest(
                "message items require content".to_string(),
            ));
        }
        self.content.iter().try_for_each(Content::validate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_discriminator() {
        let parsed: Vec<Content> = serde_json::from_value(json!([
            {"type": "input_text", "text": "hi"},
            {"type": "text", "text": "legacy"},
            {"type": "output_text", "text": "out", "annotations": [], "reasoning_content": "why"},
            {"type": "input_image", "image_url": "https://img"},
            {"type": "reasoning", "text": "thinking"}
        ]))
        .unwrap();
        assert_eq!(parsed[0], Content::text("hi"));
        assert_eq!(parsed[1], Content::text("legacy"));
        assert_eq!(parsed[2], Content::output_text("out", Some("why".to_string())));
        assert!(matches!(parsed[3], Content::Image { .. }));
        assert_eq!(parsed[4].text_value(), Some("thinking"));

        let rendered = serde_json::to_value(Content::output_text("x", None)).unwrap();
        assert_eq!(rendered, json!({"type": "output_text", "text": "x", "annotations": []}));
    }

    #[test]
    fn test_validate_role_pairs() {
        let mut item = NewItem::message(ItemRole::User, vec![Content::text("hi")]);
        assert!(item.validate().is_ok());

        item.role = None;
        assert!(item.validate().is_err());

        item.item_type = ItemType::FunctionCall;
        assert!(item.validate().is_ok());
        item.role = Some(ItemRole::User);
        assert!(item.validate().is_err());
    }

    #[test]
    fn test_validate_content_budget() {
        let big = "a".repeat(MAX_TEXT_PART_BYTES + 1);
        let item = NewItem::message(ItemRole::User, vec![Content::text(big)]);
        assert!(matches!(item.validate(), Err(ConversationError::InvalidRequest(_))));

        let empty = NewItem::message(ItemRole::User, vec![]);
        assert!(empty.validate().is_err());

        let image = NewItem::message(
            ItemRole::User,
            vec![Content::Image {
                image_url: None,
                file_id: None,
                detail: None,
            }],
        );
        assert!(image.validate().is_err());
    }

    #[test]
    fn test_private_visibility() {
        let conversation = Conversation {
            id: 1,
            public_id: "conv_a".to_string(),
            title: None,
            user_id: 1,
            status: ConversationStatus::Active,
            is_private: true,
            metadata: BTreeMap::new(),
            created_at: 0,
            updated_at: 0,
            items: None,
        };
        assert!(conversation.is_readable_by(1));
        assert!(!conversation.is_readable_by(2));
    }
}
