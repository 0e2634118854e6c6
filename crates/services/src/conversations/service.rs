use std::{collections::BTreeMap, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    common::{internal, now_unix, Page, Pagination, RepositoryError},
    conversations::{
        errors::ConversationError,
        models::{Conversation, ConversationStatus, Item, NewItem},
        ports::{ConversationFilter, ConversationRepository, ItemFilter, ItemRepository},
    },
    id_prefixes::{generate_public_id, PREFIX_CONV, PREFIX_MSG},
};

pub const MAX_TITLE_BYTES: usize = 256;
pub const MAX_METADATA_KEYS: usize = 16;
pub const MAX_METADATA_KEY_BYTES: usize = 64;
pub const MAX_METADATA_VALUE_BYTES: usize = 512;
pub const MAX_ITEMS_PER_BATCH: usize = 100;
/// Upper bound when hydrating every item of a conversation
const LOAD_ALL_ITEMS_LIMIT: i64 = 10_000;

/// Conversation service for managing conversations and their items
pub struct ConversationService {
    conversations: Arc<dyn ConversationRepository>,
    items: Arc<dyn ItemRepository>,
}

impl ConversationService {
    pub fn new(conversations: Arc<dyn ConversationRepository>, items: Arc<dyn ItemRepository>) -> Self {
        Self { conversations, items }
    }

    pub async fn create(
        &self,
        user_id: i64,
        title: Option<String>,
        is_private: bool,
        metadata: BTreeMap<String, String>,
    ) -> Result<Conversation, ConversationError> {
        validate_title(title.as_deref())?;
        validate_metadata(&metadata)?;

        let public_id = generate_public_id(PREFIX_CONV)
            .map_err(internal("4c2a0e8f-6b1d-4d37-9a5c-3e1f7b9d5c08", "Failed to generate conversation ID"))?;
        let now = now_unix();
        let conversation = self
            .conversations
            .create(Conversation {
                id: 0,
                public_id,
                title,
                user_id,
                status: ConversationStatus::Active,
                is_private,
                metadata,
                created_at: now,
                updated_at: now,
                items: None,
            })
            .await
            .map_err(internal("b7e5c3a1-9f0d-4b62-8e4a-1c7f5d3b9a26", "Failed to create conversation"))?;

        info!(conversation_id = %conversation.public_id, user_id, "Created conversation");
        Ok(conversation)
    }

    /// Loads a conversation the user may read, optionally with its items.
    pub async fn get_by_public_id_and_user(
        &self,
        public_id: &str,
        user_id: i64,
        load_items: bool,
    ) -> Result<Conversation, ConversationError> {
        let conversation = self
            .conversations
            .find_by_public_id(public_id)
            .await
            .map_err(internal("e0c8a6f4-2d1b-4f59-b7e3-5a9c1e7f3b40", "Failed to load conversation"))?
            .ok_or(ConversationError::NotFound)?;
        self.authorize_read(conversation, user_id, load_items).await
    }

    /// Internal-ID variant of [`Self::get_by_public_id_and_user`].
    pub async fn get_by_id_and_user(
        &self,
        id: i64,
        user_id: i64,
        load_items: bool,
    ) -> Result<Conversation, ConversationError> {
        let conversation = self
            .conversations
            .find_by_id(id)
            .await
            .map_err(internal("5b8e2f4a-7c1d-4a93-be60-2f7d9c3a1e85", "Failed to load conversation"))?
            .ok_or(ConversationError::NotFound)?;
        self.authorize_read(conversation, user_id, load_items).await
    }

    async fn authorize_read(
        &self,
        mut conversation: Conversation,
        user_id: i64,
        load_items: bool,
    ) -> Result<Conversation, ConversationError> {
        if !conversation.is_readable_by(user_id) {
            return Err(ConversationError::AccessDenied);
        }

        if load_items {
            let items = self
                .items
                .find_by_filter(
                    ItemFilter {
                        conversation_id: Some(conversation.id),
                        ..Default::default()
                    },
                    Pagination::new(LOAD_ALL_ITEMS_LIMIT, Default::default()),
                )
                .await
                .map_err(internal("93a1f7d5-0c4e-4b28-a6f2-8d0b4e2c6a71", "Failed to load conversation items"))?;
            conversation.items = Some(items.items);
        }
        Ok(conversation)
    }

    /// Loads a conversation only its owner may modify.
    async fn get_owned(&self, public_id: &str, user_id: i64) -> Result<Conversation, ConversationError> {
        let conversation = self.get_by_public_id_and_user(public_id, user_id, false).await?;
        if !conversation.is_owned_by(user_id) {
            return Err(ConversationError::AccessDenied);
        }
        Ok(conversation)
    }

    pub async fn update(
        &self,
        public_id: &str,
        user_id: i64,
        title: Option<String>,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Result<Conversation, ConversationError> {
        let mut conversation = self.get_owned(public_id, user_id).await?;
        if let Some(title) = title {
            validate_title(Some(&title))?;
            conversation.title = Some(title);
        }
        if let Some(metadata) = metadata {
            validate_metadata(&metadata)?;
            conversation.metadata = metadata;
        }
        conversation.updated_at = now_unix();

        let conversation = self
            .conversations
            .update(conversation)
            .await
            .map_err(internal("2f0d8b6e-4a3c-4e91-b5d7-9c1a3e5f7b82", "Failed to update conversation"))?;
        debug!(conversation_id = %conversation.public_id, "Updated conversation");
        Ok(conversation)
    }

    pub async fn delete(&self, public_id: &str, user_id: i64) -> Result<Conversation, ConversationError> {
        let conversation = self.get_owned(public_id, user_id).await?;
        self.conversations
            .delete(conversation.id)
            .await
            .map_err(internal("7d5b3f1a-9e8c-4c06-a2e4-6f0b8d2a4c93", "Failed to delete conversation"))?;
        info!(conversation_id = %conversation.public_id, "Deleted conversation");
        Ok(conversation)
    }

    pub async fn list(
        &self,
        user_id: i64,
        pagination: Pagination,
    ) -> Result<Page<Conversation>, ConversationError> {
        Ok(self
            .conversations
            .find_by_filter(
                ConversationFilter {
                    user_id: Some(user_id),
                    ..Default::default()
                },
                pagination.validated(),
            )
            .await
            .map_err(internal("c1a9e7f5-3b2d-4d84-9f6a-0e8c2a4f6d15", "Failed to list conversations"))?)
    }

    pub async fn count(&self, user_id: i64) -> Result<i64, ConversationError> {
        Ok(self
            .conversations
            .count(ConversationFilter {
                user_id: Some(user_id),
                ..Default::default()
            })
            .await
            .map_err(internal("58e6c4a2-0f1b-4a97-8d3e-b5f9a1c7e346", "Failed to count conversations"))?)
    }

    /// Resolves a public-ID cursor to the internal row ID of one of the
    /// user's conversations.
    pub async fn conversation_cursor(&self, user_id: i64, public_id: &str) -> Result<i64, ConversationError> {
        self.conversations
            .find_by_public_id(public_id)
            .await
            .map_err(internal("a4f2d0b8-6c5e-4f13-b9a7-2d8e0c6a4b59", "Failed to resolve conversation cursor"))?
            .filter(|c| c.user_id == user_id)
            .map(|c| c.id)
            .ok_or_else(|| ConversationError::InvalidRequest(format!("invalid cursor '{public_id}'")))
    }

    pub async fn add_item(
        &self,
        conversation: &Conversation,
        user_id: i64,
        item: NewItem,
    ) -> Result<Item, ConversationError> {
        if !conversation.is_owned_by(user_id) {
            return Err(ConversationError::AccessDenied);
        }
        item.validate()?;

        let item = self
            .conversations
            .add_item(conversation.id, self.build_item(conversation.id, item, now_unix())?)
            .await
            .map_err(internal("0b9d7f5c-3e1a-4b68-a4c2-7e5f3d1b9a80", "Failed to add item"))?;
        self.touch(conversation).await;
        Ok(item)
    }

    /// Appends up to [`MAX_ITEMS_PER_BATCH`] items sharing one `created_at`.
    /// Every item is validated before the first write.
    pub async fn add_multiple_items(
        &self,
        conversation: &Conversation,
        user_id: i64,
        items: Vec<NewItem>,
    ) -> Result<Vec<Item>, ConversationError> {
        if !conversation.is_owned_by(user_id) {
            return Err(ConversationError::AccessDenied);
        }
        if items.len() > MAX_ITEMS_PER_BATCH {
            return Err(ConversationError::InvalidRequest(format!(
                "at most {MAX_ITEMS_PER_BATCH} items can be added at once, got {}",
                items.len()
            )));
        }
        if items.is_empty() {
            return Ok(Vec::new());
        }
        items.iter().try_for_each(NewItem::validate)?;

        let now = now_unix();
        let batch = items
            .into_iter()
            .map(|item| self.build_item(conversation.id, item, now))
            .collect::<Result<Vec<_>, _>>()?;

        let stored = self
            .conversations
            .bulk_add_items(conversation.id, batch)
            .await
            .map_err(|e| match e {
                RepositoryError::PartialWrite { written, message } => {
                    warn!(conversation_id = %conversation.public_id, written, "Item batch partially written");
                    ConversationError::PartialWrite { written, message }
                }
                other => internal("f8a6d4b2-1c0e-4e75-93b1-6d4f2b0e8c37", "Failed to add items")(other).into(),
            });

        // Rows from a partial batch stay, so the timestamp moves either way
        self.touch(conversation).await;
        stored
    }

    /// Returns an item of the conversation, checking membership against the
    /// preloaded item list when present.
    pub async fn get_item(
        &self,
        conversation: &Conversation,
        item_public_id: &str,
        user_id: i64,
    ) -> Result<Item, ConversationError> {
        if !conversation.is_readable_by(user_id) {
            return Err(ConversationError::AccessDenied);
        }
        if let Some(items) = &conversation.items {
            return items
                .iter()
                .find(|item| item.public_id == item_public_id)
                .cloned()
                .ok_or(ConversationError::ItemNotFound);
        }

        let item = self
            .items
            .find_by_public_id(item_public_id)
            .await
            .map_err(internal("3e1c9a7f-5d4b-4f20-86e8-0a2c4e6b8d91", "Failed to load item"))?
            .ok_or(ConversationError::ItemNotFound)?;
        let belongs = self
            .items
            .exists_by_id_and_conversation(item.id, conversation.id)
            .await
            .map_err(internal("d6b4f2e0-8a7c-4c39-b1d5-4f9e7a3c1b62", "Failed to check item ownership"))?;
        if !belongs {
            return Err(ConversationError::ItemNotFound);
        }
        Ok(item)
    }

    /// Owner-only. Returns the touched conversation.
    pub async fn delete_item(
        &self,
        conversation: &Conversation,
        item_public_id: &str,
        user_id: i64,
    ) -> Result<Conversation, ConversationError> {
        if !conversation.is_owned_by(user_id) {
            return Err(ConversationError::AccessDenied);
        }
        let item = self.get_item(conversation, item_public_id, user_id).await?;
        self.items.delete(item.id).await.map_err(|e| match e {
            RepositoryError::NotFound(_) => ConversationError::ItemNotFound,
            other => internal("9c7a5e3b-1f0d-4a86-b2e4-8d6c0f2a4e17", "Failed to delete item")(other).into(),
        })?;

        let mut conversation = conversation.clone();
        if let Some(items) = conversation.items.as_mut() {
            items.retain(|i| i.id != item.id);
        }
        conversation.updated_at = self.touch(&conversation).await.unwrap_or(conversation.updated_at);
        Ok(conversation)
    }

    pub async fn search_items(
        &self,
        conversation: &Conversation,
        user_id: i64,
        query: &str,
    ) -> Result<Vec<Item>, ConversationError> {
        if !conversation.is_readable_by(user_id) {
            return Err(ConversationError::AccessDenied);
        }
        Ok(self
            .conversations
            .search_items(conversation.id, query)
            .await
            .map_err(internal("1d9f7b5a-3c2e-4e04-a8c6-5b3d1f9e7a24", "Failed to search items"))?)
    }

    pub async fn list_items(
        &self,
        conversation: &Conversation,
        user_id: i64,
        pagination: Pagination,
    ) -> Result<Page<Item>, ConversationError> {
        if !conversation.is_readable_by(user_id) {
            return Err(ConversationError::AccessDenied);
        }
        Ok(self
            .items
            .find_by_filter(
                ItemFilter {
                    conversation_id: Some(conversation.id),
                    ..Default::default()
                },
                pagination.validated(),
            )
            .await
            .map_err(internal("6a4e2c0f-8b7d-4d51-9e3f-1c5a7e9b3d68", "Failed to list items"))?)
    }

    /// Resolves an item public-ID cursor within a conversation.
    pub async fn item_cursor(&self, conversation: &Conversation, public_id: &str) -> Result<i64, ConversationError> {
        self.items
            .find_by_public_id(public_id)
            .await
            .map_err(internal("e3b1d9f7-5a4c-4c82-b0e6-9f7d5b3a1c46", "Failed to resolve item cursor"))?
            .filter(|item| item.conversation_id == conversation.id)
            .map(|item| item.id)
            .ok_or_else(|| ConversationError::InvalidRequest(format!("invalid cursor '{public_id}'")))
    }

    fn build_item(&self, conversation_id: i64, item: NewItem, created_at: i64) -> Result<Item, ConversationError> {
        let public_id = match item.public_id {
            Some(public_id) => public_id,
            None => generate_public_id(PREFIX_MSG)
                .map_err(internal("7b5f3d1e-9c8a-4a64-8f2b-3e1d9c7a5f02", "Failed to generate item ID"))?,
        };
        Ok(Item {
            id: 0,
            public_id,
            conversation_id,
            response_id: item.response_id,
            item_type: item.item_type,
            role: item.role,
            content: item.content,
            status: item.status,
            incomplete_at: None,
            incomplete_details: None,
            completed_at: Some(created_at),
            created_at,
        })
    }

    /// Moves `updated_at` forward. Failures are logged only; the next
    /// successful mutation corrects the timestamp.
    async fn touch(&self, conversation: &Conversation) -> Option<i64> {
        let mut touched = conversation.clone();
        touched.items = None;
        touched.updated_at = now_unix();
        let updated_at = touched.updated_at;
        match self.conversations.update(touched).await {
            Ok(_) => Some(updated_at),
            Err(e) => {
                warn!(conversation_id = %conversation.public_id, error = %e, "Failed to touch conversation");
                None
            }
        }
    }
}

fn validate_title(title: Option<&str>) -> Result<(), ConversationError> {
    match title {
        Some(title) if title.len() > MAX_TITLE_BYTES => Err(ConversationError::InvalidRequest(format!(
            "title must be at most {MAX_TITLE_BYTES} bytes"
        ))),
        _ => Ok(()),
    }
}

fn validate_metadata(metadata: &BTreeMap<String, String>) -> Result<(), ConversationError> {
    if metadata.len() > MAX_METADATA_KEYS {
        return Err(ConversationError::InvalidRequest(format!(
            "metadata can hold at most {MAX_METADATA_KEYS} keys"
        )));
    }
    for (key, value) in metadata {
        if key.is_empty() || key.len() > MAX_METADATA_KEY_BYTES {
            return Err(ConversationError::InvalidRequest(format!(
                "metadata keys must be between 1 and {MAX_METADATA_KEY_BYTES} bytes"
            )));
        }
        if value.len() > MAX_METADATA_VALUE_BYTES {
            return Err(ConversationError::InvalidRequest(format!(
                "metadata value for '{key}' exceeds {MAX_METADATA_VALUE_BYTES} bytes"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::{
        models::{Content, ItemRole},
        ports::{MockConversationRepository, MockItemRepository},
    };

    fn conversation(user_id: i64, is_private: bool) -> Conversation {
        Conversation {
            id: 1,
            public_id: "conv_abc".to_string(),
            title: Some("hello".to_string()),
            user_id,
            status: ConversationStatus::Active,
            is_private,
            metadata: BTreeMap::new(),
            created_at: 0,
            updated_at: 0,
            items: None,
        }
    }

    fn stored(id: i64, public_id: &str, conversation_id: i64) -> Item {
        Item {
            id,
            public_id: public_id.to_string(),
            conversation_id,
            response_id: None,
            item_type: crate::conversations::models::ItemType::Message,
            role: Some(ItemRole::User),
            content: vec![Content::text("hi")],
            status: None,
            incomplete_at: None,
            incomplete_details: None,
            completed_at: None,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_private_conversation_hidden_from_other_users() {
        let mut conversations = MockConversationRepository::new();
        conversations
            .expect_find_by_public_id()
            .returning(|_| Ok(Some(conversation(1, true))));
        let service = ConversationService::new(Arc::new(conversations), Arc::new(MockItemRepository::new()));

        assert!(service.get_by_public_id_and_user("conv_abc", 1, false).await.is_ok());
        assert!(matches!(
            service.get_by_public_id_and_user("conv_abc", 2, false).await,
            Err(ConversationError::AccessDenied)
        ));
    }

    #[tokio::test]
    async fn test_create_validates_metadata_before_write() {
        let mut conversations = MockConversationRepository::new();
        conversations.expect_create().times(0);
        let service = ConversationService::new(Arc::new(conversations), Arc::new(MockItemRepository::new()));

        let metadata: BTreeMap<String, String> = (0..17).map(|i| (format!("k{i}"), "v".to_string())).collect();
        assert!(matches!(
            service.create(1, None, true, metadata).await,
            Err(ConversationError::InvalidRequest(_))
        ));
        assert!(matches!(
            service.create(1, Some("t".repeat(257)), true, BTreeMap::new()).await,
            Err(ConversationError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_add_item_keeps_item_when_touch_fails() {
        let mut conversations = MockConversationRepository::new();
        conversations.expect_add_item().times(1).returning(|_, mut item| {
            item.id = 5;
            Ok(item)
        });
        conversations
            .expect_update()
            .times(1)
            .returning(|_| Err(RepositoryError::DatabaseError(anyhow::anyhow!("connection reset"))));
        let service = ConversationService::new(Arc::new(conversations), Arc::new(MockItemRepository::new()));

        let item = service
            .add_item(
                &conversation(1, true),
                1,
                NewItem::message(ItemRole::User, vec![Content::text("hi")]),
            )
            .await
            .unwrap();
        assert_eq!(item.id, 5);
        assert!(item.public_id.starts_with("msg_"));
    }

    #[tokio::test]
    async fn test_add_multiple_items_caps_batch() {
        let mut conversations = MockConversationRepository::new();
        conversations.expect_bulk_add_items().times(0);
        let service = ConversationService::new(Arc::new(conversations), Arc::new(MockItemRepository::new()));

        let items = vec![NewItem::message(ItemRole::User, vec![Content::text("x")]); 101];
        assert!(matches!(
            service.add_multiple_items(&conversation(1, false), 1, items).await,
            Err(ConversationError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_add_multiple_items_validates_all_before_writing() {
        let mut conversations = MockConversationRepository::new();
        conversations.expect_bulk_add_items().times(0);
        let service = ConversationService::new(Arc::new(conversations), Arc::new(MockItemRepository::new()));

        let items = vec![
            NewItem::message(ItemRole::User, vec![Content::text("ok")]),
            NewItem::message(ItemRole::User, vec![]),
        ];
        assert!(service.add_multiple_items(&conversation(1, false), 1, items).await.is_err());
    }

    #[tokio::test]
    async fn test_add_multiple_items_shares_timestamp_and_keeps_ids() {
        let mut conversations = MockConversationRepository::new();
        conversations.expect_bulk_add_items().returning(|_, items| {
            assert!(items.windows(2).all(|w| w[0].created_at == w[1].created_at));
            Ok(items)
        });
        conversations.expect_update().returning(Ok);
        let service = ConversationService::new(Arc::new(conversations), Arc::new(MockItemRepository::new()));

        let items = vec![
            NewItem::message(ItemRole::User, vec![Content::text("q")]).with_public_id("msg_ask"),
            NewItem::message(ItemRole::Assistant, vec![Content::output_text("a", None)]),
        ];
        let stored = service
            .add_multiple_items(&conversation(1, false), 1, items)
            .await
            .unwrap();
        assert_eq!(stored[0].public_id, "msg_ask");
        assert!(stored[1].public_id.starts_with("msg_"));
    }

    #[tokio::test]
    async fn test_partial_batch_is_reported() {
        let mut conversations = MockConversationRepository::new();
        conversations.expect_bulk_add_items().returning(|_, _| {
            Err(RepositoryError::PartialWrite {
                written: 1,
                message: "disk full".to_string(),
            })
        });
        conversations.expect_update().returning(Ok);
        let service = ConversationService::new(Arc::new(conversations), Arc::new(MockItemRepository::new()));

        let items = vec![NewItem::message(ItemRole::User, vec![Content::text("x")]); 2];
        assert!(matches!(
            service.add_multiple_items(&conversation(1, false), 1, items).await,
            Err(ConversationError::PartialWrite { written: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_get_item_rejects_item_of_other_conversation() {
        let mut items = MockItemRepository::new();
        items
            .expect_find_by_public_id()
            .returning(|id| Ok(Some(stored(9, id, 2))));
        items
            .expect_exists_by_id_and_conversation()
            .returning(|_, conversation_id| Ok(conversation_id == 2));
        let service = ConversationService::new(Arc::new(MockConversationRepository::new()), Arc::new(items));

        assert!(matches!(
            service.get_item(&conversation(1, false), "msg_x", 1).await,
            Err(ConversationError::ItemNotFound)
        ));
    }

    #[tokio::test]
    async fn test_get_item_uses_preloaded_items() {
        let service = ConversationService::new(
            Arc::new(MockConversationRepository::new()),
            Arc::new(MockItemRepository::new()),
        );
        let mut loaded = conversation(1, false);
        loaded.items = Some(vec![stored(3, "msg_here", 1)]);

        assert_eq!(service.get_item(&loaded, "msg_here", 1).await.unwrap().id, 3);
        assert!(matches!(
            service.get_item(&loaded, "msg_gone", 1).await,
            Err(ConversationError::ItemNotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_item_requires_owner() {
        let service = ConversationService::new(
            Arc::new(MockConversationRepository::new()),
            Arc::new(MockItemRepository::new()),
        );
        assert!(matches!(
            service.delete_item(&conversation(1, false), "msg_x", 2).await,
            Err(ConversationError::AccessDenied)
        ));
    }

    #[tokio::test]
    async fn test_update_is_owner_only_for_public_conversations() {
        let mut conversations = MockConversationRepository::new();
        conversations
            .expect_find_by_public_id()
            .returning(|_| Ok(Some(conversation(1, false))));
        conversations.expect_update().times(0);
        let service = ConversationService::new(Arc::new(conversations), Arc::new(MockItemRepository::new()));

        assert!(matches!(
            service.update("conv_abc", 2, Some("new".to_string()), None).await,
            Err(ConversationError::AccessDenied)
        ));
    }
}
