use async_trait::async_trait;

use crate::{
    common::{Page, Pagination, RepositoryError},
    conversations::models::{Conversation, ConversationStatus, Item, ItemRole},
};

#[cfg(any(test, feature = "test-mocks"))]
use mockall::automock;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationFilter {
    pub user_id: Option<i64>,
    pub public_id: Option<String>,
    pub status: Option<ConversationStatus>,
}

impl ConversationFilter {
    pub fn matches(&self, conversation: &Conversation) -> bool {
        self.user_id.is_none_or(|id| conversation.user_id == id)
            && self
                .public_id
                .as_deref()
                .is_none_or(|id| conversation.public_id == id)
            && self.status.is_none_or(|s| conversation.status == s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilter {
    pub conversation_id: Option<i64>,
    pub public_id: Option<String>,
    pub response_id: Option<i64>,
    pub role: Option<ItemRole>,
    /// Drop items carrying this role
    pub exclude_role: Option<ItemRole>,
}

impl ItemFilter {
    pub fn matches(&self, item: &Item) -> bool {
        self.conversation_id.is_none_or(|id| item.conversation_id == id)
            && self.public_id.as_deref().is_none_or(|id| item.public_id == id)
            && self.response_id.is_none_or(|id| item.response_id == Some(id))
            && self.role.is_none_or(|role| item.role == Some(role))
            && self.exclude_role.is_none_or(|role| item.role != Some(role))
    }
}

#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create(&self, conversation: Conversation) -> Result<Conversation, RepositoryError>;

    async fn update(&self, conversation: Conversation) -> Result<Conversation, RepositoryError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Conversation>, RepositoryError>;

    async fn find_by_public_id(
        &self,
        public_id: &str,
    ) -> Result<Option<Conversation>, RepositoryError>;

    async fn find_by_filter(
        &self,
        filter: ConversationFilter,
        pagination: Pagination,
    ) -> Result<Page<Conversation>, RepositoryError>;

    async fn count(&self, filter: ConversationFilter) -> Result<i64, RepositoryError>;

    /// Deletes the conversation together with its items.
    async fn delete(&self, id: i64) -> Result<(), RepositoryError>;

    async fn add_item(&self, conversation_id: i64, item: Item) -> Result<Item, RepositoryError>;

    /// Appends items in order. A failure part-way reports how many rows were
    /// written through `RepositoryError::PartialWrite`; those rows remain.
    async fn bulk_add_items(
        &self,
        conversation_id: i64,
        items: Vec<Item>,
    ) -> Result<Vec<Item>, RepositoryError>;

    /// Items whose text contains `query`, in conversation order.
    async fn search_items(
        &self,
        conversation_id: i64,
        query: &str,
    ) -> Result<Vec<Item>, RepositoryError>;
}

#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait ItemRepository: Send + Sync {
    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<Item>, RepositoryError>;

    async fn find_by_filter(
        &self,
        filter: ItemFilter,
        pagination: Pagination,
    ) -> Result<Page<Item>, RepositoryError>;

    async fn count(&self, filter: ItemFilter) -> Result<i64, RepositoryError>;

    async fn exists_by_id_and_conversation(
        &self,
        item_id: i64,
        conversation_id: i64,
    ) -> Result<bool, RepositoryError>;

    async fn delete(&self, id: i64) -> Result<(), RepositoryError>;
}
