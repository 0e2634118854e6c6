use std::sync::Arc;

use async_trait::async_trait;
use services::{
    common::{Page, Pagination, RepositoryError},
    conversations::{
        Conversation, ConversationFilter, ConversationRepository, Item, ItemFilter, ItemRepository,
    },
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::repositories::utils::{not_found, paginate, Table};

/// Conversations and their items live together so deletes cascade.
#[derive(Debug, Default)]
struct ConversationTables {
    conversations: Table<Conversation>,
    items: Table<Item>,
}

impl ConversationTables {
    fn insert_item(&mut self, conversation_id: i64, mut item: Item) -> Result<Item, RepositoryError> {
        if self.items.any(|i| i.public_id == item.public_id) {
            return Err(RepositoryError::AlreadyExists(item.public_id));
        }
        item.id = self.items.next_id();
        item.conversation_id = conversation_id;
        self.items.rows.insert(item.id, item.clone());
        Ok(item)
    }

    fn require_conversation(&self, id: i64) -> Result<(), RepositoryError> {
        if self.conversations.rows.contains_key(&id) {
            Ok(())
        } else {
            Err(not_found("conversation", id))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryConversationRepository {
    tables: Arc<RwLock<ConversationTables>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Item view over the same storage.
    pub fn items(&self) -> InMemoryItemRepository {
        InMemoryItemRepository {
            tables: self.tables.clone(),
        }
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn create(&self, mut conversation: Conversation) -> Result<Conversation, RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.conversations.any(|c| c.public_id == conversation.public_id) {
            return Err(RepositoryError::AlreadyExists(conversation.public_id));
        }
        conversation.id = tables.conversations.next_id();
        conversation.items = None;
        tables.conversations.rows.insert(conversation.id, conversation.clone());
        debug!(conversation_id = %conversation.public_id, "Stored conversation");
        Ok(conversation)
    }

    async fn update(&self, mut conversation: Conversation) -> Result<Conversation, RepositoryError> {
        conversation.items = None;
        self.tables
            .write()
            .await
            .conversations
            .replace(conversation.id, conversation, "conversation")
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.tables.read().await.conversations.get(id))
    }

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .conversations
            .find(|c| c.public_id == public_id))
    }

    async fn find_by_filter(
        &self,
        filter: ConversationFilter,
        pagination: Pagination,
    ) -> Result<Page<Conversation>, RepositoryError> {
        let tables = self.tables.read().await;
        paginate(
            tables.conversations.filter(|c| filter.matches(c)),
            pagination,
            |c| (c.created_at, c.id),
            |id| tables.conversations.rows.get(&id).map(|c| (c.created_at, c.id)),
        )
    }

    async fn count(&self, filter: ConversationFilter) -> Result<i64, RepositoryError> {
        let tables = self.tables.read().await;
        let count = tables.conversations.rows.values().filter(|c| filter.matches(c)).count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn delete(&self, id: i64) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.conversations.remove(id, "conversation")?;
        tables.items.rows.retain(|_, item| item.conversation_id != id);
        Ok(())
    }

    async fn add_item(&self, conversation_id: i64, item: Item) -> Result<Item, RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.require_conversation(conversation_id)?;
        tables.insert_item(conversation_id, item)
    }

    async fn bulk_add_items(
        &self,
        conversation_id: i64,
        items: Vec<Item>,
    ) -> Result<Vec<Item>, RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.require_conversation(conversation_id)?;

        let mut written = Vec::with_capacity(items.len());
        for item in items {
            match tables.insert_item(conversation_id, item) {
                Ok(item) => written.push(item),
                Err(e) if written.is_empty() => return Err(e),
                Err(e) => {
                    return Err(RepositoryError::PartialWrite {
                        written: written.len(),
                        message: e.to_string(),
                    })
                }
            }
        }
        Ok(written)
    }

    async fn search_items(&self, conversation_id: i64, query: &str) -> Result<Vec<Item>, RepositoryError> {
        let needle = query.to_lowercase();
        let tables = self.tables.read().await;
        let mut items = tables
            .items
            .filter(|i| i.conversation_id == conversation_id && i.text().to_lowercase().contains(&needle));
        items.sort_by_key(|i| (i.created_at, i.id));
        Ok(items)
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryItemRepository {
    tables: Arc<RwLock<ConversationTables>>,
}

#[async_trait]
impl ItemRepository for InMemoryItemRepository {
    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<Item>, RepositoryError> {
        Ok(self.tables.read().await.items.find(|i| i.public_id == public_id))
    }

    async fn find_by_filter(&self, filter: ItemFilter, pagination: Pagination) -> Result<Page<Item>, RepositoryError> {
        let tables = self.tables.read().await;
        paginate(
            tables.items.filter(|i| filter.matches(i)),
            pagination,
            |i| (i.created_at, i.id),
            |id| tables.items.rows.get(&id).map(|i| (i.created_at, i.id)),
        )
    }

    async fn count(&self, filter: ItemFilter) -> Result<i64, RepositoryError> {
        let tables = self.tables.read().await;
        let count = tables.items.rows.values().filter(|i| filter.matches(i)).count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn exists_by_id_and_conversation(&self, item_id: i64, conversation_id: i64) -> Result<bool, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .items
            .rows
            .get(&item_id)
            .is_some_and(|i| i.conversation_id == conversation_id))
    }

    async fn delete(&self, id: i64) -> Result<(), RepositoryError> {
        self.tables.write().await.items.remove(id, "item").map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use services::{
        common::SortOrder,
        conversations::models::{Content, ConversationStatus, ItemRole, ItemStatus, ItemType},
    };
    use std::collections::BTreeMap;

    fn conversation(public_id: &str, user_id: i64) -> Conversation {
        Conversation {
            id: 0,
            public_id: public_id.to_string(),
            title: None,
            user_id,
            status: ConversationStatus::Active,
            is_private: true,
            metadata: BTreeMap::new(),
            created_at: 1,
            updated_at: 1,
            items: None,
        }
    }

    fn item(public_id: &str, role: ItemRole, text: &str) -> Item {
        Item {
            id: 0,
            public_id: public_id.to_string(),
            conversation_id: 0,
            response_id: None,
            item_type: ItemType::Message,
            role: Some(role),
            content: vec![Content::text(text)],
            status: Some(ItemStatus::Completed),
            incomplete_at: None,
            incomplete_details: None,
            completed_at: None,
            created_at: 5,
        }
    }

    #[tokio::test]
    async fn test_bulk_add_keeps_order_and_reports_partial_writes() {
        let repo = InMemoryConversationRepository::new();
        let conv = repo.create(conversation("conv_a", 1)).await.unwrap();
        let added = repo
            .bulk_add_items(
                conv.id,
                vec![item("msg_a", ItemRole::User, "hi"), item("msg_b", ItemRole::Assistant, "yo")],
            )
            .await
            .unwrap();
        assert_eq!(added.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(added.iter().all(|i| i.conversation_id == conv.id));

        let err = repo
            .bulk_add_items(
                conv.id,
                vec![item("msg_c", ItemRole::User, "x"), item("msg_a", ItemRole::User, "dup")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::PartialWrite { written: 1, .. }));
        assert!(repo.items().find_by_public_id("msg_c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_items_require_conversation() {
        let repo = InMemoryConversationRepository::new();
        assert!(matches!(
            repo.add_item(9, item("msg_a", ItemRole::User, "hi")).await,
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_cascades_to_items() {
        let repo = InMemoryConversationRepository::new();
        let items = repo.items();
        let conv = repo.create(conversation("conv_a", 1)).await.unwrap();
        let stored = repo.add_item(conv.id, item("msg_a", ItemRole::User, "hi")).await.unwrap();
        assert!(items.exists_by_id_and_conversation(stored.id, conv.id).await.unwrap());
        assert!(!items.exists_by_id_and_conversation(stored.id, conv.id + 1).await.unwrap());

        repo.delete(conv.id).await.unwrap();
        assert!(items.find_by_public_id("msg_a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_and_filtered_listing() {
        let repo = InMemoryConversationRepository::new();
        let items = repo.items();
        let conv = repo.create(conversation("conv_a", 1)).await.unwrap();
        repo.bulk_add_items(
            conv.id,
            vec![
                item("msg_a", ItemRole::System, "be brief"),
                item("msg_b", ItemRole::User, "Weather in Paris"),
                item("msg_c", ItemRole::Assistant, "sunny in paris"),
            ],
        )
        .await
        .unwrap();

        let found = repo.search_items(conv.id, "paris").await.unwrap();
        assert_eq!(found.len(), 2);

        let filter = ItemFilter {
            conversation_id: Some(conv.id),
            exclude_role: Some(ItemRole::Assistant),
            ..Default::default()
        };
        let page = items
            .find_by_filter(filter.clone(), Pagination::new(10, SortOrder::Desc))
            .await
            .unwrap();
        assert_eq!(
            page.items.iter().map(|i| i.public_id.as_str()).collect::<Vec<_>>(),
            vec!["msg_b", "msg_a"]
        );
        assert_eq!(items.count(filter).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_by_owner() {
        let repo = InMemoryConversationRepository::new();
        repo.create(conversation("conv_a", 1)).await.unwrap();
        repo.create(conversation("conv_b", 2)).await.unwrap();
        repo.create(conversation("conv_c", 1)).await.unwrap();

        let filter = ConversationFilter {
            user_id: Some(1),
            ..Default::default()
        };
        let page = repo.find_by_filter(filter.clone(), Pagination::default()).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(!page.has_more);
        assert_eq!(repo.count(filter).await.unwrap(), 2);
    }
}
