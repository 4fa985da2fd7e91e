//! 内存实现的会话/消息存储（用于测试和简单实现）
//!
//! 会话与消息共享同一个存储实例（与文档型存储中单一上下文持有两个集合
//! 的形态一致），使"用户全部会话的未读总数"可以在存储层一次算出。

use std::collections::HashMap;

use domain::{
    Conversation, ConversationId, ConversationRepository, DomainError, Message, MessageId,
    MessageRepository, Pagination, RepositoryError, RepositoryResult, UserId,
};
use tokio::sync::RwLock;

/// 内存会话/消息存储
///
/// 对规范化参与者对施加唯一约束：同一对用户的第二次单聊创建返回冲突，
/// 由调用方重读复用（与存储层唯一索引的行为一致）。
#[derive(Default)]
pub struct MemoryChatStore {
    conversations: RwLock<HashMap<ConversationId, Conversation>>,
    messages: RwLock<HashMap<MessageId, Message>>,
    /// 会话消息索引：会话ID -> 消息ID列表（插入序）
    conversation_messages: RwLock<HashMap<ConversationId, Vec<MessageId>>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ConversationRepository for MemoryChatStore {
    async fn create(&self, conversation: &Conversation) -> RepositoryResult<()> {
        let mut conversations = self.conversations.write().await;

        // 写锁内检查规范化参与者对的唯一约束
        if !conversation.is_group {
            let duplicate = conversations.values().any(|existing| {
                !existing.is_group && existing.participant_ids == conversation.participant_ids
            });
            if duplicate {
                return Err(RepositoryError::Domain(DomainError::conflict(
                    "direct conversation already exists for this participant pair",
                )));
            }
        }

        conversations.insert(conversation.id, conversation.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: ConversationId) -> RepositoryResult<Option<Conversation>> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(&id).cloned())
    }

    async fn find_by_participant(&self, user_id: UserId) -> RepositoryResult<Vec<Conversation>> {
        let conversations = self.conversations.read().await;
        let mut result: Vec<Conversation> = conversations
            .values()
            .filter(|c| c.is_participant(user_id))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(result)
    }

    async fn find_by_canonical_participants(
        &self,
        participant_ids: &[UserId],
        is_group: bool,
    ) -> RepositoryResult<Option<Conversation>> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .values()
            .find(|c| c.is_group == is_group && c.participant_ids == participant_ids)
            .cloned())
    }

    async fn find_by_invite_token(&self, token: &str) -> RepositoryResult<Option<Conversation>> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .values()
            .find(|c| c.invite_token.as_deref() == Some(token))
            .cloned())
    }

    async fn update(&self, conversation: &Conversation) -> RepositoryResult<()> {
        let mut conversations = self.conversations.write().await;
        if !conversations.contains_key(&conversation.id) {
            return Err(RepositoryError::Domain(DomainError::not_found(
                "conversation",
                conversation.id.to_string(),
            )));
        }
        conversations.insert(conversation.id, conversation.clone());
        Ok(())
    }

    async fn delete(&self, id: ConversationId) -> RepositoryResult<()> {
        let mut conversations = self.conversations.write().await;
        conversations.remove(&id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl MessageRepository for MemoryChatStore {
    async fn insert(&self, message: &Message) -> RepositoryResult<()> {
        let mut messages = self.messages.write().await;
        messages.insert(message.id, message.clone());
        drop(messages);

        let mut index = self.conversation_messages.write().await;
        index
            .entry(message.conversation_id)
            .or_default()
            .push(message.id);
        Ok(())
    }

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        let messages = self.messages.read().await;
        Ok(messages.get(&id).cloned())
    }

    async fn update(&self, message: &Message) -> RepositoryResult<()> {
        let mut messages = self.messages.write().await;
        if !messages.contains_key(&message.id) {
            return Err(RepositoryError::Domain(DomainError::not_found(
                "message",
                message.id.to_string(),
            )));
        }
        messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn list_by_conversation(
        &self,
        conversation_id: ConversationId,
        viewer_id: UserId,
        pagination: Pagination,
    ) -> RepositoryResult<Vec<Message>> {
        let index = self.conversation_messages.read().await;
        let message_ids = index.get(&conversation_id).cloned().unwrap_or_default();
        drop(index);

        let messages = self.messages.read().await;
        let mut page: Vec<Message> = message_ids
            .iter()
            .filter_map(|id| messages.get(id))
            .filter(|m| m.visible_to(viewer_id))
            .cloned()
            .collect();

        // 最新在前
        page.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(page
            .into_iter()
            .skip(pagination.skip)
            .take(pagination.take)
            .collect())
    }

    async fn mark_deleted_for_user(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> RepositoryResult<()> {
        let mut messages = self.messages.write().await;
        if let Some(message) = messages.get_mut(&message_id) {
            message.mark_deleted_for_user(user_id);
        }
        Ok(())
    }

    async fn mark_read_bulk(
        &self,
        conversation_id: ConversationId,
        reader_id: UserId,
    ) -> RepositoryResult<u64> {
        let index = self.conversation_messages.read().await;
        let message_ids = index.get(&conversation_id).cloned().unwrap_or_default();
        drop(index);

        let mut messages = self.messages.write().await;
        let mut updated = 0;
        for id in message_ids {
            if let Some(message) = messages.get_mut(&id) {
                if message.is_unread_by(reader_id) && message.mark_read(reader_id) {
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn count_unread(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<u64> {
        let index = self.conversation_messages.read().await;
        let message_ids = index.get(&conversation_id).cloned().unwrap_or_default();
        drop(index);

        let messages = self.messages.read().await;
        let count = message_ids
            .iter()
            .filter_map(|id| messages.get(id))
            .filter(|m| m.is_unread_by(user_id))
            .count();
        Ok(count as u64)
    }

    async fn count_total_unread(&self, user_id: UserId) -> RepositoryResult<u64> {
        // 限定在用户参与的会话内统计
        let conversations = self.conversations.read().await;
        let conversation_ids: Vec<ConversationId> = conversations
            .values()
            .filter(|c| c.is_participant(user_id))
            .map(|c| c.id)
            .collect();
        drop(conversations);

        let mut total = 0;
        for conversation_id in conversation_ids {
            total += self.count_unread(conversation_id, user_id).await?;
        }
        Ok(total)
    }

    async fn delete_by_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<u64> {
        let mut index = self.conversation_messages.write().await;
        let message_ids = index.remove(&conversation_id).unwrap_or_default();
        drop(index);

        let mut messages = self.messages.write().await;
        let mut deleted = 0;
        for id in message_ids {
            if messages.remove(&id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::MessageType;
    use uuid::Uuid;

    fn user() -> UserId {
        UserId::new(Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_canonical_pair_uniqueness_constraint() {
        let store = MemoryChatStore::new();
        let a = user();
        let b = user();

        let first = Conversation::new_direct(vec![a, b]).unwrap();
        store.create(&first).await.unwrap();

        // 同一规范化参与者对的第二次创建触发冲突
        let second = Conversation::new_direct(vec![b, a]).unwrap();
        let err = store.create(&second).await.unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Domain(DomainError::Conflict { .. })
        ));

        // 群聊不受该约束影响
        let group = Conversation::new_group(vec![a, b], None, a).unwrap();
        store.create(&group).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_excludes_messages_hidden_for_viewer() {
        let store = MemoryChatStore::new();
        let a = user();
        let b = user();
        let conversation = Conversation::new_direct(vec![a, b]).unwrap();
        store.create(&conversation).await.unwrap();

        let visible =
            Message::new(conversation.id, a, "visible", MessageType::Text, None).unwrap();
        let mut hidden =
            Message::new(conversation.id, a, "hidden", MessageType::Text, None).unwrap();
        hidden.mark_deleted_for_user(b);

        store.insert(&visible).await.unwrap();
        store.insert(&hidden).await.unwrap();

        let page = store
            .list_by_conversation(conversation.id, b, Pagination::first_page())
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, visible.id);

        // 隐藏只作用于该用户的视图
        let page = store
            .list_by_conversation(conversation.id, a, Pagination::first_page())
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn test_list_is_newest_first_with_skip_take() {
        let store = MemoryChatStore::new();
        let a = user();
        let b = user();
        let conversation = Conversation::new_direct(vec![a, b]).unwrap();
        store.create(&conversation).await.unwrap();

        for i in 0..5 {
            let mut message =
                Message::new(conversation.id, a, format!("m{i}"), MessageType::Text, None)
                    .unwrap();
            message.created_at = chrono::Utc::now() + chrono::Duration::milliseconds(i);
            store.insert(&message).await.unwrap();
        }

        let page = store
            .list_by_conversation(conversation.id, b, Pagination::new(1, 2))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].content.as_deref(), Some("m3"));
        assert_eq!(page[1].content.as_deref(), Some("m2"));
    }

    #[tokio::test]
    async fn test_mark_read_bulk_and_unread_counts() {
        let store = MemoryChatStore::new();
        let a = user();
        let b = user();
        let conversation = Conversation::new_direct(vec![a, b]).unwrap();
        store.create(&conversation).await.unwrap();

        for i in 0..3 {
            let message =
                Message::new(conversation.id, a, format!("m{i}"), MessageType::Text, None)
                    .unwrap();
            store.insert(&message).await.unwrap();
        }

        // 发送者自身无未读
        assert_eq!(store.count_unread(conversation.id, a).await.unwrap(), 0);
        assert_eq!(store.count_unread(conversation.id, b).await.unwrap(), 3);
        assert_eq!(store.count_total_unread(b).await.unwrap(), 3);

        let updated = store.mark_read_bulk(conversation.id, b).await.unwrap();
        assert_eq!(updated, 3);
        assert_eq!(store.count_unread(conversation.id, b).await.unwrap(), 0);

        // 幂等：第二次批量已读无变更
        let updated = store.mark_read_bulk(conversation.id, b).await.unwrap();
        assert_eq!(updated, 0);
    }

    #[tokio::test]
    async fn test_total_unread_restricted_to_own_conversations() {
        let store = MemoryChatStore::new();
        let a = user();
        let b = user();
        let c = user();

        let ab = Conversation::new_direct(vec![a, b]).unwrap();
        let bc = Conversation::new_direct(vec![b, c]).unwrap();
        store.create(&ab).await.unwrap();
        store.create(&bc).await.unwrap();

        let m1 = Message::new(ab.id, a, "for b", MessageType::Text, None).unwrap();
        let m2 = Message::new(bc.id, c, "also for b", MessageType::Text, None).unwrap();
        store.insert(&m1).await.unwrap();
        store.insert(&m2).await.unwrap();

        // a 不参与 bc 会话，其未读总数只包含 ab 会话
        assert_eq!(store.count_total_unread(a).await.unwrap(), 0);
        assert_eq!(store.count_total_unread(b).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_by_conversation_cascades() {
        let store = MemoryChatStore::new();
        let a = user();
        let b = user();
        let conversation = Conversation::new_direct(vec![a, b]).unwrap();
        store.create(&conversation).await.unwrap();

        let message = Message::new(conversation.id, a, "hi", MessageType::Text, None).unwrap();
        store.insert(&message).await.unwrap();

        let deleted = store.delete_by_conversation(conversation.id).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(MessageRepository::find_by_id(&store, message.id)
            .await
            .unwrap()
            .is_none());
    }
}
