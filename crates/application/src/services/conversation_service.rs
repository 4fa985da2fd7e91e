//! 会话管理服务
//!
//! 实现会话生命周期的核心业务逻辑：创建（单聊幂等 get-or-create）、
//! 信息更新、参与者变更、邀请加入、解散。每次成功的结构性变更都会
//! 合成一条系统消息记录变更并刷新会话预览，保证会话时间线可审计。

use std::sync::Arc;

use domain::{
    Conversation, ConversationId, ConversationRepository, DomainError, Message,
    MessageRepository, RepositoryError, UserId,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ApplicationError, ApplicationResult};
use crate::fanout::DeliveryFanout;

/// 创建会话命令
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConversationCommand {
    /// 参与者ID列表（任意顺序，内部规范化）
    pub participant_ids: Vec<UserId>,
    /// 是否为群聊
    pub is_group: bool,
    /// 会话名称（群聊可选）
    pub name: Option<String>,
    /// 创建者ID（缺省为规范化后的第一个参与者）
    pub creator_id: Option<UserId>,
}

/// 更新会话信息命令
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConversationInfoCommand {
    pub conversation_id: ConversationId,
    /// 操作者ID（已认证身份由调用方提供）
    pub updated_by: UserId,
    /// 操作者显示名（用于合成系统消息）
    pub updated_by_name: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
}

/// 会话列表条目：会话 + 请求者视角的未读数
#[derive(Debug, Clone, Serialize)]
pub struct ConversationOverview {
    pub conversation: Conversation,
    pub unread_count: u64,
}

/// 会话管理服务
pub struct ConversationService {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    fanout: DeliveryFanout,
}

impl ConversationService {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        fanout: DeliveryFanout,
    ) -> Self {
        Self {
            conversations,
            messages,
            fanout,
        }
    }

    /// 创建会话
    ///
    /// 单聊是幂等的 get-or-create：同一参与者对（任意顺序）解析为同一会话。
    /// 并发首次联系依赖存储层对规范化参与者对的唯一约束；约束触发时
    /// 重新读取并复用胜者。
    pub async fn create_conversation(
        &self,
        command: CreateConversationCommand,
    ) -> ApplicationResult<ConversationId> {
        let participants = Conversation::canonicalize(command.participant_ids)?;

        if command.is_group {
            let creator_id = command.creator_id.unwrap_or(participants[0]);
            let conversation = Conversation::new_group(participants, command.name, creator_id)?;
            self.conversations.create(&conversation).await?;

            info!(conversation_id = %conversation.id, "group conversation created");
            self.fanout.conversation_created(&conversation).await;
            return Ok(conversation.id);
        }

        if let Some(existing) = self
            .conversations
            .find_by_canonical_participants(&participants, false)
            .await?
        {
            return Ok(existing.id);
        }

        let conversation = Conversation::new_direct(participants)?;
        match self.conversations.create(&conversation).await {
            Ok(()) => {
                info!(conversation_id = %conversation.id, "direct conversation created");
                self.fanout.conversation_created(&conversation).await;
                Ok(conversation.id)
            }
            Err(RepositoryError::Domain(err)) if err.is_conflict() => {
                // 双方同时发起首次联系：唯一约束触发后复用胜者
                let winner = self
                    .conversations
                    .find_by_canonical_participants(&conversation.participant_ids, false)
                    .await?
                    .ok_or(ApplicationError::Domain(err))?;
                Ok(winner.id)
            }
            Err(other) => Err(other.into()),
        }
    }

    /// 更新会话信息
    ///
    /// 只应用实际提供且发生变化的字段；有变化时合成一条汇总系统消息
    /// （例如 `Alice renamed the group to "X", updated the group photo.`）。
    /// 返回合成的系统消息内容（无变化时为 None）。
    pub async fn update_conversation_info(
        &self,
        command: UpdateConversationInfoCommand,
    ) -> ApplicationResult<Option<String>> {
        let mut conversation = self.load(command.conversation_id).await?;

        if !conversation.is_participant(command.updated_by) {
            return Err(DomainError::forbidden("not a participant of this conversation").into());
        }
        if conversation.is_group && command.updated_by != conversation.creator_id {
            return Err(
                DomainError::forbidden("only the group creator can update group info").into(),
            );
        }

        let changes =
            conversation.update_info(command.name, command.description, command.avatar_url);
        if changes.is_empty() {
            return Ok(None);
        }

        let content = format!("{} {}.", command.updated_by_name, changes.join(", "));
        let message = self
            .append_system_message(&mut conversation, &content)
            .await?;

        self.fanout.conversation_updated(&conversation).await;
        self.fanout.message_created(&conversation, &message).await;

        Ok(Some(content))
    }

    /// 向群聊追加参与者（仅创建者）
    pub async fn add_participants(
        &self,
        conversation_id: ConversationId,
        requester_id: UserId,
        participant_ids: Vec<UserId>,
        participant_names: Vec<String>,
    ) -> ApplicationResult<()> {
        let mut conversation = self.load(conversation_id).await?;

        if requester_id != conversation.creator_id {
            return Err(
                DomainError::forbidden("only the group creator can add participants").into(),
            );
        }

        let added = conversation.add_participants(&participant_ids)?;
        if added.is_empty() {
            return Ok(());
        }

        let names = if participant_names.is_empty() {
            "New members".to_string()
        } else {
            participant_names.join(", ")
        };
        let content = format!("{} were added to the group", names);
        let message = self
            .append_system_message(&mut conversation, &content)
            .await?;

        info!(
            conversation_id = %conversation.id,
            added = added.len(),
            "participants added"
        );
        self.fanout.conversation_updated(&conversation).await;
        self.fanout.message_created(&conversation, &message).await;

        Ok(())
    }

    /// 将参与者移出群聊（仅创建者；创建者本人不可被移除）
    ///
    /// 更新通知发给当前参与者集合，并单独发给被移除者，
    /// 使其客户端能感知自己被移出。
    pub async fn remove_participant(
        &self,
        conversation_id: ConversationId,
        requester_id: UserId,
        participant_id: UserId,
        participant_name: &str,
    ) -> ApplicationResult<()> {
        let mut conversation = self.load(conversation_id).await?;

        if requester_id != conversation.creator_id {
            return Err(
                DomainError::forbidden("only the group creator can remove participants").into(),
            );
        }

        if !conversation.remove_participant(participant_id)? {
            return Ok(());
        }

        let content = format!("{} was removed from the group", participant_name);
        let message = self
            .append_system_message(&mut conversation, &content)
            .await?;

        info!(
            conversation_id = %conversation.id,
            participant_id = %participant_id,
            "participant removed"
        );
        self.fanout.conversation_updated(&conversation).await;
        self.fanout
            .conversation_updated_for_removed(&conversation, participant_id)
            .await;
        self.fanout.message_created(&conversation, &message).await;

        Ok(())
    }

    /// 主动退出群聊
    ///
    /// 创建者是永久参与者，不能退出，只能解散。
    pub async fn leave_conversation(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        user_name: &str,
    ) -> ApplicationResult<()> {
        let mut conversation = self.load(conversation_id).await?;

        if !conversation.is_group {
            return Err(DomainError::forbidden("cannot leave a direct conversation").into());
        }
        if user_id == conversation.creator_id {
            return Err(DomainError::forbidden(
                "the group creator cannot leave; disband the group instead",
            )
            .into());
        }

        if !conversation.remove_participant(user_id)? {
            return Ok(());
        }

        let content = format!("{} left the group", user_name);
        let message = self
            .append_system_message(&mut conversation, &content)
            .await?;

        info!(conversation_id = %conversation.id, user_id = %user_id, "participant left");
        self.fanout.conversation_updated(&conversation).await;
        self.fanout.message_created(&conversation, &message).await;

        Ok(())
    }

    /// 解散群聊（仅创建者），级联删除全部消息
    pub async fn disband_conversation(
        &self,
        conversation_id: ConversationId,
        requester_id: UserId,
    ) -> ApplicationResult<()> {
        let conversation = self.load(conversation_id).await?;

        if !conversation.is_group {
            return Err(DomainError::forbidden("cannot disband a direct conversation").into());
        }
        if requester_id != conversation.creator_id {
            return Err(
                DomainError::forbidden("only the group creator can disband the group").into(),
            );
        }

        let former_participants = conversation.participant_ids.clone();

        self.conversations.delete(conversation_id).await?;
        let deleted = self.messages.delete_by_conversation(conversation_id).await?;

        info!(
            conversation_id = %conversation_id,
            deleted_messages = deleted,
            "conversation disbanded"
        );
        self.fanout
            .conversation_disbanded(conversation_id, requester_id, former_participants)
            .await;

        Ok(())
    }

    /// 通过邀请令牌加入群聊
    ///
    /// 幂等：已在群内的用户重复加入是成功的无操作而非错误。
    pub async fn join_by_invite_token(
        &self,
        token: &str,
        user_id: UserId,
        user_name: &str,
    ) -> ApplicationResult<ConversationId> {
        let mut conversation = self
            .conversations
            .find_by_invite_token(token)
            .await?
            .ok_or_else(|| DomainError::not_found("invite_token", token))?;

        if conversation.is_participant(user_id) {
            return Ok(conversation.id);
        }

        conversation.add_participants(&[user_id])?;

        let content = format!("{} joined the group via invite link", user_name);
        let message = self
            .append_system_message(&mut conversation, &content)
            .await?;

        info!(conversation_id = %conversation.id, user_id = %user_id, "joined via invite");
        self.fanout.conversation_updated(&conversation).await;
        self.fanout.message_created(&conversation, &message).await;

        Ok(conversation.id)
    }

    /// 重新生成邀请令牌（仅创建者），旧令牌随即失效
    pub async fn regenerate_invite_token(
        &self,
        conversation_id: ConversationId,
        requester_id: UserId,
    ) -> ApplicationResult<String> {
        let mut conversation = self.load(conversation_id).await?;

        if requester_id != conversation.creator_id {
            return Err(DomainError::forbidden(
                "only the group creator can regenerate the invite token",
            )
            .into());
        }

        let token = conversation.regenerate_invite_token()?.to_string();
        self.conversations.update(&conversation).await?;
        self.fanout.conversation_updated(&conversation).await;

        Ok(token)
    }

    /// 用户的会话列表（按最近活跃排序），附带请求者视角的未读数
    pub async fn list_for_user(
        &self,
        user_id: UserId,
    ) -> ApplicationResult<Vec<ConversationOverview>> {
        let conversations = self.conversations.find_by_participant(user_id).await?;

        let mut result = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let unread_count = self.messages.count_unread(conversation.id, user_id).await?;
            result.push(ConversationOverview {
                conversation,
                unread_count,
            });
        }
        Ok(result)
    }

    async fn load(&self, conversation_id: ConversationId) -> ApplicationResult<Conversation> {
        self.conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| {
                DomainError::not_found("conversation", conversation_id.to_string()).into()
            })
    }

    /// 合成系统消息并刷新会话的最后消息预览
    async fn append_system_message(
        &self,
        conversation: &mut Conversation,
        content: &str,
    ) -> ApplicationResult<Message> {
        let message = Message::new_system(conversation.id, content)?;
        self.messages.insert(&message).await?;

        conversation.update_last_message(message.id, message.render_preview(), message.created_at);
        self.conversations.update(conversation).await?;

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::memory::RecordingSink;
    use crate::services::memory_store::MemoryChatStore;
    use domain::{ChatEvent, MessageType, Pagination};
    use uuid::Uuid;

    fn user() -> UserId {
        UserId::new(Uuid::new_v4())
    }

    fn build_service() -> (
        ConversationService,
        Arc<MemoryChatStore>,
        Arc<RecordingSink>,
    ) {
        let store = Arc::new(MemoryChatStore::new());
        let sink = Arc::new(RecordingSink::new());
        let service = ConversationService::new(
            store.clone(),
            store.clone(),
            DeliveryFanout::new(sink.clone()),
        );
        (service, store, sink)
    }

    fn direct_command(a: UserId, b: UserId) -> CreateConversationCommand {
        CreateConversationCommand {
            participant_ids: vec![a, b],
            is_group: false,
            name: None,
            creator_id: None,
        }
    }

    fn group_command(creator: UserId, members: Vec<UserId>) -> CreateConversationCommand {
        CreateConversationCommand {
            participant_ids: members,
            is_group: true,
            name: Some("Team".to_string()),
            creator_id: Some(creator),
        }
    }

    #[tokio::test]
    async fn test_direct_creation_is_idempotent_across_pair_order() {
        let (service, _, _) = build_service();
        let a = user();
        let b = user();

        let first = service
            .create_conversation(direct_command(a, b))
            .await
            .unwrap();
        // 相同参与者对以相反顺序解析为同一会话
        let second = service
            .create_conversation(direct_command(b, a))
            .await
            .unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_participants_rejected() {
        let (service, _, _) = build_service();
        let err = service
            .create_conversation(CreateConversationCommand {
                participant_ids: vec![],
                is_group: false,
                name: None,
                creator_id: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err.as_domain(),
            Some(DomainError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_creation_race_resolved_by_rereading_winner() {
        // 模拟并发首次联系：查重读取发生在对方写入之前，
        // 创建时唯一约束触发，随后重读复用胜者。
        struct RacingStore {
            inner: Arc<MemoryChatStore>,
            first_lookup: std::sync::atomic::AtomicBool,
        }

        #[async_trait::async_trait]
        impl ConversationRepository for RacingStore {
            async fn create(&self, conversation: &Conversation) -> domain::RepositoryResult<()> {
                self.inner.create(conversation).await
            }
            async fn find_by_id(
                &self,
                id: ConversationId,
            ) -> domain::RepositoryResult<Option<Conversation>> {
                ConversationRepository::find_by_id(self.inner.as_ref(), id).await
            }
            async fn find_by_participant(
                &self,
                user_id: UserId,
            ) -> domain::RepositoryResult<Vec<Conversation>> {
                self.inner.find_by_participant(user_id).await
            }
            async fn find_by_canonical_participants(
                &self,
                participant_ids: &[UserId],
                is_group: bool,
            ) -> domain::RepositoryResult<Option<Conversation>> {
                // 第一次查重看不到对方刚写入的会话
                if !self
                    .first_lookup
                    .swap(true, std::sync::atomic::Ordering::SeqCst)
                {
                    return Ok(None);
                }
                self.inner
                    .find_by_canonical_participants(participant_ids, is_group)
                    .await
            }
            async fn find_by_invite_token(
                &self,
                token: &str,
            ) -> domain::RepositoryResult<Option<Conversation>> {
                self.inner.find_by_invite_token(token).await
            }
            async fn update(&self, conversation: &Conversation) -> domain::RepositoryResult<()> {
                ConversationRepository::update(self.inner.as_ref(), conversation).await
            }
            async fn delete(&self, id: ConversationId) -> domain::RepositoryResult<()> {
                self.inner.delete(id).await
            }
        }

        let inner = Arc::new(MemoryChatStore::new());
        let a = user();
        let b = user();

        // 对方已抢先创建
        let winner = Conversation::new_direct(vec![a, b]).unwrap();
        ConversationRepository::create(inner.as_ref(), &winner)
            .await
            .unwrap();

        let racing = Arc::new(RacingStore {
            inner: inner.clone(),
            first_lookup: std::sync::atomic::AtomicBool::new(false),
        });
        let sink = Arc::new(RecordingSink::new());
        let service =
            ConversationService::new(racing, inner.clone(), DeliveryFanout::new(sink));

        let id = service
            .create_conversation(direct_command(a, b))
            .await
            .unwrap();
        assert_eq!(id, winner.id);
    }

    #[tokio::test]
    async fn test_group_creation_broadcasts_to_participants() {
        let (service, store, sink) = build_service();
        let creator = user();
        let member = user();

        let id = service
            .create_conversation(group_command(creator, vec![creator, member]))
            .await
            .unwrap();

        let conversation = ConversationRepository::find_by_id(store.as_ref(), id)
            .await
            .unwrap()
            .unwrap();
        assert!(conversation.invite_token.is_some());

        let notifications = sink.drain().await;
        assert_eq!(notifications.len(), 1);
        assert_eq!(
            notifications[0].envelope.event.event_type(),
            "conversation.created"
        );
        assert_eq!(notifications[0].recipients.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_participant_authority_and_fanout() {
        let (service, _, sink) = build_service();
        let creator = user();
        let d = user();
        let e = user();

        let id = service
            .create_conversation(group_command(creator, vec![creator, d, e]))
            .await
            .unwrap();
        sink.drain().await;

        // 非创建者移除他人：权限拒绝
        let err = service
            .remove_participant(id, d, e, "Eve")
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_domain(),
            Some(DomainError::Forbidden { .. })
        ));

        // 创建者移除：成功，更新通知发给当前参与者并单独发给被移除者
        service
            .remove_participant(id, creator, e, "Eve")
            .await
            .unwrap();

        let notifications = sink.drain().await;
        assert_eq!(notifications.len(), 3);

        let updated_to_current = &notifications[0];
        assert_eq!(
            updated_to_current.envelope.event.event_type(),
            "conversation.updated"
        );
        assert_eq!(updated_to_current.recipients.len(), 2);
        assert!(!updated_to_current.recipients.contains(&e));

        let updated_to_removed = &notifications[1];
        assert_eq!(
            updated_to_removed.envelope.event.event_type(),
            "conversation.updated"
        );
        assert_eq!(updated_to_removed.recipients, vec![e]);

        // 系统消息记录了这次变更
        match &notifications[2].envelope.event {
            ChatEvent::MessageCreated { message } => {
                assert_eq!(message.message_type, MessageType::System);
                assert_eq!(
                    message.content.as_deref(),
                    Some("Eve was removed from the group")
                );
            }
            other => panic!("expected message.created, got {}", other.event_type()),
        }
    }

    #[tokio::test]
    async fn test_creator_cannot_leave_but_member_can() {
        let (service, store, _) = build_service();
        let creator = user();
        let member = user();

        let id = service
            .create_conversation(group_command(creator, vec![creator, member]))
            .await
            .unwrap();

        let err = service
            .leave_conversation(id, creator, "Carol")
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_domain(),
            Some(DomainError::Forbidden { .. })
        ));

        service
            .leave_conversation(id, member, "Mallory")
            .await
            .unwrap();

        let conversation = ConversationRepository::find_by_id(store.as_ref(), id)
            .await
            .unwrap()
            .unwrap();
        assert!(!conversation.is_participant(member));
        // 系统消息成为最新预览
        assert_eq!(
            conversation.last_message.as_ref().unwrap().preview,
            "Mallory left the group"
        );
    }

    #[tokio::test]
    async fn test_disband_cascades_and_notifies_former_participants() {
        let (service, store, sink) = build_service();
        let creator = user();
        let member = user();

        let id = service
            .create_conversation(group_command(creator, vec![creator, member]))
            .await
            .unwrap();
        service
            .join_by_invite_token(
                ConversationRepository::find_by_id(store.as_ref(), id)
                    .await
                    .unwrap()
                    .unwrap()
                    .invite_token
                    .as_deref()
                    .unwrap(),
                user(),
                "Peggy",
            )
            .await
            .unwrap();
        sink.drain().await;

        // 非创建者解散：权限拒绝
        let err = service.disband_conversation(id, member).await.unwrap_err();
        assert!(matches!(
            err.as_domain(),
            Some(DomainError::Forbidden { .. })
        ));

        service.disband_conversation(id, creator).await.unwrap();

        assert!(ConversationRepository::find_by_id(store.as_ref(), id)
            .await
            .unwrap()
            .is_none());
        // 级联删除消息
        let page = store
            .list_by_conversation(id, creator, Pagination::first_page())
            .await
            .unwrap();
        assert!(page.is_empty());

        let notifications = sink.drain().await;
        assert_eq!(notifications.len(), 1);
        assert_eq!(
            notifications[0].envelope.event.event_type(),
            "conversation.disbanded"
        );
        assert_eq!(notifications[0].recipients.len(), 3);
    }

    #[tokio::test]
    async fn test_join_by_invite_token_is_idempotent() {
        let (service, store, _) = build_service();
        let creator = user();
        let joiner = user();

        let id = service
            .create_conversation(group_command(creator, vec![creator]))
            .await
            .unwrap();
        let token = ConversationRepository::find_by_id(store.as_ref(), id)
            .await
            .unwrap()
            .unwrap()
            .invite_token
            .unwrap();

        let joined = service
            .join_by_invite_token(&token, joiner, "Trent")
            .await
            .unwrap();
        assert_eq!(joined, id);

        // 重复加入是成功的无操作
        let rejoined = service
            .join_by_invite_token(&token, joiner, "Trent")
            .await
            .unwrap();
        assert_eq!(rejoined, id);

        // 只合成了一条加入系统消息
        let page = store
            .list_by_conversation(id, creator, Pagination::first_page())
            .await
            .unwrap();
        assert_eq!(page.len(), 1);

        // 无效令牌
        let err = service
            .join_by_invite_token("bogus", joiner, "Trent")
            .await
            .unwrap_err();
        assert!(matches!(err.as_domain(), Some(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_update_info_synthesizes_change_clause_message() {
        let (service, _, sink) = build_service();
        let creator = user();

        let id = service
            .create_conversation(group_command(creator, vec![creator]))
            .await
            .unwrap();
        sink.drain().await;

        let content = service
            .update_conversation_info(UpdateConversationInfoCommand {
                conversation_id: id,
                updated_by: creator,
                updated_by_name: "Alice".to_string(),
                name: Some("Core Team".to_string()),
                description: None,
                avatar_url: Some("https://cdn.example.com/a.png".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(
            content.as_deref(),
            Some("Alice renamed the group to \"Core Team\", updated the group photo.")
        );

        // 无变化的更新不产生系统消息
        let content = service
            .update_conversation_info(UpdateConversationInfoCommand {
                conversation_id: id,
                updated_by: creator,
                updated_by_name: "Alice".to_string(),
                name: Some("Core Team".to_string()),
                description: None,
                avatar_url: None,
            })
            .await
            .unwrap();
        assert!(content.is_none());
    }

    #[tokio::test]
    async fn test_regenerate_invite_token_invalidates_old() {
        let (service, store, _) = build_service();
        let creator = user();

        let id = service
            .create_conversation(group_command(creator, vec![creator]))
            .await
            .unwrap();
        let old_token = ConversationRepository::find_by_id(store.as_ref(), id)
            .await
            .unwrap()
            .unwrap()
            .invite_token
            .unwrap();

        let new_token = service.regenerate_invite_token(id, creator).await.unwrap();
        assert_ne!(old_token, new_token);

        assert!(store
            .find_by_invite_token(&old_token)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_by_invite_token(&new_token)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_list_for_user_reports_unread_counts() {
        let (service, store, _) = build_service();
        let a = user();
        let b = user();

        let id = service
            .create_conversation(direct_command(a, b))
            .await
            .unwrap();

        let message =
            Message::new(id, a, "unread for b", MessageType::Text, None).unwrap();
        store.insert(&message).await.unwrap();

        let overviews = service.list_for_user(b).await.unwrap();
        assert_eq!(overviews.len(), 1);
        assert_eq!(overviews[0].unread_count, 1);

        let overviews = service.list_for_user(a).await.unwrap();
        assert_eq!(overviews[0].unread_count, 0);
    }
}
