pub mod conversation_service;
pub mod memory_store;
pub mod message_service;

pub use conversation_service::{
    ConversationOverview, ConversationService, CreateConversationCommand,
    UpdateConversationInfoCommand,
};
pub use memory_store::MemoryChatStore;
pub use message_service::{MessageService, SendMessageCommand};
