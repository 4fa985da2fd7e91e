pub mod conversation;
pub mod message;
pub mod presence;

pub use conversation::{Conversation, LastMessage};
pub use message::{Message, MessageType, Reaction, ReactionChange, ReplySnapshot};
pub use presence::{PresenceStatus, UserPresence};
