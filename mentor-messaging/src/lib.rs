pub mod service;
pub mod store;

pub use service::{conversation_key, ChatMessage, ChatService, ConversationSummary};
pub use store::{ChatStore, MemoryChatStore, PgChatStore};
