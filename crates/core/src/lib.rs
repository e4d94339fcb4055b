pub mod auth;
pub mod chat_agent;
pub mod history;
pub mod llm;
pub mod model;
pub mod prompts;
pub mod store;
pub mod supabase;
pub mod synchronizer;
pub mod title;
pub mod voice;

pub use model::{AuthUser, Conversation, ConversationWithMessages, Message, Role, TranscriptEntry};
pub use store::{ConversationStore, MemoryStore};
pub use synchronizer::{SyncOutcome, TranscriptSynchronizer, Watermark};
