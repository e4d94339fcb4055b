//! Persistence gateway for conversations and their messages.
//!
//! `ConversationStore` is the seam the synchronizer and the API depend on.
//! `MemoryStore` keeps everything in process and is the default backend;
//! `crate::supabase::SupabaseStore` talks to a hosted PostgREST database.

use crate::model::{Conversation, ConversationWithMessages, Message, Role};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
#[cfg(test)]
use mockall::automock;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// CRUD over conversations and messages.
///
/// Messages are append-only and come back in write order. Deleting a
/// conversation removes its messages with it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, owner_id: &str, title: &str) -> Result<Conversation>;

    async fn add_message(&self, conversation_id: Uuid, role: Role, content: &str)
    -> Result<Message>;

    /// Conversations owned by `owner_id`, most recently updated first.
    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>>;

    async fn get_conversation_with_messages(
        &self,
        id: Uuid,
    ) -> Result<Option<ConversationWithMessages>>;

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>>;

    /// The only mutation a conversation accepts. `None` if it does not exist.
    async fn update_title(&self, id: Uuid, title: &str) -> Result<Option<Conversation>>;

    /// Returns `false` when there was nothing to delete.
    async fn delete_conversation(&self, id: Uuid) -> Result<bool>;
}

#[derive(Default)]
struct Tables {
    conversations: HashMap<Uuid, Conversation>,
    messages: Vec<Message>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_conversation(&self, owner_id: &str, title: &str) -> Result<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.tables
            .write()
            .await
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn add_message(
        &self,
        conversation_id: Uuid,
        role: Role,
        content: &str,
    ) -> Result<Message> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let conversation = tables
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| anyhow!("conversation {conversation_id} does not exist"))?;
        conversation.updated_at = now;

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            role,
            content: content.to_string(),
            created_at: now,
        };
        tables.messages.push(message.clone());
        Ok(message)
    }

    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>> {
        let tables = self.tables.read().await;
        let mut owned: Vec<Conversation> = tables
            .conversations
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(owned)
    }

    async fn get_conversation_with_messages(
        &self,
        id: Uuid,
    ) -> Result<Option<ConversationWithMessages>> {
        let tables = self.tables.read().await;
        let Some(conversation) = tables.conversations.get(&id).cloned() else {
            return Ok(None);
        };
        let messages = tables
            .messages
            .iter()
            .filter(|m| m.conversation_id == id)
            .cloned()
            .collect();
        Ok(Some(ConversationWithMessages {
            conversation,
            messages,
        }))
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn update_title(&self, id: Uuid, title: &str) -> Result<Option<Conversation>> {
        let mut tables = self.tables.write().await;
        Ok(tables.conversations.get_mut(&id).map(|conversation| {
            conversation.title = title.to_string();
            conversation.updated_at = Utc::now();
            conversation.clone()
        }))
    }

    async fn delete_conversation(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let existed = tables.conversations.remove(&id).is_some();
        if existed {
            tables.messages.retain(|m| m.conversation_id != id);
        }
        Ok(existed)
    }
}
