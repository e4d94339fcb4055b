//! `ConversationStore` over a Supabase (PostgREST) database.
//!
//! Expects two tables:
//! `conversations(id uuid, user_id text, title text, created_at, updated_at)` and
//! `messages(id uuid, conversation_id uuid, role text, content text, created_at)`.

use crate::model::{Conversation, ConversationWithMessages, DEFAULT_TITLE, Message, Role};
use crate::store::ConversationStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

const CONVERSATIONS: &str = "conversations";
const MESSAGES: &str = "messages";

#[derive(Debug, Deserialize)]
struct ConversationRow {
    id: Uuid,
    user_id: String,
    title: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.user_id,
            title: row.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub struct SupabaseStore {
    client: Client,
    rest_url: String,
    api_key: SecretString,
}

impl SupabaseStore {
    pub fn new(project_url: &str, api_key: SecretString) -> Self {
        Self {
            client: Client::new(),
            rest_url: rest_url(project_url),
            api_key,
        }
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let key = self.api_key.expose_secret();
        self.client
            .request(method, format!("{}/{table}", self.rest_url))
            .header("apikey", key)
            .bearer_auth(key)
    }

    /// Sends `request` and decodes the returned rows.
    async fn rows<T: DeserializeOwned>(request: RequestBuilder, what: &str) -> Result<Vec<T>> {
        request
            .send()
            .await
            .with_context(|| format!("{what}: request failed"))?
            .error_for_status()
            .with_context(|| format!("{what}: database returned an error status"))?
            .json::<Vec<T>>()
            .await
            .with_context(|| format!("{what}: unexpected response body"))
    }

    async fn touch(&self, id: Uuid) -> Result<()> {
        self.request(Method::PATCH, CONVERSATIONS)
            .query(&[("id", eq(id))])
            .json(&serde_json::json!({ "updated_at": Utc::now() }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn rest_url(project_url: &str) -> String {
    format!("{}/rest/v1", project_url.trim_end_matches('/'))
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

fn first<T>(rows: Vec<T>) -> Option<T> {
    rows.into_iter().next()
}

#[async_trait]
impl ConversationStore for SupabaseStore {
    async fn create_conversation(&self, owner_id: &str, title: &str) -> Result<Conversation> {
        let request = self
            .request(Method::POST, CONVERSATIONS)
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({ "user_id": owner_id, "title": title }));
        let rows: Vec<ConversationRow> = Self::rows(request, "create conversation").await?;
        first(rows)
            .map(Conversation::from)
            .context("create conversation: no row returned")
    }

    async fn add_message(
        &self,
        conversation_id: Uuid,
        role: Role,
        content: &str,
    ) -> Result<Message> {
        let request = self
            .request(Method::POST, MESSAGES)
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({
                "conversation_id": conversation_id,
                "role": role,
                "content": content,
            }));
        let message = first(Self::rows::<Message>(request, "add message").await?)
            .context("add message: no row returned")?;

        // The message is stored; a stale `updated_at` only affects list order.
        if let Err(e) = self.touch(conversation_id).await {
            tracing::warn!(%conversation_id, error = ?e, "failed to bump conversation timestamp");
        }
        Ok(message)
    }

    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>> {
        let request = self
            .request(Method::GET, CONVERSATIONS)
            .query(&[("user_id", eq(owner_id)), ("order", "updated_at.desc".into())]);
        let rows: Vec<ConversationRow> = Self::rows(request, "list conversations").await?;
        Ok(rows.into_iter().map(Conversation::from).collect())
    }

    async fn get_conversation_with_messages(
        &self,
        id: Uuid,
    ) -> Result<Option<ConversationWithMessages>> {
        let request = self
            .request(Method::GET, CONVERSATIONS)
            .query(&[("id", eq(id))]);
        let rows: Vec<ConversationRow> = Self::rows(request, "get conversation").await?;
        let Some(conversation) = first(rows) else {
            return Ok(None);
        };
        let messages = self.list_messages(id).await?;
        Ok(Some(ConversationWithMessages {
            conversation: conversation.into(),
            messages,
        }))
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let request = self.request(Method::GET, MESSAGES).query(&[
            ("conversation_id", eq(conversation_id)),
            ("order", "created_at.asc".into()),
        ]);
        Self::rows(request, "list messages").await
    }

    async fn update_title(&self, id: Uuid, title: &str) -> Result<Option<Conversation>> {
        let request = self
            .request(Method::PATCH, CONVERSATIONS)
            .header("Prefer", "return=representation")
            .query(&[("id", eq(id))])
            .json(&serde_json::json!({ "title": title, "updated_at": Utc::now() }));
        let rows: Vec<ConversationRow> = Self::rows(request, "update title").await?;
        Ok(first(rows).map(Conversation::from))
    }

    async fn delete_conversation(&self, id: Uuid) -> Result<bool> {
        self.request(Method::DELETE, MESSAGES)
            .query(&[("conversation_id", eq(id))])
            .send()
            .await
            .context("delete messages: request failed")?
            .error_for_status()
            .context("delete messages: database returned an error status")?;

        let request = self
            .request(Method::DELETE, CONVERSATIONS)
            .header("Prefer", "return=representation")
            .query(&[("id", eq(id))]);
        let rows: Vec<ConversationRow> = Self::rows(request, "delete conversation").await?;
        Ok(!rows.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_url_is_derived_from_project_url() {
        assert_eq!(
            rest_url("https://abcd.supabase.co/"),
            "https://abcd.supabase.co/rest/v1"
        );
        assert_eq!(rest_url("http://localhost:54321"), "http://localhost:54321/rest/v1");
    }

    #[test]
    fn conversation_rows_map_to_conversations() {
        let rows: Vec<ConversationRow> = serde_json::from_str(
            r#"[{
                "id": "6f9619ff-8b86-d011-b42d-00cf4fc964ff",
                "user_id": "user_2abc",
                "title": null,
                "created_at": "2025-03-14T09:05:00+00:00",
                "updated_at": "2025-03-14T09:06:00.123456+00:00"
            }]"#,
        )
        .unwrap();
        let conversation = Conversation::from(first(rows).unwrap());
        assert_eq!(conversation.owner_id, "user_2abc");
        assert_eq!(conversation.title, DEFAULT_TITLE);
        assert!(conversation.updated_at > conversation.created_at);
    }

    #[test]
    fn message_rows_decode_directly() {
        let messages: Vec<Message> = serde_json::from_str(
            r#"[{
                "id": "0d5c3c55-9b7e-4b7a-8a53-1f0b6a8f0e11",
                "conversation_id": "6f9619ff-8b86-d011-b42d-00cf4fc964ff",
                "role": "assistant",
                "content": "GDPR applies to personal data.",
                "created_at": "2025-03-14T09:05:01Z"
            }]"#,
        )
        .unwrap();
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].content, "GDPR applies to personal data.");
    }

    #[test]
    fn filters_use_postgrest_syntax() {
        let id = Uuid::nil();
        assert_eq!(eq(id), "eq.00000000-0000-0000-0000-000000000000");
        assert_eq!(eq("user_2abc"), "eq.user_2abc");
    }

    #[tokio::test]
    #[ignore = "needs SUPABASE_URL and SUPABASE_KEY"]
    async fn round_trip_against_a_live_project() -> Result<()> {
        dotenvy::dotenv().ok();
        let url = std::env::var("SUPABASE_URL")?;
        let key = SecretString::from(std::env::var("SUPABASE_KEY")?);
        let store = SupabaseStore::new(&url, key);

        let conversation = store.create_conversation("test_user", "Live test").await?;
        store.add_message(conversation.id, Role::User, "ping").await?;
        let stored = store
            .get_conversation_with_messages(conversation.id)
            .await?
            .context("conversation should exist")?;
        assert_eq!(stored.messages.len(), 1);
        assert!(store.delete_conversation(conversation.id).await?);
        Ok(())
    }
}
