//! Shared application state injected into every handler.

use crate::config::{Config, StoreBackend};
use anyhow::{Context, Result};
use std::sync::Arc;
use whisperer_core::auth::{IdentityProvider, StaticTokenIdentity};
use whisperer_core::llm::{ChatClient, ChatCompletion};
use whisperer_core::prompts::Prompts;
use whisperer_core::store::{ConversationStore, MemoryStore};
use whisperer_core::supabase::SupabaseStore;
use whisperer_core::title::{LlmTitleGenerator, TitleGenerator};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ConversationStore>,
    pub identity: Arc<dyn IdentityProvider>,
    /// `None` leaves conversations with their provisional titles.
    pub titles: Option<Arc<dyn TitleGenerator>>,
    /// `None` disables live sessions.
    pub chat: Option<Arc<dyn ChatCompletion>>,
    pub prompts: Arc<Prompts>,
}

impl AppState {
    /// Wires the configured backends together.
    pub fn from_config(config: &Config) -> Result<Self> {
        let prompts = Prompts::load(config.prompts_dir.as_deref())
            .context("Failed to load LLM prompts")?;

        let store: Arc<dyn ConversationStore> = match &config.store {
            StoreBackend::Memory => {
                tracing::warn!("SUPABASE_URL not set, conversations are kept in memory only");
                Arc::new(MemoryStore::new())
            }
            StoreBackend::Supabase { url, key } => {
                tracing::info!(%url, "using Supabase conversation store");
                Arc::new(SupabaseStore::new(url, key.clone()))
            }
        };

        let identity = StaticTokenIdentity::parse(&config.auth_tokens)
            .context("Invalid AUTH_TOKENS")?;
        if identity.is_empty() {
            tracing::warn!("AUTH_TOKENS is empty, every request is anonymous");
        } else {
            tracing::info!(users = identity.len(), "loaded static auth tokens");
        }

        let (chat, titles) = match &config.openai_api_key {
            Some(key) => {
                let chat: Arc<dyn ChatCompletion> = Arc::new(
                    ChatClient::new(key.clone(), &config.chat_model)
                        .with_base_url(&config.openai_base_url),
                );
                let title_chat = Arc::new(
                    ChatClient::new(key.clone(), &config.title_model)
                        .with_base_url(&config.openai_base_url),
                );
                let titles: Arc<dyn TitleGenerator> =
                    Arc::new(LlmTitleGenerator::new(title_chat, prompts.title.clone()));
                (Some(chat), Some(titles))
            }
            None => {
                tracing::warn!("OPENAI_API_KEY not set, live sessions and generated titles are disabled");
                (None, None)
            }
        };

        Ok(Self {
            store,
            identity: Arc::new(identity),
            titles,
            chat,
            prompts: Arc::new(prompts),
        })
    }
}
