//! Application configuration, loaded once from the environment at startup.

use secrecy::SecretString;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use whisperer_core::llm::DEFAULT_BASE_URL;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Where conversations are kept.
#[derive(Clone, Debug)]
pub enum StoreBackend {
    Memory,
    Supabase { url: String, key: SecretString },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: Option<SecretString>,
    pub openai_base_url: String,
    pub chat_model: String,
    pub title_model: String,
    pub store: StoreBackend,
    /// Raw `AUTH_TOKENS` value.
    pub auth_tokens: String,
    pub prompts_dir: Option<PathBuf>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// *   `BIND_ADDRESS`: Address and port to listen on. Defaults to "0.0.0.0:3000".
    /// *   `OPENAI_API_KEY`: (Optional) Enables the chat agent and generated titles.
    /// *   `OPENAI_BASE_URL`: (Optional) Any OpenAI-compatible endpoint.
    /// *   `CHAT_MODEL`: (Optional) Model answering questions. Defaults to "gpt-4o".
    /// *   `TITLE_MODEL`: (Optional) Model naming conversations. Defaults to "gpt-4o-mini".
    /// *   `SUPABASE_URL` / `SUPABASE_KEY`: (Optional) Both set selects the Supabase store.
    /// *   `AUTH_TOKENS`: `token=user_id:email:name` entries separated by `;`.
    /// *   `PROMPTS_DIR`: (Optional) Directory with `title.md` / `assistant.md` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let bind_address_str =
            env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = parse_bind_address(&bind_address_str)?;

        let openai_api_key = non_empty_var("OPENAI_API_KEY").map(SecretString::from);
        let openai_base_url =
            non_empty_var("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let chat_model = non_empty_var("CHAT_MODEL").unwrap_or_else(|| "gpt-4o".to_string());
        let title_model =
            non_empty_var("TITLE_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());

        let store = store_backend(non_empty_var("SUPABASE_URL"), non_empty_var("SUPABASE_KEY"))?;

        let auth_tokens = env::var("AUTH_TOKENS").unwrap_or_default();
        let prompts_dir = non_empty_var("PROMPTS_DIR").map(PathBuf::from);

        Ok(Self {
            bind_address,
            openai_api_key,
            openai_base_url,
            chat_model,
            title_model,
            store,
            auth_tokens,
            prompts_dir,
        })
    }
}

pub fn parse_bind_address(value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse::<SocketAddr>()
        .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))
}

fn store_backend(url: Option<String>, key: Option<String>) -> Result<StoreBackend, ConfigError> {
    match (url, key) {
        (Some(url), Some(key)) => Ok(StoreBackend::Supabase {
            url,
            key: SecretString::from(key),
        }),
        (None, None) => Ok(StoreBackend::Memory),
        (Some(_), None) => Err(ConfigError::MissingVar(
            "SUPABASE_KEY must be set when SUPABASE_URL is".to_string(),
        )),
        (None, Some(_)) => Err(ConfigError::MissingVar(
            "SUPABASE_URL must be set when SUPABASE_KEY is".to_string(),
        )),
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
