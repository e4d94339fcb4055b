//! Conversation titles.
//!
//! A conversation starts with a provisional title cut from its first entry.
//! Once it holds both a question and an answer, a generated title replaces it.
//! Generation can fail; `assign_title` never does.

use crate::llm::{ChatCompletion, ChatMessage};
use crate::model::{DEFAULT_TITLE, PROVISIONAL_TITLE_CHARS, Role, TranscriptEntry, truncate_with_ellipsis};
use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;

/// At most this many leading messages are shown to the generator.
pub const TITLE_CONTEXT_MESSAGES: usize = 10;
/// Hard cap on a cleaned title, ellipsis included.
pub const MAX_TITLE_CHARS: usize = 60;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TitleGenerator: Send + Sync {
    /// Produces a raw title for `messages`. Output is cleaned by the caller.
    async fn generate(&self, messages: &[TranscriptEntry]) -> Result<String>;
}

/// True once there is at least one user and one assistant message.
pub fn has_enough_context(messages: &[TranscriptEntry]) -> bool {
    messages.len() >= 2
        && messages.iter().any(|m| m.role == Role::User)
        && messages.iter().any(|m| m.role == Role::Assistant)
}

/// Trims, drops surrounding quotes and one trailing `.`, `!` or `?`, and caps the length.
pub fn clean_title(raw: &str) -> String {
    let mut title = raw.trim();
    if let Some(rest) = title.strip_prefix(['"', '\'']) {
        title = rest;
    }
    if let Some(rest) = title.strip_suffix(['"', '\'']) {
        title = rest;
    }
    if let Some(rest) = title.strip_suffix(['.', '!', '?']) {
        title = rest;
    }
    let title = title.trim();

    if title.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        let head: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
        return format!("{head}...");
    }
    title.to_string()
}

/// The deterministic title used when generation fails.
pub fn fallback_title(messages: &[TranscriptEntry]) -> String {
    messages
        .iter()
        .find(|m| m.role == Role::User)
        .map(|m| truncate_with_ellipsis(&m.content, PROVISIONAL_TITLE_CHARS))
        .unwrap_or_else(|| DEFAULT_TITLE.to_string())
}

/// Generates a title for `messages`, falling back instead of failing.
pub async fn assign_title<G>(generator: &G, messages: &[TranscriptEntry]) -> String
where
    G: TitleGenerator + ?Sized,
{
    if messages.is_empty() {
        return DEFAULT_TITLE.to_string();
    }

    let context = &messages[..messages.len().min(TITLE_CONTEXT_MESSAGES)];
    match generator.generate(context).await {
        Ok(raw) => clean_title(&raw),
        Err(e) => {
            tracing::warn!(error = %e, "title generation failed, using fallback");
            fallback_title(messages)
        }
    }
}

/// Maximum completion length requested for a title.
const TITLE_MAX_TOKENS: u32 = 50;

/// Asks a chat model for a title.
pub struct LlmTitleGenerator {
    chat: Arc<dyn ChatCompletion>,
    system_prompt: String,
}

impl LlmTitleGenerator {
    pub fn new(chat: Arc<dyn ChatCompletion>, system_prompt: impl Into<String>) -> Self {
        Self {
            chat,
            system_prompt: system_prompt.into(),
        }
    }
}

fn conversation_text(messages: &[TranscriptEntry]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str().to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl TitleGenerator for LlmTitleGenerator {
    async fn generate(&self, messages: &[TranscriptEntry]) -> Result<String> {
        let prompt = format!(
            "Generate a title for this conversation:\n\n{}",
            conversation_text(messages)
        );
        let messages = [
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(prompt),
        ];
        self.chat.complete(&messages, Some(TITLE_MAX_TOKENS)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockChatCompletion;
    use anyhow::anyhow;

    fn qa() -> Vec<TranscriptEntry> {
        vec![
            TranscriptEntry::user("What does the EU AI Act say about biometric identification?"),
            TranscriptEntry::assistant("It restricts real-time remote biometric identification..."),
        ]
    }

    #[test]
    fn needs_both_sides_of_the_conversation() {
        assert!(!has_enough_context(&[]));
        assert!(!has_enough_context(&[TranscriptEntry::user("hi")]));
        assert!(!has_enough_context(&[
            TranscriptEntry::user("a"),
            TranscriptEntry::user("b"),
        ]));
        assert!(!has_enough_context(&[
            TranscriptEntry::assistant("a"),
            TranscriptEntry::assistant("b"),
        ]));
        assert!(has_enough_context(&qa()));
    }

    #[test]
    fn cleaning_strips_quotes_and_trailing_punctuation() {
        assert_eq!(clean_title("  \"GDPR Data Retention Rules.\"  "), "GDPR Data Retention Rules");
        assert_eq!(clean_title("'Model Training Guidelines'"), "Model Training Guidelines");
        assert_eq!(clean_title("Stripe Payment Flow?"), "Stripe Payment Flow");
        assert_eq!(clean_title("Already Clean"), "Already Clean");
    }

    #[test]
    fn cleaning_caps_length_at_sixty() {
        let cleaned = clean_title(&"word ".repeat(30));
        assert_eq!(cleaned.chars().count(), MAX_TITLE_CHARS);
        assert!(cleaned.ends_with("..."));
    }

    #[test]
    fn blank_output_becomes_default_title() {
        assert_eq!(clean_title("   "), DEFAULT_TITLE);
        assert_eq!(clean_title("\"\""), DEFAULT_TITLE);
    }

    #[test]
    fn fallback_uses_first_user_message() {
        let messages = vec![
            TranscriptEntry::assistant("Hello! Ask me about AI policies."),
            TranscriptEntry::user("x".repeat(70)),
        ];
        assert_eq!(fallback_title(&messages), format!("{}...", "x".repeat(50)));
        assert_eq!(
            fallback_title(&[TranscriptEntry::assistant("only me")]),
            DEFAULT_TITLE
        );
    }

    #[tokio::test]
    async fn generated_title_is_cleaned() {
        let mut generator = MockTitleGenerator::new();
        generator
            .expect_generate()
            .times(1)
            .returning(|_| Ok("\"EU AI Act Biometrics.\"".to_string()));

        assert_eq!(assign_title(&generator, &qa()).await, "EU AI Act Biometrics");
    }

    #[tokio::test]
    async fn generation_failure_falls_back_to_first_user_message() {
        let mut generator = MockTitleGenerator::new();
        generator
            .expect_generate()
            .times(1)
            .returning(|_| Err(anyhow!("rate limited")));

        let title = assign_title(&generator, &qa()).await;
        assert_eq!(title, "What does the EU AI Act say about biometric identi...");
    }

    #[tokio::test]
    async fn only_the_first_ten_messages_are_sent() {
        let mut generator = MockTitleGenerator::new();
        generator
            .expect_generate()
            .withf(|messages| messages.len() == TITLE_CONTEXT_MESSAGES)
            .times(1)
            .returning(|_| Ok("Long Policy Thread".to_string()));

        let messages: Vec<TranscriptEntry> = (0..14)
            .map(|i| {
                if i % 2 == 0 {
                    TranscriptEntry::user(format!("question {i}"))
                } else {
                    TranscriptEntry::assistant(format!("answer {i}"))
                }
            })
            .collect();
        assert_eq!(assign_title(&generator, &messages).await, "Long Policy Thread");
    }

    #[tokio::test]
    async fn empty_conversation_gets_default_without_calling_generator() {
        let mut generator = MockTitleGenerator::new();
        generator.expect_generate().never();
        assert_eq!(assign_title(&generator, &[]).await, DEFAULT_TITLE);
    }

    #[test]
    fn conversation_text_labels_roles() {
        assert_eq!(
            conversation_text(&[TranscriptEntry::user("q"), TranscriptEntry::assistant("a")]),
            "USER: q\n\nASSISTANT: a"
        );
    }

    #[tokio::test]
    async fn llm_generator_sends_prompt_and_conversation() {
        let mut chat = MockChatCompletion::new();
        chat.expect_complete()
            .withf(|messages, max_tokens| {
                messages.len() == 2
                    && messages[0].role == "system"
                    && messages[0].content == "Be brief."
                    && messages[1].content.starts_with("Generate a title for this conversation:\n\nUSER: ")
                    && *max_tokens == Some(TITLE_MAX_TOKENS)
            })
            .times(1)
            .returning(|_, _| Ok("EU AI Act Biometrics".to_string()));

        let generator = LlmTitleGenerator::new(Arc::new(chat), "Be brief.");
        let raw = generator.generate(&qa()).await.unwrap();
        assert_eq!(raw, "EU AI Act Biometrics");
    }
}
