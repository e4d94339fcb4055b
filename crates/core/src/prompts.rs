use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const TITLE_PROMPT_KEY: &str = "title";
pub const ASSISTANT_PROMPT_KEY: &str = "assistant";

const DEFAULT_TITLE_PROMPT: &str = r#"You are a title generator for conversation histories. Your task is to create short, descriptive titles that capture the essence of conversations.

RULES:
1. Title MUST be 3-6 words only
2. NO filler words (like "Discussion about", "Conversation on", "Help with")
3. NO full sentences or punctuation at the end
4. Capture the PRIMARY intent or outcome
5. Make it SEARCHABLE - use specific keywords
6. Differentiate from similar topics

EXAMPLES:
- Good: "AI Policy Compliance Check"
- Good: "GDPR Data Retention Rules"
- Good: "Model Training Guidelines"
- Bad: "Discussion about calendar issues" (too long, has filler)
- Bad: "Help" (too vague)
- Bad: "A conversation about AI policies and regulations" (too long, sentence format)

Output ONLY the title, nothing else."#;

const DEFAULT_ASSISTANT_PROMPT: &str = r#"You are a knowledgeable assistant for AI platform policies and regulations.
- Answer questions about AI ethics, data privacy (GDPR, CCPA), content moderation, model usage and platform terms.
- Explain in plain language, keep answers short enough to be read aloud.
- If you are not sure about a policy detail, say so instead of guessing."#;

/// Reads every `*.md` file in `dir_path`, keyed by file stem.
pub fn load_prompts(dir_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();

    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read prompts directory: {}", dir_path.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem for prompt file")?
                .to_string();

            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;

            prompts.insert(prompt_key, content);
        }
    }

    Ok(prompts)
}

/// System prompts used by the title generator and the chat agent.
#[derive(Debug, Clone)]
pub struct Prompts {
    pub title: String,
    pub assistant: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE_PROMPT.to_string(),
            assistant: DEFAULT_ASSISTANT_PROMPT.to_string(),
        }
    }
}

impl Prompts {
    /// Built-in prompts, overridden by `title.md` / `assistant.md` when present.
    pub fn load(dir_path: Option<&Path>) -> Result<Self> {
        let mut prompts = Self::default();
        let Some(dir_path) = dir_path else {
            return Ok(prompts);
        };

        let mut overrides = load_prompts(dir_path)?;
        if let Some(title) = overrides.remove(TITLE_PROMPT_KEY) {
            prompts.title = title.trim().to_string();
        }
        if let Some(assistant) = overrides.remove(ASSISTANT_PROMPT_KEY) {
            prompts.assistant = assistant.trim().to_string();
        }
        for unused in overrides.keys() {
            tracing::warn!(prompt = %unused, "ignoring unknown prompt file");
        }
        Ok(prompts)
    }
}
