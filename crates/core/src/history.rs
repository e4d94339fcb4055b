//! Helpers behind the conversation history view.

use crate::model::Conversation;
use chrono::{DateTime, Utc};

pub const MAX_TITLE_LEN: usize = 100;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TitleValidationError {
    #[error("Title cannot be empty")]
    Empty,
    #[error("Title must be 100 characters or less")]
    TooLong,
}

/// Trims a user-supplied title and checks its length.
pub fn validate_title(title: &str) -> Result<String, TitleValidationError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(TitleValidationError::Empty);
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(TitleValidationError::TooLong);
    }
    Ok(title.to_string())
}

/// Case-insensitive substring search on titles. A blank query keeps everything.
pub fn filter_conversations(conversations: Vec<Conversation>, query: &str) -> Vec<Conversation> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return conversations;
    }
    conversations
        .into_iter()
        .filter(|c| c.title.to_lowercase().contains(&query))
        .collect()
}

/// Short label for a timestamp: `14:05`, `Yesterday`, `Tuesday` or `Mar 4`.
///
/// Days are whole 24-hour periods between `date` and `now`, in UTC.
pub fn relative_date_label(date: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let days = (now - date).num_days();
    match days {
        ..=0 => date.format("%H:%M").to_string(),
        1 => "Yesterday".to_string(),
        2..=6 => date.format("%A").to_string(),
        _ => date.format("%b %-d").to_string(),
    }
}
