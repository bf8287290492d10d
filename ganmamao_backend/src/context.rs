//! Bounded conversation context assembled from the persisted log and the
//! in-memory session.

use crate::actions::strip_action;
use crate::log_store::{Direction, LogRecord};

/// Placeholder shown to the model when a section has no content.
pub const NONE_SENTINEL: &str = "无";

/// Number of most recent replies quoted back to the model as "do not reuse".
pub const AVOID_WINDOW: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    User,
    Character,
}

impl SessionRole {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionRole::User => Direction::User.as_str(),
            SessionRole::Character => Direction::Character.as_str(),
        }
    }
}

/// One line of the current conversation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub role: SessionRole,
    pub text: String,
}

impl SessionEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: SessionRole::User,
            text: text.into(),
        }
    }

    pub fn character(text: impl Into<String>) -> Self {
        Self {
            role: SessionRole::Character,
            text: text.into(),
        }
    }
}

fn tail<T>(items: &[T], count: usize) -> &[T] {
    &items[items.len().saturating_sub(count)..]
}

/// Keep the last `max_chars` characters, then drop everything through the
/// first line break so the result never opens mid-line.
pub fn truncate_tail(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.trim().to_string();
    }

    let start = text
        .char_indices()
        .nth(total - max_chars)
        .map(|(index, _)| index)
        .unwrap_or(text.len());
    let kept = &text[start..];
    let kept = match kept.split_once('\n') {
        Some((_, rest)) => rest,
        None => kept,
    };
    kept.trim().to_string()
}

fn finish(text: String) -> String {
    if text.is_empty() {
        NONE_SENTINEL.to_string()
    } else {
        text
    }
}

/// Context from the persisted log: the latest summary (if any) followed by
/// the last `max_turns` exchanges.
pub fn build_history_context(
    records: &[LogRecord],
    max_turns: usize,
    max_chars: usize,
) -> String {
    if records.is_empty() {
        return NONE_SENTINEL.to_string();
    }

    let summary = records
        .iter()
        .rev()
        .find(|record| record.direction == Direction::Summary)
        .map(|record| record.content.as_str());

    let dialog: Vec<&LogRecord> = records
        .iter()
        .filter(|record| record.direction.is_dialog())
        .collect();
    let history = tail(&dialog, max_turns * 2)
        .iter()
        .map(|record| format!("{}: {}", record.direction, record.content))
        .collect::<Vec<_>>()
        .join("\n");
    let history = history.trim();

    let combined = match summary {
        Some(summary) if !summary.is_empty() => {
            format!("summary: {summary}\n{history}").trim().to_string()
        }
        _ => history.to_string(),
    };

    finish(truncate_tail(&combined, max_chars))
}

/// Context from the current cycle only.
pub fn build_session_context(
    entries: &[SessionEntry],
    max_turns: usize,
    max_chars: usize,
) -> String {
    if entries.is_empty() {
        return NONE_SENTINEL.to_string();
    }

    let combined = tail(entries, max_turns * 2)
        .iter()
        .map(|entry| format!("{}: {}", entry.role.as_str(), entry.text))
        .collect::<Vec<_>>()
        .join("\n");

    finish(truncate_tail(combined.trim(), max_chars))
}

/// The last `limit` character replies with their action annotations removed.
pub fn recent_character_replies(records: &[LogRecord], limit: usize) -> Vec<String> {
    let replies: Vec<String> = records
        .iter()
        .filter(|record| record.direction == Direction::Character)
        .map(|record| strip_action(&record.content))
        .collect();
    tail(&replies, limit).to_vec()
}

/// The handful of most recent replies the model is told not to reuse.
pub fn avoid_text(recent: &[String]) -> String {
    finish(tail(recent, AVOID_WINDOW).join("\n"))
}
