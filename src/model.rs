//! Backend-agnostic entity model
//!
//! Both storage backends project their records into these types; nothing
//! above the store ever sees a file path layout or a physical column name.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::path::Path;

/// Placeholder preview for messages whose parts have not been loaded.
pub const LOADING_PREVIEW: &str = "[loading…]";

/// Whether a project's worktree still exists on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistenceState {
    Present,
    Missing,
    Unknown,
}

impl ExistenceState {
    pub fn of_worktree(worktree: Option<&str>) -> Self {
        match worktree {
            None => ExistenceState::Unknown,
            Some(path) if path.trim().is_empty() => ExistenceState::Unknown,
            Some(path) if Path::new(path).is_dir() => ExistenceState::Present,
            Some(_) => ExistenceState::Missing,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExistenceState::Present => "present",
            ExistenceState::Missing => "missing",
            ExistenceState::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    pub project_id: String,
    pub worktree: Option<String>,
    pub vcs_kind: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub existence_state: ExistenceState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub session_id: String,
    pub project_id: String,
    pub directory: Option<String>,
    pub title: Option<String>,
    pub version: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("(untitled)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Unknown,
}

impl Role {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            Some("user") => Role::User,
            Some("assistant") => Role::Assistant,
            _ => Role::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub session_id: String,
    pub message_id: String,
    pub role: Role,
    pub created_at: Option<DateTime<Utc>>,
    pub parent_id: Option<String>,
    /// `None` for non-assistant messages; assistant messages always carry a
    /// summary, `Unknown` when the declared payload could not be read.
    pub tokens: Option<TokenSummary>,
    /// `None` until hydrated. `Some(vec![])` means hydrated and empty.
    pub parts: Option<Vec<ChatPart>>,
    pub preview_text: String,
    pub total_chars: Option<usize>,
}

impl ChatMessage {
    pub fn is_hydrated(&self) -> bool {
        self.parts.is_some()
    }
}

/// Sort messages by creation time, then id. Missing timestamps sort last.
pub fn sort_messages(messages: &mut [ChatMessage]) {
    messages.sort_by(|a, b| {
        let ka = a.created_at.map(|t| t.timestamp_millis()).unwrap_or(i64::MAX);
        let kb = b.created_at.map(|t| t.timestamp_millis()).unwrap_or(i64::MAX);
        ka.cmp(&kb).then_with(|| a.message_id.cmp(&b.message_id))
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartType {
    Text,
    Subtask,
    Tool,
    Unknown,
}

impl PartType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "text" => PartType::Text,
            "subtask" => PartType::Subtask,
            "tool" => PartType::Tool,
            _ => PartType::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatPart {
    pub part_id: String,
    pub message_id: String,
    #[serde(rename = "type")]
    pub part_type: PartType,
    pub text: String,
    pub tool_name: Option<String>,
    pub tool_status: Option<String>,
}

/// Usage counters. `total` is derived on every construction and always
/// equals the sum of the other five; counts whose sum does not fit in a
/// `u64` are rejected rather than clamped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenBreakdown {
    input: u64,
    output: u64,
    reasoning: u64,
    cache_read: u64,
    cache_write: u64,
    total: u64,
}

impl TokenBreakdown {
    /// `None` when the components overflow their total.
    pub fn new(
        input: u64,
        output: u64,
        reasoning: u64,
        cache_read: u64,
        cache_write: u64,
    ) -> Option<Self> {
        let total = input
            .checked_add(output)?
            .checked_add(reasoning)?
            .checked_add(cache_read)?
            .checked_add(cache_write)?;
        Some(Self {
            input,
            output,
            reasoning,
            cache_read,
            cache_write,
            total,
        })
    }

    pub fn input(&self) -> u64 {
        self.input
    }
    pub fn output(&self) -> u64 {
        self.output
    }
    pub fn reasoning(&self) -> u64 {
        self.reasoning
    }
    pub fn cache_read(&self) -> u64 {
        self.cache_read
    }
    pub fn cache_write(&self) -> u64 {
        self.cache_write
    }
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Component-wise sum, `None` on overflow.
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        TokenBreakdown::new(
            self.input.checked_add(rhs.input)?,
            self.output.checked_add(rhs.output)?,
            self.reasoning.checked_add(rhs.reasoning)?,
            self.cache_read.checked_add(rhs.cache_read)?,
            self.cache_write.checked_add(rhs.cache_write)?,
        )
    }
}

impl Serialize for TokenBreakdown {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("TokenBreakdown", 6)?;
        s.serialize_field("input", &self.input)?;
        s.serialize_field("output", &self.output)?;
        s.serialize_field("reasoning", &self.reasoning)?;
        s.serialize_field("cacheRead", &self.cache_read)?;
        s.serialize_field("cacheWrite", &self.cache_write)?;
        s.serialize_field("total", &self.total)?;
        s.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TokenSummary {
    Known { tokens: TokenBreakdown },
    Unknown { reason: String },
}

impl TokenSummary {
    pub fn unknown(reason: impl Into<String>) -> Self {
        TokenSummary::Unknown {
            reason: reason.into(),
        }
    }

    pub fn known(&self) -> Option<&TokenBreakdown> {
        match self {
            TokenSummary::Known { tokens } => Some(tokens),
            TokenSummary::Unknown { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateTokenSummary {
    pub total: TokenSummary,
    pub unknown_sessions: usize,
}

/// Outcome of a delete request. `removed` lists every path or row touched
/// (or that would be touched, in a dry run).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeleteResult {
    pub dry_run: bool,
    pub removed: Vec<String>,
    pub backed_up: Vec<String>,
}

/// A capped list with its pre-cap size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub limit: Option<usize>,
    pub truncated: bool,
}

impl<T> Listing<T> {
    pub fn capped(mut items: Vec<T>, limit: Option<usize>) -> Self {
        let total = items.len();
        let truncated = match limit {
            Some(limit) if total > limit => {
                items.truncate(limit);
                true
            }
            _ => false,
        };
        Self {
            items,
            total,
            limit,
            truncated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(id: &str, ms: Option<i64>) -> ChatMessage {
        ChatMessage {
            session_id: "ses_1".into(),
            message_id: id.into(),
            role: Role::User,
            created_at: ms.and_then(|m| Utc.timestamp_millis_opt(m).single()),
            parent_id: None,
            tokens: None,
            parts: None,
            preview_text: LOADING_PREVIEW.into(),
            total_chars: None,
        }
    }

    #[test]
    fn test_total_is_recomputed() {
        let t = TokenBreakdown::new(100, 50, 7, 3, 1).unwrap();
        assert_eq!(t.total(), 161);
        let sum = t.checked_add(TokenBreakdown::new(1, 1, 1, 1, 1).unwrap()).unwrap();
        assert_eq!(sum.total(), 166);
        assert_eq!(
            sum.total(),
            sum.input() + sum.output() + sum.reasoning() + sum.cache_read() + sum.cache_write()
        );
    }

    #[test]
    fn test_overflowing_counts_are_rejected() {
        assert!(TokenBreakdown::new(u64::MAX, 5, 0, 0, 0).is_none());
        let big = TokenBreakdown::new(u64::MAX - 1, 0, 0, 0, 0).unwrap();
        assert_eq!(big.total(), u64::MAX - 1);
        assert!(big.checked_add(big).is_none());
        let one = TokenBreakdown::new(0, 1, 0, 0, 0).unwrap();
        assert_eq!(big.checked_add(one).unwrap().total(), u64::MAX);
        assert!(big
            .checked_add(TokenBreakdown::new(0, 2, 0, 0, 0).unwrap())
            .is_none());
    }

    #[test]
    fn test_sort_messages_ties_and_missing_times() {
        let mut messages = vec![
            msg("msg_c", None),
            msg("msg_b", Some(10)),
            msg("msg_a", Some(10)),
            msg("msg_d", Some(5)),
        ];
        sort_messages(&mut messages);
        let ids: Vec<_> = messages.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["msg_d", "msg_a", "msg_b", "msg_c"]);
    }

    #[test]
    fn test_listing_truncation() {
        let listing = Listing::capped(vec![1, 2, 3], Some(2));
        assert_eq!(listing.items, vec![1, 2]);
        assert_eq!(listing.total, 3);
        assert!(listing.truncated);

        let listing = Listing::capped(vec![1], None);
        assert!(!listing.truncated);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse(Some("Assistant")), Role::Assistant);
        assert_eq!(Role::parse(Some("system")), Role::Unknown);
        assert_eq!(Role::parse(None), Role::Unknown);
    }
}
