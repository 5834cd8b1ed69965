//! Fuzzy and strict search over projects, sessions and chat messages
//!
//! Candidates carry a normalized `search_text` built once; nucleo scores each
//! against the parsed query. Ranking is score, then recency, then id, so the
//! same query over the same data always yields the same order.

use chrono::{DateTime, Utc};
use nucleo_matcher::pattern::{CaseMatching, Normalization, Pattern};
use nucleo_matcher::{Config, Matcher, Utf32Str};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::model::{ChatMessage, Listing, Project, Session, LOADING_PREVIEW};

/// Default result cap.
pub const DEFAULT_LIMIT: usize = 200;

/// Score reported for every item when the query is empty.
pub const MATCH_ALL_SCORE: u32 = u32::MAX;

/// Which timestamp breaks score ties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    /// updated, falling back to created
    #[default]
    Updated,
    /// created, falling back to updated
    Created,
}

/// Anything the search layer can rank.
pub trait Searchable {
    fn search_id(&self) -> &str;
    fn created_at(&self) -> Option<DateTime<Utc>>;
    fn updated_at(&self) -> Option<DateTime<Utc>>;
    /// Fields matched by both the fuzzy and the strict search.
    fn search_fields(&self) -> Vec<&str>;

    fn recency(&self, mode: SortMode) -> Option<DateTime<Utc>> {
        match mode {
            SortMode::Updated => self.updated_at().or_else(|| self.created_at()),
            SortMode::Created => self.created_at().or_else(|| self.updated_at()),
        }
    }
}

impl Searchable for Project {
    fn search_id(&self) -> &str {
        &self.project_id
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.project_id.as_str()];
        fields.extend(self.worktree.as_deref());
        fields.extend(self.vcs_kind.as_deref());
        fields
    }
}

impl Searchable for Session {
    fn search_id(&self) -> &str {
        &self.session_id
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![];
        fields.extend(self.title.as_deref());
        fields.push(self.session_id.as_str());
        fields.extend(self.directory.as_deref());
        fields.push(self.project_id.as_str());
        fields
    }
}

impl Searchable for ChatMessage {
    fn search_id(&self) -> &str {
        &self.message_id
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Hydrated messages match on their full part text; stubs only on id
    /// and role. Hydrate before searching content.
    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.message_id.as_str(), self.role.as_str()];
        match &self.parts {
            Some(parts) => {
                for part in parts {
                    fields.push(part.text.as_str());
                    fields.extend(part.tool_name.as_deref());
                }
            }
            None if self.preview_text != LOADING_PREVIEW => {
                fields.push(self.preview_text.as_str());
            }
            None => {}
        }
        fields
    }
}

/// Collapse runs of whitespace to single spaces and trim.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// An item paired with the text it is matched against.
#[derive(Debug, Clone)]
pub struct Candidate<T> {
    pub item: T,
    pub search_text: String,
}

impl<T: Searchable> Candidate<T> {
    pub fn new(item: T) -> Self {
        let search_text = normalize(&item.search_fields().join(" "));
        Self { item, search_text }
    }
}

/// Build candidates for a list of items, keeping their order.
pub fn candidates<T: Searchable>(items: Vec<T>) -> Vec<Candidate<T>> {
    items.into_iter().map(Candidate::new).collect()
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub sort: SortMode,
    /// Matches scoring below this are dropped
    pub min_score: u32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            sort: SortMode::default(),
            min_score: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit<T> {
    pub item: T,
    pub score: u32,
}

fn rank<T: Searchable>(a: &SearchHit<T>, b: &SearchHit<T>, sort: SortMode) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.item.recency(sort).cmp(&a.item.recency(sort)))
        .then_with(|| a.item.search_id().cmp(b.item.search_id()))
}

/// Fuzzy search. An empty query returns every candidate in input order,
/// uncapped, each with [`MATCH_ALL_SCORE`].
pub fn fuzzy_search<T: Searchable>(
    candidates: Vec<Candidate<T>>,
    query: &str,
    options: &SearchOptions,
) -> Listing<SearchHit<T>> {
    let query = normalize(query);
    if query.is_empty() {
        let hits = candidates
            .into_iter()
            .map(|c| SearchHit {
                item: c.item,
                score: MATCH_ALL_SCORE,
            })
            .collect();
        return Listing::capped(hits, None);
    }

    let mut matcher = Matcher::new(Config::DEFAULT);
    let pattern = Pattern::parse(&query, CaseMatching::Ignore, Normalization::Smart);
    let mut buf = Vec::new();

    let mut hits: Vec<SearchHit<T>> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let score =
                pattern.score(Utf32Str::new(&candidate.search_text, &mut buf), &mut matcher)?;
            (score >= options.min_score).then_some(SearchHit {
                item: candidate.item,
                score,
            })
        })
        .collect();

    hits.sort_by(|a, b| rank(a, b, options.sort));
    Listing::capped(hits, Some(options.limit))
}

/// Every whitespace-separated token must appear, case-insensitively, as a
/// substring of at least one field. Order is preserved.
pub fn filter_tokens<T: Searchable>(items: Vec<T>, query: &str) -> Vec<T> {
    let tokens: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
    if tokens.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter(|item| {
            let fields: Vec<String> = item
                .search_fields()
                .iter()
                .map(|f| f.to_lowercase())
                .collect();
            tokens
                .iter()
                .all(|token| fields.iter().any(|field| field.contains(token.as_str())))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChatPart, PartType, Role};
    use chrono::TimeZone;

    fn session(id: &str, title: &str, updated_ms: i64) -> Session {
        Session {
            session_id: id.into(),
            project_id: "prj_1".into(),
            directory: Some("/work/app".into()),
            title: Some(title.into()),
            version: None,
            created_at: None,
            updated_at: Utc.timestamp_millis_opt(updated_ms).single(),
        }
    }

    fn fixtures() -> Vec<Session> {
        vec![
            session("ses_c", "refactor parser", 300),
            session("ses_a", "fix   login\tbug", 100),
            session("ses_b", "login page styling", 200),
        ]
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize("  fix \n login\t bug "), "fix login bug");
    }

    #[test]
    fn test_empty_query_returns_all_in_order() {
        let result = fuzzy_search(candidates(fixtures()), "   ", &SearchOptions::default());
        let ids: Vec<_> = result.items.iter().map(|h| h.item.session_id.as_str()).collect();
        assert_eq!(ids, vec!["ses_c", "ses_a", "ses_b"]);
        assert!(result.items.iter().all(|h| h.score == MATCH_ALL_SCORE));
        assert!(!result.truncated);
    }

    #[test]
    fn test_no_match_is_empty() {
        let result = fuzzy_search(candidates(fixtures()), "zzqqxx", &SearchOptions::default());
        assert!(result.items.is_empty());
        assert_eq!(result.total, 0);
    }

    #[test]
    fn test_ranking_is_deterministic() {
        let options = SearchOptions::default();
        let first = fuzzy_search(candidates(fixtures()), "login", &options);
        let second = fuzzy_search(candidates(fixtures()), "login", &options);
        let ids = |l: &Listing<SearchHit<Session>>| {
            l.items
                .iter()
                .map(|h| h.item.session_id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
        assert!(ids(&first).contains(&"ses_a".to_string()));
        assert!(ids(&first).contains(&"ses_b".to_string()));
        assert!(!ids(&first).contains(&"ses_c".to_string()));
        for pair in first.items.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_equal_scores_break_by_recency_then_id() {
        let items = vec![
            session("ses_2", "same", 100),
            session("ses_1", "same", 100),
            session("ses_3", "same", 500),
        ];
        let result = fuzzy_search(candidates(items), "same", &SearchOptions::default());
        let ids: Vec<_> = result.items.iter().map(|h| h.item.session_id.as_str()).collect();
        assert_eq!(ids, vec!["ses_3", "ses_1", "ses_2"]);
    }

    #[test]
    fn test_limit_caps_results() {
        let items: Vec<Session> = (0..10)
            .map(|i| session(&format!("ses_{}", i), "deploy", i))
            .collect();
        let options = SearchOptions {
            limit: 3,
            ..Default::default()
        };
        let result = fuzzy_search(candidates(items), "deploy", &options);
        assert_eq!(result.items.len(), 3);
        assert_eq!(result.total, 10);
        assert!(result.truncated);
    }

    fn message(id: &str, parts: Option<Vec<(&str, Option<&str>)>>) -> ChatMessage {
        ChatMessage {
            session_id: "ses_1".into(),
            message_id: id.into(),
            role: Role::User,
            created_at: None,
            parent_id: None,
            tokens: None,
            parts: parts.map(|parts| {
                parts
                    .into_iter()
                    .enumerate()
                    .map(|(i, (text, tool))| ChatPart {
                        part_id: format!("prt_{}", i),
                        message_id: id.into(),
                        part_type: if tool.is_some() { PartType::Tool } else { PartType::Text },
                        text: text.into(),
                        tool_name: tool.map(str::to_string),
                        tool_status: None,
                    })
                    .collect()
            }),
            preview_text: LOADING_PREVIEW.into(),
            total_chars: None,
        }
    }

    #[test]
    fn test_hydrated_messages_match_on_part_text() {
        let items = vec![
            message("msg_1", Some(vec![("intro", None), ("please fix the login form", None)])),
            message("msg_2", Some(vec![("cargo test output", Some("bash"))])),
            message("msg_3", None),
        ];
        let result = fuzzy_search(candidates(items.clone()), "login form", &SearchOptions::default());
        let ids: Vec<_> = result.items.iter().map(|h| h.item.message_id.as_str()).collect();
        assert_eq!(ids, vec!["msg_1"]);

        let hits = filter_tokens(items, "BASH output");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message_id, "msg_2");
    }

    #[test]
    fn test_filter_tokens_requires_every_token() {
        let hits = filter_tokens(fixtures(), "LOGIN bug");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].session_id, "ses_a");

        let hits = filter_tokens(fixtures(), "login /work");
        assert_eq!(hits.len(), 2);

        assert_eq!(filter_tokens(fixtures(), "").len(), 3);
        assert!(filter_tokens(fixtures(), "login nowhere").is_empty());
    }
}
