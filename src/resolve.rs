//! Identifier resolution: exact id, unique prefix, or (for messages) position

use crate::error::{Error, Result};
use crate::model::{ChatMessage, Project, Session};
use crate::store::MetadataStore;

/// Pick the one id that `query` names among `ids`.
pub fn resolve_id<'a, I>(entity: &'static str, query: &str, ids: I) -> Result<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let query = query.trim();
    if query.is_empty() {
        return Err(Error::InvalidArgument(format!("{} id must not be empty", entity)));
    }

    let mut matches: Vec<&str> = vec![];
    for id in ids {
        if id == query {
            return Ok(id.to_string());
        }
        if id.starts_with(query) {
            matches.push(id);
        }
    }

    match matches.as_slice() {
        [] => Err(Error::not_found(entity, query)),
        [only] => Ok(only.to_string()),
        _ => {
            matches.sort_unstable();
            Err(Error::Ambiguous {
                entity,
                prefix: query.to_string(),
                matches: matches.into_iter().map(str::to_string).collect(),
            })
        }
    }
}

/// Exact id first, so backend failures surface before any listing; then a
/// unique prefix.
pub fn resolve_project(store: &dyn MetadataStore, query: &str) -> Result<Project> {
    match store.get_project(query.trim()) {
        Err(Error::NotFound { .. }) => {}
        found => return found,
    }
    let projects = store.load_projects()?;
    let id = resolve_id("project", query, projects.iter().map(|p| p.project_id.as_str()))?;
    projects
        .into_iter()
        .find(|p| p.project_id == id)
        .ok_or_else(|| Error::not_found("project", id))
}

pub fn resolve_session(store: &dyn MetadataStore, query: &str) -> Result<Session> {
    match store.get_session(query.trim()) {
        Err(Error::NotFound { .. }) => {}
        found => return found,
    }
    let sessions = store.load_sessions(None)?;
    let id = resolve_id("session", query, sessions.iter().map(|s| s.session_id.as_str()))?;
    sessions
        .into_iter()
        .find(|s| s.session_id == id)
        .ok_or_else(|| Error::not_found("session", id))
}

/// Index into `messages` for a 1-based position or an id/prefix.
pub fn resolve_message(messages: &[ChatMessage], query: &str) -> Result<usize> {
    let query = query.trim();
    if let Ok(position) = query.parse::<usize>() {
        if (1..=messages.len()).contains(&position) {
            return Ok(position - 1);
        }
        return Err(Error::not_found(
            "message",
            format!("#{} (index has {})", position, messages.len()),
        ));
    }
    let id = resolve_id("message", query, messages.iter().map(|m| m.message_id.as_str()))?;
    messages
        .iter()
        .position(|m| m.message_id == id)
        .ok_or_else(|| Error::not_found("message", id))
}
