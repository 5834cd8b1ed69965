//! Token usage aggregation
//!
//! Only assistant messages carry usage. A session with no readable usage is
//! `Unknown`; project and global totals count such sessions separately so a
//! sum never looks more complete than it is.

use tracing::debug;

use crate::error::Result;
use crate::model::{AggregateTokenSummary, ChatMessage, Role, TokenBreakdown, TokenSummary};
use crate::store::MetadataStore;

const OVERFLOW: &str = "token counts overflow";

/// Usage for a single message; `None` for messages that never carry usage.
pub fn message_summary(message: &ChatMessage) -> Option<TokenSummary> {
    match message.role {
        Role::Assistant => Some(
            message
                .tokens
                .clone()
                .unwrap_or_else(|| TokenSummary::unknown("no token data recorded")),
        ),
        _ => None,
    }
}

/// Sum the known per-message usage of one session.
pub fn session_summary(messages: &[ChatMessage]) -> TokenSummary {
    let mut known = 0usize;
    let mut assistant = 0usize;
    let mut total = Some(TokenBreakdown::default());

    for summary in messages.iter().filter_map(message_summary) {
        assistant += 1;
        if let Some(tokens) = summary.known() {
            known += 1;
            total = total.and_then(|t| t.checked_add(*tokens));
        }
    }

    if known > 0 {
        match total {
            Some(tokens) => TokenSummary::Known { tokens },
            None => TokenSummary::unknown(OVERFLOW),
        }
    } else if assistant == 0 {
        TokenSummary::unknown("session has no assistant messages")
    } else {
        TokenSummary::unknown(format!(
            "none of {} assistant messages has readable token data",
            assistant
        ))
    }
}

/// Combine per-session summaries.
pub fn aggregate<'a, I>(summaries: I) -> AggregateTokenSummary
where
    I: IntoIterator<Item = &'a TokenSummary>,
{
    let mut unknown_sessions = 0usize;
    let mut known_sessions = 0usize;
    let mut total = Some(TokenBreakdown::default());

    for summary in summaries {
        match summary {
            TokenSummary::Known { tokens } => {
                known_sessions += 1;
                total = total.and_then(|t| t.checked_add(*tokens));
            }
            TokenSummary::Unknown { .. } => unknown_sessions += 1,
        }
    }

    let total = match total {
        _ if known_sessions == 0 => TokenSummary::unknown("no session has readable token data"),
        Some(tokens) => TokenSummary::Known { tokens },
        None => TokenSummary::unknown(OVERFLOW),
    };

    AggregateTokenSummary {
        total,
        unknown_sessions,
    }
}

/// Usage of one session, looked up by exact id.
pub fn for_session(store: &dyn MetadataStore, session_id: &str) -> Result<TokenSummary> {
    let session = store.get_session(session_id)?;
    let messages = store.load_chat_index(&session.session_id)?;
    Ok(session_summary(&messages))
}

/// Usage across every session of one project, looked up by exact id.
pub fn for_project(store: &dyn MetadataStore, project_id: &str) -> Result<AggregateTokenSummary> {
    let project = store.get_project(project_id)?;
    aggregate_sessions(store, Some(&project.project_id))
}

/// Usage across the whole store.
pub fn global(store: &dyn MetadataStore) -> Result<AggregateTokenSummary> {
    aggregate_sessions(store, None)
}

fn aggregate_sessions(
    store: &dyn MetadataStore,
    project_id: Option<&str>,
) -> Result<AggregateTokenSummary> {
    let sessions = store.load_sessions(project_id)?;
    let mut summaries = Vec::with_capacity(sessions.len());
    for session in &sessions {
        let messages = store.load_chat_index(&session.session_id)?;
        summaries.push(session_summary(&messages));
    }
    let result = aggregate(&summaries);
    debug!(
        project = project_id.unwrap_or("*"),
        sessions = sessions.len(),
        unknown = result.unknown_sessions,
        "Aggregated token usage"
    );
    Ok(result)
}
