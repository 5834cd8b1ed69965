use std::sync::Arc;

use clap::ValueEnum;

use crate::cli::{clip, fmt_time, print_truncation, Output};
use crate::error::{Error, Result};
use crate::hydrate::ChatSession;
use crate::model::{Listing, Project, Session};
use crate::resolve::resolve_session;
use crate::search::{candidates, filter_tokens, fuzzy_search, SearchHit, SearchOptions, Searchable};
use crate::store::MetadataStore;

/// What `search` looks through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Scope {
    #[default]
    Sessions,
    Projects,
    /// Messages of one session (needs `--session`)
    Messages,
}

fn matches<T: Searchable>(items: Vec<T>, query: &str, exact: bool, options: &SearchOptions) -> Listing<SearchHit<T>> {
    if exact {
        let hits = filter_tokens(items, query)
            .into_iter()
            .map(|item| SearchHit { item, score: 0 })
            .collect();
        Listing::capped(hits, Some(options.limit))
    } else {
        fuzzy_search(candidates(items), query, options)
    }
}

fn print_sessions(listing: &Listing<SearchHit<Session>>) {
    for hit in &listing.items {
        let s = &hit.item;
        println!(
            "{:<32} {:<17} {}",
            clip(&s.session_id, 32),
            fmt_time(s.updated_at.or(s.created_at)),
            clip(s.display_title(), 50)
        );
    }
}

fn print_projects(listing: &Listing<SearchHit<Project>>) {
    for hit in &listing.items {
        println!(
            "{:<24} {}",
            clip(&hit.item.project_id, 24),
            hit.item.worktree.as_deref().unwrap_or("-")
        );
    }
}

pub async fn run(
    store: Arc<dyn MetadataStore>,
    out: Output,
    query: &str,
    scope: Scope,
    session_query: Option<&str>,
    exact: bool,
    options: &SearchOptions,
) -> Result<()> {
    match scope {
        Scope::Sessions => {
            let listing = matches(store.load_sessions(None)?, query, exact, options);
            out.emit(&listing, |l| {
                print_sessions(l);
                print_truncation(l.total, l.items.len());
            })
        }
        Scope::Projects => {
            let listing = matches(store.load_projects()?, query, exact, options);
            out.emit(&listing, |l| {
                print_projects(l);
                print_truncation(l.total, l.items.len());
            })
        }
        Scope::Messages => {
            let session_query = session_query.ok_or_else(|| {
                Error::InvalidArgument("--session is required for message search".into())
            })?;
            let session = resolve_session(store.as_ref(), session_query)?;
            // Content lives in parts, so every message is hydrated first.
            let chat = ChatSession::open(store, &session.session_id).await?;
            let messages = chat.hydrate_all().await?;
            chat.close();
            let listing = matches(messages, query, exact, options);
            out.emit(&listing, |l| {
                for hit in &l.items {
                    println!(
                        "{:<32} {:<10} {:<17} {}",
                        clip(&hit.item.message_id, 32),
                        hit.item.role.as_str(),
                        fmt_time(hit.item.created_at),
                        clip(&hit.item.preview_text, 60)
                    );
                }
                print_truncation(l.total, l.items.len());
            })
        }
    }
}
