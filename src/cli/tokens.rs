use serde::Serialize;

use crate::cli::Output;
use crate::error::Result;
use crate::model::{AggregateTokenSummary, TokenSummary};
use crate::store::MetadataStore;
use crate::tokens;

fn print_summary(label: &str, summary: &TokenSummary) {
    match summary {
        TokenSummary::Known { tokens } => {
            println!("{}", label);
            println!("  input:       {:>12}", tokens.input());
            println!("  output:      {:>12}", tokens.output());
            println!("  reasoning:   {:>12}", tokens.reasoning());
            println!("  cache read:  {:>12}", tokens.cache_read());
            println!("  cache write: {:>12}", tokens.cache_write());
            println!("  total:       {:>12}", tokens.total());
        }
        TokenSummary::Unknown { reason } => println!("{}: unknown ({})", label, reason),
    }
}

fn print_aggregate(label: &str, aggregate: &AggregateTokenSummary) {
    print_summary(label, &aggregate.total);
    if aggregate.unknown_sessions > 0 {
        println!(
            "  {} session(s) without readable token data are not included",
            aggregate.unknown_sessions
        );
    }
}

#[derive(Serialize)]
struct Scoped<'a, T> {
    id: &'a str,
    #[serde(flatten)]
    summary: &'a T,
}

/// Exact session id only.
pub fn session(store: &dyn MetadataStore, out: Output, session_id: &str) -> Result<()> {
    let summary = tokens::for_session(store, session_id)?;
    let scoped = Scoped {
        id: session_id,
        summary: &summary,
    };
    out.emit(&scoped, |s| {
        print_summary(&format!("Session {}", s.id), s.summary)
    })
}

/// Exact project id only.
pub fn project(store: &dyn MetadataStore, out: Output, project_id: &str) -> Result<()> {
    let aggregate = tokens::for_project(store, project_id)?;
    let scoped = Scoped {
        id: project_id,
        summary: &aggregate,
    };
    out.emit(&scoped, |s| {
        print_aggregate(&format!("Project {}", s.id), s.summary)
    })
}

pub fn global(store: &dyn MetadataStore, out: Output) -> Result<()> {
    let aggregate = tokens::global(store)?;
    out.emit(&aggregate, |a| print_aggregate("All sessions", a))
}
