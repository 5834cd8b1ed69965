use crate::cli::{clip, fmt_time, print_delete, print_truncation, Output};
use crate::error::Result;
use crate::model::{Listing, Session};
use crate::resolve::{resolve_project, resolve_session};
use crate::store::{DeleteOptions, MetadataStore};

fn print_session(verb: &str, session: &Session) {
    println!(
        "{} session '{}' ({}) in project {}",
        verb,
        session.display_title(),
        session.session_id,
        session.project_id
    );
}

pub fn list(
    store: &dyn MetadataStore,
    out: Output,
    project_query: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    let project_id = match project_query {
        Some(query) => Some(resolve_project(store, query)?.project_id),
        None => None,
    };
    let listing = Listing::capped(store.load_sessions(project_id.as_deref())?, limit);

    out.emit(&listing, |listing| {
        if listing.items.is_empty() {
            println!("No sessions found.");
            return;
        }

        println!("{:<32} {:<17} {:<24} {}", "ID", "Updated", "Project", "Title");
        println!("{}", "-".repeat(100));
        for s in &listing.items {
            println!(
                "{:<32} {:<17} {:<24} {}",
                clip(&s.session_id, 32),
                fmt_time(s.updated_at.or(s.created_at)),
                clip(&s.project_id, 24),
                clip(s.display_title(), 40)
            );
        }
        print_truncation(listing.total, listing.items.len());
    })
}

pub fn delete(
    store: &dyn MetadataStore,
    out: Output,
    session_query: &str,
    options: &DeleteOptions,
) -> Result<()> {
    let session = resolve_session(store, session_query)?;
    let result = store.delete_session(&session.session_id, options)?;
    out.emit(&result, print_delete)
}

pub fn move_to(
    store: &dyn MetadataStore,
    out: Output,
    session_query: &str,
    project_query: &str,
) -> Result<()> {
    let session = resolve_session(store, session_query)?;
    let project = resolve_project(store, project_query)?;
    let moved = store.move_session(&session.session_id, &project.project_id)?;
    out.emit(&moved, |s| print_session("Moved", s))
}

pub fn copy_to(
    store: &dyn MetadataStore,
    out: Output,
    session_query: &str,
    project_query: &str,
) -> Result<()> {
    let session = resolve_session(store, session_query)?;
    let project = resolve_project(store, project_query)?;
    let copy = store.copy_session(&session.session_id, &project.project_id)?;
    out.emit(&copy, |s| print_session("Created", s))
}

pub fn rename(store: &dyn MetadataStore, out: Output, session_query: &str, title: &str) -> Result<()> {
    let session = resolve_session(store, session_query)?;
    let renamed = store.rename_session(&session.session_id, title)?;
    out.emit(&renamed, |s| print_session("Renamed", s))
}
