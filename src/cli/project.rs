use crate::cli::{clip, fmt_time, print_delete, print_truncation, Output};
use crate::error::Result;
use crate::model::Listing;
use crate::resolve::resolve_project;
use crate::store::{DeleteOptions, MetadataStore};

pub fn list(store: &dyn MetadataStore, out: Output, limit: Option<usize>) -> Result<()> {
    let listing = Listing::capped(store.load_projects()?, limit);
    out.emit(&listing, |listing| {
        if listing.items.is_empty() {
            println!("No projects found.");
            return;
        }

        println!("{:<24} {:<8} {:<17} {}", "ID", "State", "Created", "Worktree");
        println!("{}", "-".repeat(90));
        for p in &listing.items {
            println!(
                "{:<24} {:<8} {:<17} {}",
                clip(&p.project_id, 24),
                p.existence_state.as_str(),
                fmt_time(p.created_at),
                p.worktree.as_deref().unwrap_or("-")
            );
        }
        print_truncation(listing.total, listing.items.len());
    })
}

pub fn delete(
    store: &dyn MetadataStore,
    out: Output,
    project_query: &str,
    options: &DeleteOptions,
) -> Result<()> {
    let project = resolve_project(store, project_query)?;
    let result = store.delete_project(&project.project_id, options)?;
    out.emit(&result, print_delete)
}
