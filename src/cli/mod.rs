//! Command implementations behind the `opencode-manager` binary
//!
//! Each command resolves identifiers, calls the store, and prints either a
//! plain table or JSON.

pub mod chat;
pub mod project;
pub mod search;
pub mod session;
pub mod tokens;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::DeleteResult;

/// Output mode for every command.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    pub json: bool,
}

impl Output {
    /// Print `value` as JSON, or run `text` to print a table.
    pub fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            let body = serde_json::to_string_pretty(value)
                .map_err(|e| Error::InvalidArgument(format!("cannot encode output: {}", e)))?;
            println!("{}", body);
        } else {
            text(value);
        }
        Ok(())
    }
}

pub(crate) fn fmt_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Clip to `width` characters for table cells.
pub(crate) fn clip(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(width.saturating_sub(1)).collect();
    clipped.push('…');
    clipped
}

pub(crate) fn print_delete(result: &DeleteResult) {
    let verb = if result.dry_run { "Would remove" } else { "Removed" };
    for item in &result.removed {
        println!("{} {}", verb, item);
    }
    for item in &result.backed_up {
        println!("Backed up {}", item);
    }
    println!("{} {} item(s)", verb, result.removed.len());
}

pub(crate) fn print_truncation(total: usize, shown: usize) {
    if total > shown {
        println!("({} of {} shown)", shown, total);
    }
}
