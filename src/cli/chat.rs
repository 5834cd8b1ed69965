//! Chat commands: the message index, and one message's reconstructed content

use std::sync::Arc;

use crate::cli::{clip, fmt_time, Output};
use crate::error::Result;
use crate::hydrate::ChatSession;
use crate::model::{ChatMessage, PartType};
use crate::resolve::{resolve_message, resolve_session};
use crate::store::MetadataStore;
use crate::tokens::message_summary;

fn tokens_cell(message: &ChatMessage) -> String {
    match message_summary(message) {
        Some(summary) => match summary.known() {
            Some(tokens) => tokens.total().to_string(),
            None => "?".to_string(),
        },
        None => "-".to_string(),
    }
}

/// List a session's messages. With `full`, every message is hydrated so the
/// preview column shows real content.
pub async fn list(
    store: Arc<dyn MetadataStore>,
    out: Output,
    session_query: &str,
    full: bool,
) -> Result<()> {
    let session = resolve_session(store.as_ref(), session_query)?;
    let chat = ChatSession::open(store, &session.session_id).await?;
    let messages = if full {
        chat.hydrate_all().await?
    } else {
        chat.messages()
    };
    chat.close();

    out.emit(&messages, |messages| {
        println!("Session: {} ({})", session.display_title(), session.session_id);
        if messages.is_empty() {
            println!("No messages found (this may be an empty session).");
            return;
        }

        println!("{:<4} {:<10} {:<17} {:>8}  {}", "#", "Role", "Created", "Tokens", "Preview");
        println!("{}", "-".repeat(100));
        for (i, m) in messages.iter().enumerate() {
            println!(
                "{:<4} {:<10} {:<17} {:>8}  {}",
                i + 1,
                m.role.as_str(),
                fmt_time(m.created_at),
                tokens_cell(m),
                clip(&m.preview_text, 60)
            );
        }
    })
}

/// Print one message, by 1-based position or id prefix.
pub async fn show(
    store: Arc<dyn MetadataStore>,
    out: Output,
    session_query: &str,
    message_query: &str,
) -> Result<()> {
    let session = resolve_session(store.as_ref(), session_query)?;
    let chat = ChatSession::open(store, &session.session_id).await?;
    let index = resolve_message(&chat.messages(), message_query)?;
    let message_id = chat.messages()[index].message_id.clone();
    let message = chat.hydrate(&message_id).await?;
    chat.close();

    out.emit(&message, |m| {
        println!("\n{}", "=".repeat(80));
        println!(
            "[{}] {} ({})",
            m.role.as_str().to_uppercase(),
            m.message_id,
            fmt_time(m.created_at)
        );
        if let Some(parent) = &m.parent_id {
            println!("Reply to: {}", parent);
        }
        println!("Tokens: {}", tokens_cell(m));
        println!("{}", "=".repeat(80));

        let parts = m.parts.as_deref().unwrap_or_default();
        if parts.is_empty() {
            println!("[no content]");
        }
        for part in parts {
            match part.part_type {
                PartType::Tool => println!(
                    "\n🔧 {} [{}]",
                    part.tool_name.as_deref().unwrap_or("tool"),
                    part.tool_status.as_deref().unwrap_or("?")
                ),
                PartType::Subtask => println!("\n↳ subtask"),
                PartType::Text | PartType::Unknown => println!(),
            }
            println!("{}", part.text);
        }
    })
}
