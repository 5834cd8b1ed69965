//! Lazy, cancellable loading of message parts for one open session
//!
//! A [`ChatSession`] is the only owner of its chat index and parts cache.
//! Storage reads run on tokio's blocking pool; the cache and index locks are
//! never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{ChatMessage, ChatPart, Session};
use crate::search::normalize;
use crate::store::MetadataStore;

/// Preview for a hydrated message with nothing to show.
pub const NO_CONTENT_PREVIEW: &str = "[no content]";

/// Maximum preview length in characters, ellipsis included.
pub const PREVIEW_CHARS: usize = 160;

/// First text-bearing part, whitespace collapsed, clipped.
pub fn preview_from_parts(parts: &[ChatPart]) -> String {
    let Some(text) = parts
        .iter()
        .map(|p| normalize(&p.text))
        .find(|t| !t.is_empty())
    else {
        return NO_CONTENT_PREVIEW.to_string();
    };
    if text.chars().count() <= PREVIEW_CHARS {
        return text;
    }
    let mut clipped: String = text.chars().take(PREVIEW_CHARS - 1).collect();
    clipped.push('…');
    clipped
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn joined<T>(result: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    match result {
        Ok(inner) => inner,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(Error::Cancelled),
    }
}

pub struct ChatSession {
    store: Arc<dyn MetadataStore>,
    session: Session,
    messages: Mutex<Vec<ChatMessage>>,
    cache: Mutex<HashMap<String, Option<Vec<ChatPart>>>>,
    cancel: CancellationToken,
}

impl ChatSession {
    /// Load the session record and its chat index (no parts).
    pub async fn open(store: Arc<dyn MetadataStore>, session_id: &str) -> Result<Self> {
        let reader = Arc::clone(&store);
        let id = session_id.to_string();
        let (session, messages) = joined(
            tokio::task::spawn_blocking(move || {
                let session = reader.get_session(&id)?;
                let messages = reader.load_chat_index(&id)?;
                Ok((session, messages))
            })
            .await,
        )?;

        debug!(session = %session.session_id, messages = messages.len(), "Opened chat session");
        Ok(Self {
            store,
            session,
            messages: Mutex::new(messages),
            cache: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Snapshot of the index, hydrated entries included.
    pub fn messages(&self) -> Vec<ChatMessage> {
        lock(&self.messages).clone()
    }

    /// Token that aborts every in-flight and future request when cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Load parts for one message, once. Later calls hit the cache.
    pub async fn hydrate(&self, message_id: &str) -> Result<ChatMessage> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if !lock(&self.messages).iter().any(|m| m.message_id == message_id) {
            return Err(Error::not_found("message", message_id));
        }

        let cached = lock(&self.cache).get(message_id).cloned();
        let parts = match cached {
            Some(parts) => parts,
            None => {
                let store = Arc::clone(&self.store);
                let id = message_id.to_string();
                let task = tokio::task::spawn_blocking(move || store.load_parts(&id));
                let parts = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        debug!(message = message_id, "Hydration cancelled");
                        return Err(Error::Cancelled);
                    }
                    result = task => joined(result)?,
                };
                self.remember(message_id, parts)?
            }
        };

        self.apply(message_id, parts)
    }

    /// Store a finished load unless the session closed while it ran. The
    /// check and the insert share the cache lock that `close` clears under.
    fn remember(
        &self,
        message_id: &str,
        parts: Option<Vec<ChatPart>>,
    ) -> Result<Option<Vec<ChatPart>>> {
        let mut cache = lock(&self.cache);
        if self.cancel.is_cancelled() {
            debug!(message = message_id, "Discarding parts loaded after close");
            return Err(Error::Cancelled);
        }
        Ok(cache
            .entry(message_id.to_string())
            .or_insert(parts)
            .clone())
    }

    /// Hydrate every message in index order.
    pub async fn hydrate_all(&self) -> Result<Vec<ChatMessage>> {
        let ids: Vec<String> = lock(&self.messages)
            .iter()
            .filter(|m| !m.is_hydrated())
            .map(|m| m.message_id.clone())
            .collect();
        for id in ids {
            self.hydrate(&id).await?;
        }
        Ok(self.messages())
    }

    /// Cancel in-flight requests and drop the cache.
    pub fn close(&self) {
        let mut cache = lock(&self.cache);
        self.cancel.cancel();
        cache.clear();
    }

    fn apply(&self, message_id: &str, parts: Option<Vec<ChatPart>>) -> Result<ChatMessage> {
        let parts = parts.unwrap_or_default();
        let mut messages = lock(&self.messages);
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let message = messages
            .iter_mut()
            .find(|m| m.message_id == message_id)
            .ok_or_else(|| Error::not_found("message", message_id))?;
        message.total_chars = Some(parts.iter().map(|p| p.text.chars().count()).sum());
        message.preview_text = preview_from_parts(&parts);
        message.parts = Some(parts);
        Ok(message.clone())
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
