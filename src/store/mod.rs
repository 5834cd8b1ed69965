//! Metadata store: one logical model over two physical layouts
//!
//! - `files`:  OpenCode's directory tree of JSON documents
//! - `sqlite`: OpenCode's embedded database, schema discovered at open time
//!
//! Callers hold a `Box<dyn MetadataStore>` and never see backend types.

pub mod files;
pub mod schema;
pub mod sqlite;

pub use files::FileStore;
pub use sqlite::{SqliteOptions, SqliteStore};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{ChatMessage, ChatPart, DeleteResult, Project, Session};
use schema::SchemaDiagnosis;

/// Which physical representation to read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Files,
    Sqlite,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Files => "files",
            BackendKind::Sqlite => "sqlite",
        }
    }
}

/// Options shared by every delete operation.
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// Report what would be removed without touching storage
    pub dry_run: bool,
    /// Copy everything to be removed here first, preserving layout
    pub backup_dir: Option<PathBuf>,
}

/// A non-fatal problem recovered locally.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWarning {
    MalformedDocument { path: PathBuf, reason: String },
    MalformedRow {
        table: String,
        id: Option<String>,
        reason: String,
    },
    SchemaMismatch(SchemaDiagnosis),
    LockContention { operation: &'static str },
}

impl fmt::Display for StoreWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreWarning::MalformedDocument { path, reason } => {
                write!(f, "skipped malformed document {}: {}", path.display(), reason)
            }
            StoreWarning::MalformedRow { table, id, reason } => write!(
                f,
                "skipped malformed row in {} ({}): {}",
                table,
                id.as_deref().unwrap_or("?"),
                reason
            ),
            StoreWarning::SchemaMismatch(diag) => write!(f, "schema mismatch: {}", diag),
            StoreWarning::LockContention { operation } => {
                write!(f, "database busy during {}; showing no results", operation)
            }
        }
    }
}

/// Callback receiving recovered problems.
pub type WarningHandler = Arc<dyn Fn(&StoreWarning) + Send + Sync>;

/// Default handler: log and continue.
pub fn log_warnings() -> WarningHandler {
    Arc::new(|warning| warn!(%warning, "Store warning"))
}

/// Handler that records warnings for later inspection.
#[derive(Clone, Default)]
pub struct WarningCollector {
    seen: Arc<Mutex<Vec<StoreWarning>>>,
}

impl WarningCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(&self) -> WarningHandler {
        let seen = Arc::clone(&self.seen);
        Arc::new(move |warning| {
            warn!(%warning, "Store warning");
            seen.lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(warning.clone());
        })
    }

    pub fn take(&self) -> Vec<StoreWarning> {
        std::mem::take(&mut *self.seen.lock().unwrap_or_else(|p| p.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Logical operations every backend provides.
pub trait MetadataStore: Send + Sync {
    fn backend(&self) -> BackendKind;

    fn load_projects(&self) -> Result<Vec<Project>>;

    /// Sessions, optionally restricted to one project, newest first.
    fn load_sessions(&self, project_id: Option<&str>) -> Result<Vec<Session>>;

    /// Message stubs for a session (`parts == None`), oldest first.
    fn load_chat_index(&self, session_id: &str) -> Result<Vec<ChatMessage>>;

    /// `None` when the message has no parts location; `Some(vec![])` when it
    /// exists but is empty.
    fn load_parts(&self, message_id: &str) -> Result<Option<Vec<ChatPart>>>;

    fn delete_session(&self, session_id: &str, options: &DeleteOptions) -> Result<DeleteResult>;

    /// Deletes the project and everything its sessions own.
    fn delete_project(&self, project_id: &str, options: &DeleteOptions) -> Result<DeleteResult>;

    /// Reassign a session; its id and its messages are untouched.
    fn move_session(&self, session_id: &str, target_project_id: &str) -> Result<Session>;

    /// Duplicate a session and its messages and parts under fresh ids.
    fn copy_session(&self, session_id: &str, target_project_id: &str) -> Result<Session>;

    fn rename_session(&self, session_id: &str, title: &str) -> Result<Session>;

    /// Exact-id project lookup.
    fn get_project(&self, project_id: &str) -> Result<Project> {
        self.load_projects()?
            .into_iter()
            .find(|p| p.project_id == project_id)
            .ok_or_else(|| Error::not_found("project", project_id))
    }

    /// Exact-id session lookup.
    fn get_session(&self, session_id: &str) -> Result<Session> {
        self.load_sessions(None)?
            .into_iter()
            .find(|s| s.session_id == session_id)
            .ok_or_else(|| Error::not_found("session", session_id))
    }
}

pub(crate) fn validate_title(title: &str) -> Result<&str> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::InvalidArgument("title must not be empty".to_string()));
    }
    Ok(title)
}

/// Sessions newest first, ties by id.
pub(crate) fn sort_sessions(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| {
        let ka = a.updated_at.or(a.created_at);
        let kb = b.updated_at.or(b.created_at);
        kb.cmp(&ka).then_with(|| a.session_id.cmp(&b.session_id))
    });
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Build the configured backend.
pub fn open_store(config: &Config, warnings: WarningHandler) -> Result<Box<dyn MetadataStore>> {
    match config.storage.backend {
        BackendKind::Files => {
            let root = config.storage_root();
            Ok(Box::new(FileStore::new(root, warnings)))
        }
        BackendKind::Sqlite => {
            let path = config.database_path();
            if !path.exists() {
                return Err(Error::Config(format!(
                    "database not found: {}",
                    path.display()
                )));
            }
            let options = SqliteOptions {
                strict: config.storage.strict,
                wait_for_lock: config.storage.wait_for_lock,
                lock_timeout: Duration::from_millis(config.storage.lock_timeout_ms),
            };
            Ok(Box::new(SqliteStore::open(path, options, warnings)))
        }
    }
}
