//! Error types for opencode-manager
//!
//! Every failure that reaches the caller carries a stable [`ErrorKind`] so the
//! command layer can pick an exit code without matching on message text.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::store::schema::SchemaDiagnosis;

/// Result type alias for opencode-manager
pub type Result<T> = std::result::Result<T, Error>;

/// Stable failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Ambiguous,
    SchemaMismatch,
    MalformedData,
    LockContention,
    FileOperation,
    InvalidArgument,
    Config,
    Cancelled,
    Database,
}

impl ErrorKind {
    /// Machine-readable code string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Ambiguous => "AMBIGUOUS_ID",
            Self::SchemaMismatch => "SCHEMA_MISMATCH",
            Self::MalformedData => "MALFORMED_DATA",
            Self::LockContention => "LOCK_CONTENTION",
            Self::FileOperation => "FILE_OPERATION",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::Config => "CONFIG_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Database => "DATABASE_ERROR",
        }
    }

    /// Category-based process exit code.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Database | Self::Cancelled => 1,
            Self::SchemaMismatch => 2,
            Self::NotFound | Self::Ambiguous => 3,
            Self::InvalidArgument => 4,
            Self::LockContention => 5,
            Self::MalformedData => 6,
            Self::Config => 7,
            Self::FileOperation => 8,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// No entity matched the identifier
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A prefix matched more than one entity
    #[error("{entity} id '{prefix}' is ambiguous ({} matches: {})", matches.len(), matches.join(", "))]
    Ambiguous {
        entity: &'static str,
        prefix: String,
        matches: Vec<String>,
    },

    /// The relational backend lacks required tables or columns
    #[error("schema mismatch: {0}")]
    SchemaMismatch(SchemaDiagnosis),

    /// A document or row could not be parsed
    #[error("malformed data in {source_name}: {message}")]
    MalformedData {
        source_name: String,
        message: String,
    },

    /// The database is held by another writer
    #[error("{}", lock_message(*waited))]
    LockContention { waited: bool },

    /// Backup, delete, move or copy failed on disk
    #[error("file operation failed on {}: {source}", path.display())]
    FileOperation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// The consumer went away before the request finished
    #[error("request cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

fn lock_message(waited: bool) -> &'static str {
    if waited {
        "database is locked by another process; timed out waiting for it"
    } else {
        "database is busy; retry later, or pass --wait to block until it is free"
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Ambiguous { .. } => ErrorKind::Ambiguous,
            Self::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            Self::MalformedData { .. } => ErrorKind::MalformedData,
            Self::LockContention { .. } => ErrorKind::LockContention,
            Self::FileOperation { .. } => ErrorKind::FileOperation,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Config(_) => ErrorKind::Config,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Database(_) => ErrorKind::Database,
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn malformed(source_name: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::MalformedData {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }

    pub fn file_op(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileOperation {
            path: path.into(),
            source,
        }
    }

    /// Map a rusqlite failure, separating busy/locked from everything else.
    pub fn from_sqlite(err: rusqlite::Error, waited: bool) -> Self {
        if is_busy(&err) {
            Self::LockContention { waited }
        } else {
            Self::Database(err)
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked,
                ..
            },
            _
        )
    )
}

/// Attach a path to an io error.
pub(crate) trait IoContext<T> {
    fn at(self, path: &std::path::Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|e| Error::file_op(path, e))
    }
}
