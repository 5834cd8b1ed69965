//! opencode-manager: inspect and maintain OpenCode's project, session and
//! chat metadata, whether it lives in the JSON document tree or in SQLite.

pub mod cli;
pub mod config;
pub mod content;
pub mod document;
pub mod error;
pub mod hydrate;
pub mod logging;
pub mod model;
pub mod resolve;
pub mod search;
pub mod store;
pub mod tokens;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use hydrate::ChatSession;
pub use store::{open_store, MetadataStore};
