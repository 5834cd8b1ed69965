//! Configuration management with YAML support

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::search::{SearchOptions, SortMode, DEFAULT_LIMIT};
use crate::store::BackendKind;

const CONFIG_FILE: &str = "opencode-manager.yaml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where OpenCode keeps its data and how to open it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Root of the JSON document tree
    #[serde(default = "default_root")]
    pub root: String,

    /// SQLite database file
    #[serde(default = "default_database")]
    pub database: String,

    /// Fail on schema mismatch or lock contention instead of degrading
    #[serde(default)]
    pub strict: bool,

    #[serde(default)]
    pub wait_for_lock: bool,

    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_limit")]
    pub limit: usize,

    #[serde(default)]
    pub sort: SortMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_root() -> String {
    "~/.local/share/opencode/storage".to_string()
}

fn default_database() -> String {
    "~/.local/share/opencode/opencode.db".to_string()
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

fn default_search_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            root: default_root(),
            database: default_database(),
            strict: false,
            wait_for_lock: false,
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: default_search_limit(),
            sort: SortMode::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./opencode-manager.yaml (current directory)
    /// 3. ~/.config/opencode-manager/opencode-manager.yaml
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut search_paths: Vec<PathBuf> = vec![];
        if let Some(path) = path {
            let explicit = expand(path);
            if !explicit.exists() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    explicit.display()
                )));
            }
            search_paths.push(explicit);
        }
        search_paths.push(PathBuf::from(CONFIG_FILE));
        if let Some(dir) = dirs::config_dir() {
            search_paths.push(dir.join("opencode-manager").join(CONFIG_FILE));
        }
        search_paths.push(expand("~/.config/opencode-manager/opencode-manager.yaml"));

        for search_path in &search_paths {
            if search_path.exists() {
                return Self::from_file(search_path);
            }
        }

        // No config file found, use defaults
        Ok(Config::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid {}: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Storage root, expanding ~ to home directory
    pub fn storage_root(&self) -> PathBuf {
        expand(&self.storage.root)
    }

    /// Database path, expanding ~ to home directory
    pub fn database_path(&self) -> PathBuf {
        expand(&self.storage.database)
    }

    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            limit: self.search.limit,
            sort: self.search.sort,
            ..SearchOptions::default()
        }
    }
}
