use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use opencode_manager::cli::{chat, project, search, session, tokens, Output};
use opencode_manager::config::Config;
use opencode_manager::store::{self, BackendKind, DeleteOptions, MetadataStore};
use opencode_manager::{logging, Error};

#[derive(Parser)]
#[command(name = "opencode-manager")]
#[command(about = "Inspect and maintain OpenCode projects, sessions and chat history")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// OpenCode storage root (JSON document tree)
    #[arg(long, global = true, conflicts_with = "db")]
    root: Option<PathBuf>,

    /// OpenCode SQLite database; selects the relational backend
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Fail on schema mismatch or a busy database instead of degrading
    #[arg(long, global = true)]
    strict: bool,

    /// Wait for a locked database instead of failing immediately
    #[arg(long, global = true)]
    wait: bool,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Project management
    Projects {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Session management
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Read chat history
    Chat {
        #[command(subcommand)]
        command: ChatCommands,
    },

    /// Token usage (exact ids only)
    Tokens {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Fuzzy search
    Search {
        query: String,
        #[arg(long, value_enum, default_value_t)]
        scope: search::Scope,
        /// Session to search when scope is messages
        #[arg(long)]
        session: Option<String>,
        /// Require every word to appear instead of fuzzy matching
        #[arg(long)]
        exact: bool,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Args)]
struct DeleteArgs {
    /// Report what would be removed without removing anything
    #[arg(long)]
    dry_run: bool,
    /// Copy everything to be removed into this directory first
    #[arg(long)]
    backup: Option<PathBuf>,
}

impl DeleteArgs {
    fn options(&self) -> DeleteOptions {
        DeleteOptions {
            dry_run: self.dry_run,
            backup_dir: self.backup.clone(),
        }
    }
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// List all projects
    List {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Delete a project and all of its sessions
    Delete {
        /// Project ID or unique prefix
        project: String,
        #[command(flatten)]
        args: DeleteArgs,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// List sessions, newest first
    List {
        /// Only sessions of this project
        #[arg(short, long)]
        project: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Delete a session with its messages and parts
    Delete {
        session: String,
        #[command(flatten)]
        args: DeleteArgs,
    },
    /// Reassign a session to another project
    Move { session: String, project: String },
    /// Duplicate a session under fresh ids
    Copy { session: String, project: String },
    /// Change a session's title
    Rename { session: String, title: String },
}

#[derive(Subcommand)]
enum ChatCommands {
    /// List the messages of a session
    List {
        session: String,
        /// Load every message's content for the preview column
        #[arg(long)]
        full: bool,
    },
    /// Show one message by position (1-based) or id
    Show { session: String, message: String },
}

#[derive(Subcommand)]
enum TokenCommands {
    Session { session_id: String },
    Project { project_id: String },
    Global,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(root) = &cli.root {
        config.storage.backend = BackendKind::Files;
        config.storage.root = root.display().to_string();
    }
    if let Some(db) = &cli.db {
        config.storage.backend = BackendKind::Sqlite;
        config.storage.database = db.display().to_string();
    }
    config.storage.strict |= cli.strict;
    config.storage.wait_for_lock |= cli.wait;
    Ok(config)
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let out = Output { json: cli.json };
    let store: Arc<dyn MetadataStore> =
        Arc::from(store::open_store(&config, store::log_warnings())?);
    let st = store.as_ref();
    tracing::debug!(backend = st.backend().as_str(), "Opened store");

    match cli.command {
        Commands::Projects { command } => match command {
            ProjectCommands::List { limit } => project::list(st, out, limit)?,
            ProjectCommands::Delete { project, args } => {
                project::delete(st, out, &project, &args.options())?
            }
        },
        Commands::Sessions { command } => match command {
            SessionCommands::List { project, limit } => {
                session::list(st, out, project.as_deref(), limit)?
            }
            SessionCommands::Delete { session, args } => {
                session::delete(st, out, &session, &args.options())?
            }
            SessionCommands::Move { session, project } => {
                session::move_to(st, out, &session, &project)?
            }
            SessionCommands::Copy { session, project } => {
                session::copy_to(st, out, &session, &project)?
            }
            SessionCommands::Rename { session, title } => {
                session::rename(st, out, &session, &title)?
            }
        },
        Commands::Chat { command } => match command {
            ChatCommands::List { session, full } => {
                chat::list(Arc::clone(&store), out, &session, full).await?
            }
            ChatCommands::Show { session, message } => {
                chat::show(Arc::clone(&store), out, &session, &message).await?
            }
        },
        Commands::Tokens { command } => match command {
            TokenCommands::Session { session_id } => tokens::session(st, out, &session_id)?,
            TokenCommands::Project { project_id } => tokens::project(st, out, &project_id)?,
            TokenCommands::Global => tokens::global(st, out)?,
        },
        Commands::Search {
            query,
            scope,
            session,
            exact,
            limit,
        } => {
            let mut options = config.search_options();
            if let Some(limit) = limit {
                options.limit = limit;
            }
            search::run(
                Arc::clone(&store),
                out,
                &query,
                scope,
                session.as_deref(),
                exact,
                &options,
            )
            .await?
        }
    }

    Ok(())
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<Error>()
        .map(|e| e.kind().exit_code())
        .unwrap_or(1)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let json = cli.json;

    let result = match load_config(&cli) {
        Ok(config) => {
            logging::init(&config.logging);
            run(cli, config).await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                let kind = e.downcast_ref::<Error>().map(|e| e.kind().as_str());
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "error": e.to_string(),
                        "code": kind.unwrap_or("ERROR"),
                        "exit_code": exit_code(&e),
                    })
                );
            } else {
                eprintln!("Error: {e}");
            }
            ExitCode::from(exit_code(&e))
        }
    }
}
