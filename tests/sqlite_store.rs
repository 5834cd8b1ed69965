mod common;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{params, Connection};
use serde_json::json;
use tempfile::TempDir;

use opencode_manager::error::{Error, ErrorKind};
use opencode_manager::model::{PartType, TokenSummary};
use opencode_manager::store::schema::LogicalTable;
use opencode_manager::store::{
    DeleteOptions, MetadataStore, SqliteOptions, SqliteStore, StoreWarning, WarningCollector,
};
use opencode_manager::{resolve, tokens};

use common::{collector, count, sqlite_db};

struct Fixture {
    _dir: TempDir,
    path: PathBuf,
    store: SqliteStore,
    warnings: WarningCollector,
}

fn fixture_with(options: SqliteOptions) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("opencode.db");
    let worktree = dir.path().join("alpha");
    std::fs::create_dir_all(&worktree).unwrap();
    sqlite_db(&path, &worktree);
    let (warnings, handler) = collector();
    Fixture {
        store: SqliteStore::open(path.clone(), options, handler),
        path,
        warnings,
        _dir: dir,
    }
}

fn fixture() -> Fixture {
    fixture_with(SqliteOptions::default())
}

fn strict() -> SqliteOptions {
    SqliteOptions {
        strict: true,
        ..Default::default()
    }
}

fn conn(f: &Fixture) -> Connection {
    Connection::open(&f.path).unwrap()
}

#[test]
fn test_reads_through_discovered_schema() {
    let f = fixture();
    let projects = f.store.load_projects().unwrap();
    assert_eq!(projects.len(), 2);
    assert!(projects[0].worktree.is_some());

    let sessions = f.store.load_sessions(Some("prj_alpha")).unwrap();
    let ids: Vec<_> = sessions.iter().map(|s| s.session_id.as_str()).collect();
    assert_eq!(ids, vec!["ses_one", "ses_two"]);
    assert_eq!(sessions[0].title.as_deref(), Some("Fix login bug"));

    let messages = f.store.load_chat_index("ses_one").unwrap();
    let ids: Vec<_> = messages.iter().map(|m| m.message_id.as_str()).collect();
    assert_eq!(ids, vec!["msg_a", "msg_b"]);
    assert!(messages.iter().all(|m| m.parts.is_none()));
    assert!(f.warnings.is_empty());
}

#[test]
fn test_columns_take_precedence_over_payload() {
    let f = fixture();
    conn(&f)
        .execute("UPDATE session SET title = 'Column title' WHERE id = 'ses_two'", [])
        .unwrap();
    let session = f.store.get_session("ses_two").unwrap();
    assert_eq!(session.title.as_deref(), Some("Column title"));
}

#[test]
fn test_malformed_row_is_skipped() {
    let f = fixture();
    conn(&f)
        .execute(
            "INSERT INTO message (id, session_id, time_created, data) VALUES ('msg_bad', 'ses_one', 1500, '{oops')",
            [],
        )
        .unwrap();
    let messages = f.store.load_chat_index("ses_one").unwrap();
    assert_eq!(messages.len(), 2);
    let warnings = f.warnings.take();
    assert!(matches!(
        &warnings[..],
        [StoreWarning::MalformedRow { id: Some(id), .. }] if id == "msg_bad"
    ));
}

#[test]
fn test_load_parts_missing_vs_empty() {
    let f = fixture();
    assert_eq!(f.store.load_parts("msg_unknown").unwrap(), None);
    assert_eq!(f.store.load_parts("msg_c").unwrap(), Some(vec![]));

    let parts = f.store.load_parts("msg_b").unwrap().unwrap();
    let ids: Vec<_> = parts.iter().map(|p| p.part_id.as_str()).collect();
    assert_eq!(ids, vec!["prt_b1", "prt_b2"]);
    assert_eq!(parts[1].part_type, PartType::Tool);
    assert_eq!(parts[1].text, "tests passed");
}

#[test]
fn test_missing_parts_table_tolerant_and_strict() {
    let f = fixture();
    conn(&f).execute_batch("DROP TABLE part").unwrap();

    assert!(f.store.load_sessions(None).unwrap().is_empty());
    let warnings = f.warnings.take();
    match &warnings[..] {
        [StoreWarning::SchemaMismatch(diag)] => {
            assert!(diag.is_table_missing(LogicalTable::Parts));
            assert!(diag.to_string().contains("parts"));
        }
        other => panic!("expected a schema warning, got {:?}", other),
    }

    let diag = f.store.diagnose().unwrap();
    assert_eq!(diag.missing_tables, vec![LogicalTable::Parts]);

    let (_, handler) = collector();
    let strict_store = SqliteStore::open(f.path.clone(), strict(), handler);
    match strict_store.load_sessions(None) {
        Err(Error::SchemaMismatch(diag)) => assert!(diag.is_table_missing(LogicalTable::Parts)),
        other => panic!("expected schema mismatch, got {:?}", other),
    }
}

#[test]
fn test_missing_required_column_is_named() {
    let f = fixture();
    let c = conn(&f);
    c.execute_batch(
        "CREATE TABLE session_new (id TEXT PRIMARY KEY, title TEXT, data TEXT);
         DROP TABLE session;
         ALTER TABLE session_new RENAME TO session;",
    )
    .unwrap();
    let diag = f.store.diagnose().unwrap();
    assert!(diag.missing_tables.is_empty());
    assert!(diag.to_string().contains("sessions missing fields: project_ref"));
}

#[test]
fn test_dry_run_then_delete() {
    let f = fixture();
    let dry = f
        .store
        .delete_session(
            "ses_one",
            &DeleteOptions {
                dry_run: true,
                backup_dir: None,
            },
        )
        .unwrap();
    let c = conn(&f);
    assert_eq!(count(&c, "message"), 3);
    assert_eq!(count(&c, "part"), 3);
    assert_eq!(
        dry.removed,
        vec![
            "parts/prt_a1",
            "parts/prt_b1",
            "parts/prt_b2",
            "messages/msg_a",
            "messages/msg_b",
            "sessions/ses_one"
        ]
    );

    let real = f.store.delete_session("ses_one", &DeleteOptions::default()).unwrap();
    assert_eq!(real.removed, dry.removed);
    assert_eq!(count(&c, "session"), 1);
    assert_eq!(count(&c, "message"), 1);
    assert_eq!(count(&c, "part"), 0);

    let err = f
        .store
        .delete_session("ses_one", &DeleteOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_delete_project_with_backup() {
    let f = fixture();
    let backup = tempfile::tempdir().unwrap();
    let result = f
        .store
        .delete_project(
            "prj_alpha",
            &DeleteOptions {
                dry_run: false,
                backup_dir: Some(backup.path().to_path_buf()),
            },
        )
        .unwrap();
    assert_eq!(result.removed.last().map(String::as_str), Some("projects/prj_alpha"));
    assert_eq!(result.backed_up.len(), result.removed.len());

    let saved: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(backup.path().join("sessions/ses_one.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(saved["project_id"], "prj_alpha");

    let c = conn(&f);
    assert_eq!(count(&c, "project"), 1);
    assert_eq!(count(&c, "session"), 0);
}

#[test]
fn test_move_updates_column_and_payload() {
    let f = fixture();
    let before = f.store.load_chat_index("ses_one").unwrap();

    let moved = f.store.move_session("ses_one", "prj_beta").unwrap();
    assert_eq!(moved.session_id, "ses_one");
    assert_eq!(moved.project_id, "prj_beta");

    let (column, data, updated): (String, String, i64) = conn(&f)
        .query_row(
            "SELECT project_id, data, time_updated FROM session WHERE id = 'ses_one'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    let payload: serde_json::Value = serde_json::from_str(&data).unwrap();
    assert_eq!(column, "prj_beta");
    assert_eq!(payload["projectID"], "prj_beta");
    assert_eq!(payload["time"]["updated"], json!(updated));
    assert!(updated > 5000);

    assert_eq!(f.store.load_chat_index("ses_one").unwrap(), before);

    let err = f.store.move_session("ses_one", "prj_nowhere").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_copy_remaps_every_id() {
    let f = fixture();
    let copy = f.store.copy_session("ses_one", "prj_beta").unwrap();
    assert_ne!(copy.session_id, "ses_one");
    assert_eq!(copy.project_id, "prj_beta");

    let c = conn(&f);
    assert_eq!(count(&c, "session"), 3);
    assert_eq!(count(&c, "message"), 5);
    assert_eq!(count(&c, "part"), 6);

    let source = f.store.load_chat_index("ses_one").unwrap();
    let copied = f.store.load_chat_index(&copy.session_id).unwrap();
    assert_eq!(copied.len(), source.len());
    let source_ids: HashSet<_> = source.iter().map(|m| m.message_id.clone()).collect();
    assert!(copied.iter().all(|m| !source_ids.contains(&m.message_id)));
    assert_eq!(copied[1].parent_id.as_deref(), Some(copied[0].message_id.as_str()));

    let parts = f.store.load_parts(&copied[1].message_id).unwrap().unwrap();
    assert_eq!(parts.len(), 2);
    assert!(parts.iter().all(|p| p.message_id == copied[1].message_id));
    assert!(parts.iter().all(|p| !p.part_id.starts_with("prt_b")));

    // Denormalized session reference on parts follows the copy too.
    let stale: i64 = c
        .query_row(
            "SELECT COUNT(*) FROM part WHERE message_id = ?1 AND session_id = 'ses_one'",
            params![copied[1].message_id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(stale, 0);
}

#[test]
fn test_rename_rejects_blank_and_updates() {
    let f = fixture();
    let err = f.store.rename_session("ses_two", "   ").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let renamed = f.store.rename_session("ses_two", "New title").unwrap();
    assert_eq!(renamed.title.as_deref(), Some("New title"));
    let column: String = conn(&f)
        .query_row("SELECT title FROM session WHERE id = 'ses_two'", [], |row| row.get(0))
        .unwrap();
    assert_eq!(column, "New title");
}

#[test]
fn test_project_tokens_scenario() {
    let f = fixture();
    let aggregate = tokens::for_project(&f.store, "prj_alpha").unwrap();
    assert!(matches!(aggregate.total, TokenSummary::Known { tokens } if tokens.total() == 150));
    assert_eq!(aggregate.unknown_sessions, 1);

    let global = tokens::global(&f.store).unwrap();
    assert_eq!(global.unknown_sessions, 1);
}

#[test]
fn test_lock_contention_is_distinct() {
    let f = fixture();
    let holder = conn(&f);
    holder.execute_batch("BEGIN EXCLUSIVE").unwrap();

    let err = f
        .store
        .rename_session("ses_two", "blocked")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockContention);
    assert!(matches!(err, Error::LockContention { waited: false }));

    // Tolerant reads degrade with a warning.
    assert!(f.store.load_projects().unwrap().is_empty());
    assert!(matches!(
        &f.warnings.take()[..],
        [StoreWarning::LockContention { .. }]
    ));

    let (_, handler) = collector();
    let waiting = SqliteStore::open(
        f.path.clone(),
        SqliteOptions {
            strict: true,
            wait_for_lock: true,
            lock_timeout: Duration::from_millis(50),
        },
        handler,
    );
    match waiting.load_projects() {
        Err(Error::LockContention { waited }) => assert!(waited),
        other => panic!("expected lock contention, got {:?}", other.map(|p| p.len())),
    }

    holder.execute_batch("ROLLBACK").unwrap();
    assert_eq!(f.store.load_projects().unwrap().len(), 2);
}

#[test]
fn test_busy_database_is_not_a_missing_record() {
    let f = fixture();
    let holder = conn(&f);
    holder.execute_batch("BEGIN EXCLUSIVE").unwrap();

    let err = f.store.get_session("ses_one").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockContention);
    let err = f.store.get_project("prj_alpha").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockContention);

    let err = tokens::for_session(&f.store, "ses_one").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockContention);
    let err = tokens::for_project(&f.store, "prj_alpha").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockContention);

    let err = resolve::resolve_session(&f.store, "ses_o").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockContention);

    holder.execute_batch("ROLLBACK").unwrap();
    assert_eq!(f.store.get_session("ses_one").unwrap().session_id, "ses_one");
    assert_eq!(
        f.store.get_session("ses_missing").unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn test_lookup_on_broken_schema_reports_mismatch() {
    let f = fixture();
    conn(&f).execute_batch("DROP TABLE part").unwrap();

    let err = f.store.get_session("ses_one").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
}

#[test]
fn test_shared_connection_stays_open() {
    let f = fixture();
    let shared = Arc::new(Mutex::new(conn(&f)));
    let (_, handler) = collector();
    let store = SqliteStore::with_connection(Arc::clone(&shared), SqliteOptions::default(), handler);

    assert_eq!(store.load_sessions(None).unwrap().len(), 2);
    store.rename_session("ses_one", "Shared").unwrap();

    let title: String = shared
        .lock()
        .unwrap()
        .query_row("SELECT title FROM session WHERE id = 'ses_one'", [], |row| row.get(0))
        .unwrap();
    assert_eq!(title, "Shared");
}
