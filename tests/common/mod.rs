//! Shared fixtures: the same small OpenCode dataset as a document tree and as
//! a SQLite database.
//!
//! - prj_alpha (worktree exists) owns ses_one and ses_two
//! - prj_beta (worktree missing) owns nothing
//! - ses_one: msg_a (user) -> msg_b (assistant, 100 in / 50 out)
//! - ses_two: msg_c (user), no assistant reply

#![allow(dead_code)]

use rusqlite::{params, Connection};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

use opencode_manager::store::{WarningCollector, WarningHandler};

pub fn write_doc(root: &Path, rel: &str, doc: &Value) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, serde_json::to_string_pretty(doc).unwrap()).unwrap();
}

pub fn collector() -> (WarningCollector, WarningHandler) {
    let collector = WarningCollector::new();
    let handler = collector.handler();
    (collector, handler)
}

fn project_alpha(worktree: &Path) -> Value {
    json!({"id": "prj_alpha", "worktree": worktree.display().to_string(), "vcs": "git", "time": {"created": 1000}})
}

fn project_beta() -> Value {
    json!({"id": "prj_beta", "worktree": "/nonexistent/opencode/beta", "time": {"created": 2000}})
}

fn session_one() -> Value {
    json!({
        "id": "ses_one",
        "projectID": "prj_alpha",
        "title": "Fix login bug",
        "directory": "/work/alpha",
        "version": "0.3.0",
        "time": {"created": 1000, "updated": 5000}
    })
}

fn session_two() -> Value {
    json!({
        "id": "ses_two",
        "projectID": "prj_alpha",
        "title": "Write docs",
        "time": {"created": 2000, "updated": 3000}
    })
}

fn message_a() -> Value {
    json!({"id": "msg_a", "sessionID": "ses_one", "role": "user", "time": {"created": 1100}})
}

fn message_b() -> Value {
    json!({
        "id": "msg_b",
        "sessionID": "ses_one",
        "role": "assistant",
        "parentID": "msg_a",
        "time": {"created": 1200},
        "tokens": {"input": 100, "output": 50, "reasoning": 0, "cache": {"read": 0, "write": 0}}
    })
}

fn message_c() -> Value {
    json!({"id": "msg_c", "sessionID": "ses_two", "role": "user", "time": {"created": 2100}})
}

fn part_a1() -> Value {
    json!({"id": "prt_a1", "messageID": "msg_a", "sessionID": "ses_one", "type": "text", "text": "please fix the login form"})
}

fn part_b1() -> Value {
    json!({"id": "prt_b1", "messageID": "msg_b", "sessionID": "ses_one", "type": "text", "text": "Looking at it now.", "time": {"start": 1201}})
}

fn part_b2() -> Value {
    json!({
        "id": "prt_b2",
        "messageID": "msg_b",
        "sessionID": "ses_one",
        "type": "tool",
        "tool": "bash",
        "state": {"status": "completed", "output": "tests passed"},
        "time": {"start": 1202}
    })
}

/// Document tree under `root`. `worktree` should be an existing directory.
pub fn file_tree(root: &Path, worktree: &Path) {
    write_doc(root, "project/prj_alpha.json", &project_alpha(worktree));
    write_doc(root, "project/prj_beta.json", &project_beta());
    write_doc(root, "session/prj_alpha/ses_one.json", &session_one());
    write_doc(root, "session/prj_alpha/ses_two.json", &session_two());
    write_doc(root, "message/ses_one/msg_a.json", &message_a());
    write_doc(root, "message/ses_one/msg_b.json", &message_b());
    write_doc(root, "message/ses_two/msg_c.json", &message_c());
    write_doc(root, "part/msg_a/prt_a1.json", &part_a1());
    write_doc(root, "part/msg_b/prt_b1.json", &part_b1());
    write_doc(root, "part/msg_b/prt_b2.json", &part_b2());
}

pub const SCHEMA: &str = r#"
    CREATE TABLE project (
        id TEXT PRIMARY KEY,
        worktree TEXT,
        vcs TEXT,
        time_created INTEGER,
        data TEXT
    );
    CREATE TABLE session (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        title TEXT,
        directory TEXT,
        time_created INTEGER,
        time_updated INTEGER,
        data TEXT
    );
    CREATE TABLE message (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        time_created INTEGER,
        data TEXT
    );
    CREATE TABLE part (
        id TEXT PRIMARY KEY,
        message_id TEXT NOT NULL,
        session_id TEXT,
        time_created INTEGER,
        data TEXT
    );
"#;

fn time(doc: &Value, key: &str) -> Option<i64> {
    doc.get("time").and_then(|t| t.get(key)).and_then(Value::as_i64)
}

fn text(doc: &Value, key: &str) -> Option<String> {
    doc.get(key).and_then(Value::as_str).map(str::to_string)
}

pub fn insert_project(conn: &Connection, doc: &Value) {
    conn.execute(
        "INSERT INTO project (id, worktree, vcs, time_created, data) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![text(doc, "id"), text(doc, "worktree"), text(doc, "vcs"), time(doc, "created"), doc.to_string()],
    )
    .unwrap();
}

pub fn insert_session(conn: &Connection, doc: &Value) {
    conn.execute(
        "INSERT INTO session (id, project_id, title, directory, time_created, time_updated, data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            text(doc, "id"),
            text(doc, "projectID"),
            text(doc, "title"),
            text(doc, "directory"),
            time(doc, "created"),
            time(doc, "updated"),
            doc.to_string()
        ],
    )
    .unwrap();
}

pub fn insert_message(conn: &Connection, doc: &Value) {
    conn.execute(
        "INSERT INTO message (id, session_id, time_created, data) VALUES (?1, ?2, ?3, ?4)",
        params![text(doc, "id"), text(doc, "sessionID"), time(doc, "created"), doc.to_string()],
    )
    .unwrap();
}

pub fn insert_part(conn: &Connection, doc: &Value) {
    conn.execute(
        "INSERT INTO part (id, message_id, session_id, time_created, data) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            text(doc, "id"),
            text(doc, "messageID"),
            text(doc, "sessionID"),
            time(doc, "start"),
            doc.to_string()
        ],
    )
    .unwrap();
}

/// The same dataset as [`file_tree`], in a fresh database at `path`.
pub fn sqlite_db(path: &Path, worktree: &Path) -> Connection {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    insert_project(&conn, &project_alpha(worktree));
    insert_project(&conn, &project_beta());
    insert_session(&conn, &session_one());
    insert_session(&conn, &session_two());
    insert_message(&conn, &message_a());
    insert_message(&conn, &message_b());
    insert_message(&conn, &message_c());
    insert_part(&conn, &part_a1());
    insert_part(&conn, &part_b1());
    insert_part(&conn, &part_b2());
    conn
}

pub fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
        .unwrap()
}
