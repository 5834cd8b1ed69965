//! Schema discovery for OpenCode's database
//!
//! Table and column names drift between OpenCode releases. Each logical field
//! lists the physical names it may appear under, in priority order; discovery
//! runs once per connection and produces an explicit field -> column map.
//! Queries only ever reach columns through that map.

use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::document;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalTable {
    Projects,
    Sessions,
    Messages,
    Parts,
}

impl LogicalTable {
    pub const ALL: [LogicalTable; 4] = [
        LogicalTable::Projects,
        LogicalTable::Sessions,
        LogicalTable::Messages,
        LogicalTable::Parts,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LogicalTable::Projects => "projects",
            LogicalTable::Sessions => "sessions",
            LogicalTable::Messages => "messages",
            LogicalTable::Parts => "parts",
        }
    }

    fn physical_candidates(&self) -> &'static [&'static str] {
        match self {
            LogicalTable::Projects => &["project", "projects"],
            LogicalTable::Sessions => &["session", "sessions"],
            LogicalTable::Messages => &["message", "messages"],
            LogicalTable::Parts => &["part", "parts"],
        }
    }

    fn fields(&self) -> &'static [FieldSpec] {
        match self {
            LogicalTable::Projects => PROJECT_FIELDS,
            LogicalTable::Sessions => SESSION_FIELDS,
            LogicalTable::Messages => MESSAGE_FIELDS,
            LogicalTable::Parts => PART_FIELDS,
        }
    }
}

impl fmt::Display for LogicalTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Id,
    Data,
    ProjectRef,
    SessionRef,
    MessageRef,
    ParentRef,
    Worktree,
    Vcs,
    Directory,
    Title,
    Version,
    Role,
    Created,
    Updated,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::Data => "data",
            Field::ProjectRef => "project_ref",
            Field::SessionRef => "session_ref",
            Field::MessageRef => "message_ref",
            Field::ParentRef => "parent_ref",
            Field::Worktree => "worktree",
            Field::Vcs => "vcs",
            Field::Directory => "directory",
            Field::Title => "title",
            Field::Version => "version",
            Field::Role => "role",
            Field::Created => "created",
            Field::Updated => "updated",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One logical field: accepted column names and where it lives in a document.
#[derive(Debug)]
pub struct FieldSpec {
    pub field: Field,
    pub synonyms: &'static [&'static str],
    pub required: bool,
    /// Document path; empty for the payload column itself.
    pub doc_path: &'static [&'static str],
}

const DATA_SYNONYMS: &[&str] = &["data", "payload", "json", "content"];
const CREATED_SYNONYMS: &[&str] = &["time_created", "created_at", "created", "createdAt"];
const UPDATED_SYNONYMS: &[&str] = &["time_updated", "updated_at", "updated", "updatedAt"];

const fn field_spec(
    field: Field,
    synonyms: &'static [&'static str],
    required: bool,
    doc_path: &'static [&'static str],
) -> FieldSpec {
    FieldSpec {
        field,
        synonyms,
        required,
        doc_path,
    }
}

const PROJECT_FIELDS: &[FieldSpec] = &[
    field_spec(Field::Id, &["id", "project_id", "projectID"], true, document::ID),
    field_spec(Field::Data, DATA_SYNONYMS, false, &[]),
    field_spec(Field::Worktree, &["worktree", "path", "directory"], false, document::WORKTREE),
    field_spec(Field::Vcs, &["vcs", "vcs_kind"], false, document::VCS),
    field_spec(Field::Created, CREATED_SYNONYMS, false, document::CREATED),
];

const SESSION_FIELDS: &[FieldSpec] = &[
    field_spec(Field::Id, &["id", "session_id", "sessionID"], true, document::ID),
    field_spec(Field::Data, DATA_SYNONYMS, false, &[]),
    field_spec(
        Field::ProjectRef,
        &["project_id", "projectID", "projectId", "project"],
        true,
        document::PROJECT_REF,
    ),
    field_spec(Field::Directory, &["directory", "dir"], false, document::DIRECTORY),
    field_spec(Field::Title, &["title", "name"], false, document::TITLE),
    field_spec(Field::Version, &["version"], false, document::VERSION),
    field_spec(Field::Created, CREATED_SYNONYMS, false, document::CREATED),
    field_spec(Field::Updated, UPDATED_SYNONYMS, false, document::UPDATED),
];

const MESSAGE_FIELDS: &[FieldSpec] = &[
    field_spec(Field::Id, &["id", "message_id", "messageID"], true, document::ID),
    field_spec(Field::Data, DATA_SYNONYMS, false, &[]),
    field_spec(
        Field::SessionRef,
        &["session_id", "sessionID", "sessionId", "session"],
        true,
        document::SESSION_REF,
    ),
    field_spec(Field::Role, &["role"], false, document::ROLE),
    field_spec(Field::ParentRef, &["parent_id", "parentID"], false, document::PARENT_REF),
    field_spec(Field::Created, CREATED_SYNONYMS, false, document::CREATED),
];

const PART_FIELDS: &[FieldSpec] = &[
    field_spec(Field::Id, &["id", "part_id", "partID"], true, document::ID),
    field_spec(Field::Data, DATA_SYNONYMS, false, &[]),
    field_spec(
        Field::MessageRef,
        &["message_id", "messageID", "messageId", "message"],
        true,
        document::MESSAGE_REF,
    ),
    field_spec(Field::SessionRef, &["session_id", "sessionID"], false, document::SESSION_REF),
    field_spec(Field::Created, CREATED_SYNONYMS, false, document::PART_START),
];

/// Quote an identifier for SQLite.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Resolved physical layout of one logical table.
#[derive(Debug, Clone)]
pub struct TableMap {
    pub logical: LogicalTable,
    pub physical: String,
    columns: BTreeMap<Field, String>,
}

impl TableMap {
    /// Quoted physical table name.
    pub fn table(&self) -> String {
        quote_ident(&self.physical)
    }

    pub fn has(&self, field: Field) -> bool {
        self.columns.contains_key(&field)
    }

    /// Physical column name, unquoted.
    pub fn column(&self, field: Field) -> Option<&str> {
        self.columns.get(&field).map(String::as_str)
    }

    /// Quoted column for a field that discovery guaranteed present.
    pub fn col(&self, field: Field) -> Result<String> {
        self.column(field).map(quote_ident).ok_or_else(|| {
            Error::SchemaMismatch(SchemaDiagnosis::missing_field(self.logical, field))
        })
    }

    /// Mapped fields with their specs, in declaration order.
    pub fn mapped(&self) -> impl Iterator<Item = (&'static FieldSpec, &str)> + '_ {
        self.logical
            .fields()
            .iter()
            .filter_map(move |def| self.column(def.field).map(|col| (def, col)))
    }

    /// Where `field` lives inside a merged document.
    pub fn doc_path(&self, field: Field) -> &'static [&'static str] {
        self.logical
            .fields()
            .iter()
            .find(|def| def.field == field)
            .map(|def| def.doc_path)
            .unwrap_or(&[])
    }

    /// The field a physical column backs, if any.
    pub fn field_of(&self, column: &str) -> Option<Field> {
        self.columns
            .iter()
            .find(|(_, col)| col.as_str() == column)
            .map(|(field, _)| *field)
    }
}

/// All four tables, resolved.
#[derive(Debug, Clone)]
pub struct Schema {
    pub projects: TableMap,
    pub sessions: TableMap,
    pub messages: TableMap,
    pub parts: TableMap,
}

/// What discovery could not find.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaDiagnosis {
    pub missing_tables: Vec<LogicalTable>,
    pub missing_fields: BTreeMap<LogicalTable, Vec<Field>>,
}

impl SchemaDiagnosis {
    pub fn missing_field(table: LogicalTable, field: Field) -> Self {
        let mut diag = SchemaDiagnosis::default();
        diag.missing_fields.insert(table, vec![field]);
        diag
    }

    pub fn is_empty(&self) -> bool {
        self.missing_tables.is_empty() && self.missing_fields.is_empty()
    }

    pub fn is_table_missing(&self, table: LogicalTable) -> bool {
        self.missing_tables.contains(&table)
    }
}

impl fmt::Display for SchemaDiagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sections = Vec::new();
        if !self.missing_tables.is_empty() {
            let names: Vec<_> = self.missing_tables.iter().map(|t| t.name()).collect();
            sections.push(format!("missing tables: {}", names.join(", ")));
        }
        for (table, fields) in &self.missing_fields {
            let names: Vec<_> = fields.iter().map(|f| f.name()).collect();
            sections.push(format!("{} missing fields: {}", table, names.join(", ")));
        }
        if sections.is_empty() {
            f.write_str("no problems found")
        } else {
            f.write_str(&sections.join("; "))
        }
    }
}

fn table_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT name FROM sqlite_master WHERE type IN ('table', 'view')")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Into::into)
}

fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Into::into)
}

fn pick<'a>(available: &'a [String], synonyms: &[&str]) -> Option<&'a String> {
    synonyms.iter().find_map(|want| {
        available
            .iter()
            .find(|have| have.eq_ignore_ascii_case(want))
    })
}

fn resolve_table(
    conn: &Connection,
    tables: &[String],
    logical: LogicalTable,
    diag: &mut SchemaDiagnosis,
) -> Result<Option<TableMap>> {
    let Some(physical) = pick(tables, logical.physical_candidates()) else {
        diag.missing_tables.push(logical);
        return Ok(None);
    };

    let available = column_names(conn, physical)?;
    let mut columns = BTreeMap::new();
    let mut missing = Vec::new();

    for def in logical.fields() {
        match pick(&available, def.synonyms) {
            Some(col) => {
                columns.insert(def.field, col.clone());
            }
            None if def.required => missing.push(def.field),
            None => {}
        }
    }

    if !missing.is_empty() {
        diag.missing_fields.insert(logical, missing);
        return Ok(None);
    }

    tracing::debug!(
        table = logical.name(),
        physical = %physical,
        columns = columns.len(),
        "Resolved table"
    );

    Ok(Some(TableMap {
        logical,
        physical: physical.clone(),
        columns,
    }))
}

/// Inspect the database and map every logical field it can.
pub fn discover(conn: &Connection) -> Result<Schema> {
    let tables = table_names(conn)?;
    let mut diag = SchemaDiagnosis::default();

    let projects = resolve_table(conn, &tables, LogicalTable::Projects, &mut diag)?;
    let sessions = resolve_table(conn, &tables, LogicalTable::Sessions, &mut diag)?;
    let messages = resolve_table(conn, &tables, LogicalTable::Messages, &mut diag)?;
    let parts = resolve_table(conn, &tables, LogicalTable::Parts, &mut diag)?;

    match (projects, sessions, messages, parts) {
        (Some(projects), Some(sessions), Some(messages), Some(parts)) if diag.is_empty() => {
            Ok(Schema {
                projects,
                sessions,
                messages,
                parts,
            })
        }
        _ => Err(Error::SchemaMismatch(diag)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovers_synonyms() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE projects (projectID TEXT PRIMARY KEY, path TEXT, payload TEXT);
            CREATE TABLE session (id TEXT PRIMARY KEY, projectId TEXT, name TEXT, updated_at INTEGER);
            CREATE TABLE messages (id TEXT PRIMARY KEY, SESSION_ID TEXT, data TEXT);
            CREATE TABLE part (id TEXT PRIMARY KEY, message_id TEXT, data TEXT);
            "#,
        )
        .unwrap();

        let schema = discover(&conn).unwrap();
        assert_eq!(schema.projects.column(Field::Id), Some("projectID"));
        assert_eq!(schema.projects.column(Field::Worktree), Some("path"));
        assert_eq!(schema.projects.column(Field::Data), Some("payload"));
        assert_eq!(schema.sessions.physical, "session");
        assert_eq!(schema.sessions.column(Field::ProjectRef), Some("projectId"));
        assert_eq!(schema.sessions.column(Field::Title), Some("name"));
        assert_eq!(schema.messages.column(Field::SessionRef), Some("SESSION_ID"));
        assert!(!schema.parts.has(Field::SessionRef));
    }

    #[test]
    fn test_reports_missing_table_and_field() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE project (id TEXT PRIMARY KEY);
            CREATE TABLE session (id TEXT PRIMARY KEY, title TEXT);
            CREATE TABLE message (id TEXT PRIMARY KEY, session_id TEXT);
            "#,
        )
        .unwrap();

        match discover(&conn) {
            Err(Error::SchemaMismatch(diag)) => {
                assert!(diag.is_table_missing(LogicalTable::Parts));
                assert_eq!(
                    diag.missing_fields.get(&LogicalTable::Sessions),
                    Some(&vec![Field::ProjectRef])
                );
                let text = diag.to_string();
                assert!(text.contains("missing tables: parts"));
                assert!(text.contains("sessions missing fields: project_ref"));
            }
            other => panic!("expected schema mismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
