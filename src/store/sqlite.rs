//! Relational backend over OpenCode's SQLite database
//!
//! Every query goes through the [`Schema`] produced by discovery. Reads run in
//! tolerant mode by default: a schema mismatch or a busy database yields an
//! empty result plus a warning. Strict mode turns both into errors. Writes
//! always propagate errors and run inside one `BEGIN IMMEDIATE` transaction
//! each; discovery and planning happen before the transaction opens.

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use rusqlite::{Transaction, TransactionBehavior};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::schema::{self, quote_ident, Field, FieldSpec, Schema, SchemaDiagnosis, TableMap};
use super::{
    now_ms, sort_sessions, validate_title, BackendKind, DeleteOptions, MetadataStore,
    StoreWarning, WarningHandler,
};
use crate::document::{self, IdMap};
use crate::error::{Error, IoContext, Result};
use crate::model::{sort_messages, ChatMessage, ChatPart, DeleteResult, Project, Session};

#[derive(Debug, Clone)]
pub struct SqliteOptions {
    /// Fail on schema mismatch or lock contention instead of degrading
    pub strict: bool,
    /// Block up to `lock_timeout` when another process holds the lock
    pub wait_for_lock: bool,
    pub lock_timeout: Duration,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            strict: false,
            wait_for_lock: false,
            lock_timeout: Duration::from_millis(5000),
        }
    }
}

enum Source {
    /// Opened and closed by each operation
    Path(PathBuf),
    /// Owned by the caller; never closed here
    Shared(Arc<Mutex<Connection>>),
}

pub struct SqliteStore {
    source: Source,
    options: SqliteOptions,
    warn: WarningHandler,
    shared_schema: Mutex<Option<Arc<Schema>>>,
}

/// One row, all columns, untyped.
#[derive(Debug, Clone)]
struct RawRow {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

/// Row ids to delete, in dependency order.
#[derive(Debug, Default)]
struct RowPlan {
    parts: Vec<String>,
    messages: Vec<String>,
    sessions: Vec<String>,
    projects: Vec<String>,
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) | ValueRef::Blob(t) => {
            Value::String(String::from_utf8_lossy(t).into_owned())
        }
    }
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_as_string(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Text(s) => Some(s.clone()),
        SqlValue::Integer(i) => Some(i.to_string()),
        _ => None,
    }
}

/// Payload first, then typed columns on top.
fn merge_row(mapped: &[(&FieldSpec, &str)], values: Vec<Value>) -> std::result::Result<Value, String> {
    let mut doc = Value::Object(Map::new());
    if let Some(pos) = mapped.iter().position(|(def, _)| def.field == Field::Data) {
        match &values[pos] {
            Value::Null => {}
            Value::String(raw) if raw.trim().is_empty() => {}
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(parsed @ Value::Object(_)) => doc = parsed,
                Ok(_) => return Err("payload is not a JSON object".to_string()),
                Err(e) => return Err(format!("payload is not valid JSON: {}", e)),
            },
            _ => return Err("payload is not text".to_string()),
        }
    }
    for ((def, _), value) in mapped.iter().zip(values) {
        if def.field == Field::Data || value.is_null() {
            continue;
        }
        document::set_path(&mut doc, def.doc_path, value);
    }
    Ok(doc)
}

impl SqliteStore {
    pub fn open(path: PathBuf, options: SqliteOptions, warn: WarningHandler) -> Self {
        Self {
            source: Source::Path(path),
            options,
            warn,
            shared_schema: Mutex::new(None),
        }
    }

    /// Use a connection the caller owns. Its busy timeout is left as is.
    pub fn with_connection(
        conn: Arc<Mutex<Connection>>,
        options: SqliteOptions,
        warn: WarningHandler,
    ) -> Self {
        Self {
            source: Source::Shared(conn),
            options,
            warn,
            shared_schema: Mutex::new(None),
        }
    }

    /// Run discovery and report what is missing (empty when the schema fits).
    pub fn diagnose(&self) -> Result<SchemaDiagnosis> {
        match self.with_conn(|_, _| Ok(())) {
            Ok(()) => Ok(SchemaDiagnosis::default()),
            Err(Error::SchemaMismatch(diag)) => Ok(diag),
            Err(e) => Err(e),
        }
    }

    fn connect(&self, path: &Path) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let timeout = if self.options.wait_for_lock {
            self.options.lock_timeout
        } else {
            Duration::ZERO
        };
        conn.busy_timeout(timeout)?;
        Ok(conn)
    }

    fn cached_schema(&self, conn: &Connection) -> Result<Arc<Schema>> {
        let mut cache = self
            .shared_schema
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(schema) = cache.as_ref() {
            return Ok(Arc::clone(schema));
        }
        let schema = Arc::new(schema::discover(conn)?);
        *cache = Some(Arc::clone(&schema));
        Ok(schema)
    }

    fn run<T>(&self, f: impl FnOnce(&Connection, &Schema) -> Result<T>) -> Result<T> {
        match &self.source {
            Source::Path(path) => {
                let conn = self.connect(path)?;
                let outcome = schema::discover(&conn).and_then(|schema| f(&conn, &schema));
                if let Err((_, e)) = conn.close() {
                    warn!(error = %e, "Failed to close database connection");
                }
                outcome
            }
            Source::Shared(shared) => {
                let conn = shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                let schema = self.cached_schema(&conn)?;
                f(&conn, &schema)
            }
        }
    }

    /// Open (or borrow) a connection with a discovered schema.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection, &Schema) -> Result<T>) -> Result<T> {
        self.run(f).map_err(|e| match e {
            Error::Database(inner) => Error::from_sqlite(inner, self.options.wait_for_lock),
            other => other,
        })
    }

    /// Read path: degrade schema and lock problems unless strict.
    fn read<T: Default>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&Connection, &Schema) -> Result<T>,
    ) -> Result<T> {
        match self.with_conn(f) {
            Err(Error::SchemaMismatch(diag)) if !self.options.strict => {
                (self.warn)(&StoreWarning::SchemaMismatch(diag));
                Ok(T::default())
            }
            Err(Error::LockContention { .. }) if !self.options.strict => {
                (self.warn)(&StoreWarning::LockContention { operation });
                Ok(T::default())
            }
            other => other,
        }
    }

    /// Rows of `table` as merged documents. Malformed payloads are skipped.
    fn select_docs(
        &self,
        conn: &Connection,
        table: &TableMap,
        filter: Option<(Field, &str)>,
    ) -> Result<Vec<Value>> {
        let mapped: Vec<(&FieldSpec, &str)> = table.mapped().collect();
        let columns: Vec<String> = mapped.iter().map(|(_, col)| quote_ident(col)).collect();
        let mut sql = format!("SELECT {} FROM {}", columns.join(", "), table.table());
        if let Some((field, _)) = filter {
            sql.push_str(&format!(" WHERE {} = ?1", table.col(field)?));
        }
        sql.push_str(&format!(" ORDER BY {}", table.col(Field::Id)?));
        debug!(table = table.logical.name(), %sql, "Querying");

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = match filter {
            Some((_, value)) => stmt.query(params![value])?,
            None => stmt.query([])?,
        };
        let id_pos = mapped.iter().position(|(def, _)| def.field == Field::Id);

        let mut docs = vec![];
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(mapped.len());
            for i in 0..mapped.len() {
                values.push(sql_to_json(row.get_ref(i)?));
            }
            let id = id_pos.and_then(|pos| match &values[pos] {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
            match merge_row(&mapped, values) {
                Ok(doc) => docs.push(doc),
                Err(reason) => self.skip_row(table, id, reason),
            }
        }
        Ok(docs)
    }

    fn skip_row(&self, table: &TableMap, id: Option<String>, reason: String) {
        (self.warn)(&StoreWarning::MalformedRow {
            table: table.logical.name().to_string(),
            id,
            reason,
        });
    }

    fn exists(conn: &Connection, table: &TableMap, id: &str) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE {} = ?1 LIMIT 1",
            table.table(),
            table.col(Field::Id)?
        );
        let found: Option<i64> = conn.query_row(&sql, params![id], |row| row.get(0)).optional()?;
        Ok(found.is_some())
    }

    fn ids_where(conn: &Connection, table: &TableMap, field: Field, value: &str) -> Result<Vec<String>> {
        let id_col = table.col(Field::Id)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1 ORDER BY {}",
            id_col,
            table.table(),
            table.col(field)?,
            id_col
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![value], |row| row.get::<_, SqlValue>(0))?;
        let mut ids = vec![];
        for value in rows {
            if let Some(id) = sql_as_string(&value?) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn select_raw(conn: &Connection, table: &TableMap, field: Field, value: &str) -> Result<Vec<RawRow>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?1 ORDER BY {}",
            table.table(),
            table.col(field)?,
            table.col(Field::Id)?
        );
        let mut stmt = conn.prepare(&sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
        let width = columns.len();
        let rows = stmt.query_map(params![value], |row| {
            (0..width)
                .map(|i| row.get::<_, SqlValue>(i))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;
        let mut raw = vec![];
        for values in rows {
            raw.push(RawRow {
                columns: columns.clone(),
                values: values?,
            });
        }
        Ok(raw)
    }

    fn raw_id(table: &TableMap, row: &RawRow) -> Option<String> {
        let col = table.column(Field::Id)?;
        let pos = row.columns.iter().position(|c| c == col)?;
        sql_as_string(&row.values[pos])
    }

    fn load_session_doc(&self, conn: &Connection, schema: &Schema, session_id: &str) -> Result<Option<Session>> {
        let docs = self.select_docs(conn, &schema.sessions, Some((Field::Id, session_id)))?;
        Ok(docs
            .first()
            .and_then(|doc| document::session_from_doc(doc, Some(session_id), None).ok()))
    }

    fn plan_session(conn: &Connection, schema: &Schema, session_id: &str, plan: &mut RowPlan) -> Result<()> {
        for message_id in Self::ids_where(conn, &schema.messages, Field::SessionRef, session_id)? {
            plan.parts.extend(Self::ids_where(
                conn,
                &schema.parts,
                Field::MessageRef,
                &message_id,
            )?);
            plan.messages.push(message_id);
        }
        plan.sessions.push(session_id.to_string());
        Ok(())
    }

    fn plan_targets<'a>(schema: &'a Schema, plan: &'a RowPlan) -> [(&'a TableMap, &'a [String]); 4] {
        [
            (&schema.parts, plan.parts.as_slice()),
            (&schema.messages, plan.messages.as_slice()),
            (&schema.sessions, plan.sessions.as_slice()),
            (&schema.projects, plan.projects.as_slice()),
        ]
    }

    /// Write each planned row as `<table>/<id>.json` under `dir`.
    fn backup_rows(conn: &Connection, schema: &Schema, plan: &RowPlan, dir: &Path) -> Result<Vec<String>> {
        let mut written = vec![];
        for (table, ids) in Self::plan_targets(schema, plan) {
            let table_dir = dir.join(table.logical.name());
            for id in ids {
                for row in Self::select_raw(conn, table, Field::Id, id)? {
                    let object: Map<String, Value> = row
                        .columns
                        .iter()
                        .zip(row.values.iter())
                        .map(|(col, value)| (col.clone(), sql_to_json(ValueRef::from(value))))
                        .collect();
                    fs::create_dir_all(&table_dir).at(&table_dir)?;
                    let path = table_dir.join(format!("{}.json", id));
                    let body = serde_json::to_string_pretty(&Value::Object(object))
                        .map_err(|e| Error::malformed(id, e.to_string()))?;
                    fs::write(&path, body).at(&path)?;
                    written.push(path.display().to_string());
                }
            }
        }
        Ok(written)
    }

    fn execute(&self, conn: &Connection, schema: &Schema, plan: RowPlan, options: &DeleteOptions) -> Result<DeleteResult> {
        let removed: Vec<String> = Self::plan_targets(schema, &plan)
            .iter()
            .flat_map(|(table, ids)| {
                ids.iter()
                    .map(move |id| format!("{}/{}", table.logical.name(), id))
            })
            .collect();

        if options.dry_run {
            return Ok(DeleteResult {
                dry_run: true,
                removed,
                backed_up: vec![],
            });
        }

        let backed_up = match &options.backup_dir {
            Some(dir) => Self::backup_rows(conn, schema, &plan, dir)?,
            None => vec![],
        };

        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        for (table, ids) in Self::plan_targets(schema, &plan) {
            let sql = format!(
                "DELETE FROM {} WHERE {} = ?1",
                table.table(),
                table.col(Field::Id)?
            );
            let mut stmt = tx.prepare(&sql)?;
            for id in ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;

        info!(rows = removed.len(), "Deleted rows");
        Ok(DeleteResult {
            dry_run: false,
            removed,
            backed_up,
        })
    }

    /// Read-modify-write one row: payload and mirrored columns both get the
    /// edits and a fresh `updated` stamp.
    fn update_row(conn: &Connection, table: &TableMap, id: &str, edits: &[(Field, Value)]) -> Result<()> {
        let now = Value::from(now_ms());
        let id_col = table.col(Field::Id)?;
        let mut assignments: Vec<String> = vec![];
        let mut values: Vec<SqlValue> = vec![];

        if table.has(Field::Data) {
            let data_col = table.col(Field::Data)?;
            let raw: Option<String> = conn
                .query_row(
                    &format!("SELECT {} FROM {} WHERE {} = ?1", data_col, table.table(), id_col),
                    params![id],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            let mut doc = match raw.as_deref().map(str::trim) {
                None | Some("") => Value::Object(Map::new()),
                Some(raw) => serde_json::from_str::<Value>(raw)
                    .ok()
                    .filter(Value::is_object)
                    .ok_or_else(|| Error::malformed(format!("{}/{}", table.logical, id), "payload is not a JSON object"))?,
            };
            for (field, value) in edits {
                document::set_path(&mut doc, table.doc_path(*field), value.clone());
            }
            document::set_path(&mut doc, table.doc_path(Field::Updated), now.clone());
            assignments.push(format!("{} = ?{}", data_col, assignments.len() + 1));
            values.push(SqlValue::Text(doc.to_string()));
        }

        for (field, value) in edits {
            if table.has(*field) {
                assignments.push(format!("{} = ?{}", table.col(*field)?, assignments.len() + 1));
                values.push(json_to_sql(value));
            }
        }
        if table.has(Field::Updated) {
            assignments.push(format!("{} = ?{}", table.col(Field::Updated)?, assignments.len() + 1));
            values.push(json_to_sql(&now));
        }

        if assignments.is_empty() {
            return Err(Error::SchemaMismatch(SchemaDiagnosis::missing_field(
                table.logical,
                edits.first().map(|(f, _)| *f).unwrap_or(Field::Data),
            )));
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            table.table(),
            assignments.join(", "),
            id_col,
            assignments.len() + 1
        );
        values.push(SqlValue::Text(id.to_string()));
        let changed = conn.execute(&sql, params_from_iter(values))?;
        if changed == 0 {
            return Err(Error::not_found(table.logical.name(), id));
        }
        Ok(())
    }

    fn update_session(&self, session_id: &str, edits: &[(Field, Value)], check_project: Option<&str>) -> Result<Session> {
        self.with_conn(|conn, schema| {
            if !Self::exists(conn, &schema.sessions, session_id)? {
                return Err(Error::not_found("session", session_id));
            }
            if let Some(project_id) = check_project {
                if !Self::exists(conn, &schema.projects, project_id)? {
                    return Err(Error::not_found("project", project_id));
                }
            }

            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            Self::update_row(&tx, &schema.sessions, session_id, edits)?;
            tx.commit()?;

            self.load_session_doc(conn, schema, session_id)?
                .ok_or_else(|| Error::not_found("session", session_id))
        })
    }

    /// Substitute remapped ids and overrides into a raw row.
    fn remap_row(table: &TableMap, row: &mut RawRow, ids: &IdMap, overrides: &[(Field, Value)]) -> Result<()> {
        for (col, value) in row.columns.iter().zip(row.values.iter_mut()) {
            let Some(field) = table.field_of(col) else {
                continue;
            };
            if let Some((_, replacement)) = overrides.iter().find(|(f, _)| *f == field) {
                *value = json_to_sql(replacement);
                continue;
            }
            match field {
                Field::Id | Field::SessionRef | Field::MessageRef | Field::ParentRef => {
                    let mapped = sql_as_string(value)
                        .and_then(|old| ids.get(&old).map(str::to_string));
                    if let Some(new) = mapped {
                        *value = SqlValue::Text(new);
                    }
                }
                Field::Data => {
                    let SqlValue::Text(raw) = value else {
                        continue;
                    };
                    if raw.trim().is_empty() {
                        continue;
                    }
                    let mut doc: Value = serde_json::from_str(raw)
                        .map_err(|e| Error::malformed(format!("{}/{}", table.logical, col), e.to_string()))?;
                    document::remap_document(&mut doc, ids);
                    for (field, replacement) in overrides {
                        document::set_path(&mut doc, table.doc_path(*field), replacement.clone());
                    }
                    *raw = doc.to_string();
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn insert_row(conn: &Connection, table: &TableMap, row: &RawRow) -> Result<()> {
        let columns: Vec<String> = row.columns.iter().map(|c| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.table(),
            columns.join(", "),
            placeholders.join(", ")
        );
        conn.execute(&sql, params_from_iter(row.values.iter()))?;
        Ok(())
    }
}

impl MetadataStore for SqliteStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn load_projects(&self) -> Result<Vec<Project>> {
        self.read("load_projects", |conn, schema| {
            let mut projects = vec![];
            for doc in self.select_docs(conn, &schema.projects, None)? {
                match document::project_from_doc(&doc, None) {
                    Ok(project) => projects.push(project),
                    Err(reason) => self.skip_row(&schema.projects, None, reason),
                }
            }
            projects.sort_by(|a, b| a.project_id.cmp(&b.project_id));
            Ok(projects)
        })
    }

    fn load_sessions(&self, project_id: Option<&str>) -> Result<Vec<Session>> {
        self.read("load_sessions", |conn, schema| {
            let filter = project_id.map(|p| (Field::ProjectRef, p));
            let mut sessions = vec![];
            for doc in self.select_docs(conn, &schema.sessions, filter)? {
                match document::session_from_doc(&doc, None, None) {
                    Ok(session) => sessions.push(session),
                    Err(reason) => self.skip_row(&schema.sessions, None, reason),
                }
            }
            sort_sessions(&mut sessions);
            Ok(sessions)
        })
    }

    fn load_chat_index(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        self.read("load_chat_index", |conn, schema| {
            let filter = Some((Field::SessionRef, session_id));
            let mut messages = vec![];
            for doc in self.select_docs(conn, &schema.messages, filter)? {
                match document::message_from_doc(&doc, None, Some(session_id)) {
                    Ok(message) => messages.push(message),
                    Err(reason) => self.skip_row(&schema.messages, None, reason),
                }
            }
            sort_messages(&mut messages);
            Ok(messages)
        })
    }

    fn load_parts(&self, message_id: &str) -> Result<Option<Vec<ChatPart>>> {
        self.read("load_parts", |conn, schema| {
            if !Self::exists(conn, &schema.messages, message_id)? {
                return Ok(None);
            }
            let filter = Some((Field::MessageRef, message_id));
            let mut parts = vec![];
            for doc in self.select_docs(conn, &schema.parts, filter)? {
                match document::part_from_doc(&doc, None, Some(message_id)) {
                    Ok(part) => parts.push(part),
                    Err(reason) => self.skip_row(&schema.parts, None, reason),
                }
            }
            document::sort_parts(&mut parts);
            Ok(Some(parts.into_iter().map(|(part, _)| part).collect()))
        })
    }

    /// Exact lookups never degrade: a busy database or a schema problem is
    /// reported as such, never as a missing record.
    fn get_project(&self, project_id: &str) -> Result<Project> {
        self.with_conn(|conn, schema| {
            let docs = self.select_docs(conn, &schema.projects, Some((Field::Id, project_id)))?;
            Ok(docs
                .first()
                .and_then(|doc| document::project_from_doc(doc, Some(project_id)).ok()))
        })?
        .ok_or_else(|| Error::not_found("project", project_id))
    }

    fn get_session(&self, session_id: &str) -> Result<Session> {
        self.with_conn(|conn, schema| self.load_session_doc(conn, schema, session_id))?
        .ok_or_else(|| Error::not_found("session", session_id))
    }

    fn delete_session(&self, session_id: &str, options: &DeleteOptions) -> Result<DeleteResult> {
        self.with_conn(|conn, schema| {
            if !Self::exists(conn, &schema.sessions, session_id)? {
                return Err(Error::not_found("session", session_id));
            }
            let mut plan = RowPlan::default();
            Self::plan_session(conn, schema, session_id, &mut plan)?;
            self.execute(conn, schema, plan, options)
        })
    }

    fn delete_project(&self, project_id: &str, options: &DeleteOptions) -> Result<DeleteResult> {
        self.with_conn(|conn, schema| {
            if !Self::exists(conn, &schema.projects, project_id)? {
                return Err(Error::not_found("project", project_id));
            }
            let mut plan = RowPlan::default();
            for session_id in Self::ids_where(conn, &schema.sessions, Field::ProjectRef, project_id)? {
                Self::plan_session(conn, schema, &session_id, &mut plan)?;
            }
            plan.projects.push(project_id.to_string());
            self.execute(conn, schema, plan, options)
        })
    }

    fn move_session(&self, session_id: &str, target_project_id: &str) -> Result<Session> {
        let session = self.update_session(
            session_id,
            &[(Field::ProjectRef, Value::from(target_project_id))],
            Some(target_project_id),
        )?;
        info!(session = session_id, project = target_project_id, "Moved session");
        Ok(session)
    }

    fn copy_session(&self, session_id: &str, target_project_id: &str) -> Result<Session> {
        self.with_conn(|conn, schema| {
            if !Self::exists(conn, &schema.projects, target_project_id)? {
                return Err(Error::not_found("project", target_project_id));
            }
            let mut session_rows = Self::select_raw(conn, &schema.sessions, Field::Id, session_id)?;
            let Some(mut session_row) = session_rows.pop() else {
                return Err(Error::not_found("session", session_id));
            };

            // Read the whole graph and mint every id before BEGIN.
            let mut ids = IdMap::new();
            let new_session_id = document::new_id("ses");
            ids.insert(session_id, new_session_id.clone());

            let mut message_rows = Self::select_raw(conn, &schema.messages, Field::SessionRef, session_id)?;
            let mut part_rows = vec![];
            for row in &message_rows {
                let Some(message_id) = Self::raw_id(&schema.messages, row) else {
                    continue;
                };
                ids.insert(&message_id, document::new_id("msg"));
                for part in Self::select_raw(conn, &schema.parts, Field::MessageRef, &message_id)? {
                    if let Some(part_id) = Self::raw_id(&schema.parts, &part) {
                        ids.insert(&part_id, document::new_id("prt"));
                    }
                    part_rows.push(part);
                }
            }

            let project_override = [(Field::ProjectRef, Value::from(target_project_id))];
            Self::remap_row(&schema.sessions, &mut session_row, &ids, &project_override)?;
            for row in message_rows.iter_mut() {
                Self::remap_row(&schema.messages, row, &ids, &[])?;
            }
            for row in part_rows.iter_mut() {
                Self::remap_row(&schema.parts, row, &ids, &[])?;
            }

            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            Self::insert_row(&tx, &schema.sessions, &session_row)?;
            for row in &message_rows {
                Self::insert_row(&tx, &schema.messages, row)?;
            }
            for row in &part_rows {
                Self::insert_row(&tx, &schema.parts, row)?;
            }
            tx.commit()?;

            info!(
                source = session_id,
                copy = %new_session_id,
                messages = message_rows.len(),
                parts = part_rows.len(),
                "Copied session"
            );
            self.load_session_doc(conn, schema, &new_session_id)?
                .ok_or_else(|| Error::not_found("session", new_session_id.clone()))
        })
    }

    fn rename_session(&self, session_id: &str, title: &str) -> Result<Session> {
        let title = validate_title(title)?;
        self.update_session(session_id, &[(Field::Title, Value::from(title))], None)
    }
}
