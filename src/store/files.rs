//! File-tree backend
//!
//! Data format: JSON files under the OpenCode storage root
//!   - project/{project_id}.json                 - Project metadata
//!   - session/{project_id}/{session_id}.json    - Session metadata
//!   - session/info/{session_id}.json            - Legacy sessions index
//!   - message/{session_id}/{message_id}.json    - Message metadata
//!   - part/{message_id}/{part_id}.json          - Message content parts
//!
//! Older OpenCode versions kept messages and parts under `session/message/`
//! and `session/part/`; each lookup tries the primary location first and the
//! legacy one second.

use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{
    now_ms, sort_sessions, validate_title, BackendKind, DeleteOptions, MetadataStore,
    StoreWarning, WarningHandler,
};
use crate::document::{self, IdMap};
use crate::error::{Error, IoContext, Result};
use crate::model::{sort_messages, ChatMessage, ChatPart, DeleteResult, Project, Session};

/// Directory names under `session/` that are not project segments.
const RESERVED_SESSION_DIRS: &[&str] = &["info", "message", "part"];

pub struct FileStore {
    root: PathBuf,
    warn: WarningHandler,
}

/// Files to remove, then directories to prune once empty.
#[derive(Debug, Default)]
struct RemovalPlan {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl RemovalPlan {
    fn add_file(&mut self, path: PathBuf) {
        if !self.files.contains(&path) {
            self.files.push(path);
        }
    }

    /// Every file below `dir`, then `dir` itself for pruning.
    fn add_tree(&mut self, dir: &Path) {
        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        files.sort();
        for file in files {
            self.add_file(file);
        }
        self.dirs.push(dir.to_path_buf());
    }
}

/// A message document with its part documents, keyed by original id.
type MessageGraph = Vec<(String, Value, Vec<(String, Value)>)>;

/// Everything a copy writes, resolved before the first write.
struct CopyPlan<'a> {
    ids: &'a IdMap,
    new_session_id: &'a str,
    target_project_id: &'a str,
    session_doc: &'a Value,
    messages: MessageGraph,
}

fn file_stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|s| s.to_str())
}

impl FileStore {
    pub fn new(root: PathBuf, warn: WarningHandler) -> Self {
        Self { root, warn }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn project_dir(&self) -> PathBuf {
        self.root.join("project")
    }

    fn session_dir(&self) -> PathBuf {
        self.root.join("session")
    }

    fn legacy_session_index(&self) -> PathBuf {
        self.session_dir().join("info")
    }

    fn message_dirs(&self, session_id: &str) -> [PathBuf; 2] {
        [
            self.root.join("message").join(session_id),
            self.session_dir().join("message").join(session_id),
        ]
    }

    fn part_dirs(&self, message_id: &str) -> [PathBuf; 2] {
        [
            self.root.join("part").join(message_id),
            self.session_dir().join("part").join(message_id),
        ]
    }

    /// First existing directory, primary before legacy.
    fn resolve_dir(candidates: &[PathBuf]) -> Option<&PathBuf> {
        candidates.iter().find(|dir| dir.is_dir())
    }

    /// `*.json` files directly inside `dir`, sorted by name.
    fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Ok(vec![]);
        }
        let pattern = format!(
            "{}/*.json",
            glob::Pattern::escape(&dir.to_string_lossy())
        );
        let paths = glob::glob(&pattern)
            .map_err(|e| Error::InvalidArgument(format!("bad storage path: {}", e)))?;
        let mut files: Vec<PathBuf> = paths.filter_map(|p| p.ok()).filter(|p| p.is_file()).collect();
        files.sort();
        Ok(files)
    }

    /// Parse one document; failures are reported and skipped.
    fn read_doc(&self, path: &Path) -> Option<Value> {
        debug!(path = %path.display(), "Reading document");
        let parsed = fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|content| serde_json::from_str::<Value>(&content).map_err(|e| e.to_string()));
        match parsed {
            Ok(doc) => Some(doc),
            Err(reason) => {
                self.skip(path, reason);
                None
            }
        }
    }

    fn skip(&self, path: &Path, reason: String) {
        (self.warn)(&StoreWarning::MalformedDocument {
            path: path.to_path_buf(),
            reason,
        });
    }

    /// Parse a document that a mutation depends on; failure is fatal.
    fn read_doc_strict(path: &Path) -> Result<Value> {
        let content = fs::read_to_string(path).at(path)?;
        serde_json::from_str(&content).map_err(|e| Error::malformed(path.display(), e.to_string()))
    }

    fn write_doc(path: &Path, doc: &Value) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        let body = serde_json::to_string_pretty(doc)
            .map_err(|e| Error::malformed(path.display(), e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body).at(&tmp)?;
        fs::rename(&tmp, path).at(path)?;
        Ok(())
    }

    fn project_path(&self, project_id: &str) -> PathBuf {
        self.project_dir().join(format!("{}.json", project_id))
    }

    /// Project segments under `session/`.
    fn session_project_dirs(&self) -> Result<Vec<PathBuf>> {
        let dir = self.session_dir();
        if !dir.is_dir() {
            return Ok(vec![]);
        }
        let mut dirs = vec![];
        for entry in fs::read_dir(&dir).at(&dir)? {
            let path = entry.at(&dir)?.path();
            let reserved = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| RESERVED_SESSION_DIRS.contains(&n))
                .unwrap_or(true);
            if path.is_dir() && !reserved {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Session documents with the project segment they were found under.
    fn session_docs(&self) -> Result<Vec<(PathBuf, Option<String>)>> {
        let mut found = vec![];
        for project_dir in self.session_project_dirs()? {
            let segment = project_dir
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string);
            for file in Self::json_files(&project_dir)? {
                found.push((file, segment.clone()));
            }
        }
        for file in Self::json_files(&self.legacy_session_index())? {
            found.push((file, None));
        }
        Ok(found)
    }

    /// Every document for `session_id`: project segments first, then the
    /// legacy index. Listings show the first; mutations must cover all.
    fn session_paths(&self, session_id: &str) -> Result<Vec<PathBuf>> {
        let file_name = format!("{}.json", session_id);
        let mut paths = vec![];
        for project_dir in self.session_project_dirs()? {
            let candidate = project_dir.join(&file_name);
            if candidate.is_file() {
                paths.push(candidate);
            }
        }
        let legacy = self.legacy_session_index().join(&file_name);
        if legacy.is_file() {
            paths.push(legacy);
        }
        Ok(paths)
    }

    fn find_session_path(&self, session_id: &str) -> Result<PathBuf> {
        self.session_paths(session_id)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("session", session_id))
    }

    fn ensure_project(&self, project_id: &str) -> Result<()> {
        self.get_project(project_id).map(|_| ())
    }

    /// Message documents of a session, primary and legacy.
    fn message_files(&self, session_id: &str) -> Result<Vec<PathBuf>> {
        let mut files = vec![];
        for dir in self.message_dirs(session_id) {
            files.extend(Self::json_files(&dir)?);
        }
        Ok(files)
    }

    fn plan_session_removal(&self, session_id: &str, plan: &mut RemovalPlan) -> Result<()> {
        let session_paths = self.session_paths(session_id)?;
        if session_paths.is_empty() {
            return Err(Error::not_found("session", session_id));
        }

        for message_file in self.message_files(session_id)? {
            let message_id = self
                .read_doc(&message_file)
                .and_then(|doc| doc.get("id").and_then(Value::as_str).map(str::to_string))
                .or_else(|| file_stem(&message_file).map(str::to_string));
            if let Some(message_id) = message_id {
                for dir in self.part_dirs(&message_id) {
                    if dir.is_dir() {
                        plan.add_tree(&dir);
                    }
                }
            }
        }
        for dir in self.message_dirs(session_id) {
            if dir.is_dir() {
                plan.add_tree(&dir);
            }
        }
        for path in session_paths {
            plan.add_file(path);
        }
        Ok(())
    }

    /// Write a copied graph: messages and parts first, the session last so a
    /// half-written copy never shows up in listings.
    fn write_copy(&self, copy: CopyPlan<'_>, written: &mut Vec<PathBuf>) -> Result<()> {
        let ids = copy.ids;
        for (old_id, mut doc, parts) in copy.messages {
            let new_id = ids.get(&old_id).unwrap_or_default().to_string();
            document::remap_document(&mut doc, ids);
            document::set_path(&mut doc, document::ID, Value::from(new_id.as_str()));
            document::set_path(&mut doc, document::SESSION_REF, Value::from(copy.new_session_id));
            let path = self
                .root
                .join("message")
                .join(copy.new_session_id)
                .join(format!("{}.json", new_id));
            Self::write_doc(&path, &doc)?;
            written.push(path);

            for (old_part_id, mut part_doc) in parts {
                let new_part_id = ids.get(&old_part_id).unwrap_or_default().to_string();
                document::remap_document(&mut part_doc, ids);
                document::set_path(&mut part_doc, document::ID, Value::from(new_part_id.as_str()));
                document::set_path(&mut part_doc, document::MESSAGE_REF, Value::from(new_id.as_str()));
                if part_doc.get("sessionID").is_some() {
                    document::set_path(
                        &mut part_doc,
                        document::SESSION_REF,
                        Value::from(copy.new_session_id),
                    );
                }
                let path = self
                    .root
                    .join("part")
                    .join(&new_id)
                    .join(format!("{}.json", new_part_id));
                Self::write_doc(&path, &part_doc)?;
                written.push(path);
            }
        }

        let path = self
            .session_dir()
            .join(copy.target_project_id)
            .join(format!("{}.json", copy.new_session_id));
        Self::write_doc(&path, copy.session_doc)?;
        written.push(path);
        Ok(())
    }

    fn execute(&self, plan: RemovalPlan, options: &DeleteOptions) -> Result<DeleteResult> {
        let removed: Vec<String> = plan
            .files
            .iter()
            .map(|p| p.display().to_string())
            .collect();

        if options.dry_run {
            return Ok(DeleteResult {
                dry_run: true,
                removed,
                backed_up: vec![],
            });
        }

        let mut backed_up = vec![];
        if let Some(backup_dir) = &options.backup_dir {
            for file in &plan.files {
                let relative = file.strip_prefix(&self.root).unwrap_or(file);
                let target = backup_dir.join(relative);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).at(parent)?;
                }
                fs::copy(file, &target).at(&target)?;
                backed_up.push(target.display().to_string());
            }
            info!(dir = %backup_dir.display(), files = backed_up.len(), "Backup written");
        }

        for file in &plan.files {
            fs::remove_file(file).at(file)?;
        }
        // Deepest first so nested directories empty out before their parents.
        let mut dirs = plan.dirs;
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        for dir in dirs {
            if let Err(e) = fs::remove_dir(&dir) {
                debug!(dir = %dir.display(), error = %e, "Left directory in place");
            }
        }

        info!(files = removed.len(), "Deleted documents");
        Ok(DeleteResult {
            dry_run: false,
            removed,
            backed_up,
        })
    }
}

impl MetadataStore for FileStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Files
    }

    fn load_projects(&self) -> Result<Vec<Project>> {
        let mut projects = vec![];
        for path in Self::json_files(&self.project_dir())? {
            let Some(doc) = self.read_doc(&path) else {
                continue;
            };
            match document::project_from_doc(&doc, file_stem(&path)) {
                Ok(project) => projects.push(project),
                Err(reason) => self.skip(&path, reason),
            }
        }
        projects.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        Ok(projects)
    }

    fn load_sessions(&self, project_id: Option<&str>) -> Result<Vec<Session>> {
        let mut seen = HashSet::new();
        let mut sessions = vec![];

        for (path, segment) in self.session_docs()? {
            let Some(doc) = self.read_doc(&path) else {
                continue;
            };
            let session = match document::session_from_doc(&doc, file_stem(&path), segment.as_deref())
            {
                Ok(session) => session,
                Err(reason) => {
                    self.skip(&path, reason);
                    continue;
                }
            };
            // Primary documents are listed before the legacy index.
            if !seen.insert(session.session_id.clone()) {
                continue;
            }
            if project_id.map_or(true, |p| session.project_id == p) {
                sessions.push(session);
            }
        }

        sort_sessions(&mut sessions);
        Ok(sessions)
    }

    fn load_chat_index(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let dirs = self.message_dirs(session_id);
        let Some(dir) = Self::resolve_dir(&dirs) else {
            return Ok(vec![]);
        };

        let mut messages = vec![];
        for path in Self::json_files(dir)? {
            let Some(doc) = self.read_doc(&path) else {
                continue;
            };
            match document::message_from_doc(&doc, file_stem(&path), Some(session_id)) {
                Ok(message) => messages.push(message),
                Err(reason) => self.skip(&path, reason),
            }
        }
        sort_messages(&mut messages);
        Ok(messages)
    }

    fn load_parts(&self, message_id: &str) -> Result<Option<Vec<ChatPart>>> {
        let dirs = self.part_dirs(message_id);
        let Some(dir) = Self::resolve_dir(&dirs) else {
            return Ok(None);
        };

        let mut parts = vec![];
        for path in Self::json_files(dir)? {
            let Some(doc) = self.read_doc(&path) else {
                continue;
            };
            match document::part_from_doc(&doc, file_stem(&path), Some(message_id)) {
                Ok(part) => parts.push(part),
                Err(reason) => self.skip(&path, reason),
            }
        }
        document::sort_parts(&mut parts);
        Ok(Some(parts.into_iter().map(|(part, _)| part).collect()))
    }

    fn delete_session(&self, session_id: &str, options: &DeleteOptions) -> Result<DeleteResult> {
        let mut plan = RemovalPlan::default();
        self.plan_session_removal(session_id, &mut plan)?;
        self.execute(plan, options)
    }

    fn delete_project(&self, project_id: &str, options: &DeleteOptions) -> Result<DeleteResult> {
        let project_path = self.project_path(project_id);
        let sessions = self.load_sessions(Some(project_id))?;
        if !project_path.is_file() && sessions.is_empty() {
            return Err(Error::not_found("project", project_id));
        }

        let mut plan = RemovalPlan::default();
        for session in &sessions {
            self.plan_session_removal(&session.session_id, &mut plan)?;
        }
        if project_path.is_file() {
            plan.add_file(project_path);
        }
        plan.dirs.push(self.session_dir().join(project_id));
        self.execute(plan, options)
    }

    fn move_session(&self, session_id: &str, target_project_id: &str) -> Result<Session> {
        let sources = self.session_paths(session_id)?;
        let Some(source) = sources.first() else {
            return Err(Error::not_found("session", session_id));
        };
        self.ensure_project(target_project_id)?;

        let mut doc = Self::read_doc_strict(source)?;
        document::set_path(&mut doc, document::PROJECT_REF, Value::from(target_project_id));
        document::set_path(&mut doc, document::UPDATED, Value::from(now_ms()));

        let target = self
            .session_dir()
            .join(target_project_id)
            .join(format!("{}.json", session_id));
        Self::write_doc(&target, &doc)?;
        // Stale copies elsewhere would shadow or resurrect the old project.
        for stale in sources.iter().filter(|p| **p != target) {
            fs::remove_file(stale).at(stale)?;
        }

        info!(session = session_id, project = target_project_id, "Moved session");
        document::session_from_doc(&doc, Some(session_id), Some(target_project_id))
            .map_err(|message| Error::malformed(target.display(), message))
    }

    fn copy_session(&self, session_id: &str, target_project_id: &str) -> Result<Session> {
        let source = self.find_session_path(session_id)?;
        self.ensure_project(target_project_id)?;
        let mut session_doc = Self::read_doc_strict(&source)?;

        // Read the whole graph and mint every id before the first write.
        let mut ids = IdMap::new();
        let new_session_id = document::new_id("ses");
        ids.insert(session_id, new_session_id.clone());

        let mut messages: MessageGraph = vec![];
        // Any unreadable document aborts the copy before the first write.
        for path in self.message_files(session_id)? {
            let doc = Self::read_doc_strict(&path)?;
            let Some(old_id) = doc
                .get("id")
                .and_then(Value::as_str)
                .or_else(|| file_stem(&path))
                .map(str::to_string)
            else {
                continue;
            };
            if ids.get(&old_id).is_some() {
                continue;
            }
            ids.insert(&old_id, document::new_id("msg"));

            let mut parts = vec![];
            for dir in self.part_dirs(&old_id) {
                for part_path in Self::json_files(&dir)? {
                    let part_doc = Self::read_doc_strict(&part_path)?;
                    let Some(part_id) = part_doc
                        .get("id")
                        .and_then(Value::as_str)
                        .or_else(|| file_stem(&part_path))
                        .map(str::to_string)
                    else {
                        continue;
                    };
                    if ids.get(&part_id).is_some() {
                        continue;
                    }
                    ids.insert(&part_id, document::new_id("prt"));
                    parts.push((part_id, part_doc));
                }
            }
            messages.push((old_id, doc, parts));
        }

        document::remap_document(&mut session_doc, &ids);
        document::set_path(&mut session_doc, document::ID, Value::from(new_session_id.clone()));
        document::set_path(
            &mut session_doc,
            document::PROJECT_REF,
            Value::from(target_project_id),
        );

        let mut written: Vec<PathBuf> = vec![];
        let copy = CopyPlan {
            ids: &ids,
            new_session_id: &new_session_id,
            target_project_id,
            session_doc: &session_doc,
            messages,
        };
        if let Err(e) = self.write_copy(copy, &mut written) {
            for path in &written {
                let _ = fs::remove_file(path);
            }
            return Err(e);
        }

        info!(
            source = session_id,
            copy = %new_session_id,
            ids = ids.len(),
            "Copied session"
        );
        document::session_from_doc(&session_doc, Some(&new_session_id), Some(target_project_id))
            .map_err(|message| Error::malformed(&new_session_id, message))
    }

    fn rename_session(&self, session_id: &str, title: &str) -> Result<Session> {
        let title = validate_title(title)?;
        let path = self.find_session_path(session_id)?;
        let mut doc = Self::read_doc_strict(&path)?;
        document::set_path(&mut doc, document::TITLE, Value::from(title));
        document::set_path(&mut doc, document::UPDATED, Value::from(now_ms()));
        Self::write_doc(&path, &doc)?;

        let segment = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .filter(|n| !RESERVED_SESSION_DIRS.contains(n));
        document::session_from_doc(&doc, Some(session_id), segment)
            .map_err(|message| Error::malformed(path.display(), message))
    }
}
