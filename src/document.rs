//! JSON document shapes shared by both backends
//!
//! OpenCode stores each entity as a JSON object:
//!   - project: `{ id, worktree, vcs, time: { created } }`
//!   - session: `{ id, projectID, directory, title, version, time: { created, updated } }`
//!   - message: `{ id, sessionID, role, parentID, time: { created }, tokens: { .. } }`
//!   - part:    `{ id, messageID, sessionID, type, time: { start }, .. }`
//!
//! The relational backend merges its typed columns into the same shape, so
//! these parsers serve both.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::content;
use crate::model::{
    ChatMessage, ChatPart, ExistenceState, Project, Role, Session, TokenBreakdown, TokenSummary,
    LOADING_PREVIEW,
};

pub const ID: &[&str] = &["id"];
pub const PROJECT_REF: &[&str] = &["projectID"];
pub const SESSION_REF: &[&str] = &["sessionID"];
pub const MESSAGE_REF: &[&str] = &["messageID"];
pub const PARENT_REF: &[&str] = &["parentID"];
pub const CREATED: &[&str] = &["time", "created"];
pub const UPDATED: &[&str] = &["time", "updated"];
pub const PART_START: &[&str] = &["time", "start"];
pub const TITLE: &[&str] = &["title"];
pub const DIRECTORY: &[&str] = &["directory"];
pub const VERSION: &[&str] = &["version"];
pub const WORKTREE: &[&str] = &["worktree"];
pub const VCS: &[&str] = &["vcs"];
pub const ROLE: &[&str] = &["role"];

pub fn get_path<'a>(doc: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(doc, |v, key| v.get(key))
}

fn get_str(doc: &Value, path: &[&str]) -> Option<String> {
    match get_path(doc, path)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Write `value` at `path`, creating intermediate objects. A non-object in the
/// way is replaced.
pub fn set_path(doc: &mut Value, path: &[&str], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    let Value::Object(obj) = doc else {
        return;
    };
    if rest.is_empty() {
        obj.insert(first.to_string(), value);
    } else {
        let child = obj.entry(first.to_string()).or_insert(Value::Null);
        set_path(child, rest, value);
    }
}

/// Convert millisecond timestamp to DateTime
pub fn ms_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Epoch milliseconds (number or numeric string) or an RFC 3339 string.
pub fn value_to_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(ms_to_datetime),
        Value::String(s) => s.trim().parse::<i64>().ok().and_then(ms_to_datetime).or_else(|| {
            DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }),
        _ => None,
    }
}

fn get_time(doc: &Value, path: &[&str]) -> Option<DateTime<Utc>> {
    get_path(doc, path).and_then(value_to_datetime)
}

fn ensure_object(doc: &Value) -> Result<(), String> {
    if doc.is_object() {
        Ok(())
    } else {
        Err("document is not a JSON object".to_string())
    }
}

fn id_or(doc: &Value, fallback: Option<&str>) -> Result<String, String> {
    get_str(doc, ID)
        .filter(|id| !id.is_empty())
        .or_else(|| fallback.map(str::to_string))
        .ok_or_else(|| "missing id".to_string())
}

pub fn project_from_doc(doc: &Value, fallback_id: Option<&str>) -> Result<Project, String> {
    ensure_object(doc)?;
    let worktree = get_str(doc, WORKTREE);
    Ok(Project {
        project_id: id_or(doc, fallback_id)?,
        existence_state: ExistenceState::of_worktree(worktree.as_deref()),
        worktree,
        vcs_kind: get_str(doc, VCS),
        created_at: get_time(doc, CREATED),
    })
}

pub fn session_from_doc(
    doc: &Value,
    fallback_id: Option<&str>,
    fallback_project: Option<&str>,
) -> Result<Session, String> {
    ensure_object(doc)?;
    let project_id = get_str(doc, PROJECT_REF)
        .or_else(|| fallback_project.map(str::to_string))
        .ok_or_else(|| "missing project reference".to_string())?;
    Ok(Session {
        session_id: id_or(doc, fallback_id)?,
        project_id,
        directory: get_str(doc, DIRECTORY),
        title: get_str(doc, TITLE),
        version: get_str(doc, VERSION),
        created_at: get_time(doc, CREATED),
        updated_at: get_time(doc, UPDATED),
    })
}

pub fn message_from_doc(
    doc: &Value,
    fallback_id: Option<&str>,
    fallback_session: Option<&str>,
) -> Result<ChatMessage, String> {
    ensure_object(doc)?;
    let session_id = get_str(doc, SESSION_REF)
        .or_else(|| fallback_session.map(str::to_string))
        .ok_or_else(|| "missing session reference".to_string())?;
    let role = Role::parse(get_str(doc, ROLE).as_deref());
    let tokens = match role {
        Role::Assistant => Some(tokens_from_doc(doc)),
        _ => None,
    };
    Ok(ChatMessage {
        session_id,
        message_id: id_or(doc, fallback_id)?,
        role,
        created_at: get_time(doc, CREATED),
        parent_id: get_str(doc, PARENT_REF),
        tokens,
        parts: None,
        preview_text: LOADING_PREVIEW.to_string(),
        total_chars: None,
    })
}

/// Part plus its explicit ordering key, when the document carries one.
pub fn part_from_doc(
    doc: &Value,
    fallback_id: Option<&str>,
    fallback_message: Option<&str>,
) -> Result<(ChatPart, Option<i64>), String> {
    ensure_object(doc)?;
    let message_id = get_str(doc, MESSAGE_REF)
        .or_else(|| fallback_message.map(str::to_string))
        .ok_or_else(|| "missing message reference".to_string())?;
    let order = get_time(doc, PART_START).map(|t| t.timestamp_millis());
    let extracted = content::extract(doc);
    Ok((
        ChatPart {
            part_id: id_or(doc, fallback_id)?,
            message_id,
            part_type: extracted.part_type,
            text: extracted.text,
            tool_name: extracted.tool_name,
            tool_status: extracted.tool_status,
        },
        order,
    ))
}

/// Order parts by explicit start time when every part has one, otherwise by id.
pub fn sort_parts(parts: &mut [(ChatPart, Option<i64>)]) {
    if parts.iter().all(|(_, order)| order.is_some()) {
        parts.sort_by(|(a, oa), (b, ob)| oa.cmp(ob).then_with(|| a.part_id.cmp(&b.part_id)));
    } else {
        parts.sort_by(|(a, _), (b, _)| a.part_id.cmp(&b.part_id));
    }
}

fn token_count(obj: &Map<String, Value>, key: &str) -> Result<u64, String> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
                    .map(|f| f as u64)
            })
            .ok_or_else(|| format!("token field '{}' is not a non-negative integer", key)),
        Some(_) => Err(format!("token field '{}' is not a number", key)),
    }
}

fn breakdown_from_object(obj: &Map<String, Value>) -> Result<TokenBreakdown, String> {
    let (cache_read, cache_write) = match obj.get("cache") {
        None | Some(Value::Null) => (0, 0),
        Some(Value::Object(cache)) => (token_count(cache, "read")?, token_count(cache, "write")?),
        Some(_) => return Err("token cache field is not an object".to_string()),
    };
    TokenBreakdown::new(
        token_count(obj, "input")?,
        token_count(obj, "output")?,
        token_count(obj, "reasoning")?,
        cache_read,
        cache_write,
    )
    .ok_or_else(|| "token counts overflow".to_string())
}

/// Read an assistant message's `tokens` payload. Missing or malformed payloads
/// are `Unknown`, never zero.
pub fn tokens_from_doc(doc: &Value) -> TokenSummary {
    let Some(raw) = doc.get("tokens") else {
        return TokenSummary::unknown("no token data recorded");
    };
    let Some(obj) = raw.as_object() else {
        return TokenSummary::unknown("token payload is not an object");
    };

    let parsed = breakdown_from_object(obj);

    match parsed {
        Ok(tokens) => TokenSummary::Known { tokens },
        Err(reason) => TokenSummary::Unknown { reason },
    }
}

/// Old-to-new identifier table used by copy. Built in full before any write.
#[derive(Debug, Default, Clone)]
pub struct IdMap {
    map: HashMap<String, String>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, old: &str, new: String) {
        self.map.insert(old.to_string(), new);
    }

    pub fn get(&self, old: &str) -> Option<&str> {
        self.map.get(old).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Fresh identifier with OpenCode's `<prefix>_` convention.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

/// Rewrite every identifier field the map knows about.
pub fn remap_document(doc: &mut Value, ids: &IdMap) {
    for path in [ID, SESSION_REF, MESSAGE_REF, PARENT_REF] {
        let replacement = get_str(doc, path).and_then(|old| ids.get(&old).map(str::to_string));
        if let Some(new) = replacement {
            set_path(doc, path, Value::String(new));
        }
    }
}
