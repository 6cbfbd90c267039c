use std::sync::Mutex;

use gateway_channels::SessionScope;
use gateway_core::{time::utc_now_ms, GatewayError, Result};
use rusqlite::{OptionalExtension, Connection};
use serde_json::{Map, Value};
use tracing::{info, instrument};
use uuid::Uuid;

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_INACTIVE: &str = "inactive";
pub const STATUS_ARCHIVED: &str = "archived";

pub fn scope_to_str(scope: SessionScope) -> &'static str {
    match scope {
        SessionScope::User => "user",
        SessionScope::UserConversation => "user_conversation",
    }
}

pub fn scope_from_str(s: &str) -> Result<SessionScope> {
    match s {
        "user" => Ok(SessionScope::User),
        "user_conversation" => Ok(SessionScope::UserConversation),
        other => Err(GatewayError::Persistence(format!("unknown session scope: {other}"))),
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub channel_id: String,
    pub user_key: String,
    pub conversation_key: String,
    pub scope: SessionScope,
    pub title: Option<String>,
    pub status: String,
    pub message_count: i64,
    pub metadata: Option<Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct SessionHistoryEntry {
    pub action: String,
    pub details: Option<String>,
    pub created_at: i64,
}

/// SQLite-backed session store. Tracks which session is currently active
/// for a given channel/user/conversation, plus per-session metadata and
/// history. Mirrors the `channel_sessions` / `sessions` / `session_history`
/// table split one-for-one.
pub struct SessionStore {
    db: Mutex<Connection>,
}

impl SessionStore {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS channel_sessions (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id        TEXT NOT NULL,
                user_key          TEXT NOT NULL,
                conversation_key  TEXT NOT NULL,
                scope             TEXT NOT NULL,
                active_session_id TEXT NOT NULL,
                created_at        INTEGER NOT NULL,
                updated_at        INTEGER NOT NULL,
                UNIQUE(channel_id, user_key, conversation_key)
            );
            CREATE TABLE IF NOT EXISTS sessions (
                session_id       TEXT PRIMARY KEY,
                channel_id       TEXT NOT NULL,
                user_key         TEXT NOT NULL,
                conversation_key TEXT NOT NULL,
                scope            TEXT NOT NULL,
                title            TEXT,
                status           TEXT NOT NULL DEFAULT 'active',
                message_count    INTEGER NOT NULL DEFAULT 0,
                metadata         TEXT,
                created_at       INTEGER NOT NULL,
                updated_at       INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS session_history (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                action     TEXT NOT NULL,
                details    TEXT,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(session_id)
            );
            CREATE INDEX IF NOT EXISTS idx_channel_sessions_lookup
                ON channel_sessions(channel_id, user_key, conversation_key);
            CREATE INDEX IF NOT EXISTS idx_sessions_channel_user
                ON sessions(channel_id, user_key, status);
            CREATE INDEX IF NOT EXISTS idx_session_history_session_id
                ON session_history(session_id);",
        )?;
        Ok(Self { db: Mutex::new(conn) })
    }

    #[instrument(skip(self, metadata))]
    #[allow(clippy::too_many_arguments)]
    pub fn create_session(
        &self,
        channel_id: &str,
        user_key: &str,
        conversation_key: &str,
        scope: SessionScope,
        title: Option<&str>,
        session_id: Option<String>,
        metadata: Option<&Value>,
    ) -> Result<String> {
        let session_id = session_id.unwrap_or_else(|| {
            format!("cs_{}", &Uuid::new_v4().simple().to_string()[..16])
        });
        let now = utc_now_ms();
        let metadata_json = metadata.map(|m| m.to_string());
        let scope_str = scope_to_str(scope);

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO sessions
             (session_id, channel_id, user_key, conversation_key, scope,
              title, status, message_count, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?9)",
            rusqlite::params![
                session_id, channel_id, user_key, conversation_key, scope_str,
                title, STATUS_ACTIVE, metadata_json, now
            ],
        )?;

        Self::set_active_session_internal(
            &db, channel_id, user_key, conversation_key, scope, &session_id, now,
        )?;
        Self::log_history(&db, &session_id, "created", Some("Session created"), now)?;

        info!(session_id, channel_id, user_key, scope = scope_str, "created session");
        Ok(session_id)
    }

    #[instrument(skip(self))]
    pub fn get_active_session(
        &self,
        channel_id: &str,
        user_key: &str,
        conversation_key: Option<&str>,
    ) -> Result<Option<Session>> {
        let conversation_key = conversation_key.unwrap_or(user_key);
        let db = self.db.lock().unwrap();
        let session_id: Option<String> = db
            .query_row(
                "SELECT active_session_id FROM channel_sessions
                 WHERE channel_id = ?1 AND user_key = ?2 AND conversation_key = ?3",
                rusqlite::params![channel_id, user_key, conversation_key],
                |row| row.get(0),
            )
            .optional()?;

        match session_id {
            Some(id) => Self::get_session_by_id(&db, &id),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    pub fn switch_session(
        &self,
        channel_id: &str,
        user_key: &str,
        conversation_key: &str,
        new_session_id: &str,
    ) -> Result<()> {
        let now = utc_now_ms();
        let db = self.db.lock().unwrap();

        let scope_str: String = db
            .query_row(
                "SELECT scope FROM sessions WHERE session_id = ?1",
                rusqlite::params![new_session_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| GatewayError::Validation(format!("session not found: {new_session_id}")))?;
        let scope = scope_from_str(&scope_str)?;

        let old_session_id: Option<String> = db
            .query_row(
                "SELECT active_session_id FROM channel_sessions
                 WHERE channel_id = ?1 AND user_key = ?2 AND conversation_key = ?3",
                rusqlite::params![channel_id, user_key, conversation_key],
                |row| row.get(0),
            )
            .optional()?;

        Self::set_active_session_internal(
            &db, channel_id, user_key, conversation_key, scope, new_session_id, now,
        )?;

        let details = match &old_session_id {
            Some(old) => format!("Switched from {old}"),
            None => "Set as active".to_string(),
        };
        Self::log_history(&db, new_session_id, "activated", Some(&details), now)?;

        if let Some(old) = &old_session_id {
            if old != new_session_id {
                let details = format!("Switched to {new_session_id}");
                Self::log_history(&db, old, "deactivated", Some(&details), now)?;
            }
        }

        info!(channel_id, user_key, old = ?old_session_id, new = new_session_id, "switched session");
        Ok(())
    }

    pub fn list_sessions(
        &self,
        channel_id: &str,
        user_key: &str,
        status: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Session>> {
        let db = self.db.lock().unwrap();
        let sql = "SELECT session_id, channel_id, user_key, conversation_key, scope, title,
                          status, message_count, metadata, created_at, updated_at
                   FROM sessions
                   WHERE channel_id = ?1 AND user_key = ?2 AND (?3 IS NULL OR status = ?3)
                   ORDER BY updated_at DESC
                   LIMIT ?4";
        let mut stmt = db.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params![channel_id, user_key, status, limit], row_to_session)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let db = self.db.lock().unwrap();
        Self::get_session_by_id(&db, session_id)
    }

    /// Updates title/status/metadata. `metadata` is merged into the
    /// existing metadata object; a key mapped to `Value::Null` deletes
    /// that key rather than storing a null.
    #[instrument(skip(self, metadata))]
    pub fn update_session(
        &self,
        session_id: &str,
        title: Option<&str>,
        status: Option<&str>,
        metadata: Option<&Map<String, Value>>,
    ) -> Result<()> {
        let now = utc_now_ms();
        let db = self.db.lock().unwrap();

        let mut merged_metadata: Option<String> = None;
        if let Some(updates) = metadata {
            let current: Option<String> = db
                .query_row(
                    "SELECT metadata FROM sessions WHERE session_id = ?1",
                    rusqlite::params![session_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(current) = current {
                let mut current_map: Map<String, Value> = current
                    .parse::<Value>()
                    .ok()
                    .and_then(|v| v.as_object().cloned())
                    .unwrap_or_default();
                for (key, value) in updates {
                    if value.is_null() {
                        current_map.remove(key);
                    } else {
                        current_map.insert(key.clone(), value.clone());
                    }
                }
                merged_metadata = Some(Value::Object(current_map).to_string());
            } else {
                merged_metadata = Some(Value::Object(updates.clone()).to_string());
            }
        }

        db.execute(
            "UPDATE sessions SET
                updated_at = ?1,
                title = COALESCE(?2, title),
                status = COALESCE(?3, status),
                metadata = COALESCE(?4, metadata)
             WHERE session_id = ?5",
            rusqlite::params![now, title, status, merged_metadata, session_id],
        )?;

        let mut changes = Vec::new();
        if let Some(t) = title {
            changes.push(format!("title='{t}'"));
        }
        if let Some(s) = status {
            changes.push(format!("status='{s}'"));
        }
        if metadata.is_some() {
            changes.push("metadata updated".to_string());
        }
        let details = if changes.is_empty() {
            "Updated".to_string()
        } else {
            format!("Updated: {}", changes.join(", "))
        };
        Self::log_history(&db, session_id, "updated", Some(&details), now)?;
        Ok(())
    }

    pub fn increment_message_count(&self, session_id: &str) -> Result<()> {
        let now = utc_now_ms();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE sessions SET message_count = message_count + 1, updated_at = ?1
             WHERE session_id = ?2",
            rusqlite::params![now, session_id],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn archive_session(&self, session_id: &str) -> Result<()> {
        let now = utc_now_ms();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE session_id = ?3",
            rusqlite::params![STATUS_ARCHIVED, now, session_id],
        )?;
        Self::log_history(&db, session_id, "archived", Some("Session archived"), now)?;
        info!(session_id, "archived session");
        Ok(())
    }

    pub fn get_session_history(&self, session_id: &str, limit: i64) -> Result<Vec<SessionHistoryEntry>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT action, details, created_at FROM session_history
             WHERE session_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![session_id, limit], |row| {
            Ok(SessionHistoryEntry {
                action: row.get(0)?,
                details: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn set_active_session_internal(
        db: &Connection,
        channel_id: &str,
        user_key: &str,
        conversation_key: &str,
        scope: SessionScope,
        session_id: &str,
        now: i64,
    ) -> Result<()> {
        let exists: Option<i64> = db
            .query_row(
                "SELECT id FROM channel_sessions
                 WHERE channel_id = ?1 AND user_key = ?2 AND conversation_key = ?3",
                rusqlite::params![channel_id, user_key, conversation_key],
                |row| row.get(0),
            )
            .optional()?;

        if exists.is_some() {
            db.execute(
                "UPDATE channel_sessions SET active_session_id = ?1, updated_at = ?2
                 WHERE channel_id = ?3 AND user_key = ?4 AND conversation_key = ?5",
                rusqlite::params![session_id, now, channel_id, user_key, conversation_key],
            )?;
        } else {
            db.execute(
                "INSERT INTO channel_sessions
                 (channel_id, user_key, conversation_key, scope, active_session_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![channel_id, user_key, conversation_key, scope_to_str(scope), session_id, now],
            )?;
        }
        Ok(())
    }

    fn get_session_by_id(db: &Connection, session_id: &str) -> Result<Option<Session>> {
        db.query_row(
            "SELECT session_id, channel_id, user_key, conversation_key, scope, title,
                    status, message_count, metadata, created_at, updated_at
             FROM sessions WHERE session_id = ?1",
            rusqlite::params![session_id],
            row_to_session,
        )
        .optional()
        .map_err(GatewayError::from)
    }

    fn log_history(db: &Connection, session_id: &str, action: &str, details: Option<&str>, now: i64) -> Result<()> {
        db.execute(
            "INSERT INTO session_history (session_id, action, details, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![session_id, action, details, now],
        )?;
        Ok(())
    }
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let scope_str: String = row.get(4)?;
    let scope = scope_from_str(&scope_str).unwrap_or(SessionScope::User);
    let metadata_raw: Option<String> = row.get(8)?;
    let metadata = metadata_raw.and_then(|s| s.parse::<Value>().ok());
    Ok(Session {
        session_id: row.get(0)?,
        channel_id: row.get(1)?,
        user_key: row.get(2)?,
        conversation_key: row.get(3)?,
        scope,
        title: row.get(5)?,
        status: row.get(6)?,
        message_count: row.get(7)?,
        metadata,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn create_session_sets_it_active() {
        let store = store();
        let id = store
            .create_session("telegram", "u1", "u1", SessionScope::User, Some("hi"), None, None)
            .unwrap();
        assert!(id.starts_with("cs_"));
        let active = store.get_active_session("telegram", "u1", None).unwrap().unwrap();
        assert_eq!(active.session_id, id);
        assert_eq!(active.status, STATUS_ACTIVE);
    }

    #[test]
    fn get_active_session_defaults_conversation_key_to_user_key() {
        let store = store();
        store
            .create_session("telegram", "u1", "u1", SessionScope::User, None, None, None)
            .unwrap();
        let active = store.get_active_session("telegram", "u1", None).unwrap();
        assert!(active.is_some());
    }

    #[test]
    fn switch_session_updates_active_pointer_and_history() {
        let store = store();
        let first = store
            .create_session("telegram", "u1", "u1", SessionScope::User, None, None, None)
            .unwrap();
        let second = store
            .create_session("telegram", "u1", "u1", SessionScope::User, None, None, None)
            .unwrap();
        store.switch_session("telegram", "u1", "u1", &first).unwrap();
        let active = store.get_active_session("telegram", "u1", None).unwrap().unwrap();
        assert_eq!(active.session_id, first);
        let history = store.get_session_history(&first, 10).unwrap();
        assert!(history.iter().any(|h| h.action == "activated"));
        let second_history = store.get_session_history(&second, 10).unwrap();
        assert!(second_history.iter().any(|h| h.action == "deactivated"));
    }

    #[test]
    fn switch_session_rejects_unknown_id() {
        let store = store();
        let err = store.switch_session("telegram", "u1", "u1", "cs_missing").unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn update_session_merges_metadata_and_deletes_null_keys() {
        let store = store();
        let id = store
            .create_session(
                "telegram",
                "u1",
                "u1",
                SessionScope::User,
                None,
                None,
                Some(&serde_json::json!({"a": 1, "b": 2})),
            )
            .unwrap();
        let mut updates = Map::new();
        updates.insert("b".to_string(), Value::Null);
        updates.insert("c".to_string(), Value::from(3));
        store.update_session(&id, Some("new title"), None, Some(&updates)).unwrap();

        let session = store.get_session(&id).unwrap().unwrap();
        assert_eq!(session.title.as_deref(), Some("new title"));
        let metadata = session.metadata.unwrap();
        assert_eq!(metadata.get("a"), Some(&Value::from(1)));
        assert!(metadata.get("b").is_none());
        assert_eq!(metadata.get("c"), Some(&Value::from(3)));
    }

    #[test]
    fn archive_session_marks_status_and_logs() {
        let store = store();
        let id = store
            .create_session("telegram", "u1", "u1", SessionScope::User, None, None, None)
            .unwrap();
        store.archive_session(&id).unwrap();
        let session = store.get_session(&id).unwrap().unwrap();
        assert_eq!(session.status, STATUS_ARCHIVED);
        let history = store.get_session_history(&id, 10).unwrap();
        assert!(history.iter().any(|h| h.action == "archived"));
    }

    #[test]
    fn list_sessions_filters_by_status_and_orders_recent_first() {
        let store = store();
        let first = store
            .create_session("telegram", "u1", "u1", SessionScope::User, None, None, None)
            .unwrap();
        let second = store
            .create_session("telegram", "u1", "conv2", SessionScope::UserConversation, None, None, None)
            .unwrap();
        store.archive_session(&first).unwrap();

        let active_only = store.list_sessions("telegram", "u1", Some(STATUS_ACTIVE), 10).unwrap();
        assert_eq!(active_only.len(), 1);
        assert_eq!(active_only[0].session_id, second);

        let all = store.list_sessions("telegram", "u1", None, 10).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn increment_message_count_bumps_counter() {
        let store = store();
        let id = store
            .create_session("telegram", "u1", "u1", SessionScope::User, None, None, None)
            .unwrap();
        store.increment_message_count(&id).unwrap();
        store.increment_message_count(&id).unwrap();
        let session = store.get_session(&id).unwrap().unwrap();
        assert_eq!(session.message_count, 2);
    }
}
