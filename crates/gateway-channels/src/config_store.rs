use std::sync::Mutex;

use gateway_core::{time::utc_now_ms, Result};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use tracing::info;

pub const STATUS_DISABLED: &str = "disabled";
pub const STATUS_ENABLED: &str = "enabled";
pub const STATUS_ERROR: &str = "error";
pub const STATUS_NEEDS_SETUP: &str = "needs_setup";

#[derive(Debug, Clone)]
pub struct ChannelStatusRow {
    pub channel_id: String,
    pub enabled: bool,
    pub status: String,
    pub last_error: Option<String>,
    pub last_heartbeat_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ChannelEvent {
    pub event_type: String,
    pub message_id: Option<String>,
    pub status: String,
    pub error: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub channel_id: String,
    pub action: String,
    pub details: Option<String>,
    pub performed_by: Option<String>,
    pub created_at: i64,
}

/// Persists per-channel configuration (as opaque JSON — encryption of
/// secret fields is the caller's responsibility before it reaches this
/// store), enable/disable status, health heartbeats, and an audit trail of
/// configuration changes.
pub struct ChannelConfigStore {
    db: Mutex<Connection>,
}

impl ChannelConfigStore {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             CREATE TABLE IF NOT EXISTS channel_configs (
                channel_id TEXT PRIMARY KEY,
                config_json TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'needs_setup',
                enabled INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                last_heartbeat_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS channel_audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id TEXT NOT NULL,
                action TEXT NOT NULL,
                details TEXT,
                performed_by TEXT,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (channel_id) REFERENCES channel_configs(channel_id)
             );
             CREATE TABLE IF NOT EXISTS channel_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                message_id TEXT,
                status TEXT NOT NULL,
                error TEXT,
                metadata TEXT,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (channel_id) REFERENCES channel_configs(channel_id)
             );
             CREATE INDEX IF NOT EXISTS idx_channel_events_channel_id ON channel_events(channel_id);
             CREATE INDEX IF NOT EXISTS idx_channel_events_created_at ON channel_events(created_at);
             CREATE INDEX IF NOT EXISTS idx_channel_audit_log_channel_id ON channel_audit_log(channel_id);",
        )?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn save_config(&self, channel_id: &str, config: &Value, performed_by: Option<&str>) -> Result<()> {
        let now = utc_now_ms();
        let config_json = config.to_string();
        let db = self.db.lock().unwrap();

        let exists: Option<String> = db
            .query_row(
                "SELECT channel_id FROM channel_configs WHERE channel_id = ?1",
                rusqlite::params![channel_id],
                |row| row.get(0),
            )
            .optional()?;

        let action = if exists.is_some() {
            db.execute(
                "UPDATE channel_configs SET config_json = ?1, updated_at = ?2, status = ?3
                 WHERE channel_id = ?4",
                rusqlite::params![config_json, now, STATUS_NEEDS_SETUP, channel_id],
            )?;
            "config_updated"
        } else {
            db.execute(
                "INSERT INTO channel_configs
                 (channel_id, config_json, status, enabled, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?4)",
                rusqlite::params![channel_id, config_json, STATUS_NEEDS_SETUP, now],
            )?;
            "config_created"
        };

        log_audit(&db, channel_id, action, Some("configuration changed"), performed_by)?;
        Ok(())
    }

    pub fn get_config(&self, channel_id: &str) -> Result<Option<Value>> {
        let db = self.db.lock().unwrap();
        let raw: Option<String> = db
            .query_row(
                "SELECT config_json FROM channel_configs WHERE channel_id = ?1",
                rusqlite::params![channel_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|s| serde_json::from_str(&s).unwrap_or(Value::Null)))
    }

    pub fn set_enabled(&self, channel_id: &str, enabled: bool, performed_by: Option<&str>) -> Result<()> {
        let now = utc_now_ms();
        let status = if enabled { STATUS_ENABLED } else { STATUS_DISABLED };
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE channel_configs SET enabled = ?1, updated_at = ?2, status = ?3 WHERE channel_id = ?4",
            rusqlite::params![enabled, now, status, channel_id],
        )?;
        let action = if enabled { "enabled" } else { "disabled" };
        log_audit(&db, channel_id, action, Some(action), performed_by)?;
        Ok(())
    }

    pub fn is_enabled(&self, channel_id: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let enabled: Option<bool> = db
            .query_row(
                "SELECT enabled FROM channel_configs WHERE channel_id = ?1",
                rusqlite::params![channel_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(enabled.unwrap_or(false))
    }

    pub fn get_status(&self, channel_id: &str) -> Result<Option<ChannelStatusRow>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT channel_id, enabled, status, last_error, last_heartbeat_at
             FROM channel_configs WHERE channel_id = ?1",
            rusqlite::params![channel_id],
            |row| {
                Ok(ChannelStatusRow {
                    channel_id: row.get(0)?,
                    enabled: row.get(1)?,
                    status: row.get(2)?,
                    last_error: row.get(3)?,
                    last_heartbeat_at: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(gateway_core::GatewayError::from)
    }

    pub fn list_channels(&self) -> Result<Vec<ChannelStatusRow>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT channel_id, enabled, status, last_error, last_heartbeat_at
             FROM channel_configs ORDER BY channel_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ChannelStatusRow {
                channel_id: row.get(0)?,
                enabled: row.get(1)?,
                status: row.get(2)?,
                last_error: row.get(3)?,
                last_heartbeat_at: row.get(4)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn update_heartbeat(&self, channel_id: &str, status: Option<&str>) -> Result<()> {
        let now = utc_now_ms();
        let db = self.db.lock().unwrap();
        match status {
            Some(status) => db.execute(
                "UPDATE channel_configs SET last_heartbeat_at = ?1, status = ?2, updated_at = ?1
                 WHERE channel_id = ?3",
                rusqlite::params![now, status, channel_id],
            )?,
            None => db.execute(
                "UPDATE channel_configs SET last_heartbeat_at = ?1, updated_at = ?1 WHERE channel_id = ?2",
                rusqlite::params![now, channel_id],
            )?,
        };
        Ok(())
    }

    pub fn log_event(
        &self,
        channel_id: &str,
        event_type: &str,
        status: &str,
        message_id: Option<&str>,
        error: Option<&str>,
        metadata: Option<&Value>,
    ) -> Result<()> {
        let now = utc_now_ms();
        let metadata_json = metadata.map(|m| m.to_string());
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO channel_events
             (channel_id, event_type, message_id, status, error, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![channel_id, event_type, message_id, status, error, metadata_json, now],
        )?;
        Ok(())
    }

    pub fn get_recent_events(&self, channel_id: &str, limit: i64) -> Result<Vec<ChannelEvent>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT event_type, message_id, status, error, metadata, created_at
             FROM channel_events WHERE channel_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![channel_id, limit], |row| {
            let metadata_str: Option<String> = row.get(4)?;
            Ok(ChannelEvent {
                event_type: row.get(0)?,
                message_id: row.get(1)?,
                status: row.get(2)?,
                error: row.get(3)?,
                metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
                created_at: row.get(5)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn get_audit_log(&self, channel_id: Option<&str>, limit: i64) -> Result<Vec<AuditLogEntry>> {
        let db = self.db.lock().unwrap();
        let mut entries = Vec::new();
        let mut push_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<()> {
            entries.push(AuditLogEntry {
                channel_id: row.get(0)?,
                action: row.get(1)?,
                details: row.get(2)?,
                performed_by: row.get(3)?,
                created_at: row.get(4)?,
            });
            Ok(())
        };

        match channel_id {
            Some(channel_id) => {
                let mut stmt = db.prepare(
                    "SELECT channel_id, action, details, performed_by, created_at
                     FROM channel_audit_log WHERE channel_id = ?1 ORDER BY created_at DESC LIMIT ?2",
                )?;
                let mut rows = stmt.query(rusqlite::params![channel_id, limit])?;
                while let Some(row) = rows.next()? {
                    push_row(row)?;
                }
            }
            None => {
                let mut stmt = db.prepare(
                    "SELECT channel_id, action, details, performed_by, created_at
                     FROM channel_audit_log ORDER BY created_at DESC LIMIT ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![limit])?;
                while let Some(row) = rows.next()? {
                    push_row(row)?;
                }
            }
        }
        Ok(entries)
    }

    pub fn delete_channel(&self, channel_id: &str, performed_by: Option<&str>) -> Result<()> {
        let db = self.db.lock().unwrap();
        log_audit(&db, channel_id, "deleted", Some("channel configuration deleted"), performed_by)?;
        db.execute("DELETE FROM channel_events WHERE channel_id = ?1", rusqlite::params![channel_id])?;
        db.execute("DELETE FROM channel_configs WHERE channel_id = ?1", rusqlite::params![channel_id])?;
        info!(channel_id, "deleted channel configuration");
        Ok(())
    }
}

fn log_audit(
    conn: &Connection,
    channel_id: &str,
    action: &str,
    details: Option<&str>,
    performed_by: Option<&str>,
) -> Result<()> {
    let now = utc_now_ms();
    conn.execute(
        "INSERT INTO channel_audit_log (channel_id, action, details, performed_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![channel_id, action, details, performed_by, now],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> ChannelConfigStore {
        ChannelConfigStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn save_then_get_round_trips() {
        let s = store();
        s.save_config("telegram", &json!({"bot_token": "abc"}), Some("admin")).unwrap();
        let cfg = s.get_config("telegram").unwrap().unwrap();
        assert_eq!(cfg["bot_token"], "abc");
    }

    #[test]
    fn new_config_resets_status_to_needs_setup() {
        let s = store();
        s.save_config("telegram", &json!({}), None).unwrap();
        s.set_enabled("telegram", true, None).unwrap();
        s.save_config("telegram", &json!({"bot_token": "xyz"}), None).unwrap();
        let status = s.get_status("telegram").unwrap().unwrap();
        assert_eq!(status.status, STATUS_NEEDS_SETUP);
    }

    #[test]
    fn set_enabled_toggles_status_and_flag() {
        let s = store();
        s.save_config("telegram", &json!({}), None).unwrap();
        s.set_enabled("telegram", true, None).unwrap();
        assert!(s.is_enabled("telegram").unwrap());
        s.set_enabled("telegram", false, None).unwrap();
        assert!(!s.is_enabled("telegram").unwrap());
    }

    #[test]
    fn delete_channel_cascades_events() {
        let s = store();
        s.save_config("telegram", &json!({}), None).unwrap();
        s.log_event("telegram", "message_received", "success", Some("m1"), None, None).unwrap();
        s.delete_channel("telegram", Some("admin")).unwrap();
        assert!(s.get_config("telegram").unwrap().is_none());
        assert!(s.get_recent_events("telegram", 10).unwrap().is_empty());
    }

    #[test]
    fn audit_log_records_lifecycle() {
        let s = store();
        s.save_config("telegram", &json!({}), Some("admin")).unwrap();
        s.set_enabled("telegram", true, Some("admin")).unwrap();
        let log = s.get_audit_log(Some("telegram"), 10).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].action, "enabled");
    }
}
