use std::sync::Mutex;

use async_trait::async_trait;
use gateway_core::{
    time::{to_epoch_ms, utc_now_ms},
    InboundMessage, OutboundMessage, Result,
};
use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::context::{Middleware, ProcessingContext, ProcessingStatus};

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: i64,
    pub message_id: String,
    pub direction: String,
    pub channel_id: String,
    pub user_key: String,
    pub conversation_key: Option<String>,
    pub session_id: Option<String>,
    pub timestamp_ms: i64,
    pub processing_status: Option<String>,
    pub metadata: Value,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuditStats {
    pub total_messages: i64,
    pub inbound_count: i64,
    pub outbound_count: i64,
    pub unique_channels: i64,
    pub unique_users: i64,
    pub unique_sessions: i64,
}

fn status_str(status: ProcessingStatus) -> &'static str {
    match status {
        ProcessingStatus::Continue => "continue",
        ProcessingStatus::Stop => "stop",
        ProcessingStatus::Reject => "reject",
        ProcessingStatus::Error => "error",
    }
}

/// Persists only metadata about each message — never text, attachments, or
/// the raw provider payload — so the audit trail can't leak message content.
pub struct AuditStore {
    db: Mutex<Connection>,
}

impl AuditStore {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS message_audit (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id        TEXT NOT NULL,
                direction         TEXT NOT NULL,
                channel_id        TEXT NOT NULL,
                user_key          TEXT NOT NULL,
                conversation_key  TEXT,
                session_id        TEXT,
                timestamp_ms      INTEGER NOT NULL,
                processing_status TEXT,
                metadata          TEXT,
                created_at_ms     INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_message_id ON message_audit(message_id);
            CREATE INDEX IF NOT EXISTS idx_audit_channel_user
                ON message_audit(channel_id, user_key, timestamp_ms DESC);
            CREATE INDEX IF NOT EXISTS idx_audit_session
                ON message_audit(session_id, timestamp_ms DESC);
            CREATE INDEX IF NOT EXISTS idx_audit_created_at ON message_audit(created_at_ms DESC);",
        )?;
        Ok(Self { db: Mutex::new(conn) })
    }

    #[instrument(skip(self, metadata))]
    pub fn log_inbound(
        &self,
        message: &InboundMessage,
        status: ProcessingStatus,
        metadata: &Value,
    ) -> Result<i64> {
        let now_ms = utc_now_ms();
        let timestamp_ms = to_epoch_ms(message.timestamp);
        let session_id = message
            .metadata
            .get("session_id")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO message_audit
             (message_id, direction, channel_id, user_key, conversation_key,
              session_id, timestamp_ms, processing_status, metadata, created_at_ms)
             VALUES (?1, 'inbound', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                message.message_id,
                message.channel_id,
                message.user_key,
                message.conversation_key,
                session_id,
                timestamp_ms,
                status_str(status),
                metadata.to_string(),
                now_ms,
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    #[instrument(skip(self, metadata))]
    pub fn log_outbound(
        &self,
        message: &OutboundMessage,
        status: ProcessingStatus,
        metadata: &Value,
    ) -> Result<i64> {
        let now_ms = utc_now_ms();
        let message_id = metadata
            .get("message_id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let session_id = message
            .metadata
            .get("session_id")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO message_audit
             (message_id, direction, channel_id, user_key, conversation_key,
              session_id, timestamp_ms, processing_status, metadata, created_at_ms)
             VALUES (?1, 'outbound', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                message_id,
                message.channel_id,
                message.user_key,
                message.conversation_key,
                session_id,
                now_ms,
                status_str(status),
                metadata.to_string(),
                now_ms,
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Records an out-of-band event (e.g. a policy violation) using the
    /// same table, so violation history shows up alongside message
    /// history in `query_by_user`/`query_by_session`.
    pub fn log_event(
        &self,
        message_id: &str,
        channel_id: &str,
        user_key: &str,
        metadata: &Value,
    ) -> Result<i64> {
        let now_ms = utc_now_ms();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO message_audit
             (message_id, direction, channel_id, user_key, conversation_key,
              session_id, timestamp_ms, processing_status, metadata, created_at_ms)
             VALUES (?1, 'event', ?2, ?3, NULL, NULL, ?4, NULL, ?5, ?4)",
            rusqlite::params![message_id, channel_id, user_key, now_ms, metadata.to_string()],
        )?;
        Ok(db.last_insert_rowid())
    }

    pub fn query_by_user(&self, channel_id: &str, user_key: &str, limit: i64) -> Result<Vec<AuditEntry>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT * FROM message_audit
             WHERE channel_id = ?1 AND user_key = ?2
             ORDER BY timestamp_ms DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(rusqlite::params![channel_id, user_key, limit], row_to_entry)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn query_by_session(&self, session_id: &str) -> Result<Vec<AuditEntry>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT * FROM message_audit WHERE session_id = ?1 ORDER BY timestamp_ms ASC",
        )?;
        let rows = stmt.query_map(rusqlite::params![session_id], row_to_entry)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn cleanup_old_entries(&self, retention_ms: i64) -> Result<usize> {
        let cutoff_ms = utc_now_ms() - retention_ms;
        let db = self.db.lock().unwrap();
        let deleted = db.execute(
            "DELETE FROM message_audit WHERE created_at_ms < ?1",
            rusqlite::params![cutoff_ms],
        )?;
        if deleted > 0 {
            debug!(deleted, "cleaned up old audit entries");
        }
        Ok(deleted)
    }

    pub fn get_stats(&self) -> Result<AuditStats> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT
                COUNT(*),
                SUM(CASE WHEN direction = 'inbound' THEN 1 ELSE 0 END),
                SUM(CASE WHEN direction = 'outbound' THEN 1 ELSE 0 END),
                COUNT(DISTINCT channel_id),
                COUNT(DISTINCT channel_id || ':' || user_key),
                COUNT(DISTINCT session_id)
             FROM message_audit
             WHERE session_id IS NOT NULL",
            [],
            |row| {
                Ok(AuditStats {
                    total_messages: row.get::<_, Option<i64>>(0)?.unwrap_or(0),
                    inbound_count: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    outbound_count: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    unique_channels: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                    unique_users: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                    unique_sessions: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                })
            },
        )
        .map_err(gateway_core::GatewayError::from)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    let metadata_str: Option<String> = row.get("metadata")?;
    Ok(AuditEntry {
        id: row.get("id")?,
        message_id: row.get("message_id")?,
        direction: row.get("direction")?,
        channel_id: row.get("channel_id")?,
        user_key: row.get("user_key")?,
        conversation_key: row.get("conversation_key")?,
        session_id: row.get("session_id")?,
        timestamp_ms: row.get("timestamp_ms")?,
        processing_status: row.get("processing_status")?,
        metadata: metadata_str
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(Value::Null),
        created_at_ms: row.get("created_at_ms")?,
    })
}

/// Logs both directions. Audit failures never fail the message in flight —
/// they are warnings only, since an audit-trail gap is recoverable but a
/// dropped message is not.
pub struct AuditMiddleware {
    store: AuditStore,
    retention_ms: i64,
    cleanup_interval_ms: i64,
    last_cleanup_ms: Mutex<i64>,
}

impl AuditMiddleware {
    pub fn new(store: AuditStore, retention_days: i64) -> Self {
        Self {
            store,
            retention_ms: retention_days * 24 * 60 * 60 * 1000,
            cleanup_interval_ms: 24 * 60 * 60 * 1000,
            last_cleanup_ms: Mutex::new(utc_now_ms()),
        }
    }

    fn maybe_cleanup(&self) {
        let now_ms = utc_now_ms();
        let mut last = self.last_cleanup_ms.lock().unwrap();
        if now_ms - *last > self.cleanup_interval_ms {
            if let Err(e) = self.store.cleanup_old_entries(self.retention_ms) {
                warn!(error = %e, "failed to cleanup old audit entries");
            }
            *last = now_ms;
        }
    }
}

#[async_trait]
impl Middleware for AuditMiddleware {
    async fn process_inbound(
        &self,
        message: &InboundMessage,
        mut context: ProcessingContext,
    ) -> ProcessingContext {
        let metadata_value = metadata_to_value(&context.metadata);
        match self.store.log_inbound(message, context.status, &metadata_value) {
            Ok(entry_id) => context.set_metadata("audit_entry_id", entry_id),
            Err(e) => warn!(error = %e, "failed to log inbound message to audit"),
        }
        self.maybe_cleanup();
        context
    }

    async fn process_outbound(
        &self,
        message: &OutboundMessage,
        mut context: ProcessingContext,
    ) -> ProcessingContext {
        let metadata_value = metadata_to_value(&context.metadata);
        match self.store.log_outbound(message, context.status, &metadata_value) {
            Ok(entry_id) => context.set_metadata("audit_entry_id", entry_id),
            Err(e) => warn!(error = %e, "failed to log outbound message to audit"),
        }
        context
    }
}

fn metadata_to_value(metadata: &std::collections::HashMap<String, Value>) -> Value {
    Value::Object(metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn store() -> AuditStore {
        AuditStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn inbound() -> InboundMessage {
        InboundMessage::new(
            "c1",
            "u1",
            "u1",
            "m1",
            Utc::now(),
            gateway_core::MessageType::Text,
            Some("hi".into()),
            vec![],
            None,
            Value::Null,
        )
        .unwrap()
    }

    #[test]
    fn logs_inbound_and_is_queryable_by_user() {
        let s = store();
        s.log_inbound(&inbound(), ProcessingStatus::Continue, &json!({})).unwrap();
        let entries = s.query_by_user("c1", "u1", 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].direction, "inbound");
    }

    #[test]
    fn metadata_never_includes_message_text() {
        let s = store();
        s.log_inbound(&inbound(), ProcessingStatus::Continue, &json!({"dedupe_checked": true})).unwrap();
        let entries = s.query_by_user("c1", "u1", 10).unwrap();
        assert!(entries[0].metadata.get("text").is_none());
    }

    #[test]
    fn stats_only_counts_entries_with_a_session() {
        let s = store();
        s.log_inbound(&inbound(), ProcessingStatus::Continue, &json!({})).unwrap();
        let stats = s.get_stats().unwrap();
        assert_eq!(stats.total_messages, 0);
    }
}
