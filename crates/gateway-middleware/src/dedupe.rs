use std::sync::Mutex;

use async_trait::async_trait;
use gateway_core::{time::utc_now_ms, GatewayError, InboundMessage, OutboundMessage, Result};
use rusqlite::Connection;
use tracing::{debug, info, instrument, warn};

use crate::context::{Middleware, ProcessingContext, ProcessingStatus};

#[derive(Debug, Clone, Copy, Default)]
pub struct DedupeStats {
    pub total_messages: i64,
    pub messages_with_duplicates: i64,
    pub total_duplicates_blocked: i64,
}

/// SQLite-backed message_id dedupe store. Tracks `(message_id, channel_id)`
/// pairs and bumps a count on repeat sightings rather than rejecting the
/// write, so retried webhook deliveries are cheap to detect.
pub struct DedupeStore {
    db: Mutex<Connection>,
}

impl DedupeStore {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS message_dedupe (
                message_id    TEXT NOT NULL,
                channel_id    TEXT NOT NULL,
                first_seen_ms INTEGER NOT NULL,
                last_seen_ms  INTEGER NOT NULL,
                count         INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (message_id, channel_id)
            );
            CREATE INDEX IF NOT EXISTS idx_message_dedupe_last_seen
                ON message_dedupe(last_seen_ms);",
        )?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// Atomic insert-or-bump. Returns `true` iff `(message_id, channel_id)`
    /// had already been recorded.
    #[instrument(skip(self))]
    pub fn is_duplicate(&self, message_id: &str, channel_id: &str) -> Result<bool> {
        let now_ms = utc_now_ms();
        let db = self.db.lock().unwrap();

        let inserted = db.execute(
            "INSERT OR IGNORE INTO message_dedupe
             (message_id, channel_id, first_seen_ms, last_seen_ms, count)
             VALUES (?1, ?2, ?3, ?3, 1)",
            rusqlite::params![message_id, channel_id, now_ms],
        )?;

        if inserted == 1 {
            debug!(message_id, "new message recorded");
            return Ok(false);
        }

        db.execute(
            "UPDATE message_dedupe SET last_seen_ms = ?1, count = count + 1
             WHERE message_id = ?2 AND channel_id = ?3",
            rusqlite::params![now_ms, message_id, channel_id],
        )?;
        let count: i64 = db.query_row(
            "SELECT count FROM message_dedupe WHERE message_id = ?1 AND channel_id = ?2",
            rusqlite::params![message_id, channel_id],
            |row| row.get(0),
        )?;
        info!(message_id, count, "duplicate message detected");
        Ok(true)
    }

    pub fn cleanup_old_entries(&self, ttl_ms: i64) -> Result<usize> {
        let cutoff_ms = utc_now_ms() - ttl_ms;
        let db = self.db.lock().unwrap();
        let deleted = db.execute(
            "DELETE FROM message_dedupe WHERE last_seen_ms < ?1",
            rusqlite::params![cutoff_ms],
        )?;
        if deleted > 0 {
            info!(deleted, "cleaned up old dedupe entries");
        }
        Ok(deleted)
    }

    pub fn get_stats(&self) -> Result<DedupeStats> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT
                COUNT(*),
                SUM(CASE WHEN count > 1 THEN 1 ELSE 0 END),
                SUM(count - 1)
             FROM message_dedupe",
            [],
            |row| {
                Ok(DedupeStats {
                    total_messages: row.get::<_, Option<i64>>(0)?.unwrap_or(0),
                    messages_with_duplicates: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    total_duplicates_blocked: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                })
            },
        )
        .map_err(GatewayError::from)
    }
}

/// Inbound-only: rejects messages whose `(message_id, channel_id)` pair has
/// already been seen. Outbound is pass-through — outbound sends should
/// always go out.
pub struct DedupeMiddleware {
    store: DedupeStore,
    ttl_ms: i64,
    cleanup_interval_ms: i64,
    last_cleanup_ms: Mutex<i64>,
}

impl DedupeMiddleware {
    pub fn new(store: DedupeStore, ttl_ms: i64) -> Self {
        Self {
            store,
            ttl_ms,
            cleanup_interval_ms: 60 * 60 * 1000,
            last_cleanup_ms: Mutex::new(utc_now_ms()),
        }
    }

    fn maybe_cleanup(&self) {
        let now_ms = utc_now_ms();
        let mut last = self.last_cleanup_ms.lock().unwrap();
        if now_ms - *last > self.cleanup_interval_ms {
            if let Err(e) = self.store.cleanup_old_entries(self.ttl_ms) {
                warn!(error = %e, "failed to cleanup old dedupe entries");
            }
            *last = now_ms;
        }
    }
}

#[async_trait]
impl Middleware for DedupeMiddleware {
    async fn process_inbound(
        &self,
        message: &InboundMessage,
        mut context: ProcessingContext,
    ) -> ProcessingContext {
        match self.store.is_duplicate(&message.message_id, &message.channel_id) {
            Ok(true) => {
                context.status = ProcessingStatus::Reject;
                context.set_metadata("dedupe_reason", "duplicate_message_id");
            }
            Ok(false) => {
                context.set_metadata("dedupe_checked", true);
            }
            Err(e) => {
                warn!(error = %e, "dedupe store lookup failed");
            }
        }
        self.maybe_cleanup();
        context
    }

    async fn process_outbound(
        &self,
        _message: &OutboundMessage,
        context: ProcessingContext,
    ) -> ProcessingContext {
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> DedupeStore {
        DedupeStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn first_sighting_is_not_duplicate() {
        let s = store();
        assert!(!s.is_duplicate("m1", "c1").unwrap());
    }

    #[test]
    fn second_sighting_is_duplicate() {
        let s = store();
        assert!(!s.is_duplicate("m1", "c1").unwrap());
        assert!(s.is_duplicate("m1", "c1").unwrap());
    }

    #[test]
    fn same_message_id_different_channel_is_distinct() {
        let s = store();
        assert!(!s.is_duplicate("m1", "c1").unwrap());
        assert!(!s.is_duplicate("m1", "c2").unwrap());
    }

    #[test]
    fn cleanup_removes_expired_entries() {
        let s = store();
        s.is_duplicate("m1", "c1").unwrap();
        let deleted = s.cleanup_old_entries(-1).unwrap();
        assert_eq!(deleted, 1);
    }

    #[test]
    fn stats_count_duplicates_blocked() {
        let s = store();
        s.is_duplicate("m1", "c1").unwrap();
        s.is_duplicate("m1", "c1").unwrap();
        s.is_duplicate("m1", "c1").unwrap();
        let stats = s.get_stats().unwrap();
        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.messages_with_duplicates, 1);
        assert_eq!(stats.total_duplicates_blocked, 2);
    }
}
