use std::sync::Mutex;

use async_trait::async_trait;
use gateway_core::{time::utc_now_ms, InboundMessage, OutboundMessage, Result};
use rusqlite::Connection;
use tracing::{instrument, warn};

use crate::context::{Middleware, ProcessingContext, ProcessingStatus};

#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitStats {
    pub total_events: i64,
    pub unique_users: i64,
}

/// Sliding-window rate limiter: counts events newer than `now - window_ms`
/// for `(channel_id, user_key)` and, iff under the limit, records a new
/// event. The count-then-insert is not atomic across the two statements —
/// acceptable here, matching the reference implementation's behavior,
/// since the cost of a rare race is a slightly loose limit, not a crash.
pub struct RateLimitStore {
    db: Mutex<Connection>,
}

impl RateLimitStore {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rate_limit_events (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id  TEXT NOT NULL,
                user_key    TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rate_limit_channel_user_time
                ON rate_limit_events(channel_id, user_key, timestamp_ms);",
        )?;
        Ok(Self { db: Mutex::new(conn) })
    }

    #[instrument(skip(self))]
    pub fn check_rate_limit(
        &self,
        channel_id: &str,
        user_key: &str,
        window_ms: i64,
        max_requests: i64,
    ) -> Result<(bool, i64)> {
        let now_ms = utc_now_ms();
        let window_start_ms = now_ms - window_ms;
        let db = self.db.lock().unwrap();

        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM rate_limit_events
             WHERE channel_id = ?1 AND user_key = ?2 AND timestamp_ms > ?3",
            rusqlite::params![channel_id, user_key, window_start_ms],
            |row| row.get(0),
        )?;

        if count < max_requests {
            db.execute(
                "INSERT INTO rate_limit_events (channel_id, user_key, timestamp_ms)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![channel_id, user_key, now_ms],
            )?;
            Ok((true, count + 1))
        } else {
            warn!(channel_id, user_key, count, max_requests, "rate limit exceeded");
            Ok((false, count))
        }
    }

    pub fn cleanup_old_events(&self, retention_ms: i64) -> Result<usize> {
        let cutoff_ms = utc_now_ms() - retention_ms;
        let db = self.db.lock().unwrap();
        Ok(db.execute(
            "DELETE FROM rate_limit_events WHERE timestamp_ms < ?1",
            rusqlite::params![cutoff_ms],
        )?)
    }

    pub fn get_stats(&self, channel_id: Option<&str>) -> Result<RateLimitStats> {
        let db = self.db.lock().unwrap();
        let (total_events, unique_users) = match channel_id {
            Some(channel_id) => db.query_row(
                "SELECT COUNT(*), COUNT(DISTINCT user_key)
                 FROM rate_limit_events WHERE channel_id = ?1",
                rusqlite::params![channel_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?,
            None => db.query_row(
                "SELECT COUNT(*), COUNT(DISTINCT channel_id || ':' || user_key)
                 FROM rate_limit_events",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?,
        };
        Ok(RateLimitStats { total_events, unique_users })
    }
}

/// Inbound-only: enforces a per-`(channel_id, user_key)` sliding-window
/// request cap. Outbound sends are system-initiated and not limited.
pub struct RateLimitMiddleware {
    store: RateLimitStore,
    window_ms: i64,
    max_requests: i64,
    retention_ms: i64,
    cleanup_interval_ms: i64,
    last_cleanup_ms: Mutex<i64>,
}

impl RateLimitMiddleware {
    pub fn new(store: RateLimitStore, window_ms: i64, max_requests: i64) -> Self {
        Self {
            store,
            window_ms,
            max_requests,
            retention_ms: window_ms * 10,
            cleanup_interval_ms: 10 * 60 * 1000,
            last_cleanup_ms: Mutex::new(utc_now_ms()),
        }
    }

    fn maybe_cleanup(&self) {
        let now_ms = utc_now_ms();
        let mut last = self.last_cleanup_ms.lock().unwrap();
        if now_ms - *last > self.cleanup_interval_ms {
            if let Err(e) = self.store.cleanup_old_events(self.retention_ms) {
                warn!(error = %e, "failed to cleanup old rate limit events");
            }
            *last = now_ms;
        }
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    async fn process_inbound(
        &self,
        message: &InboundMessage,
        mut context: ProcessingContext,
    ) -> ProcessingContext {
        match self.store.check_rate_limit(
            &message.channel_id,
            &message.user_key,
            self.window_ms,
            self.max_requests,
        ) {
            Ok((true, count)) => {
                context.set_metadata("rate_limit_checked", true);
                context.set_metadata("rate_limit_count", count);
            }
            Ok((false, count)) => {
                context.status = ProcessingStatus::Reject;
                context.set_metadata("rate_limit_exceeded", true);
                context.set_metadata("rate_limit_count", count);
                context.set_metadata("rate_limit_max", self.max_requests);
                context.set_metadata("rate_limit_window_ms", self.window_ms);
            }
            Err(e) => {
                warn!(error = %e, "rate limit store check failed");
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

    fn store() -> RateLimitStore {
        RateLimitStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn allows_up_to_max_requests() {
        let s = store();
        for i in 0..5 {
            let (allowed, count) = s.check_rate_limit("c1", "u1", 60_000, 5).unwrap();
            assert!(allowed, "request {i} should be allowed");
            assert_eq!(count, i + 1);
        }
    }

    #[test]
    fn denies_once_max_exceeded() {
        let s = store();
        for _ in 0..5 {
            s.check_rate_limit("c1", "u1", 60_000, 5).unwrap();
        }
        let (allowed, count) = s.check_rate_limit("c1", "u1", 60_000, 5).unwrap();
        assert!(!allowed);
        assert_eq!(count, 5);
    }

    #[test]
    fn different_users_tracked_independently() {
        let s = store();
        for _ in 0..5 {
            s.check_rate_limit("c1", "u1", 60_000, 5).unwrap();
        }
        let (allowed, _) = s.check_rate_limit("c1", "u2", 60_000, 5).unwrap();
        assert!(allowed);
    }

    #[test]
    fn window_expiry_resets_the_count() {
        let s = store();
        for _ in 0..5 {
            s.check_rate_limit("c1", "u1", -1, 5).unwrap();
        }
        // window_ms = -1 makes window_start_ms > now_ms, so every prior
        // event is already "outside" the window by the next check.
        let (allowed, count) = s.check_rate_limit("c1", "u1", -1, 5).unwrap();
        assert!(allowed);
        assert_eq!(count, 1);
    }
}
