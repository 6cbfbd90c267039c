use std::sync::Mutex;

use gateway_core::{time::utc_now_ms, Result};
use rusqlite::{Connection, OptionalExtension};

/// SQLite-backed persistence of the polling cursor, one row per channel.
pub struct CursorStore {
    db: Mutex<Connection>,
}

impl CursorStore {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS email_cursors (
                channel_id TEXT PRIMARY KEY,
                last_poll_time_ms INTEGER NOT NULL,
                last_message_id TEXT,
                updated_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn get_last_poll_time_ms(&self, channel_id: &str) -> Result<Option<i64>> {
        let conn = self.db.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT last_poll_time_ms FROM email_cursors WHERE channel_id = ?1",
                [channel_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn update_cursor(&self, channel_id: &str, poll_time_ms: i64, last_message_id: Option<&str>) -> Result<()> {
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO email_cursors (channel_id, last_poll_time_ms, last_message_id, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(channel_id) DO UPDATE SET
                last_poll_time_ms = excluded.last_poll_time_ms,
                last_message_id = excluded.last_message_id,
                updated_at = excluded.updated_at",
            rusqlite::params![channel_id, poll_time_ms, last_message_id, utc_now_ms()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips_through_insert_and_update() {
        let store = CursorStore::new(Connection::open_in_memory().unwrap()).unwrap();
        assert!(store.get_last_poll_time_ms("email1").unwrap().is_none());

        store.update_cursor("email1", 1_700_000_000_000, Some("email_abc")).unwrap();
        assert_eq!(store.get_last_poll_time_ms("email1").unwrap(), Some(1_700_000_000_000));

        store.update_cursor("email1", 1_700_000_100_000, Some("email_def")).unwrap();
        assert_eq!(store.get_last_poll_time_ms("email1").unwrap(), Some(1_700_000_100_000));
    }
}
