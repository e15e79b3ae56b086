use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};

use super::{SESSION_LIFETIME, SessionStore, is_fresh, now_millis};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::types::Session;

/// Sessions in an embedded SQLite file, one row per session.
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
    table: String,
    lifetime: Duration,
}

impl SqliteSessionStore {
    pub fn new<P: AsRef<Path>>(db_path: P, table_prefix: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self::with_connection(conn, table_prefix))
    }

    pub fn open_in_memory(table_prefix: &str) -> Result<Self> {
        Ok(Self::with_connection(Connection::open_in_memory()?, table_prefix))
    }

    pub(super) fn open(config: &SessionConfig) -> Result<Self> {
        let store = Self::new(&config.path, &config.table_prefix)?;
        store.install()?;
        Ok(store)
    }

    fn with_connection(conn: Connection, table_prefix: &str) -> Self {
        Self {
            conn: Mutex::new(conn),
            table: format!("{table_prefix}session"),
            lifetime: SESSION_LIFETIME,
        }
    }

    #[must_use]
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cutoff(&self, now: i64) -> i64 {
        now.saturating_sub(i64::try_from(self.lifetime.as_millis()).unwrap_or(i64::MAX))
    }
}

impl SessionStore for SqliteSessionStore {
    fn install(&self) -> Result<()> {
        self.conn().execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                user_name TEXT NOT NULL,
                value TEXT NOT NULL,
                reg_timestamp INTEGER NOT NULL,
                UNIQUE (user_name, value)
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_user ON {table}(user_name);",
            table = self.table
        ))?;
        Ok(())
    }

    fn is_usable(&self) -> bool {
        let conn = self.conn();
        conn.query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![self.table],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
        .unwrap_or_else(|e| {
            tracing::warn!("Session table check failed: {}", e);
            false
        })
    }

    fn register_session(&self, username: &str, session_id: &str) -> Result<()> {
        let now = now_millis();
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        // Stale rows of this user are collected on every registration.
        tx.execute(
            &format!("DELETE FROM {} WHERE user_name = ?1 AND reg_timestamp <= ?2", self.table),
            params![username, self.cutoff(now)],
        )?;
        let inserted = tx.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (user_name, value, reg_timestamp) VALUES (?1, ?2, ?3)",
                self.table
            ),
            params![username, session_id, now],
        )?;
        if inserted == 0 {
            return Err(Error::AlreadyExists("session"));
        }

        tx.commit()?;
        Ok(())
    }

    fn retrieve_session(&self, username: &str) -> Result<Vec<Session>> {
        let now = now_millis();
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT user_name, value, reg_timestamp FROM {}
             WHERE user_name = ?1 AND reg_timestamp > ?2 ORDER BY reg_timestamp",
            self.table
        ))?;

        let rows = stmt.query_map(params![username, self.cutoff(now)], |row| {
            Ok(Session {
                username: row.get(0)?,
                session_id: row.get(1)?,
                timestamp: row.get(2)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn retrieve_session_by_key(&self, username: &str, session_id: &str) -> Result<Option<Session>> {
        let conn = self.conn();
        let session = conn
            .query_row(
                &format!(
                    "SELECT user_name, value, reg_timestamp FROM {}
                     WHERE user_name = ?1 AND value = ?2",
                    self.table
                ),
                params![username, session_id],
                |row| {
                    Ok(Session {
                        username: row.get(0)?,
                        session_id: row.get(1)?,
                        timestamp: row.get(2)?,
                    })
                },
            )
            .optional()?;

        Ok(session.filter(|s| is_fresh(s.timestamp, now_millis(), self.lifetime)))
    }

    fn revoke_session(&self, username: &str, session_id: &str) -> Result<()> {
        self.conn().execute(
            &format!("DELETE FROM {} WHERE user_name = ?1 AND value = ?2", self.table),
            params![username, session_id],
        )?;
        Ok(())
    }
}
