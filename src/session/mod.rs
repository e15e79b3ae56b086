//! Web session records, pluggable across backends.
//!
//! The backend is picked by the `type` field of the session configuration
//! through a table of constructors, so adding a backend is one new row.

mod memcached;
mod memory;
mod redis;
mod sqlite;

use std::time::Duration;

pub use memcached::MemcachedSessionStore;
pub use memory::MemorySessionStore;
pub use redis::RedisSessionStore;
pub use sqlite::SqliteSessionStore;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::types::Session;

/// How long a session stays valid after it is registered.
pub const SESSION_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// SessionStore defines the session backend interface.
pub trait SessionStore: Send + Sync {
    /// Creates whatever the backend needs. Safe to call repeatedly.
    fn install(&self) -> Result<()>;

    /// Whether the backend is reachable and installed.
    fn is_usable(&self) -> bool;

    fn register_session(&self, username: &str, session_id: &str) -> Result<()>;

    /// Every unexpired session of `username`.
    fn retrieve_session(&self, username: &str) -> Result<Vec<Session>>;

    fn retrieve_session_by_key(&self, username: &str, session_id: &str) -> Result<Option<Session>>;

    fn verify_session(&self, username: &str, session_id: &str) -> Result<bool> {
        Ok(self.retrieve_session_by_key(username, session_id)?.is_some())
    }

    /// Removes one session. Revoking an unknown session is not an error.
    fn revoke_session(&self, username: &str, session_id: &str) -> Result<()>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

type Constructor = fn(&SessionConfig) -> Result<Box<dyn SessionStore>>;

const BACKENDS: &[(&str, Constructor)] = &[
    ("sqlite", |c| Ok(Box::new(SqliteSessionStore::open(c)?))),
    ("memory", |c| Ok(Box::new(MemorySessionStore::new(&c.prefix)))),
    ("redis", |c| Ok(Box::new(RedisSessionStore::open(c)?))),
    ("memcached", |c| Ok(Box::new(MemcachedSessionStore::open(c)?))),
];

/// Opens the backend named by `config.kind`.
pub fn open_session_store(config: &SessionConfig) -> Result<Box<dyn SessionStore>> {
    let constructor = BACKENDS
        .iter()
        .find(|(name, _)| *name == config.kind)
        .map(|(_, ctor)| ctor)
        .ok_or_else(|| Error::BackendNotSupported(format!("session store {:?}", config.kind)))?;

    let store = constructor(config)?;
    tracing::debug!("Opened {} session store", config.kind);
    Ok(store)
}

fn key_prefix(prefix: &str) -> &str {
    if prefix.is_empty() { "gitus" } else { prefix }
}

/// Key holding the set of session ids of a user.
pub(crate) fn set_key(prefix: &str, username: &str) -> String {
    format!("{}:{username}:session", key_prefix(prefix))
}

/// Key holding the creation timestamp of one session.
pub(crate) fn session_key(prefix: &str, username: &str, session_id: &str) -> String {
    format!("{}:{username}:session:{session_id}", key_prefix(prefix))
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn is_fresh(timestamp_ms: i64, now_ms: i64, lifetime: Duration) -> bool {
    let lifetime_ms = i64::try_from(lifetime.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_sub(timestamp_ms) < lifetime_ms
}
