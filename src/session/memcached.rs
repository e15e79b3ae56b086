use std::time::Duration;

use memcache::Client;

use super::{SESSION_LIFETIME, SessionStore, is_fresh, now_millis, session_key, set_key};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::types::Session;

/// Sessions in memcached, using the same two-key layout as the in-memory
/// store. Memcached has no set type, so the id set is stored as a
/// comma-separated string.
///
/// Rewriting the set is a get-then-set and is not atomic: two concurrent
/// revocations may briefly resurrect an id in the set. The timestamp key
/// is authoritative, so such an id is filtered out on read and dropped on
/// the next rewrite.
pub struct MemcachedSessionStore {
    client: Client,
    prefix: String,
    lifetime: Duration,
}

impl MemcachedSessionStore {
    pub(super) fn open(config: &SessionConfig) -> Result<Self> {
        let host = if config.host.is_empty() { "127.0.0.1" } else { &config.host };
        let port = if config.port == 0 { 11211 } else { config.port };
        let client = Client::connect(format!("memcache://{host}:{port}?timeout=5"))?;

        Ok(Self {
            client,
            prefix: config.prefix.clone(),
            lifetime: SESSION_LIFETIME,
        })
    }

    fn expiration(&self) -> u32 {
        u32::try_from(self.lifetime.as_secs()).unwrap_or(u32::MAX).max(1)
    }

    fn ids(&self, username: &str) -> Result<Vec<String>> {
        let raw: Option<String> = self.client.get(&set_key(&self.prefix, username))?;
        Ok(raw
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn timestamp(&self, username: &str, session_id: &str) -> Result<Option<i64>> {
        let raw: Option<String> = self
            .client
            .get(&session_key(&self.prefix, username, session_id))?;
        Ok(raw
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|ts| is_fresh(*ts, now_millis(), self.lifetime)))
    }

    fn write_ids(&self, username: &str, ids: &[String]) -> Result<()> {
        let key = set_key(&self.prefix, username);
        if ids.is_empty() {
            self.client.delete(&key)?;
        } else {
            self.client.set(&key, ids.join(",").as_str(), self.expiration())?;
        }
        Ok(())
    }

    fn live_ids(&self, username: &str, ids: Vec<String>) -> Result<Vec<String>> {
        let mut live = Vec::with_capacity(ids.len());
        for sid in ids {
            if self.timestamp(username, &sid)?.is_some() && !live.contains(&sid) {
                live.push(sid);
            }
        }
        Ok(live)
    }
}

impl SessionStore for MemcachedSessionStore {
    fn install(&self) -> Result<()> {
        self.client.version()?;
        Ok(())
    }

    fn is_usable(&self) -> bool {
        match self.install() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Memcached session store unreachable: {}", e);
                false
            }
        }
    }

    fn register_session(&self, username: &str, session_id: &str) -> Result<()> {
        if self.timestamp(username, session_id)?.is_some() {
            return Err(Error::AlreadyExists("session"));
        }

        self.client.set(
            &session_key(&self.prefix, username, session_id),
            now_millis().to_string().as_str(),
            self.expiration(),
        )?;

        let mut ids = self.live_ids(username, self.ids(username)?)?;
        if !ids.iter().any(|s| s == session_id) {
            ids.push(session_id.to_string());
        }
        self.write_ids(username, &ids)
    }

    fn retrieve_session(&self, username: &str) -> Result<Vec<Session>> {
        let mut sessions = Vec::new();
        for session_id in self.ids(username)? {
            if let Some(timestamp) = self.timestamp(username, &session_id)? {
                if sessions.iter().any(|s: &Session| s.session_id == session_id) {
                    continue;
                }
                sessions.push(Session {
                    username: username.to_string(),
                    session_id,
                    timestamp,
                });
            }
        }
        sessions.sort_by_key(|s| s.timestamp);
        Ok(sessions)
    }

    fn retrieve_session_by_key(&self, username: &str, session_id: &str) -> Result<Option<Session>> {
        Ok(self.timestamp(username, session_id)?.map(|timestamp| Session {
            username: username.to_string(),
            session_id: session_id.to_string(),
            timestamp,
        }))
    }

    fn revoke_session(&self, username: &str, session_id: &str) -> Result<()> {
        self.client
            .delete(&session_key(&self.prefix, username, session_id))?;

        let ids: Vec<String> = self
            .ids(username)?
            .into_iter()
            .filter(|s| s != session_id)
            .collect();
        let ids = self.live_ids(username, ids)?;
        self.write_ids(username, &ids)
    }
}
