use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

use super::{SESSION_LIFETIME, SessionStore, now_millis, session_key, set_key};
use crate::cache::TimeCache;
use crate::error::{Error, Result};
use crate::types::Session;

#[derive(Debug, Clone)]
enum Value {
    Ids(BTreeSet<String>),
    Timestamp(i64),
}

/// Process-local sessions on top of [`TimeCache`].
///
/// Each session occupies a timestamp key, and each user a set key listing
/// their session ids. A session counts only while its timestamp key lives,
/// so a set that still names an expired id is harmless.
pub struct MemorySessionStore {
    cache: TimeCache<Value>,
    prefix: String,
    lifetime: Duration,
    // Serialises read-modify-write cycles on set keys.
    set_lock: Mutex<()>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self {
            cache: TimeCache::new(),
            prefix: prefix.to_string(),
            lifetime: SESSION_LIFETIME,
            set_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    fn ids(&self, username: &str) -> BTreeSet<String> {
        match self.cache.get(&set_key(&self.prefix, username)) {
            Some(Value::Ids(ids)) => ids,
            _ => BTreeSet::new(),
        }
    }

    fn timestamp(&self, username: &str, session_id: &str) -> Option<i64> {
        match self.cache.get(&session_key(&self.prefix, username, session_id))? {
            Value::Timestamp(ts) => Some(ts),
            Value::Ids(_) => None,
        }
    }

    fn rewrite_ids(&self, username: &str, update: impl FnOnce(&mut BTreeSet<String>)) {
        let mut ids = self.ids(username);
        update(&mut ids);
        ids.retain(|sid| self.timestamp(username, sid).is_some());

        let key = set_key(&self.prefix, username);
        if ids.is_empty() {
            self.cache.delete(&key);
        } else {
            self.cache.register(&key, Value::Ids(ids), self.lifetime);
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn install(&self) -> Result<()> {
        Ok(())
    }

    fn is_usable(&self) -> bool {
        true
    }

    fn register_session(&self, username: &str, session_id: &str) -> Result<()> {
        let _guard = self.set_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.timestamp(username, session_id).is_some() {
            return Err(Error::AlreadyExists("session"));
        }

        self.cache.register(
            &session_key(&self.prefix, username, session_id),
            Value::Timestamp(now_millis()),
            self.lifetime,
        );
        self.rewrite_ids(username, |ids| {
            ids.insert(session_id.to_string());
        });
        Ok(())
    }

    fn retrieve_session(&self, username: &str) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .ids(username)
            .into_iter()
            .filter_map(|sid| {
                let timestamp = self.timestamp(username, &sid)?;
                Some(Session {
                    username: username.to_string(),
                    session_id: sid,
                    timestamp,
                })
            })
            .collect();
        sessions.sort_by_key(|s| s.timestamp);
        Ok(sessions)
    }

    fn retrieve_session_by_key(&self, username: &str, session_id: &str) -> Result<Option<Session>> {
        Ok(self.timestamp(username, session_id).map(|timestamp| Session {
            username: username.to_string(),
            session_id: session_id.to_string(),
            timestamp,
        }))
    }

    fn revoke_session(&self, username: &str, session_id: &str) -> Result<()> {
        let _guard = self.set_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.cache
            .delete(&session_key(&self.prefix, username, session_id));
        self.rewrite_ids(username, |ids| {
            ids.remove(session_id);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_and_expiry() {
        let store = MemorySessionStore::new("gitus");
        store.register_session("alice", "s1").unwrap();
        assert!(store.verify_session("alice", "s1").unwrap());

        tokio::time::advance(SESSION_LIFETIME - Duration::from_secs(1)).await;
        assert!(store.verify_session("alice", "s1").unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.verify_session("alice", "s1").unwrap());
        assert!(store.retrieve_session("alice").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let store = MemorySessionStore::new("gitus");
        store.register_session("alice", "s1").unwrap();
        store.register_session("alice", "s2").unwrap();

        store.revoke_session("alice", "s1").unwrap();
        store.revoke_session("alice", "s1").unwrap();
        assert!(!store.verify_session("alice", "s1").unwrap());

        let ids: Vec<_> = store
            .retrieve_session("alice")
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(ids, vec!["s2"]);
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let store = MemorySessionStore::new("gitus");
        store.register_session("alice", "s1").unwrap();
        assert!(matches!(
            store.register_session("alice", "s1"),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_listing_matches_verification_under_contention() {
        let store = Arc::new(MemorySessionStore::new("gitus"));

        let tasks: Vec<_> = (0..16)
            .map(|t| {
                let store = store.clone();
                tokio::spawn(async move {
                    for i in 0..50 {
                        let sid = format!("t{t}-{i}");
                        store.register_session("alice", &sid).unwrap();
                        if i % 3 == 0 {
                            store.revoke_session("alice", &sid).unwrap();
                        }
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let listed: HashSet<_> = store
            .retrieve_session("alice")
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        let expected: HashSet<_> = (0..16)
            .flat_map(|t| (0..50).filter(|i| i % 3 != 0).map(move |i| format!("t{t}-{i}")))
            .collect();

        assert_eq!(listed, expected);
        for sid in &listed {
            assert!(store.verify_session("alice", sid).unwrap());
        }
    }
}
