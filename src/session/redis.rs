use std::collections::HashMap;
use std::time::Duration;

use redis::{Client, Connection, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};

use super::{SESSION_LIFETIME, SessionStore, is_fresh, now_millis, set_key};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::types::Session;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sessions in Redis: one hash per user mapping session id to its
/// creation timestamp. The hash expires a full lifetime after its last
/// write; individual stale fields are dropped whenever they are read.
pub struct RedisSessionStore {
    client: Client,
    prefix: String,
    lifetime: Duration,
}

impl RedisSessionStore {
    pub(super) fn open(config: &SessionConfig) -> Result<Self> {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(
                if config.host.is_empty() { "127.0.0.1".to_string() } else { config.host.clone() },
                if config.port == 0 { 6379 } else { config.port },
            ),
            redis: RedisConnectionInfo {
                db: config.database,
                username: (!config.user.is_empty()).then(|| config.user.clone()),
                password: (!config.password.is_empty()).then(|| config.password.clone()),
                ..Default::default()
            },
        };

        Ok(Self {
            client: Client::open(info)?,
            prefix: config.prefix.clone(),
            lifetime: SESSION_LIFETIME,
        })
    }

    fn connection(&self) -> Result<Connection> {
        Ok(self.client.get_connection_with_timeout(CONNECT_TIMEOUT)?)
    }

    fn lifetime_secs(&self) -> i64 {
        i64::try_from(self.lifetime.as_secs()).unwrap_or(i64::MAX).max(1)
    }
}

impl SessionStore for RedisSessionStore {
    fn install(&self) -> Result<()> {
        let mut con = self.connection()?;
        redis::cmd("PING").query::<String>(&mut con)?;
        Ok(())
    }

    fn is_usable(&self) -> bool {
        match self.install() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Redis session store unreachable: {}", e);
                false
            }
        }
    }

    fn register_session(&self, username: &str, session_id: &str) -> Result<()> {
        let key = set_key(&self.prefix, username);
        let mut con = self.connection()?;

        let created: i64 = redis::cmd("HSETNX")
            .arg(&key)
            .arg(session_id)
            .arg(now_millis())
            .query(&mut con)?;
        if created == 0 {
            return Err(Error::AlreadyExists("session"));
        }

        redis::cmd("EXPIRE")
            .arg(&key)
            .arg(self.lifetime_secs())
            .query::<()>(&mut con)?;
        Ok(())
    }

    fn retrieve_session(&self, username: &str) -> Result<Vec<Session>> {
        let key = set_key(&self.prefix, username);
        let mut con = self.connection()?;
        let all: HashMap<String, i64> = redis::cmd("HGETALL").arg(&key).query(&mut con)?;

        let now = now_millis();
        let (live, stale): (Vec<_>, Vec<_>) = all
            .into_iter()
            .partition(|(_, ts)| is_fresh(*ts, now, self.lifetime));

        if !stale.is_empty() {
            let mut cmd = redis::cmd("HDEL");
            cmd.arg(&key);
            for (sid, _) in &stale {
                cmd.arg(sid);
            }
            cmd.query::<()>(&mut con)?;
        }

        let mut sessions: Vec<Session> = live
            .into_iter()
            .map(|(session_id, timestamp)| Session {
                username: username.to_string(),
                session_id,
                timestamp,
            })
            .collect();
        sessions.sort_by_key(|s| s.timestamp);
        Ok(sessions)
    }

    fn retrieve_session_by_key(&self, username: &str, session_id: &str) -> Result<Option<Session>> {
        let mut con = self.connection()?;
        let timestamp: Option<i64> = redis::cmd("HGET")
            .arg(set_key(&self.prefix, username))
            .arg(session_id)
            .query(&mut con)?;

        Ok(timestamp
            .filter(|ts| is_fresh(*ts, now_millis(), self.lifetime))
            .map(|timestamp| Session {
                username: username.to_string(),
                session_id: session_id.to_string(),
                timestamp,
            }))
    }

    fn revoke_session(&self, username: &str, session_id: &str) -> Result<()> {
        let mut con = self.connection()?;
        redis::cmd("HDEL")
            .arg(set_key(&self.prefix, username))
            .arg(session_id)
            .query::<()>(&mut con)?;
        Ok(())
    }
}
