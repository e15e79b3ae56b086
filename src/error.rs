use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("invalid repository path: {0}")]
    BadPath(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0} already exists")]
    AlreadyExists(&'static str),

    #[error("backend not supported: {0}")]
    BackendNotSupported(String),

    #[error("integrity check failed for key {key_name} of user {username}")]
    IntegrityFailure { username: String, key_name: String },

    #[error("{0}")]
    PermissionDenied(String),

    #[error("Repository is archived")]
    ArchivedRepository,

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid password: {0}")]
    InvalidPassword(String),

    #[error("configuration not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("malformed configuration: {0}")]
    ConfigMalformed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("session backend error: {0}")]
    Backend(String),

    #[error("{0}")]
    Fatal(String),
}

impl Error {
    /// Errors worth retrying: the request itself was fine, the I/O was not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Backend(_) | Self::Database(_))
    }

    pub fn permission_denied() -> Self {
        Self::PermissionDenied("Not enough permission".to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::ConfigMalformed(e.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<memcache::MemcacheError> for Error {
    fn from(e: memcache::MemcacheError) -> Self {
        Self::Backend(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
