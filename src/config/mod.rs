mod server;
pub mod url;

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;
use crate::error::{Error, Result};

pub const CONFIG_VERSION: u32 = 0;

/// Serialises every configuration save within the process.
static SAVE_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// Read-only browsing of a directory tree; no database, no shell access.
    Plain,
    /// Metadata store backed accounts and ACLs.
    #[default]
    Normal,
    /// Everything configured through JSON files tracked in git.
    Simple,
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plain => "plain",
            Self::Normal => "normal",
            Self::Simple => "simple",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlobalVisibility {
    #[default]
    Public,
    Private,
    Shutdown,
    Maintenance,
}

impl FromStr for GlobalVisibility {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            "shutdown" => Ok(Self::Shutdown),
            "maintenance" => Ok(Self::Maintenance),
            other => Err(format!("unknown global visibility: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: PathBuf,
    pub table_prefix: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: i64,
    pub prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: PathBuf,
    pub url: String,
    pub table_prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MailerConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReceiptConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: PathBuf,
    pub table_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub version: u32,
    pub mode: OperationMode,
    pub use_namespace: bool,
    pub git_root: PathBuf,
    pub git_user: String,
    pub host_name: String,
    pub ssh_host_name: String,
    pub bind_address: String,

    pub global_visibility: GlobalVisibility,
    pub full_access_user: Vec<String>,
    pub private_notice_message: String,
    pub shutdown_message: String,
    pub maintenance_message: String,

    pub ignore_namespace: Vec<String>,
    pub ignore_repository: Vec<String>,

    pub session: SessionConfig,
    pub database: DatabaseConfig,
    pub mailer: MailerConfig,
    pub receipt: ReceiptConfig,

    /// Canonical web URL derived from `host_name`.
    #[serde(skip)]
    pub proper_host_name: String,
    /// Prefix that, followed by a full repository name, gives an SSH clone address.
    #[serde(skip)]
    pub clone_ssh_prefix: String,
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            mode: OperationMode::Normal,
            use_namespace: true,
            git_root: PathBuf::from("/srv/git"),
            git_user: "git".to_string(),
            host_name: String::new(),
            ssh_host_name: String::new(),
            bind_address: "127.0.0.1:8000".to_string(),
            global_visibility: GlobalVisibility::Public,
            full_access_user: Vec::new(),
            private_notice_message: "This instance is private. Please log in.".to_string(),
            shutdown_message: "This instance has been shut down.".to_string(),
            maintenance_message: "This instance is under maintenance.".to_string(),
            ignore_namespace: Vec::new(),
            ignore_repository: Vec::new(),
            session: SessionConfig {
                kind: "memory".to_string(),
                prefix: "gitus".to_string(),
                ..SessionConfig::default()
            },
            database: DatabaseConfig {
                kind: "sqlite".to_string(),
                path: PathBuf::from("gitus.db"),
                table_prefix: "gitus_".to_string(),
                ..DatabaseConfig::default()
            },
            mailer: MailerConfig {
                kind: "none".to_string(),
                ..MailerConfig::default()
            },
            receipt: ReceiptConfig {
                kind: "sqlite".to_string(),
                path: PathBuf::from("receipt.db"),
                table_prefix: "gitus_".to_string(),
            },
            proper_host_name: String::new(),
            clone_ssh_prefix: String::new(),
            config_path: PathBuf::new(),
        }
    }
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.as_os_str().is_empty() || path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl Config {
    /// `$HOME/.config/gitus/config.json` on most platforms.
    pub fn default_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "gitus").ok_or_else(|| {
            Error::ConfigMalformed("could not determine config directory, is $HOME set?".into())
        })?;
        Ok(dirs.config_dir().join("config.json"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::ConfigNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let mut config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::ConfigMalformed(format!("{}: {e}", path.display())))?;

        config.config_path = path.to_path_buf();
        config.normalize();
        Ok(config)
    }

    /// Fills in derived fields and resolves relative embedded-database paths
    /// against the directory holding the configuration file.
    pub fn normalize(&mut self) {
        self.proper_host_name = url::proper_host_name(&self.host_name);
        self.clone_ssh_prefix = url::clone_ssh_prefix(&self.ssh_host_name, &self.git_user);

        let base = self
            .config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        self.git_root = resolve_against(&base, &self.git_root);
        if self.session.kind == "sqlite" {
            self.session.path = resolve_against(&base, &self.session.path);
        }
        if self.database.kind == "sqlite" {
            self.database.path = resolve_against(&base, &self.database.path);
        }
        if self.receipt.kind == "sqlite" {
            self.receipt.path = resolve_against(&base, &self.receipt.path);
        }
    }

    /// Writes the configuration back to `config_path`. Concurrent saves in
    /// this process are serialised.
    pub fn save(&self) -> Result<()> {
        if self.config_path.as_os_str().is_empty() {
            return Err(Error::ConfigMalformed("configuration has no file path".into()));
        }

        let _guard = SAVE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut data = serde_json::to_vec_pretty(self)?;
        data.push(b'\n');
        write_atomic(&self.config_path, &data, 0o644)?;
        tracing::info!("Saved configuration to {}", self.config_path.display());
        Ok(())
    }

    #[must_use]
    pub fn is_full_access_user(&self, username: &str) -> bool {
        self.full_access_user.iter().any(|u| u == username)
    }

    #[must_use]
    pub fn is_namespace_ignored(&self, namespace: &str) -> bool {
        self.ignore_namespace.iter().any(|n| n == namespace)
    }

    #[must_use]
    pub fn is_repository_ignored(&self, full_name: &str) -> bool {
        self.ignore_repository.iter().any(|n| n == full_name)
    }

    /// The clone address for a repository, if an SSH host is configured.
    #[must_use]
    pub fn clone_address(&self, full_name: &str) -> Option<String> {
        if self.clone_ssh_prefix.is_empty() {
            None
        } else {
            Some(format!("{}{full_name}", self.clone_ssh_prefix))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("config.json");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_load_normalizes_urls() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            temp.path(),
            r#"{"hostName": "example.org/", "sshHostName": "example.org", "gitUser": "git"}"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.proper_host_name, "http://example.org");
        assert_eq!(config.clone_ssh_prefix, "git@example.org:");
        assert_eq!(
            config.clone_address("team:svc").as_deref(),
            Some("git@example.org:team:svc")
        );
    }

    #[test]
    fn test_load_custom_ssh_port() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            temp.path(),
            r#"{"sshHostName": "example.org:2222", "gitUser": "git"}"#,
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.clone_ssh_prefix, "ssh://git@example.org:2222/");
    }

    #[test]
    fn test_embedded_paths_resolved_against_config_dir() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            temp.path(),
            r#"{
                "session": {"type": "sqlite", "path": "sessions.db"},
                "database": {"type": "sqlite", "path": "/abs/gitus.db"}
            }"#,
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.session.path, temp.path().join("sessions.db"));
        assert_eq!(config.database.path, PathBuf::from("/abs/gitus.db"));
    }

    #[test]
    fn test_missing_and_malformed() {
        let temp = TempDir::new().unwrap();
        let missing = Config::load(&temp.path().join("nope.json"));
        assert!(matches!(missing, Err(Error::ConfigNotFound(_))));

        let path = write_config(temp.path(), "{ not json");
        assert!(matches!(Config::load(&path), Err(Error::ConfigMalformed(_))));
    }

    #[test]
    fn test_save_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), r#"{"mode": "simple", "useNamespace": false}"#);

        let mut config = Config::load(&path).unwrap();
        config.global_visibility = GlobalVisibility::Shutdown;
        config.full_access_user = vec!["alice".to_string()];
        config.save().unwrap();

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded.mode, OperationMode::Simple);
        assert!(!reloaded.use_namespace);
        assert_eq!(reloaded.global_visibility, GlobalVisibility::Shutdown);
        assert!(reloaded.is_full_access_user("alice"));
        assert!(!reloaded.is_full_access_user("bob"));
    }

    #[test]
    fn test_concurrent_saves_leave_valid_json() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), "{}");
        let base = Config::load(&path).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let mut config = base.clone();
                std::thread::spawn(move || {
                    config.git_user = format!("user{i}");
                    config.save().unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let reloaded = Config::load(&path).unwrap();
        assert!(reloaded.git_user.starts_with("user"));
    }
}
