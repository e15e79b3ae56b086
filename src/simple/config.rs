//! The JSON files describing namespaces and repositories in simple mode.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    #[default]
    Disallow,
}

/// An empty string means "use the default verdict".
fn optional_verdict<'de, D>(deserializer: D) -> std::result::Result<Option<Verdict>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some("allow") => Ok(Some(Verdict::Allow)),
        Some("disallow") => Ok(Some(Verdict::Disallow)),
        Some(other) => Err(serde::de::Error::unknown_variant(other, &["allow", "disallow", ""])),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRule {
    #[serde(default)]
    pub default: Verdict,
    #[serde(default, deserialize_with = "optional_verdict", skip_serializing_if = "Option::is_none")]
    pub push: Option<Verdict>,
    #[serde(default, deserialize_with = "optional_verdict", skip_serializing_if = "Option::is_none")]
    pub pull: Option<Verdict>,
}

impl UserRule {
    #[must_use]
    pub fn push_verdict(&self) -> Verdict {
        self.push.unwrap_or(self.default)
    }

    #[must_use]
    pub fn pull_verdict(&self) -> Verdict {
        self.pull.unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoInfo {
    pub description: String,
    pub visibility: Visibility,
}

/// Content of one `config.json`, for a namespace or a repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpleConfig {
    pub repo: RepoInfo,
    /// Hook name to a file path relative to the directory of this config.
    pub hooks: BTreeMap<String, String>,
    pub users: BTreeMap<String, UserRule>,
    /// Directory the file was read from.
    #[serde(skip)]
    pub dir: PathBuf,
}

impl SimpleConfig {
    /// Where the hook script `name` lives, if it stays inside the config tree.
    pub fn hook_source(&self, name: &str) -> Result<PathBuf> {
        let relative = self
            .hooks
            .get(name)
            .ok_or(Error::NotFound("hook"))?;
        let relative = Path::new(relative);

        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(Error::ConfigMalformed(format!(
                "hook {name} points outside the configuration tree: {}",
                relative.display()
            )));
        }
        Ok(self.dir.join(relative))
    }
}

/// Root of the configuration checkout under the git root.
#[must_use]
pub fn config_root(git_root: &Path, use_namespace: bool) -> PathBuf {
    if use_namespace {
        git_root.join("__gitus").join("__repo_config").join("gitus_sync")
    } else {
        git_root.join("__repo_config").join("gitus_sync")
    }
}

/// The repository holding users' SSH keys.
#[must_use]
pub fn keys_repository(git_root: &Path, use_namespace: bool) -> PathBuf {
    if use_namespace {
        git_root.join("__gitus").join("__keys")
    } else {
        git_root.join("__keys")
    }
}

#[must_use]
pub fn namespace_config_path(git_root: &Path, namespace: &str) -> PathBuf {
    config_root(git_root, true).join(namespace).join(CONFIG_FILE)
}

#[must_use]
pub fn repository_config_path(
    git_root: &Path,
    use_namespace: bool,
    namespace: &str,
    name: &str,
) -> PathBuf {
    let root = config_root(git_root, use_namespace);
    if use_namespace {
        root.join(namespace).join(name).join(CONFIG_FILE)
    } else {
        root.join(name).join(CONFIG_FILE)
    }
}

/// Parses one `config.json`.
pub fn read_config(path: &Path) -> Result<SimpleConfig> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }
        Err(e) => return Err(Error::Io(e)),
    };

    let mut config: SimpleConfig = serde_json::from_str(&content)
        .map_err(|e| Error::ConfigMalformed(format!("{}: {e}", path.display())))?;
    config.dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok(config)
}

pub fn read_namespace_config(git_root: &Path, namespace: &str) -> Result<SimpleConfig> {
    read_config(&namespace_config_path(git_root, namespace))
}

pub fn read_repository_config(
    git_root: &Path,
    use_namespace: bool,
    namespace: &str,
    name: &str,
) -> Result<SimpleConfig> {
    read_config(&repository_config_path(git_root, use_namespace, namespace, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, body: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_layout() {
        let root = Path::new("/srv/git");
        assert_eq!(
            namespace_config_path(root, "team"),
            Path::new("/srv/git/__gitus/__repo_config/gitus_sync/team/config.json")
        );
        assert_eq!(
            repository_config_path(root, true, "team", "svc"),
            Path::new("/srv/git/__gitus/__repo_config/gitus_sync/team/svc/config.json")
        );
        assert_eq!(
            repository_config_path(root, false, "", "svc"),
            Path::new("/srv/git/__repo_config/gitus_sync/svc/config.json")
        );
        assert_eq!(keys_repository(root, true), Path::new("/srv/git/__gitus/__keys"));
        assert_eq!(keys_repository(root, false), Path::new("/srv/git/__keys"));
    }

    #[test]
    fn test_read_repository_config() {
        let temp = TempDir::new().unwrap();
        write(
            &repository_config_path(temp.path(), true, "team", "svc"),
            r#"{
                "repo": {"description": "Service", "visibility": "public"},
                "hooks": {"post-receive": "hooks/notify.sh"},
                "users": {
                    "alice": {"default": "allow"},
                    "bob": {"default": "allow", "push": "disallow", "pull": ""}
                }
            }"#,
        );

        let config = read_repository_config(temp.path(), true, "team", "svc").unwrap();
        assert_eq!(config.repo.visibility, Visibility::Public);
        assert_eq!(config.users["alice"].push_verdict(), Verdict::Allow);
        assert_eq!(config.users["bob"].push_verdict(), Verdict::Disallow);
        assert_eq!(config.users["bob"].pull_verdict(), Verdict::Allow);
        assert_eq!(
            config.hook_source("post-receive").unwrap(),
            temp.path()
                .join("__gitus/__repo_config/gitus_sync/team/svc/hooks/notify.sh")
        );
    }

    #[test]
    fn test_missing_and_malformed() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            read_namespace_config(temp.path(), "team"),
            Err(Error::ConfigNotFound(_))
        ));

        write(&namespace_config_path(temp.path(), "team"), "{\"users\": 3}");
        assert!(matches!(
            read_namespace_config(temp.path(), "team"),
            Err(Error::ConfigMalformed(_))
        ));

        write(
            &namespace_config_path(temp.path(), "team"),
            r#"{"users": {"eve": {"default": "maybe"}}}"#,
        );
        assert!(matches!(
            read_namespace_config(temp.path(), "team"),
            Err(Error::ConfigMalformed(_))
        ));
    }

    #[test]
    fn test_hook_cannot_escape_tree() {
        let config = SimpleConfig {
            hooks: BTreeMap::from([("update".to_string(), "../../etc/passwd".to_string())]),
            ..SimpleConfig::default()
        };
        assert!(matches!(config.hook_source("update"), Err(Error::ConfigMalformed(_))));
        assert!(matches!(config.hook_source("missing"), Err(Error::NotFound(_))));
    }
}
