use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use super::config::{SimpleConfig, config_root, read_config};
use crate::error::Result;
use crate::repo::{BARE_SUFFIX, is_valid_namespace_name, is_valid_repository_name, locate, namespace_dir};
use crate::types::full_name;

#[derive(Debug, Clone)]
pub struct SimpleRepository {
    pub namespace: String,
    pub name: String,
    pub config: SimpleConfig,
    /// Git directory the repository lives in, or will be created at.
    pub local_path: PathBuf,
}

impl SimpleRepository {
    #[must_use]
    pub fn full_name(&self) -> String {
        full_name(&self.namespace, &self.name)
    }
}

#[derive(Debug, Clone)]
pub struct SimpleNamespace {
    pub name: String,
    pub config: SimpleConfig,
    pub repositories: BTreeMap<String, SimpleRepository>,
}

/// One consistent reading of the whole configuration tree.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub namespaces: BTreeMap<String, SimpleNamespace>,
}

impl Snapshot {
    /// Reads every namespace and repository config under the git root.
    pub fn build(git_root: &Path, use_namespace: bool) -> Result<Self> {
        let root = config_root(git_root, use_namespace);
        let mut namespaces = BTreeMap::new();

        if use_namespace {
            for (name, dir) in config_dirs(&root)? {
                if name.is_empty() || !is_valid_namespace_name(&name) {
                    continue;
                }
                let config = read_config(&dir.join("config.json"))?;
                let repositories = read_repositories(git_root, &name, &dir)?;
                namespaces.insert(
                    name.clone(),
                    SimpleNamespace {
                        name,
                        config,
                        repositories,
                    },
                );
            }
        } else {
            let repositories = read_repositories(git_root, "", &root)?;
            namespaces.insert(
                String::new(),
                SimpleNamespace {
                    name: String::new(),
                    config: SimpleConfig::default(),
                    repositories,
                },
            );
        }

        Ok(Self { namespaces })
    }

    #[must_use]
    pub fn namespace(&self, name: &str) -> Option<&SimpleNamespace> {
        self.namespaces.get(name)
    }

    #[must_use]
    pub fn repository(&self, namespace: &str, name: &str) -> Option<&SimpleRepository> {
        self.namespaces.get(namespace)?.repositories.get(name)
    }

    pub fn repositories(&self) -> impl Iterator<Item = &SimpleRepository> {
        self.namespaces.values().flat_map(|ns| ns.repositories.values())
    }
}

/// Subdirectories of `dir` that carry a `config.json`, sorted by name.
fn config_dirs(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let path = entry.path();
        if name.starts_with('.') || !path.join("config.json").is_file() {
            continue;
        }
        dirs.push((name, path));
    }
    dirs.sort();
    Ok(dirs)
}

fn read_repositories(
    git_root: &Path,
    namespace: &str,
    dir: &Path,
) -> Result<BTreeMap<String, SimpleRepository>> {
    let mut repositories = BTreeMap::new();

    for (name, repo_dir) in config_dirs(dir)? {
        if !is_valid_repository_name(&name) {
            tracing::warn!("Skipping invalid repository name {:?} in {}", name, dir.display());
            continue;
        }
        let config = read_config(&repo_dir.join("config.json"))?;
        let local_path = locate(git_root, namespace, &name).unwrap_or_else(|| {
            namespace_dir(git_root, namespace).join(format!("{name}{BARE_SUFFIX}"))
        });

        repositories.insert(
            name.clone(),
            SimpleRepository {
                namespace: namespace.to_string(),
                name,
                config,
                local_path,
            },
        );
    }

    Ok(repositories)
}

/// The simple-mode cache. Readers take the current snapshot and keep it for
/// as long as they need; a rebuild publishes a whole new snapshot at once.
#[derive(Default)]
pub struct SimpleCache {
    current: RwLock<Arc<Snapshot>>,
}

impl SimpleCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn publish(&self, snapshot: Snapshot) {
        let snapshot = Arc::new(snapshot);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }

    /// Rebuilds from disk. On error the current snapshot stays.
    pub fn reload(&self, git_root: &Path, use_namespace: bool) -> Result<()> {
        let snapshot = Snapshot::build(git_root, use_namespace)?;
        tracing::info!(
            "Loaded simple-mode configuration: {} namespaces, {} repositories",
            snapshot.namespaces.len(),
            snapshot.repositories().count()
        );
        self.publish(snapshot);
        Ok(())
    }
}
