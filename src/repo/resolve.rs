use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::path::{BARE_SUFFIX, RepoPath, is_valid_namespace_name, is_valid_repository_name};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{Namespace, Repository};

/// Directories under the git root reserved for the service itself.
const INTERNAL_PREFIX: &str = "__";

/// The git directory for `dir`: `dir` itself when it is a bare repository,
/// else `dir/.git`, else nothing.
#[must_use]
pub fn vcs_dir(dir: &Path) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }
    if git2::Repository::open_bare(dir).is_ok() {
        return Some(dir.to_path_buf());
    }
    let nested = dir.join(".git");
    if nested.is_dir() && git2::Repository::open_bare(&nested).is_ok() {
        return Some(nested);
    }
    None
}

/// Directory holding the repositories of `namespace`.
#[must_use]
pub fn namespace_dir(git_root: &Path, namespace: &str) -> PathBuf {
    if namespace.is_empty() {
        git_root.to_path_buf()
    } else {
        git_root.join(namespace)
    }
}

/// Finds the git directory of a repository, trying `<name>` and then
/// `<name>.git` under its namespace directory.
#[must_use]
pub fn locate(git_root: &Path, namespace: &str, name: &str) -> Option<PathBuf> {
    let base = namespace_dir(git_root, namespace);
    vcs_dir(&base.join(name)).or_else(|| vcs_dir(&base.join(format!("{name}{BARE_SUFFIX}"))))
}

/// Resolves a repository straight from the filesystem, as plain and simple
/// mode do. The record carries no owner and no ACL.
pub fn resolve_on_disk(config: &Config, path: &RepoPath) -> Result<Repository> {
    if !path.namespace.is_empty() && !namespace_dir(&config.git_root, &path.namespace).is_dir() {
        return Err(Error::NotFound("namespace"));
    }

    let local_path =
        locate(&config.git_root, &path.namespace, &path.name).ok_or(Error::NotFound("repository"))?;

    let mut repo = Repository::new(&path.namespace, &path.name, "");
    repo.local_path = local_path;
    Ok(repo)
}

/// Repository name for a directory entry, with the bare suffix dropped.
fn candidate_name(file_name: &str) -> Option<&str> {
    let name = file_name.strip_suffix(BARE_SUFFIX).unwrap_or(file_name);
    if name.is_empty() || !is_valid_repository_name(name) {
        None
    } else {
        Some(name)
    }
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with(INTERNAL_PREFIX) || name.starts_with('.') {
            continue;
        }
        dirs.push((name, entry.path()));
    }
    dirs.sort();
    Ok(dirs)
}

fn scan_repositories(config: &Config, namespace: &str, dir: &Path) -> Result<BTreeMap<String, Repository>> {
    let mut repositories = BTreeMap::new();

    for (file_name, path) in sorted_subdirs(dir)? {
        let Some(name) = candidate_name(&file_name) else {
            continue;
        };
        let Some(local_path) = vcs_dir(&path) else {
            continue;
        };
        let mut repo = Repository::new(namespace, name, "");
        if config.is_repository_ignored(&repo.full_name()) || repositories.contains_key(name) {
            continue;
        }
        repo.local_path = local_path;
        repositories.insert(name.to_string(), repo);
    }

    Ok(repositories)
}

/// Lists every namespace and repository found under the git root. Without
/// namespaces the result holds one namespace with an empty name.
pub fn scan(config: &Config) -> Result<BTreeMap<String, Namespace>> {
    let root = &config.git_root;
    let mut namespaces = BTreeMap::new();

    if !config.use_namespace {
        let mut ns = Namespace::bare("", root.clone());
        ns.repositories = scan_repositories(config, "", root)?;
        namespaces.insert(String::new(), ns);
        return Ok(namespaces);
    }

    for (name, path) in sorted_subdirs(root)? {
        if !is_valid_namespace_name(&name) || config.is_namespace_ignored(&name) {
            continue;
        }
        // A repository sitting directly under the root is not a namespace.
        if vcs_dir(&path).is_some() {
            continue;
        }
        let mut ns = Namespace::bare(&name, path.clone());
        ns.repositories = scan_repositories(config, &name, &path)?;
        namespaces.insert(name, ns);
    }

    tracing::debug!("Scanned {} namespaces under {}", namespaces.len(), root.display());
    Ok(namespaces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(root: &Path, use_namespace: bool) -> Config {
        Config {
            git_root: root.to_path_buf(),
            use_namespace,
            ..Config::default()
        }
    }

    fn repo_path(ns: &str, name: &str) -> RepoPath {
        RepoPath {
            namespace: ns.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_bare_and_nested_layouts() {
        let temp = TempDir::new().unwrap();
        git2::Repository::init_bare(temp.path().join("team/svc.git")).unwrap();
        git2::Repository::init(temp.path().join("team/web")).unwrap();
        fs::create_dir_all(temp.path().join("team/junk")).unwrap();

        let config = config(temp.path(), true);

        let svc = resolve_on_disk(&config, &repo_path("team", "svc")).unwrap();
        assert_eq!(svc.local_path, temp.path().join("team/svc.git"));

        let web = resolve_on_disk(&config, &repo_path("team", "web")).unwrap();
        assert_eq!(web.local_path, temp.path().join("team/web/.git"));

        assert!(matches!(
            resolve_on_disk(&config, &repo_path("team", "junk")),
            Err(Error::NotFound("repository"))
        ));
        assert!(matches!(
            resolve_on_disk(&config, &repo_path("nope", "svc")),
            Err(Error::NotFound("namespace"))
        ));
    }

    #[test]
    fn test_scan_with_namespaces() {
        let temp = TempDir::new().unwrap();
        git2::Repository::init_bare(temp.path().join("team/svc.git")).unwrap();
        git2::Repository::init_bare(temp.path().join("team/hidden")).unwrap();
        git2::Repository::init_bare(temp.path().join("ops/deploy")).unwrap();
        git2::Repository::init_bare(temp.path().join("__gitus/__keys")).unwrap();

        let mut config = config(temp.path(), true);
        config.ignore_repository = vec!["team:hidden".to_string()];
        config.ignore_namespace = vec!["ops".to_string()];

        let namespaces = scan(&config).unwrap();
        assert_eq!(namespaces.keys().collect::<Vec<_>>(), vec!["team"]);

        let team = &namespaces["team"];
        assert_eq!(team.repositories.keys().collect::<Vec<_>>(), vec!["svc"]);
        assert_eq!(team.repositories["svc"].full_name(), "team:svc");
    }

    #[test]
    fn test_scan_without_namespaces() {
        let temp = TempDir::new().unwrap();
        git2::Repository::init_bare(temp.path().join("alpha.git")).unwrap();
        git2::Repository::init_bare(temp.path().join("beta")).unwrap();

        let namespaces = scan(&config(temp.path(), false)).unwrap();
        let root = &namespaces[""];
        assert_eq!(root.repositories.keys().collect::<Vec<_>>(), vec!["alpha", "beta"]);
        assert_eq!(root.repositories["beta"].full_name(), "beta");
    }
}
