use std::fmt;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::full_name;

/// Conventional suffix of bare repository directories.
pub const BARE_SUFFIX: &str = ".git";

/// A repository path as presented by a client, split and validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoPath {
    /// Empty when namespaces are disabled.
    pub namespace: String,
    pub name: String,
}

impl RepoPath {
    #[must_use]
    pub fn full_name(&self) -> String {
        full_name(&self.namespace, &self.name)
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

fn is_valid_name_char(c: char, allow_period: bool) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || (allow_period && c == '.')
}

/// `[A-Za-z0-9_-]*`. The empty name stands for "no namespace".
#[must_use]
pub fn is_valid_namespace_name(name: &str) -> bool {
    name.chars().all(|c| is_valid_name_char(c, false))
}

/// `[A-Za-z0-9_.-]+`, neither `.` nor `..`, not ending in `.`.
#[must_use]
pub fn is_valid_repository_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| is_valid_name_char(c, true))
        && name != "."
        && name != ".."
        && !name.ends_with('.')
}

/// Splits a client-supplied path into namespace and repository.
///
/// Accepts `ns/repo`, `/ns/repo`, `~ns/repo` and `ns:repo` when namespaces
/// are on, and a bare `repo` otherwise. A trailing `.git` on the
/// repository part is dropped.
pub fn split_repo_path(path: &str, use_namespace: bool) -> Result<(String, String)> {
    let stripped = path
        .strip_prefix('/')
        .or_else(|| path.strip_prefix('~'))
        .unwrap_or(path);

    let parts: Vec<&str> = stripped.splitn(2, '/').collect();

    let (namespace, name) = if use_namespace {
        match parts.as_slice() {
            [namespace, name] => (*namespace, *name),
            [single] => single
                .split_once(':')
                .ok_or_else(|| Error::BadPath(path.to_string()))?,
            _ => return Err(Error::BadPath(path.to_string())),
        }
    } else {
        match parts.as_slice() {
            [name] => ("", *name),
            _ => return Err(Error::BadPath(path.to_string())),
        }
    };

    let name = name.strip_suffix(BARE_SUFFIX).unwrap_or(name);
    Ok((namespace.to_string(), name.to_string()))
}

/// Splits and validates `path`. Names on the ignore lists are reported as
/// missing.
pub fn parse_repo_path(path: &str, config: &Config) -> Result<RepoPath> {
    let (namespace, name) = split_repo_path(path, config.use_namespace)?;

    if !is_valid_namespace_name(&namespace) || !is_valid_repository_name(&name) {
        return Err(Error::BadPath(path.to_string()));
    }
    if config.use_namespace && namespace.is_empty() {
        return Err(Error::BadPath(path.to_string()));
    }

    let repo = RepoPath { namespace, name };
    if config.is_namespace_ignored(&repo.namespace) && !repo.namespace.is_empty() {
        return Err(Error::NotFound("namespace"));
    }
    if config.is_repository_ignored(&repo.full_name()) {
        return Err(Error::NotFound("repository"));
    }
    Ok(repo)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(use_namespace: bool) -> Config {
        Config {
            use_namespace,
            ..Config::default()
        }
    }

    fn parsed(path: &str, use_namespace: bool) -> Result<(String, String)> {
        parse_repo_path(path, &config(use_namespace)).map(|r| (r.namespace, r.name))
    }

    fn pair(ns: &str, name: &str) -> (String, String) {
        (ns.to_string(), name.to_string())
    }

    #[test]
    fn test_equivalent_forms_with_namespaces() {
        let expected = pair("a", "b");
        assert_eq!(parsed("/a/b", true).unwrap(), expected);
        assert_eq!(parsed("a:b", true).unwrap(), expected);
        assert_eq!(parsed("a/b", true).unwrap(), expected);
        assert_eq!(parsed("~a/b", true).unwrap(), expected);
        assert_eq!(parsed("a/b.git", true).unwrap(), expected);
    }

    #[test]
    fn test_without_namespaces() {
        assert!(matches!(parsed("a/b", false), Err(Error::BadPath(_))));
        assert_eq!(parsed("b", false).unwrap(), pair("", "b"));
        assert_eq!(parsed("/b", false).unwrap(), pair("", "b"));
        assert_eq!(parsed("~b.git", false).unwrap(), pair("", "b"));
    }

    #[test]
    fn test_single_part_needs_colon() {
        assert!(matches!(parsed("justrepo", true), Err(Error::BadPath(_))));
        assert!(matches!(parsed(":repo", true), Err(Error::BadPath(_))));
    }

    #[test]
    fn test_name_validation() {
        assert!(matches!(parsed("a/..", true), Err(Error::BadPath(_))));
        assert!(matches!(parsed("a/.", true), Err(Error::BadPath(_))));
        assert!(matches!(parsed("a/x.", true), Err(Error::BadPath(_))));
        assert!(matches!(parsed("a/b/c", true), Err(Error::BadPath(_))));
        assert!(matches!(parsed("a.b/c", true), Err(Error::BadPath(_))));
        assert!(matches!(parsed("a/b c", true), Err(Error::BadPath(_))));
        assert_eq!(parsed("my-ns/v1.2_x", true).unwrap(), pair("my-ns", "v1.2_x"));
    }

    #[test]
    fn test_only_one_leading_marker_stripped() {
        assert!(matches!(parsed("//a/b", true), Err(Error::BadPath(_))));
        assert!(matches!(parsed("~/a/b", true), Err(Error::BadPath(_))));
    }

    #[test]
    fn test_ignore_lists() {
        let config = Config {
            ignore_namespace: vec!["secret".to_string()],
            ignore_repository: vec!["team:hidden".to_string()],
            ..Config::default()
        };
        assert!(matches!(
            parse_repo_path("secret/x", &config),
            Err(Error::NotFound("namespace"))
        ));
        assert!(matches!(
            parse_repo_path("team:hidden", &config),
            Err(Error::NotFound("repository"))
        ));
        assert!(parse_repo_path("team/visible", &config).is_ok());
    }
}
