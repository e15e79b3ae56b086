//! Post-receive work for the two configuration repositories: the keys
//! repository and the configuration checkout.

use std::fs;
use std::path::{Component, Path, PathBuf};

use git2::{ObjectType, Repository, Tree};
use tokio::process::Command;

use super::cache::{SimpleCache, SimpleRepository, Snapshot};
use super::config::{config_root, keys_repository};
use crate::atomic::write_atomic;
use crate::auth::keys::KeyStore;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::repo::vcs_dir;

const STAMP_FILE: &str = ".gitus-sync-stamp";
const KEY_DIR: &str = "ssh";

/// Touched after every successful rebuild; a running server reloads its
/// cache when the modification time moves.
#[must_use]
pub fn stamp_path(git_root: &Path, use_namespace: bool) -> PathBuf {
    let root = config_root(git_root, use_namespace);
    root.parent().unwrap_or(&root).join(STAMP_FILE)
}

fn is_valid_username(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn is_valid_key_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@' | '-'))
}

/// Rebuilds the managed authorised keys from `<user>/ssh/<key name>` blobs
/// at `rev` of the keys repository, then rewrites the file. Returns the
/// number of keys installed.
pub fn keys_update(config: &Config, keys: &KeyStore, rev: &str) -> Result<usize> {
    let path = keys_repository(&config.git_root, config.use_namespace);
    let repo = Repository::open(&path)?;
    let tree = repo.revparse_single(rev)?.peel_to_tree()?;

    let collected = collect_keys(&repo, &tree)?;
    let count = collected.len();
    keys.replace_all(collected)?;
    keys.sync()?;

    tracing::info!("Installed {} keys from {} at {}", count, path.display(), rev);
    Ok(count)
}

fn collect_keys(repo: &Repository, root: &Tree<'_>) -> Result<Vec<(String, String, String)>> {
    let mut out = Vec::new();

    for user_entry in root.iter() {
        let Some(username) = user_entry.name() else {
            continue;
        };
        if user_entry.kind() != Some(ObjectType::Tree) {
            continue;
        }
        if !is_valid_username(username) {
            tracing::warn!("Skipping invalid user directory {:?}", username);
            continue;
        }

        let user_tree = repo.find_tree(user_entry.id())?;
        let Some(ssh) = user_tree.get_name(KEY_DIR) else {
            continue;
        };
        if ssh.kind() != Some(ObjectType::Tree) {
            continue;
        }

        for key_entry in repo.find_tree(ssh.id())?.iter() {
            let Some(key_name) = key_entry.name() else {
                continue;
            };
            if key_entry.kind() != Some(ObjectType::Blob) || !is_valid_key_name(key_name) {
                tracing::warn!("Skipping invalid key {:?} of user {}", key_name, username);
                continue;
            }

            let blob = repo.find_blob(key_entry.id())?;
            let material = String::from_utf8_lossy(blob.content()).trim().to_string();
            if material.is_empty() || material.contains(['\n', '\r']) {
                tracing::warn!("Skipping key {} of user {}: not a single line", key_name, username);
                continue;
            }
            out.push((username.to_string(), key_name.to_string(), material));
        }
    }

    Ok(out)
}

/// Pulls the configuration checkout, then rebuilds and publishes the cache.
/// A checkout without remotes is used as it is.
pub async fn gitus_sync(config: &Config, cache: &SimpleCache, checkout: &Path) -> Result<()> {
    let has_remotes = !Repository::open(checkout)?.remotes()?.is_empty();

    if has_remotes {
        let output = Command::new("git")
            .arg("-C")
            .arg(checkout)
            .args(["pull", "--ff-only"])
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Fatal(format!(
                "git pull in {} failed: {}",
                checkout.display(),
                stderr.trim()
            )));
        }
    } else {
        tracing::debug!("{} has no remotes, skipping pull", checkout.display());
    }

    rebuild(config, cache)
}

/// Re-reads the configuration tree as committed at `rev`.
pub fn config_update(config: &Config, cache: &SimpleCache, rev: &str) -> Result<()> {
    tracing::info!("Configuration updated to {}", rev);
    rebuild(config, cache)
}

fn rebuild(config: &Config, cache: &SimpleCache) -> Result<()> {
    let snapshot = Snapshot::build(&config.git_root, config.use_namespace)?;
    for repo in snapshot.repositories() {
        materialise(repo)?;
    }

    let repositories = snapshot.repositories().count();
    cache.publish(snapshot);

    let stamp = stamp_path(&config.git_root, config.use_namespace);
    write_atomic(&stamp, chrono::Utc::now().to_rfc3339().as_bytes(), 0o644)?;

    tracing::info!("Simple-mode sync complete: {} repositories", repositories);
    Ok(())
}

/// Creates the repository if it is missing, installs its hooks and writes
/// its description.
pub fn materialise(repo: &SimpleRepository) -> Result<()> {
    let vcs = match vcs_dir(&repo.local_path) {
        Some(dir) => dir,
        None => {
            Repository::init_bare(&repo.local_path)?;
            tracing::info!("Created repository {} at {}", repo.full_name(), repo.local_path.display());
            repo.local_path.clone()
        }
    };

    for name in repo.config.hooks.keys() {
        let mut components = Path::new(name).components();
        if !matches!((components.next(), components.next()), (Some(Component::Normal(_)), None)) {
            tracing::warn!("Skipping hook {:?} of {}: not a plain file name", name, repo.full_name());
            continue;
        }

        let source = repo.config.hook_source(name)?;
        let script = fs::read(&source)?;
        let target = vcs.join("hooks").join(name);
        write_atomic(&target, &script, 0o755)?;
        set_executable(&target)?;
    }

    let mut description = repo.config.repo.description.clone();
    description.push('\n');
    write_atomic(&vcs.join("description"), description.as_bytes(), 0o644)?;
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}
