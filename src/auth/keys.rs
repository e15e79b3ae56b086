use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use sha2::{Digest, Sha256};

use crate::atomic::write_atomic;
use crate::error::{Error, Result};
use crate::shell::words;

const KEY_OPTIONS: &str = "no-agent-forwarding,no-port-forwarding,no-X11-forwarding,no-pty";

type KeyMap = BTreeMap<(String, String), String>;

/// In-memory view of the authorised-keys file, keyed by (username, key name).
///
/// Lines in the file that were not written by this store (for instance an
/// administrator's own key) are kept verbatim ahead of the managed ones.
pub struct KeyStore {
    path: PathBuf,
    program: PathBuf,
    keys: RwLock<KeyMap>,
    foreign_lines: RwLock<Vec<String>>,
    sync_lock: Mutex<()>,
}

impl KeyStore {
    /// An empty store that will write to `path`, forcing `program` as the
    /// login command.
    pub fn new(path: impl Into<PathBuf>, program: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            program: program.into(),
            keys: RwLock::new(BTreeMap::new()),
            foreign_lines: RwLock::new(Vec::new()),
            sync_lock: Mutex::new(()),
        }
    }

    /// `~/.ssh/authorized_keys` of the user running the service.
    pub fn default_path() -> Result<PathBuf> {
        let dirs = directories::BaseDirs::new().ok_or_else(|| {
            Error::ConfigMalformed("could not determine home directory, is $HOME set?".into())
        })?;
        Ok(dirs.home_dir().join(".ssh").join("authorized_keys"))
    }

    /// Reads an existing file. A missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>, program: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(path, program);

        let content = match fs::read_to_string(&store.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(store),
            Err(e) => return Err(Error::Io(e)),
        };

        {
            let mut keys = store.write_keys();
            let mut foreign = store.foreign_lines.write().unwrap_or_else(|e| e.into_inner());
            for line in content.lines() {
                match parse_managed_line(line) {
                    Some((username, key_name, material)) => {
                        keys.insert((username, key_name), material);
                    }
                    None if line.trim().is_empty() => {}
                    None => foreign.push(line.to_string()),
                }
            }
        }

        Ok(store)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_keys(&self) -> std::sync::RwLockWriteGuard<'_, KeyMap> {
        self.keys.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_keys(&self) -> std::sync::RwLockReadGuard<'_, KeyMap> {
        self.keys.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_authorized_key(&self, username: &str, key_name: &str, material: &str) -> Result<()> {
        let material = material.trim();
        if material.is_empty() || material.contains(['\n', '\r']) {
            return Err(Error::InvalidKey(format!(
                "key {key_name} of user {username} must be a single non-empty line"
            )));
        }
        self.write_keys()
            .insert((username.to_string(), key_name.to_string()), material.to_string());
        Ok(())
    }

    pub fn remove_authorized_key(&self, username: &str, key_name: &str) -> bool {
        self.write_keys()
            .remove(&(username.to_string(), key_name.to_string()))
            .is_some()
    }

    pub fn get_authorized_key(&self, username: &str, key_name: &str) -> Option<String> {
        self.read_keys()
            .get(&(username.to_string(), key_name.to_string()))
            .cloned()
    }

    /// Replaces every managed key with `keys`.
    pub fn replace_all(&self, keys: impl IntoIterator<Item = (String, String, String)>) -> Result<()> {
        let mut fresh = BTreeMap::new();
        for (username, key_name, material) in keys {
            let material = material.trim().to_string();
            if material.is_empty() || material.contains(['\n', '\r']) {
                return Err(Error::InvalidKey(format!(
                    "key {key_name} of user {username} must be a single non-empty line"
                )));
            }
            fresh.insert((username, key_name), material);
        }
        *self.write_keys() = fresh;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.read_keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The file content the current state serialises to.
    #[must_use]
    pub fn render(&self) -> String {
        let program = self.program.to_string_lossy();
        let mut out = String::new();

        for line in self.foreign_lines.read().unwrap_or_else(|e| e.into_inner()).iter() {
            out.push_str(line);
            out.push('\n');
        }

        for ((username, key_name), material) in self.read_keys().iter() {
            let command = words::join(&[program.as_ref(), "ssh", username, key_name]);
            out.push_str(&format!(
                "command=\"{}\",{KEY_OPTIONS} {material}\n",
                command.replace('"', "\\\"")
            ));
        }
        out
    }

    /// Writes the file atomically. Concurrent syncs are serialised.
    pub fn sync(&self) -> Result<()> {
        let _guard = self.sync_lock.lock().unwrap_or_else(|e| e.into_inner());
        let content = self.render();
        write_atomic(&self.path, content.as_bytes(), 0o600)?;
        tracing::info!(
            "Wrote {} authorised keys to {}",
            self.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Extracts (username, key name, material) from a line this store wrote.
fn parse_managed_line(line: &str) -> Option<(String, String, String)> {
    let rest = line.trim().strip_prefix("command=\"")?;

    let mut command = String::new();
    let mut chars = rest.char_indices();
    let mut end = None;
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, '"')) => command.push('"'),
                Some((_, other)) => {
                    command.push('\\');
                    command.push(other);
                }
                None => return None,
            },
            '"' => {
                end = Some(i);
                break;
            }
            c => command.push(c),
        }
    }

    let after = &rest[end? + 1..];
    let (options, material) = after.split_once(' ')?;
    if options.trim_start_matches(',') != KEY_OPTIONS {
        return None;
    }

    let argv = words::split(&command).ok()?;
    match argv.as_slice() {
        [_, sub, username, key_name] if sub == "ssh" => Some((
            username.clone(),
            key_name.clone(),
            material.trim().to_string(),
        )),
        _ => None,
    }
}

/// OpenSSH-style fingerprint (`SHA256:<base64>`) of a public key line.
#[must_use]
pub fn fingerprint(material: &str) -> String {
    let blob = material
        .split_whitespace()
        .find_map(|field| STANDARD.decode(field).ok().filter(|b| !b.is_empty()))
        .unwrap_or_else(|| material.as_bytes().to_vec());
    format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(&blob)))
}
