//! Entry point for SSH logins: every managed authorised key forces
//! `gitus ssh <user> <key>`, and the command the client asked for arrives in
//! `SSH_ORIGINAL_COMMAND`.

pub mod pktline;
pub mod words;

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use crate::acl::{self, Intent};
use crate::auth::keys::{KeyStore, fingerprint};
use crate::config::{Config, OperationMode};
use crate::error::{Error, Result};
use crate::repo::{RepoPath, locate, parse_repo_path};
use crate::simple::{read_namespace_config, read_repository_config};
use crate::store::Store;
use crate::visibility;

/// Longest `SSH_ORIGINAL_COMMAND` accepted.
pub const MAX_COMMAND_LEN: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitService {
    UploadPack,
    ReceivePack,
    UploadArchive,
}

impl GitService {
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "git-upload-pack" => Some(Self::UploadPack),
            "git-receive-pack" => Some(Self::ReceivePack),
            "git-upload-archive" => Some(Self::UploadArchive),
            _ => None,
        }
    }

    pub fn command_name(&self) -> &'static str {
        match self {
            Self::UploadPack => "git-upload-pack",
            Self::ReceivePack => "git-receive-pack",
            Self::UploadArchive => "git-upload-archive",
        }
    }

    pub fn intent(&self) -> Intent {
        match self {
            Self::ReceivePack => Intent::Push,
            Self::UploadPack | Self::UploadArchive => Intent::Pull,
        }
    }
}

/// A parsed client command. The last word of `argv` is the repository path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub service: GitService,
    pub argv: Vec<String>,
}

impl ShellCommand {
    pub fn parse(original: &str) -> Result<Self> {
        if original.len() > MAX_COMMAND_LEN {
            return Err(Error::InvalidCommand("command too long".into()));
        }

        let mut argv =
            words::split(original).map_err(|e| Error::InvalidCommand(e.to_string()))?;

        // `git upload-pack path` is the older spelling of `git-upload-pack path`.
        if argv.first().is_some_and(|w| w == "git") && argv.len() > 1 {
            let sub = argv.remove(1);
            argv[0] = format!("git-{sub}");
        }

        let service = argv
            .first()
            .and_then(|w| GitService::from_name(w))
            .ok_or_else(|| Error::InvalidCommand(original.to_string()))?;
        if argv.len() != 2 {
            return Err(Error::InvalidCommand(original.to_string()));
        }

        Ok(Self { service, argv })
    }

    /// The repository path as the client wrote it.
    pub fn path(&self) -> &str {
        self.argv.last().map(String::as_str).unwrap_or_default()
    }
}

/// A command cleared to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorized {
    pub service: GitService,
    pub repository: RepoPath,
    pub local_path: PathBuf,
    /// The client's command with the path swapped for `local_path`.
    pub argv: Vec<String>,
}

/// What the client sees for an error. Anything internal is hidden behind a
/// generic message.
#[must_use]
pub fn client_message(error: &Error) -> String {
    match error {
        Error::InvalidCommand(_) => "Invalid command".to_string(),
        Error::BadPath(path) => format!("Invalid repository path: {path}"),
        Error::NotFound("repository") => "Repository not found".to_string(),
        Error::NotFound("namespace") => "Namespace not found".to_string(),
        Error::NotFound("user") => "User not found".to_string(),
        Error::PermissionDenied(_) | Error::ArchivedRepository | Error::IntegrityFailure { .. } => {
            error.to_string()
        }
        _ => "Internal server error".to_string(),
    }
}

pub struct Dispatcher<'a> {
    config: &'a Config,
    store: Option<&'a dyn Store>,
    keys: &'a KeyStore,
}

impl<'a> Dispatcher<'a> {
    /// `store` is required in normal mode and ignored otherwise.
    pub fn new(config: &'a Config, store: Option<&'a dyn Store>, keys: &'a KeyStore) -> Self {
        Self {
            config,
            store,
            keys,
        }
    }

    /// Decides whether `username`, logged in with `key_name`, may run
    /// `original`.
    pub fn authorize(&self, username: &str, key_name: &str, original: &str) -> Result<Authorized> {
        let command = ShellCommand::parse(original)?;
        let intent = command.service.intent();

        visibility::gate(self.config, Some(username))?;

        let (repository, local_path) = match self.config.mode {
            OperationMode::Plain => {
                return Err(Error::PermissionDenied("Shell access is disabled".into()));
            }
            OperationMode::Simple => self.authorize_simple(username, command.path(), intent)?,
            OperationMode::Normal => {
                self.authorize_normal(username, key_name, command.path(), intent)?
            }
        };

        let mut argv = command.argv;
        if let Some(last) = argv.last_mut() {
            *last = local_path.to_string_lossy().into_owned();
        }

        Ok(Authorized {
            service: command.service,
            repository,
            local_path,
            argv,
        })
    }

    fn authorize_simple(
        &self,
        username: &str,
        path: &str,
        intent: Intent,
    ) -> Result<(RepoPath, PathBuf)> {
        let config = self.config;
        let repository = parse_repo_path(path, config)?;

        let repo_config = read_repository_config(
            &config.git_root,
            config.use_namespace,
            &repository.namespace,
            &repository.name,
        )
        .map_err(|e| match e {
            Error::ConfigNotFound(_) => Error::NotFound("repository"),
            e => e,
        })?;

        let namespace_config = if config.use_namespace {
            match read_namespace_config(&config.git_root, &repository.namespace) {
                Ok(ns) => Some(ns),
                Err(Error::ConfigNotFound(_)) => None,
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        acl::check_simple(Some(username), &repo_config, namespace_config.as_ref(), intent)?;

        let local_path = locate(&config.git_root, &repository.namespace, &repository.name)
            .ok_or(Error::NotFound("repository"))?;
        Ok((repository, local_path))
    }

    fn authorize_normal(
        &self,
        username: &str,
        key_name: &str,
        path: &str,
        intent: Intent,
    ) -> Result<(RepoPath, PathBuf)> {
        let config = self.config;
        let store = self
            .store
            .ok_or_else(|| Error::Fatal("metadata store not open".into()))?;

        store.get_user(username)?;
        self.check_integrity(store, username, key_name)?;

        let repository = parse_repo_path(path, config)?;
        let namespace = if config.use_namespace {
            Some(store.get_namespace(&repository.namespace)?)
        } else {
            None
        };
        let record = store.get_repository(&repository.namespace, &repository.name)?;

        acl::check(Some(username), &record, namespace.as_ref(), intent)?;

        let local_path = locate(&config.git_root, &repository.namespace, &repository.name)
            .ok_or(Error::NotFound("repository"))?;
        Ok((repository, local_path))
    }

    /// The key the SSH server accepted must be the one the metadata store
    /// holds for that user and key name.
    fn check_integrity(&self, store: &dyn Store, username: &str, key_name: &str) -> Result<()> {
        let recorded = match store.get_auth_key(username, key_name) {
            Ok(key) => Some(key.key_text),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let installed = self.keys.get_authorized_key(username, key_name);

        match (recorded.as_deref().map(str::trim), installed.as_deref()) {
            (Some(a), Some(b)) if a == b => Ok(()),
            (recorded, installed) => {
                tracing::warn!(
                    user = username,
                    key = key_name,
                    recorded = %recorded.map(fingerprint).unwrap_or_default(),
                    installed = %installed.map(fingerprint).unwrap_or_default(),
                    "Key integrity check failed"
                );
                Err(Error::IntegrityFailure {
                    username: username.to_string(),
                    key_name: key_name.to_string(),
                })
            }
        }
    }
}

/// Spawns the git server process with inherited standard streams and waits
/// for it.
pub async fn execute(authorized: &Authorized, username: &str, key_name: &str) -> Result<i32> {
    let (program, args) = authorized
        .argv
        .split_first()
        .ok_or_else(|| Error::InvalidCommand("empty command".into()))?;

    let status = Command::new(program)
        .args(args)
        .env("GITUS_USER", username)
        .env("GITUS_KEY", key_name)
        .env("GITUS_REPOSITORY", authorized.repository.full_name())
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await?;

    Ok(status.code().unwrap_or(1))
}

/// Runs one SSH login end to end and returns the exit status. Refusals are
/// written to `out` as a single `ERR` packet-line.
pub async fn run<W: Write>(
    dispatcher: &Dispatcher<'_>,
    username: &str,
    key_name: &str,
    original: Option<&str>,
    out: &mut W,
) -> i32 {
    let result = match original {
        Some(original) => dispatcher.authorize(username, key_name, original),
        None => Err(Error::InvalidCommand("SSH_ORIGINAL_COMMAND is not set".into())),
    };

    let refusal = match result {
        Ok(authorized) => {
            tracing::info!(
                user = username,
                key = key_name,
                repository = %authorized.repository,
                "{}",
                authorized.service.command_name()
            );
            match execute(&authorized, username, key_name).await {
                Ok(code) => return code,
                Err(e) => e,
            }
        }
        Err(e) => e,
    };

    match &refusal {
        Error::PermissionDenied(_)
        | Error::ArchivedRepository
        | Error::NotFound(_)
        | Error::BadPath(_)
        | Error::InvalidCommand(_)
        | Error::IntegrityFailure { .. } => {
            tracing::warn!(user = username, key = key_name, "Refused: {}", refusal);
        }
        e => tracing::error!(user = username, key = key_name, "Shell request failed: {}", e),
    }

    let frame = pktline::error_frame(&client_message(&refusal));
    if let Err(e) = out.write_all(&frame).and_then(|()| out.flush()) {
        tracing::error!("Failed to write error frame: {}", e);
    }
    1
}
