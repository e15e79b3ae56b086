use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use gitus::admin::{ensure_normal_mode, prompt_password, reset_admin_password};
use gitus::auth::{Argon2Hasher, KeyStore};
use gitus::config::{Config, OperationMode};
use gitus::server::{AppState, create_router, spawn_stamp_watcher};
use gitus::session::{SessionStore, open_session_store};
use gitus::shell::{self, Dispatcher, pktline};
use gitus::simple::{self, SimpleCache, config_root};
use gitus::store::{Store, open_store};

/// How often `serve` looks at the simple-mode sync stamp.
const STAMP_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "gitus")]
#[command(about = "A self-hosted git service", long_about = None)]
struct Cli {
    /// Configuration file [default: ~/.config/gitus/config.json]
    #[arg(long, global = true, env = "GITUS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Entry point forced by authorised keys; reads SSH_ORIGINAL_COMMAND
    Ssh {
        /// Authenticated user
        username: String,
        /// Name of the key the user logged in with
        key_name: String,
    },

    /// Post-receive hooks of the simple-mode configuration repositories
    SimpleMode {
        #[command(subcommand)]
        command: SimpleModeCommands,
    },

    /// Set a new password for the admin account
    ResetAdmin,

    /// Start the HTTP server
    Serve {
        /// Address to bind to, overriding bindAddress from the configuration
        #[arg(long)]
        bind: Option<String>,
    },
}

#[derive(Subcommand)]
enum SimpleModeCommands {
    /// Rebuild the authorised keys from the keys repository
    KeysUpdate {
        /// Revision of the keys repository to read
        rev: String,
    },

    /// Pull the configuration checkout and rebuild everything from it
    GitusSync {
        /// The configuration checkout [default: the standard location]
        path: Option<PathBuf>,
    },

    /// Re-read the configuration tree after a push
    ConfigUpdate {
        /// Revision that was pushed
        rev: String,
    },
}

fn load_config(path: Option<PathBuf>) -> gitus::error::Result<Config> {
    let path = match path {
        Some(p) => p,
        None => Config::default_path()?,
    };
    Config::load(&path)
}

fn load_keys() -> gitus::error::Result<KeyStore> {
    let program = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("gitus"));
    KeyStore::load(KeyStore::default_path()?, program)
}

/// Runs one SSH login. Every failure, including a broken installation,
/// reaches the client as a single `ERR` packet-line.
async fn run_ssh(config_path: Option<PathBuf>, username: &str, key_name: &str) -> i32 {
    let mut stdout = std::io::stdout();

    let prepared = (|| -> gitus::error::Result<_> {
        let config = load_config(config_path)?;
        let keys = load_keys()?;
        let store = match config.mode {
            OperationMode::Normal => Some(open_store(&config.database)?),
            _ => None,
        };
        Ok((config, keys, store))
    })();

    let (config, keys, store) = match prepared {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("Cannot serve {} ({}): {}", username, key_name, e);
            let frame = pktline::error_frame(&shell::client_message(&e));
            let _ = stdout.write_all(&frame).and_then(|()| stdout.flush());
            return 1;
        }
    };

    let original = std::env::var("SSH_ORIGINAL_COMMAND").ok();
    let dispatcher = Dispatcher::new(&config, store.as_deref(), &keys);
    shell::run(&dispatcher, username, key_name, original.as_deref(), &mut stdout).await
}

fn require_simple_mode(config: &Config) -> anyhow::Result<()> {
    if config.mode != OperationMode::Simple {
        bail!("this command needs simple mode, the instance runs in {} mode", config.mode);
    }
    Ok(())
}

async fn run_simple_mode(config: &Config, command: SimpleModeCommands) -> anyhow::Result<()> {
    require_simple_mode(config)?;
    let cache = SimpleCache::new();

    match command {
        SimpleModeCommands::KeysUpdate { rev } => {
            let keys = load_keys()?;
            simple::keys_update(config, &keys, &rev)?;
        }
        SimpleModeCommands::GitusSync { path } => {
            let checkout =
                path.unwrap_or_else(|| config_root(&config.git_root, config.use_namespace));
            simple::gitus_sync(config, &cache, &checkout).await?;
        }
        SimpleModeCommands::ConfigUpdate { rev } => {
            simple::config_update(config, &cache, &rev)?;
        }
    }
    Ok(())
}

fn run_reset_admin(config: &Config) -> anyhow::Result<()> {
    ensure_normal_mode(config)?;
    let store = open_store(&config.database)?;
    let password = prompt_password()?;
    reset_admin_password(store.as_ref(), &Argon2Hasher::new(), &password)?;
    println!("Admin password updated.");
    Ok(())
}

async fn run_serve(config: Config, bind: Option<String>) -> anyhow::Result<()> {
    let store: Option<Arc<dyn Store>> = match config.mode {
        OperationMode::Normal => Some(Arc::from(open_store(&config.database)?)),
        _ => None,
    };
    let sessions: Arc<dyn SessionStore> = Arc::from(open_session_store(&config.session)?);
    if !sessions.is_usable() {
        tracing::warn!("Session backend {:?} is not reachable yet", config.session.kind);
    }

    let addr: SocketAddr = match bind {
        Some(bind) => bind.parse()?,
        None => config.socket_addr()?,
    };
    let git_root = config.git_root.clone();
    let mode = config.mode;
    let state = Arc::new(AppState::new(config, store, sessions));

    if mode == OperationMode::Simple {
        state.simple.reload(&git_root, state.config.use_namespace)?;
        spawn_stamp_watcher(state.clone(), STAMP_POLL_INTERVAL);
    }

    let app = create_router(state);
    info!("Starting {} mode server on {}", mode, addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout is the git protocol channel on the ssh path.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("gitus=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ssh { username, key_name } => {
            let code = run_ssh(cli.config, &username, &key_name).await;
            std::process::exit(code);
        }
        Commands::SimpleMode { command } => {
            let config = load_config(cli.config)?;
            run_simple_mode(&config, command).await?;
        }
        Commands::ResetAdmin => {
            let config = load_config(cli.config)?;
            run_reset_admin(&config)?;
        }
        Commands::Serve { bind } => {
            let config = load_config(cli.config)?;
            run_serve(config, bind).await?;
        }
    }

    Ok(())
}
