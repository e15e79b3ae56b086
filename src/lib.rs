//! # Gitus
//!
//! A self-hosted git service. Repositories live on disk under one git root,
//! optionally grouped into namespaces; SSH access goes through the `ssh`
//! entry point forced by every managed authorised key, and a small HTTP API
//! serves sessions and metadata.
//!
//! Three operation modes:
//!
//! - **plain**: read-only browsing of the directory tree, no shell access.
//! - **normal**: accounts, keys, namespaces and ACLs in a metadata store.
//! - **simple**: everything in JSON files tracked in git under the root,
//!   with post-receive hooks keeping the server in step.
//!
//! ## Library Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gitus::config::Config;
//! use gitus::server::{AppState, create_router};
//! use gitus::session::open_session_store;
//! use gitus::store::open_store;
//!
//! let config = Config::load("config.json".as_ref())?;
//! let store = open_store(&config.database)?;
//! let sessions = open_session_store(&config.session)?;
//! let state = Arc::new(AppState::new(config, Some(store.into()), sessions.into()));
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): the `gitus` binary and the interactive password prompt.

pub mod acl;
pub mod admin;
pub mod atomic;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod repo;
pub mod server;
pub mod session;
pub mod shell;
pub mod simple;
pub mod store;
pub mod types;
pub mod visibility;
