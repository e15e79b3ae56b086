use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;

use super::AppState;
use crate::simple::stamp_path;

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Polls the synchroniser's stamp file and reloads the simple-mode cache
/// whenever its modification time changes. A failed reload keeps the
/// previous snapshot.
pub fn spawn_stamp_watcher(state: Arc<AppState>, period: Duration) -> JoinHandle<()> {
    let git_root = state.config.git_root.clone();
    let use_namespace = state.config.use_namespace;
    let stamp = stamp_path(&git_root, use_namespace);

    tokio::spawn(async move {
        let mut seen = modified(&stamp);
        let mut ticker = tokio::time::interval(period);

        loop {
            ticker.tick().await;
            let current = modified(&stamp);
            if current == seen {
                continue;
            }
            seen = current;

            tracing::info!("{} changed, reloading configuration", stamp.display());
            if let Err(e) = state.simple.reload(&git_root, use_namespace) {
                tracing::error!("Failed to reload simple-mode configuration: {}", e);
            }
        }
    })
}
