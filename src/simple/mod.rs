//! Simple mode: namespaces, repositories, access rules and SSH keys all come
//! from files tracked in git under the git root.

mod cache;
mod config;
mod sync;

pub use cache::{SimpleCache, SimpleNamespace, SimpleRepository, Snapshot};
pub use config::{
    RepoInfo, SimpleConfig, UserRule, Verdict, Visibility, config_root, keys_repository,
    namespace_config_path, read_config, read_namespace_config, read_repository_config,
    repository_config_path,
};
pub use sync::{config_update, gitus_sync, keys_update, materialise, stamp_path};
