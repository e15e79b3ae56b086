//! Mapping client-supplied repository paths to directories and records.

mod path;
mod resolve;

pub use path::{
    BARE_SUFFIX, RepoPath, is_valid_namespace_name, is_valid_repository_name, parse_repo_path,
    split_repo_path,
};
pub use resolve::{locate, namespace_dir, resolve_on_disk, scan, vcs_dir};
