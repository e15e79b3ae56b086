mod schema;
mod sqlite;

pub use schema::TABLES;
pub use sqlite::SqliteStore;

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::types::*;

/// Store defines the metadata interface used in normal mode.
///
/// Lookups fail with [`Error::NotFound`] and creations with
/// [`Error::AlreadyExists`]. Listing and search methods are page-indexed:
/// `page` counts from zero and each page holds `page_size` records.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // User operations
    fn create_user(&self, user: &User) -> Result<()>;
    fn get_user(&self, name: &str) -> Result<User>;
    /// Updates the profile fields. The password hash and status are untouched.
    fn update_user_info(&self, user: &User) -> Result<()>;
    fn update_user_password_hash(&self, name: &str, password_hash: &str) -> Result<()>;
    fn update_user_status(&self, name: &str, status: UserStatus) -> Result<()>;
    fn delete_user(&self, name: &str) -> Result<()>;
    fn list_users(&self, page: u32, page_size: u32) -> Result<Vec<User>>;
    fn search_users(&self, query: &str, page: u32, page_size: u32) -> Result<Vec<User>>;

    // Key operations
    fn register_auth_key(&self, key: &AuthKey) -> Result<()>;
    fn get_auth_key(&self, username: &str, key_name: &str) -> Result<AuthKey>;
    fn list_auth_keys(&self, username: &str) -> Result<Vec<AuthKey>>;
    fn remove_auth_key(&self, username: &str, key_name: &str) -> Result<()>;
    fn register_signing_key(&self, key: &SigningKey) -> Result<()>;
    fn list_signing_keys(&self, username: &str) -> Result<Vec<SigningKey>>;
    fn remove_signing_key(&self, username: &str, key_name: &str) -> Result<()>;

    // Namespace operations
    fn register_namespace(&self, ns: &Namespace) -> Result<()>;
    fn get_namespace(&self, name: &str) -> Result<Namespace>;
    fn update_namespace_info(&self, ns: &Namespace) -> Result<()>;
    fn update_namespace_owner(&self, name: &str, owner: &str) -> Result<()>;
    fn update_namespace_status(&self, name: &str, status: NamespaceStatus) -> Result<()>;
    fn update_namespace_acl(&self, name: &str, acl: &Acl) -> Result<()>;
    /// Removes the namespace and every repository record inside it.
    fn hard_delete_namespace(&self, name: &str) -> Result<()>;
    fn list_namespaces(&self, page: u32, page_size: u32) -> Result<Vec<Namespace>>;
    fn search_namespaces(&self, query: &str, page: u32, page_size: u32) -> Result<Vec<Namespace>>;

    // Repository operations
    fn create_repository(&self, repo: &Repository) -> Result<()>;
    fn get_repository(&self, namespace: &str, name: &str) -> Result<Repository>;
    fn update_repository_info(&self, repo: &Repository) -> Result<()>;
    fn update_repository_status(
        &self,
        namespace: &str,
        name: &str,
        status: RepositoryStatus,
    ) -> Result<()>;
    fn update_repository_acl(&self, namespace: &str, name: &str, acl: &Acl) -> Result<()>;
    fn move_repository(
        &self,
        namespace: &str,
        name: &str,
        new_namespace: &str,
        new_name: &str,
    ) -> Result<()>;
    fn hard_delete_repository(&self, namespace: &str, name: &str) -> Result<()>;
    fn list_repositories(&self, namespace: &str, page: u32, page_size: u32) -> Result<Vec<Repository>>;
    fn search_repositories(&self, query: &str, page: u32, page_size: u32)
    -> Result<Vec<Repository>>;
}

/// Opens the metadata store named by `config.kind` and creates its tables.
pub fn open_store(config: &DatabaseConfig) -> Result<Box<dyn Store>> {
    match config.kind.as_str() {
        "sqlite" => {
            let store = SqliteStore::new(&config.path, &config.table_prefix)?;
            store.initialize()?;
            Ok(Box::new(store))
        }
        other => Err(Error::BackendNotSupported(format!("database {other:?}"))),
    }
}

/// Turns a free-text search term into a `LIKE` pattern matching it
/// anywhere. Use with `ESCAPE '\'`.
#[must_use]
pub fn fuzzy_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// `LIMIT`/`OFFSET` pair for a zero-based page.
pub(crate) fn page_bounds(page: u32, page_size: u32) -> (i64, i64) {
    let limit = i64::from(page_size);
    (limit, limit.saturating_mul(i64::from(page)))
}
