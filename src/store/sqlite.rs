use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use serde::de::DeserializeOwned;

use super::schema::schema;
use super::{Store, fuzzy_pattern, page_bounds};
use crate::error::{Error, Result};
use crate::types::*;

const USER_COLUMNS: &str = "user_name, user_title, user_email, user_bio, user_website, \
     user_password_hash, user_status, user_reg_datetime";

const NAMESPACE_COLUMNS: &str =
    "ns_name, ns_title, ns_description, ns_email, ns_owner, ns_reg_datetime, ns_status, ns_acl";

const REPOSITORY_COLUMNS: &str = "repo_type, repo_namespace, repo_name, repo_description, \
     repo_owner, repo_acl, repo_status, repo_fork_origin_namespace, repo_fork_origin_name, repo_labels";

/// Tables holding per-repository records keyed by (repo_namespace, repo_name).
const REPOSITORY_CHILD_TABLES: &[&str] = &[
    "issue",
    "issue_event",
    "pull_request",
    "pull_request_event",
    "webhook_log",
];

pub struct SqliteStore {
    conn: Mutex<Connection>,
    prefix: String,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P, table_prefix: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
            prefix: table_prefix.to_string(),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }

    /// Prefixed table name.
    fn t(&self, table: &str) -> String {
        format!("{}{table}", self.prefix)
    }

    fn user_exists(&self, conn: &Connection, name: &str) -> Result<bool> {
        Ok(conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE user_name = ?1", self.t("user")),
                params![name],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    fn delete_repository_children(&self, tx: &Transaction<'_>, namespace: &str, name: Option<&str>) -> Result<()> {
        for table in REPOSITORY_CHILD_TABLES {
            match name {
                Some(name) => tx.execute(
                    &format!(
                        "DELETE FROM {} WHERE repo_namespace = ?1 AND repo_name = ?2",
                        self.t(table)
                    ),
                    params![namespace, name],
                )?,
                None => tx.execute(
                    &format!("DELETE FROM {} WHERE repo_namespace = ?1", self.t(table)),
                    params![namespace],
                )?,
            };
        }
        Ok(())
    }

    fn query_users(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, user_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn query_namespaces(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Namespace>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, namespace_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn query_repositories(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Repository>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, repository_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite's datetime('now') default: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_json<T: DeserializeOwned + Default>(s: &str, what: &str) -> T {
    serde_json::from_str(s).unwrap_or_else(|e| {
        tracing::error!("Invalid {} in database: '{}' - {}", what, s, e);
        T::default()
    })
}

/// Status column `idx` of `row`. An unknown status fails the row rather
/// than reading as the least restrictive variant.
fn parse_status<T: std::str::FromStr>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    s.parse().map_err(|_| {
        tracing::error!("Invalid status in database: '{}'", s);
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid status '{s}'").into(),
        )
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Fatal(format!("failed to encode: {e}")))
}

/// Maps a uniqueness violation to `AlreadyExists`.
fn conflict(what: &'static str) -> impl FnOnce(rusqlite::Error) -> Error {
    move |e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::AlreadyExists(what)
        }
        e => Error::from(e),
    }
}

/// Turns "no row touched" into `NotFound`.
fn touched(rows: usize, what: &'static str) -> Result<()> {
    if rows == 0 {
        Err(Error::NotFound(what))
    } else {
        Ok(())
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        name: row.get(0)?,
        title: row.get(1)?,
        email: row.get(2)?,
        bio: row.get(3)?,
        website: row.get(4)?,
        password_hash: row.get(5)?,
        status: parse_status(row, 6)?,
        reg_datetime: parse_datetime(&row.get::<_, String>(7)?),
    })
}

fn namespace_from_row(row: &Row<'_>) -> rusqlite::Result<Namespace> {
    Ok(Namespace {
        name: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        email: row.get(3)?,
        owner: row.get(4)?,
        reg_datetime: parse_datetime(&row.get::<_, String>(5)?),
        status: parse_status(row, 6)?,
        acl: parse_json(&row.get::<_, String>(7)?, "acl"),
        local_path: Default::default(),
        repositories: Default::default(),
    })
}

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    let origin_namespace: Option<String> = row.get(7)?;
    let origin_name: Option<String> = row.get(8)?;

    Ok(Repository {
        kind: RepositoryKind::Git,
        namespace: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        owner: row.get(4)?,
        acl: parse_json(&row.get::<_, String>(5)?, "acl"),
        status: parse_status(row, 6)?,
        local_path: Default::default(),
        fork_origin: origin_namespace
            .zip(origin_name)
            .map(|(namespace, name)| ForkOrigin { namespace, name }),
        labels: parse_json(&row.get::<_, String>(9)?, "labels"),
    })
}

fn key_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(&schema(&self.prefix))?;
        Ok(())
    }

    // User operations

    fn create_user(&self, user: &User) -> Result<()> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO {} ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    self.t("user")
                ),
                params![
                    user.name,
                    user.title,
                    user.email,
                    user.bio,
                    user.website,
                    user.password_hash,
                    user.status.as_str(),
                    format_datetime(&user.reg_datetime),
                ],
            )
            .map_err(conflict("user"))?;
        Ok(())
    }

    fn get_user(&self, name: &str) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM {} WHERE user_name = ?1", self.t("user")),
                params![name],
                user_from_row,
            )
            .optional()?
            .ok_or(Error::NotFound("user"))
    }

    fn update_user_info(&self, user: &User) -> Result<()> {
        let rows = self.conn().execute(
            &format!(
                "UPDATE {} SET user_title = ?2, user_email = ?3, user_bio = ?4, user_website = ?5
                 WHERE user_name = ?1",
                self.t("user")
            ),
            params![user.name, user.title, user.email, user.bio, user.website],
        )?;
        touched(rows, "user")
    }

    fn update_user_password_hash(&self, name: &str, password_hash: &str) -> Result<()> {
        let rows = self.conn().execute(
            &format!(
                "UPDATE {} SET user_password_hash = ?2 WHERE user_name = ?1",
                self.t("user")
            ),
            params![name, password_hash],
        )?;
        touched(rows, "user")
    }

    fn update_user_status(&self, name: &str, status: UserStatus) -> Result<()> {
        let rows = self.conn().execute(
            &format!("UPDATE {} SET user_status = ?2 WHERE user_name = ?1", self.t("user")),
            params![name, status.as_str()],
        )?;
        touched(rows, "user")
    }

    fn delete_user(&self, name: &str) -> Result<()> {
        let rows = self.conn().execute(
            &format!("DELETE FROM {} WHERE user_name = ?1", self.t("user")),
            params![name],
        )?;
        touched(rows, "user")
    }

    fn list_users(&self, page: u32, page_size: u32) -> Result<Vec<User>> {
        let (limit, offset) = page_bounds(page, page_size);
        self.query_users(
            &format!(
                "SELECT {USER_COLUMNS} FROM {} ORDER BY user_name LIMIT ?1 OFFSET ?2",
                self.t("user")
            ),
            params![limit, offset],
        )
    }

    fn search_users(&self, query: &str, page: u32, page_size: u32) -> Result<Vec<User>> {
        let (limit, offset) = page_bounds(page, page_size);
        self.query_users(
            &format!(
                "SELECT {USER_COLUMNS} FROM {}
                 WHERE user_name LIKE ?1 ESCAPE '\\' OR user_title LIKE ?1 ESCAPE '\\'
                 ORDER BY user_name LIMIT ?2 OFFSET ?3",
                self.t("user")
            ),
            params![fuzzy_pattern(query), limit, offset],
        )
    }

    // Key operations

    fn register_auth_key(&self, key: &AuthKey) -> Result<()> {
        let conn = self.conn();
        if !self.user_exists(&conn, &key.username)? {
            return Err(Error::NotFound("user"));
        }
        conn.execute(
            &format!(
                "INSERT INTO {} (user_name, key_name, key_text) VALUES (?1, ?2, ?3)",
                self.t("user_authkey")
            ),
            params![key.username, key.key_name, key.key_text],
        )
        .map_err(conflict("key"))?;
        Ok(())
    }

    fn get_auth_key(&self, username: &str, key_name: &str) -> Result<AuthKey> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT user_name, key_name, key_text FROM {}
                     WHERE user_name = ?1 AND key_name = ?2",
                    self.t("user_authkey")
                ),
                params![username, key_name],
                key_from_row,
            )
            .optional()?
            .map(|(username, key_name, key_text)| AuthKey {
                username,
                key_name,
                key_text,
            })
            .ok_or(Error::NotFound("key"))
    }

    fn list_auth_keys(&self, username: &str) -> Result<Vec<AuthKey>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT user_name, key_name, key_text FROM {} WHERE user_name = ?1 ORDER BY key_name",
            self.t("user_authkey")
        ))?;
        let rows = stmt.query_map(params![username], key_from_row)?;

        let mut keys = Vec::new();
        for row in rows {
            let (username, key_name, key_text) = row?;
            keys.push(AuthKey {
                username,
                key_name,
                key_text,
            });
        }
        Ok(keys)
    }

    fn remove_auth_key(&self, username: &str, key_name: &str) -> Result<()> {
        let rows = self.conn().execute(
            &format!(
                "DELETE FROM {} WHERE user_name = ?1 AND key_name = ?2",
                self.t("user_authkey")
            ),
            params![username, key_name],
        )?;
        touched(rows, "key")
    }

    fn register_signing_key(&self, key: &SigningKey) -> Result<()> {
        let conn = self.conn();
        if !self.user_exists(&conn, &key.username)? {
            return Err(Error::NotFound("user"));
        }
        conn.execute(
            &format!(
                "INSERT INTO {} (user_name, key_name, key_text) VALUES (?1, ?2, ?3)",
                self.t("user_signkey")
            ),
            params![key.username, key.key_name, key.key_text],
        )
        .map_err(conflict("key"))?;
        Ok(())
    }

    fn list_signing_keys(&self, username: &str) -> Result<Vec<SigningKey>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT user_name, key_name, key_text FROM {} WHERE user_name = ?1 ORDER BY key_name",
            self.t("user_signkey")
        ))?;
        let rows = stmt.query_map(params![username], key_from_row)?;

        let mut keys = Vec::new();
        for row in rows {
            let (username, key_name, key_text) = row?;
            keys.push(SigningKey {
                username,
                key_name,
                key_text,
            });
        }
        Ok(keys)
    }

    fn remove_signing_key(&self, username: &str, key_name: &str) -> Result<()> {
        let rows = self.conn().execute(
            &format!(
                "DELETE FROM {} WHERE user_name = ?1 AND key_name = ?2",
                self.t("user_signkey")
            ),
            params![username, key_name],
        )?;
        touched(rows, "key")
    }

    // Namespace operations

    fn register_namespace(&self, ns: &Namespace) -> Result<()> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO {} ({NAMESPACE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    self.t("namespace")
                ),
                params![
                    ns.name,
                    ns.title,
                    ns.description,
                    ns.email,
                    ns.owner,
                    format_datetime(&ns.reg_datetime),
                    ns.status.as_str(),
                    to_json(&ns.acl)?,
                ],
            )
            .map_err(conflict("namespace"))?;
        Ok(())
    }

    fn get_namespace(&self, name: &str) -> Result<Namespace> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {NAMESPACE_COLUMNS} FROM {} WHERE ns_name = ?1",
                    self.t("namespace")
                ),
                params![name],
                namespace_from_row,
            )
            .optional()?
            .ok_or(Error::NotFound("namespace"))
    }

    fn update_namespace_info(&self, ns: &Namespace) -> Result<()> {
        let rows = self.conn().execute(
            &format!(
                "UPDATE {} SET ns_title = ?2, ns_description = ?3, ns_email = ?4 WHERE ns_name = ?1",
                self.t("namespace")
            ),
            params![ns.name, ns.title, ns.description, ns.email],
        )?;
        touched(rows, "namespace")
    }

    fn update_namespace_owner(&self, name: &str, owner: &str) -> Result<()> {
        let rows = self.conn().execute(
            &format!("UPDATE {} SET ns_owner = ?2 WHERE ns_name = ?1", self.t("namespace")),
            params![name, owner],
        )?;
        touched(rows, "namespace")
    }

    fn update_namespace_status(&self, name: &str, status: NamespaceStatus) -> Result<()> {
        let rows = self.conn().execute(
            &format!("UPDATE {} SET ns_status = ?2 WHERE ns_name = ?1", self.t("namespace")),
            params![name, status.as_str()],
        )?;
        touched(rows, "namespace")
    }

    fn update_namespace_acl(&self, name: &str, acl: &Acl) -> Result<()> {
        let rows = self.conn().execute(
            &format!("UPDATE {} SET ns_acl = ?2 WHERE ns_name = ?1", self.t("namespace")),
            params![name, to_json(acl)?],
        )?;
        touched(rows, "namespace")
    }

    fn hard_delete_namespace(&self, name: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let rows = tx.execute(
            &format!("DELETE FROM {} WHERE ns_name = ?1", self.t("namespace")),
            params![name],
        )?;
        touched(rows, "namespace")?;

        self.delete_repository_children(&tx, name, None)?;
        tx.execute(
            &format!("DELETE FROM {} WHERE repo_namespace = ?1", self.t("repository")),
            params![name],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn list_namespaces(&self, page: u32, page_size: u32) -> Result<Vec<Namespace>> {
        let (limit, offset) = page_bounds(page, page_size);
        self.query_namespaces(
            &format!(
                "SELECT {NAMESPACE_COLUMNS} FROM {} ORDER BY ns_name LIMIT ?1 OFFSET ?2",
                self.t("namespace")
            ),
            params![limit, offset],
        )
    }

    fn search_namespaces(&self, query: &str, page: u32, page_size: u32) -> Result<Vec<Namespace>> {
        let (limit, offset) = page_bounds(page, page_size);
        self.query_namespaces(
            &format!(
                "SELECT {NAMESPACE_COLUMNS} FROM {}
                 WHERE ns_name LIKE ?1 ESCAPE '\\' OR ns_title LIKE ?1 ESCAPE '\\'
                 ORDER BY ns_name LIMIT ?2 OFFSET ?3",
                self.t("namespace")
            ),
            params![fuzzy_pattern(query), limit, offset],
        )
    }

    // Repository operations

    fn create_repository(&self, repo: &Repository) -> Result<()> {
        let (origin_namespace, origin_name) = match &repo.fork_origin {
            Some(origin) => (Some(origin.namespace.as_str()), Some(origin.name.as_str())),
            None => (None, None),
        };

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO {} ({REPOSITORY_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    self.t("repository")
                ),
                params![
                    "git",
                    repo.namespace,
                    repo.name,
                    repo.description,
                    repo.owner,
                    to_json(&repo.acl)?,
                    repo.status.as_str(),
                    origin_namespace,
                    origin_name,
                    to_json(&repo.labels)?,
                ],
            )
            .map_err(conflict("repository"))?;
        Ok(())
    }

    fn get_repository(&self, namespace: &str, name: &str) -> Result<Repository> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {REPOSITORY_COLUMNS} FROM {} WHERE repo_namespace = ?1 AND repo_name = ?2",
                    self.t("repository")
                ),
                params![namespace, name],
                repository_from_row,
            )
            .optional()?
            .ok_or(Error::NotFound("repository"))
    }

    fn update_repository_info(&self, repo: &Repository) -> Result<()> {
        let rows = self.conn().execute(
            &format!(
                "UPDATE {} SET repo_description = ?3, repo_labels = ?4
                 WHERE repo_namespace = ?1 AND repo_name = ?2",
                self.t("repository")
            ),
            params![repo.namespace, repo.name, repo.description, to_json(&repo.labels)?],
        )?;
        touched(rows, "repository")
    }

    fn update_repository_status(
        &self,
        namespace: &str,
        name: &str,
        status: RepositoryStatus,
    ) -> Result<()> {
        let rows = self.conn().execute(
            &format!(
                "UPDATE {} SET repo_status = ?3 WHERE repo_namespace = ?1 AND repo_name = ?2",
                self.t("repository")
            ),
            params![namespace, name, status.as_str()],
        )?;
        touched(rows, "repository")
    }

    fn update_repository_acl(&self, namespace: &str, name: &str, acl: &Acl) -> Result<()> {
        let rows = self.conn().execute(
            &format!(
                "UPDATE {} SET repo_acl = ?3 WHERE repo_namespace = ?1 AND repo_name = ?2",
                self.t("repository")
            ),
            params![namespace, name, to_json(acl)?],
        )?;
        touched(rows, "repository")
    }

    fn move_repository(
        &self,
        namespace: &str,
        name: &str,
        new_namespace: &str,
        new_name: &str,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let rows = tx
            .execute(
                &format!(
                    "UPDATE {} SET repo_namespace = ?3, repo_name = ?4
                     WHERE repo_namespace = ?1 AND repo_name = ?2",
                    self.t("repository")
                ),
                params![namespace, name, new_namespace, new_name],
            )
            .map_err(conflict("repository"))?;
        touched(rows, "repository")?;

        for table in REPOSITORY_CHILD_TABLES {
            tx.execute(
                &format!(
                    "UPDATE {} SET repo_namespace = ?3, repo_name = ?4
                     WHERE repo_namespace = ?1 AND repo_name = ?2",
                    self.t(table)
                ),
                params![namespace, name, new_namespace, new_name],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn hard_delete_repository(&self, namespace: &str, name: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let rows = tx.execute(
            &format!(
                "DELETE FROM {} WHERE repo_namespace = ?1 AND repo_name = ?2",
                self.t("repository")
            ),
            params![namespace, name],
        )?;
        touched(rows, "repository")?;
        self.delete_repository_children(&tx, namespace, Some(name))?;

        tx.commit()?;
        Ok(())
    }

    fn list_repositories(&self, namespace: &str, page: u32, page_size: u32) -> Result<Vec<Repository>> {
        let (limit, offset) = page_bounds(page, page_size);
        self.query_repositories(
            &format!(
                "SELECT {REPOSITORY_COLUMNS} FROM {} WHERE repo_namespace = ?1
                 ORDER BY repo_name LIMIT ?2 OFFSET ?3",
                self.t("repository")
            ),
            params![namespace, limit, offset],
        )
    }

    fn search_repositories(
        &self,
        query: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Repository>> {
        let (limit, offset) = page_bounds(page, page_size);
        self.query_repositories(
            &format!(
                "SELECT {REPOSITORY_COLUMNS} FROM {}
                 WHERE repo_name LIKE ?1 ESCAPE '\\' OR repo_description LIKE ?1 ESCAPE '\\'
                 ORDER BY repo_namespace, repo_name LIMIT ?2 OFFSET ?3",
                self.t("repository")
            ),
            params![fuzzy_pattern(query), limit, offset],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TABLES;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> SqliteStore {
        let store = SqliteStore::new(temp.path().join("test.db"), "gitus_").unwrap();
        store.initialize().unwrap();
        store
    }

    fn user(name: &str) -> User {
        User {
            name: name.to_string(),
            title: name.to_uppercase(),
            email: format!("{name}@example.org"),
            bio: String::new(),
            website: String::new(),
            password_hash: String::new(),
            status: UserStatus::Normal,
            reg_datetime: Utc::now(),
        }
    }

    fn namespace(name: &str, owner: &str) -> Namespace {
        Namespace {
            owner: owner.to_string(),
            ..Namespace::bare(name, Default::default())
        }
    }

    #[test]
    fn test_initialize_creates_prefixed_tables() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.initialize().unwrap();

        let conn = store.connection();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();

        for table in TABLES {
            assert!(tables.contains(&format!("gitus_{table}")), "{table}");
        }
    }

    #[test]
    fn test_user_crud() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store.create_user(&user("alice")).unwrap();
        assert!(matches!(
            store.create_user(&user("alice")),
            Err(Error::AlreadyExists("user"))
        ));

        let mut alice = store.get_user("alice").unwrap();
        assert_eq!(alice.email, "alice@example.org");

        alice.bio = "hello".to_string();
        store.update_user_info(&alice).unwrap();
        store.update_user_password_hash("alice", "$argon2id$x").unwrap();

        let fetched = store.get_user("alice").unwrap();
        assert_eq!(fetched.bio, "hello");
        assert_eq!(fetched.password_hash, "$argon2id$x");

        store.delete_user("alice").unwrap();
        assert!(matches!(store.get_user("alice"), Err(Error::NotFound("user"))));
        assert!(matches!(store.delete_user("alice"), Err(Error::NotFound(_))));
        assert!(matches!(
            store.update_user_password_hash("ghost", "x"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_auth_keys() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.create_user(&user("alice")).unwrap();

        let key = AuthKey {
            username: "alice".to_string(),
            key_name: "laptop".to_string(),
            key_text: "ssh-ed25519 AAAA".to_string(),
        };
        store.register_auth_key(&key).unwrap();
        assert!(matches!(store.register_auth_key(&key), Err(Error::AlreadyExists(_))));
        assert_eq!(store.get_auth_key("alice", "laptop").unwrap(), key);
        assert_eq!(store.list_auth_keys("alice").unwrap().len(), 1);

        let orphan = AuthKey {
            username: "ghost".to_string(),
            ..key.clone()
        };
        assert!(matches!(store.register_auth_key(&orphan), Err(Error::NotFound("user"))));

        // Keys go with their user.
        store.delete_user("alice").unwrap();
        assert!(matches!(store.get_auth_key("alice", "laptop"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_signing_keys() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.create_user(&user("alice")).unwrap();

        let key = SigningKey {
            username: "alice".to_string(),
            key_name: "gpg".to_string(),
            key_text: "-----BEGIN PGP PUBLIC KEY BLOCK-----".to_string(),
        };
        store.register_signing_key(&key).unwrap();
        assert_eq!(store.list_signing_keys("alice").unwrap(), vec![key]);
        store.remove_signing_key("alice", "gpg").unwrap();
        assert!(matches!(store.remove_signing_key("alice", "gpg"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_namespace_crud() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let mut ns = namespace("team", "alice");
        ns.acl = Acl::new().with("bob", Permission::PUSH_TO_REPOSITORY);
        store.register_namespace(&ns).unwrap();
        assert!(matches!(store.register_namespace(&ns), Err(Error::AlreadyExists(_))));

        let fetched = store.get_namespace("team").unwrap();
        assert_eq!(fetched.owner, "alice");
        assert_eq!(fetched.acl.get("bob"), Some(Permission::PUSH_TO_REPOSITORY));

        store.update_namespace_owner("team", "carol").unwrap();
        store.update_namespace_status("team", NamespaceStatus::Private).unwrap();
        store
            .update_namespace_acl("team", &Acl::new().with("dave", Permission::EDIT_INFO))
            .unwrap();

        let fetched = store.get_namespace("team").unwrap();
        assert_eq!(fetched.owner, "carol");
        assert_eq!(fetched.status, NamespaceStatus::Private);
        assert!(!fetched.acl.contains("bob"));

        assert!(matches!(store.get_namespace("nope"), Err(Error::NotFound("namespace"))));
    }

    #[test]
    fn test_hard_delete_namespace_removes_repositories() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.register_namespace(&namespace("team", "alice")).unwrap();
        store.create_repository(&Repository::new("team", "svc", "alice")).unwrap();
        store.create_repository(&Repository::new("other", "svc", "alice")).unwrap();

        store.hard_delete_namespace("team").unwrap();
        assert!(matches!(store.get_repository("team", "svc"), Err(Error::NotFound(_))));
        assert!(store.get_repository("other", "svc").is_ok());
        assert!(matches!(store.hard_delete_namespace("team"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_repository_crud_and_move() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let mut repo = Repository::new("team", "svc", "alice");
        repo.fork_origin = Some(ForkOrigin {
            namespace: "upstream".to_string(),
            name: "svc".to_string(),
        });
        repo.labels = vec!["rust".to_string()];
        store.create_repository(&repo).unwrap();
        assert!(matches!(store.create_repository(&repo), Err(Error::AlreadyExists(_))));

        store
            .update_repository_status("team", "svc", RepositoryStatus::Archived)
            .unwrap();
        let fetched = store.get_repository("team", "svc").unwrap();
        assert_eq!(fetched.status, RepositoryStatus::Archived);
        assert_eq!(fetched.fork_origin, repo.fork_origin);
        assert_eq!(fetched.labels, vec!["rust"]);

        store.create_repository(&Repository::new("team", "taken", "alice")).unwrap();
        assert!(matches!(
            store.move_repository("team", "svc", "team", "taken"),
            Err(Error::AlreadyExists(_))
        ));

        store.move_repository("team", "svc", "infra", "service").unwrap();
        assert!(store.get_repository("team", "svc").is_err());
        assert_eq!(store.get_repository("infra", "service").unwrap().owner, "alice");

        store.hard_delete_repository("infra", "service").unwrap();
        assert!(matches!(
            store.hard_delete_repository("infra", "service"),
            Err(Error::NotFound("repository"))
        ));
    }

    #[test]
    fn test_unknown_status_fails_lookup() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let mut repo = Repository::new("team", "secret", "alice");
        repo.status = RepositoryStatus::Private;
        store.create_repository(&repo).unwrap();
        store.register_namespace(&namespace("team", "alice")).unwrap();

        store
            .connection()
            .execute("UPDATE gitus_repository SET repo_status = 'PRIVATE'", [])
            .unwrap();
        store
            .connection()
            .execute("UPDATE gitus_namespace SET ns_status = 'hidden'", [])
            .unwrap();

        assert!(matches!(
            store.get_repository("team", "secret"),
            Err(Error::Database(_))
        ));
        assert!(matches!(store.get_namespace("team"), Err(Error::Database(_))));
    }

    #[test]
    fn test_paging_and_search() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        for name in ["a_1", "ab1", "b", "c", "d"] {
            store.create_repository(&Repository::new("team", name, "alice")).unwrap();
        }

        let first: Vec<_> = store
            .list_repositories("team", 0, 2)
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        let second: Vec<_> = store
            .list_repositories("team", 1, 2)
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(first, vec!["a_1", "ab1"]);
        assert_eq!(second, vec!["b", "c"]);

        // An underscore is a literal, not a single-character wildcard.
        let hits: Vec<_> = store
            .search_repositories("a_", 0, 10)
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(hits, vec!["a_1"]);

        store.create_user(&user("100%real")).unwrap();
        store.create_user(&user("1000")).unwrap();
        assert_eq!(store.search_users("0%", 0, 10).unwrap().len(), 1);
    }
}
