use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Acl;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Normal,
    Admin,
    SuperAdmin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub title: String,
    pub email: String,
    pub bio: String,
    pub website: String,
    #[serde(skip)]
    pub password_hash: String,
    pub status: UserStatus,
    pub reg_datetime: DateTime<Utc>,
}

/// An SSH public key a user authenticates with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthKey {
    pub username: String,
    pub key_name: String,
    pub key_text: String,
}

/// A commit-signing key; stored for the web views, never consulted by the
/// shell path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKey {
    pub username: String,
    pub key_name: String,
    pub key_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceStatus {
    #[default]
    Public,
    Private,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryStatus {
    #[default]
    Public,
    Private,
    Archived,
}

macro_rules! status_str {
    ($ty:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $s,)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: {other}", stringify!($ty))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

status_str!(UserStatus { Normal => "normal", Admin => "admin", SuperAdmin => "superadmin" });
status_str!(NamespaceStatus { Public => "public", Private => "private", Internal => "internal" });
status_str!(RepositoryStatus { Public => "public", Private => "private", Archived => "archived" });

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    pub title: String,
    pub description: String,
    pub email: String,
    pub owner: String,
    pub reg_datetime: DateTime<Utc>,
    pub status: NamespaceStatus,
    pub acl: Acl,
    #[serde(skip)]
    pub local_path: PathBuf,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub repositories: BTreeMap<String, Repository>,
}

impl Namespace {
    /// A namespace record with no metadata beyond its name, as produced by
    /// directory scans in plain mode.
    #[must_use]
    pub fn bare(name: &str, local_path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            title: name.to_string(),
            description: String::new(),
            email: String::new(),
            owner: String::new(),
            reg_datetime: Utc::now(),
            status: NamespaceStatus::Public,
            acl: Acl::new(),
            local_path,
            repositories: BTreeMap::new(),
        }
    }
}

/// The kind of version control backing a repository. Git is the only one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    #[default]
    Git,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkOrigin {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub kind: RepositoryKind,
    pub namespace: String,
    pub name: String,
    pub description: String,
    pub acl: Acl,
    pub owner: String,
    pub status: RepositoryStatus,
    #[serde(skip)]
    pub local_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fork_origin: Option<ForkOrigin>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Repository {
    #[must_use]
    pub fn new(namespace: &str, name: &str, owner: &str) -> Self {
        Self {
            kind: RepositoryKind::Git,
            namespace: namespace.to_string(),
            name: name.to_string(),
            description: String::new(),
            acl: Acl::new(),
            owner: owner.to_string(),
            status: RepositoryStatus::Public,
            local_path: PathBuf::new(),
            fork_origin: None,
            labels: Vec::new(),
        }
    }

    /// `namespace:name`, or just `name` when namespaces are off.
    #[must_use]
    pub fn full_name(&self) -> String {
        full_name(&self.namespace, &self.name)
    }
}

#[must_use]
pub fn full_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}:{name}")
    }
}

/// One authenticated web session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub username: String,
    pub session_id: String,
    /// Creation time in milliseconds since the epoch.
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name() {
        assert_eq!(full_name("team", "svc"), "team:svc");
        assert_eq!(full_name("", "svc"), "svc");
        assert_eq!(Repository::new("team", "svc", "alice").full_name(), "team:svc");
    }

    #[test]
    fn test_status_round_trip_strings() {
        assert_eq!("archived".parse::<RepositoryStatus>(), Ok(RepositoryStatus::Archived));
        assert_eq!(NamespaceStatus::Internal.to_string(), "internal");
        assert!("hidden".parse::<RepositoryStatus>().is_err());
    }
}
