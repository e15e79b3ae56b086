use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Permission represents the set of grants a user holds on a namespace or
/// repository, stored as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(u32);

impl Permission {
    pub const ADD_MEMBER: Permission = Permission(1 << 0); // 1
    pub const DELETE_MEMBER: Permission = Permission(1 << 1); // 2
    pub const EDIT_MEMBER: Permission = Permission(1 << 2); // 4
    pub const EDIT_INFO: Permission = Permission(1 << 3); // 8
    pub const ADD_REPOSITORY: Permission = Permission(1 << 4); // 16
    pub const PUSH_TO_REPOSITORY: Permission = Permission(1 << 5); // 32
    pub const ARCHIVE_REPOSITORY: Permission = Permission(1 << 6); // 64
    pub const DELETE_REPOSITORY: Permission = Permission(1 << 7); // 128
    pub const EDIT_HOOKS: Permission = Permission(1 << 8); // 256

    /// Every grant except push; holding any one of these opens the
    /// administrative views.
    pub const ADMINISTRATIVE: Permission = Permission(
        Self::ADD_MEMBER.0
            | Self::DELETE_MEMBER.0
            | Self::EDIT_MEMBER.0
            | Self::EDIT_INFO.0
            | Self::ADD_REPOSITORY.0
            | Self::ARCHIVE_REPOSITORY.0
            | Self::DELETE_REPOSITORY.0
            | Self::EDIT_HOOKS.0,
    );

    pub const ALL: Permission = Permission(Self::ADMINISTRATIVE.0 | Self::PUSH_TO_REPOSITORY.0);

    const NAMES: [(Permission, &'static str); 9] = [
        (Self::ADD_MEMBER, "addMember"),
        (Self::DELETE_MEMBER, "deleteMember"),
        (Self::EDIT_MEMBER, "editMember"),
        (Self::EDIT_INFO, "editInfo"),
        (Self::ADD_REPOSITORY, "addRepository"),
        (Self::PUSH_TO_REPOSITORY, "pushToRepository"),
        (Self::ARCHIVE_REPOSITORY, "archiveRepository"),
        (Self::DELETE_REPOSITORY, "deleteRepository"),
        (Self::EDIT_HOOKS, "editHooks"),
    ];

    pub const fn new(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if this permission bitmask contains the required permission.
    #[must_use]
    pub const fn has(self, required: Permission) -> bool {
        self.0 & required.0 == required.0
    }

    /// Returns true if any bit of `other` is present.
    #[must_use]
    pub const fn intersects(self, other: Permission) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub const fn union(self, other: Permission) -> Permission {
        Permission(self.0 | other.0)
    }

    #[must_use]
    pub const fn difference(self, other: Permission) -> Permission {
        Permission(self.0 & !other.0)
    }

    #[must_use]
    pub const fn is_administrative(self) -> bool {
        self.intersects(Self::ADMINISTRATIVE)
    }

    /// Converts a grant name to its bitmask value.
    pub fn parse(s: &str) -> Option<Permission> {
        Self::NAMES
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(p, _)| *p)
    }

    pub fn parse_many(strs: &[&str]) -> Option<Permission> {
        let mut result = Permission::default();
        for s in strs {
            result = result.union(Self::parse(s)?);
        }
        Some(result)
    }

    #[must_use]
    pub fn to_strings(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(p, _)| self.has(*p))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_strings().join(", "))
    }
}

impl From<u32> for Permission {
    fn from(bits: u32) -> Self {
        Self::new(bits)
    }
}

impl From<Permission> for u32 {
    fn from(p: Permission) -> Self {
        p.0
    }
}

/// Access control list: username to grants. A user missing from the table
/// holds nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Acl(BTreeMap<String, Permission>);

impl Acl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, username: &str) -> Option<Permission> {
        self.0.get(username).copied()
    }

    pub fn contains(&self, username: &str) -> bool {
        self.0.contains_key(username)
    }

    pub fn set(&mut self, username: impl Into<String>, permission: Permission) {
        self.0.insert(username.into(), permission);
    }

    pub fn remove(&mut self, username: &str) -> Option<Permission> {
        self.0.remove(username)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Permission)> {
        self.0.iter()
    }

    #[must_use]
    pub fn with(mut self, username: impl Into<String>, permission: Permission) -> Self {
        self.set(username, permission);
        self
    }
}
