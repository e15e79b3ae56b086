//! Allow/deny decisions per user, intent and repository.

use crate::error::{Error, Result};
use crate::simple::{SimpleConfig, Verdict, Visibility};
use crate::types::{Namespace, NamespaceStatus, Permission, Repository, RepositoryStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Pull,
    Push,
    /// Viewing the administrative pages of a repository or namespace.
    AdminRead,
    /// An administrative change that needs the given grant.
    AdminWrite(Permission),
}

impl Intent {
    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(self, Self::Push | Self::AdminWrite(_))
    }
}

/// Normal-mode decision. `user` is `None` for anonymous requests; the
/// namespace is `None` when namespaces are disabled.
pub fn check(
    user: Option<&str>,
    repo: &Repository,
    namespace: Option<&Namespace>,
    intent: Intent,
) -> Result<()> {
    if intent == Intent::Push && repo.status == RepositoryStatus::Archived {
        return Err(Error::ArchivedRepository);
    }

    let Some(user) = user else {
        return if intent == Intent::Pull && publicly_readable(repo, namespace, false) {
            Ok(())
        } else {
            Err(Error::permission_denied())
        };
    };

    if repo.owner == user || namespace.is_some_and(|ns| ns.owner == user) {
        return Ok(());
    }

    let grant = repo
        .acl
        .get(user)
        .or_else(|| namespace.and_then(|ns| ns.acl.get(user)));

    let allowed = match intent {
        Intent::Push => grant.is_some_and(|p| p.has(Permission::PUSH_TO_REPOSITORY)),
        Intent::Pull => grant.is_some() || publicly_readable(repo, namespace, true),
        Intent::AdminRead => grant.is_some_and(Permission::is_administrative),
        Intent::AdminWrite(required) => grant.is_some_and(|p| p.has(required)),
    };

    if allowed {
        Ok(())
    } else {
        Err(Error::permission_denied())
    }
}

/// Whether `user` may see a namespace page at all.
pub fn check_namespace(user: Option<&str>, namespace: &Namespace) -> Result<()> {
    let allowed = match (namespace.status, user) {
        (NamespaceStatus::Public, _) => true,
        (_, None) => false,
        (NamespaceStatus::Internal, Some(_)) => true,
        (NamespaceStatus::Private, Some(user)) => {
            namespace.owner == user || namespace.acl.contains(user)
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(Error::permission_denied())
    }
}

fn publicly_readable(repo: &Repository, namespace: Option<&Namespace>, authenticated: bool) -> bool {
    if repo.status == RepositoryStatus::Private {
        return false;
    }
    match namespace.map(|ns| ns.status) {
        None | Some(NamespaceStatus::Public) => true,
        Some(NamespaceStatus::Internal) => authenticated,
        Some(NamespaceStatus::Private) => false,
    }
}

/// Simple-mode decision. The repository's `users` table is consulted
/// first, then the namespace's. Anyone not listed may pull a public
/// repository and nothing else.
pub fn check_simple(
    user: Option<&str>,
    repo: &SimpleConfig,
    namespace: Option<&SimpleConfig>,
    intent: Intent,
) -> Result<()> {
    let rule = user.and_then(|u| {
        repo.users
            .get(u)
            .or_else(|| namespace.and_then(|ns| ns.users.get(u)))
    });

    let verdict = match (rule, intent) {
        (Some(rule), Intent::Push) => rule.push_verdict(),
        (Some(rule), Intent::Pull) => rule.pull_verdict(),
        (None, Intent::Pull) if repo.repo.visibility == Visibility::Public => Verdict::Allow,
        _ => Verdict::Disallow,
    };

    match verdict {
        Verdict::Allow => Ok(()),
        Verdict::Disallow => Err(Error::permission_denied()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simple::UserRule;
    use crate::types::Acl;

    fn repo(status: RepositoryStatus) -> Repository {
        let mut repo = Repository::new("team", "svc", "alice");
        repo.status = status;
        repo
    }

    fn namespace(status: NamespaceStatus) -> Namespace {
        Namespace {
            owner: "nora".to_string(),
            status,
            ..Namespace::bare("team", Default::default())
        }
    }

    fn denied(result: Result<()>) -> bool {
        matches!(result, Err(Error::PermissionDenied(_)))
    }

    #[test]
    fn test_owner_wins() {
        let r = repo(RepositoryStatus::Private);
        let ns = namespace(NamespaceStatus::Private);
        for intent in [Intent::Pull, Intent::Push, Intent::AdminRead, Intent::AdminWrite(Permission::EDIT_HOOKS)] {
            assert!(check(Some("alice"), &r, Some(&ns), intent).is_ok());
            assert!(check(Some("nora"), &r, Some(&ns), intent).is_ok());
        }
    }

    #[test]
    fn test_push_to_archived_is_refused_even_when_granted() {
        let mut r = repo(RepositoryStatus::Archived);
        r.acl = Acl::new().with("bob", Permission::ALL);

        assert!(matches!(
            check(Some("bob"), &r, None, Intent::Push),
            Err(Error::ArchivedRepository)
        ));
        assert!(matches!(
            check(Some("alice"), &r, None, Intent::Push),
            Err(Error::ArchivedRepository)
        ));
        assert!(check(Some("bob"), &r, None, Intent::Pull).is_ok());
    }

    #[test]
    fn test_unlisted_user_is_denied() {
        let r = repo(RepositoryStatus::Private);
        let ns = namespace(NamespaceStatus::Public);
        assert!(denied(check(Some("mallory"), &r, Some(&ns), Intent::Pull)));
        assert!(denied(check(Some("mallory"), &r, Some(&ns), Intent::Push)));
        assert!(denied(check(Some("mallory"), &r, Some(&ns), Intent::AdminRead)));
    }

    #[test]
    fn test_namespace_acl_is_the_fallback() {
        let r = repo(RepositoryStatus::Public);
        let mut ns = namespace(NamespaceStatus::Public);
        ns.acl = Acl::new().with("bob", Permission::PUSH_TO_REPOSITORY);
        assert!(check(Some("bob"), &r, Some(&ns), Intent::Push).is_ok());

        // A repository entry shadows the namespace entry.
        let mut r = r;
        r.acl = Acl::new().with("bob", Permission::EDIT_INFO);
        assert!(denied(check(Some("bob"), &r, Some(&ns), Intent::Push)));
        assert!(check(Some("bob"), &r, Some(&ns), Intent::AdminRead).is_ok());
    }

    #[test]
    fn test_admin_intents() {
        let mut r = repo(RepositoryStatus::Public);
        r.acl = Acl::new()
            .with("pusher", Permission::PUSH_TO_REPOSITORY)
            .with("editor", Permission::EDIT_INFO);

        assert!(denied(check(Some("pusher"), &r, None, Intent::AdminRead)));
        assert!(check(Some("editor"), &r, None, Intent::AdminRead).is_ok());
        assert!(check(Some("editor"), &r, None, Intent::AdminWrite(Permission::EDIT_INFO)).is_ok());
        assert!(denied(check(
            Some("editor"),
            &r,
            None,
            Intent::AdminWrite(Permission::DELETE_REPOSITORY)
        )));
    }

    #[test]
    fn test_pull_visibility() {
        let public = repo(RepositoryStatus::Public);
        assert!(check(None, &public, Some(&namespace(NamespaceStatus::Public)), Intent::Pull).is_ok());
        assert!(denied(check(None, &public, Some(&namespace(NamespaceStatus::Internal)), Intent::Pull)));
        assert!(check(Some("bob"), &public, Some(&namespace(NamespaceStatus::Internal)), Intent::Pull).is_ok());
        assert!(denied(check(Some("bob"), &public, Some(&namespace(NamespaceStatus::Private)), Intent::Pull)));
        assert!(denied(check(None, &public, None, Intent::Push)));
    }

    #[test]
    fn test_namespace_pages() {
        let mut ns = namespace(NamespaceStatus::Private);
        ns.acl = Acl::new().with("bob", Permission::EDIT_INFO);
        assert!(check_namespace(Some("nora"), &ns).is_ok());
        assert!(check_namespace(Some("bob"), &ns).is_ok());
        assert!(denied(check_namespace(Some("mallory"), &ns)));

        let internal = namespace(NamespaceStatus::Internal);
        assert!(check_namespace(Some("mallory"), &internal).is_ok());
        assert!(denied(check_namespace(None, &internal)));
        assert!(check_namespace(None, &namespace(NamespaceStatus::Public)).is_ok());
    }

    fn simple(users: &[(&str, UserRule)], visibility: Visibility) -> SimpleConfig {
        let mut config = SimpleConfig::default();
        config.repo.visibility = visibility;
        for (name, rule) in users {
            config.users.insert(name.to_string(), rule.clone());
        }
        config
    }

    #[test]
    fn test_simple_verdicts() {
        let disallow = UserRule::default();
        let reader = UserRule {
            default: Verdict::Disallow,
            push: None,
            pull: Some(Verdict::Allow),
        };
        let writer = UserRule {
            default: Verdict::Allow,
            push: None,
            pull: None,
        };
        let repo = simple(&[("bob", disallow), ("rita", reader)], Visibility::Public);
        let ns = simple(&[("walt", writer)], Visibility::Private);

        assert!(denied(check_simple(Some("bob"), &repo, Some(&ns), Intent::Pull)));
        assert!(denied(check_simple(Some("bob"), &repo, Some(&ns), Intent::Push)));
        assert!(check_simple(Some("rita"), &repo, Some(&ns), Intent::Pull).is_ok());
        assert!(denied(check_simple(Some("rita"), &repo, Some(&ns), Intent::Push)));
        assert!(check_simple(Some("walt"), &repo, Some(&ns), Intent::Push).is_ok());

        assert!(check_simple(Some("stranger"), &repo, Some(&ns), Intent::Pull).is_ok());
        assert!(denied(check_simple(Some("stranger"), &repo, Some(&ns), Intent::Push)));

        let private = simple(&[], Visibility::Private);
        assert!(denied(check_simple(Some("stranger"), &private, None, Intent::Pull)));
    }
}
