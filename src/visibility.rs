//! Instance-wide visibility gate, evaluated before any ACL.

use crate::config::{Config, GlobalVisibility};
use crate::error::{Error, Result};

/// Lets the request through to the ACL engine, or refuses it with the
/// configured notice.
///
/// | mode        | anonymous | signed in | full-access user |
/// |-------------|-----------|-----------|------------------|
/// | public      | ACL       | ACL       | ACL              |
/// | private     | notice    | ACL       | ACL              |
/// | shutdown    | notice    | notice    | ACL              |
/// | maintenance | notice    | notice    | notice           |
pub fn gate(config: &Config, user: Option<&str>) -> Result<()> {
    let notice = match config.global_visibility {
        GlobalVisibility::Public => return Ok(()),
        GlobalVisibility::Private => match user {
            Some(_) => return Ok(()),
            None => &config.private_notice_message,
        },
        GlobalVisibility::Shutdown => match user {
            Some(u) if config.is_full_access_user(u) => return Ok(()),
            _ => &config.shutdown_message,
        },
        GlobalVisibility::Maintenance => &config.maintenance_message,
    };

    Err(Error::PermissionDenied(notice.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: GlobalVisibility) -> Config {
        Config {
            global_visibility: mode,
            full_access_user: vec!["alice".to_string()],
            private_notice_message: "private".to_string(),
            shutdown_message: "shut".to_string(),
            maintenance_message: "maint".to_string(),
            ..Config::default()
        }
    }

    fn notice(result: Result<()>) -> Option<String> {
        match result {
            Ok(()) => None,
            Err(Error::PermissionDenied(m)) => Some(m),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_gate_table() {
        let cases = [
            (GlobalVisibility::Public, [None, None, None]),
            (GlobalVisibility::Private, [Some("private"), None, None]),
            (GlobalVisibility::Shutdown, [Some("shut"), Some("shut"), None]),
            (GlobalVisibility::Maintenance, [Some("maint"), Some("maint"), Some("maint")]),
        ];

        for (mode, expected) in cases {
            let config = config(mode);
            let got = [
                notice(gate(&config, None)),
                notice(gate(&config, Some("bob"))),
                notice(gate(&config, Some("alice"))),
            ];
            let expected = expected.map(|e| e.map(str::to_string));
            assert_eq!(got, expected, "{mode:?}");
        }
    }
}
