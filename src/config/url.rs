//! Normalisation of the two externally visible addresses: the web URL and the
//! prefix users prepend to a repository name to clone it over SSH.

/// Canonical web URL: scheme present (defaulting to `http://`), no trailing
/// slash. Empty stays empty.
#[must_use]
pub fn proper_host_name(host_name: &str) -> String {
    let host = host_name.trim();
    if host.is_empty() {
        return String::new();
    }

    let with_scheme = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    };

    with_scheme.trim_end_matches('/').to_string()
}

struct SshAddress<'a> {
    host: &'a str,
    port: &'a str,
    path: &'a str,
}

fn parse_ssh_address(raw: &str) -> Option<SshAddress<'_>> {
    let raw = raw.trim();
    let without_scheme = match raw.split_once("://") {
        Some((_, rest)) => rest,
        None => raw,
    };

    let (authority, path) = match without_scheme.find('/') {
        Some(idx) => without_scheme.split_at(idx),
        None => (without_scheme, ""),
    };

    // Any userinfo is replaced by the configured git user.
    let host_port = match authority.rsplit_once('@') {
        Some((_, rest)) => rest,
        None => authority,
    };

    let (host, port) = if let Some(rest) = host_port.strip_prefix('[') {
        let (v6, after) = rest.split_once(']')?;
        let port = after.strip_prefix(':').unwrap_or("");
        (&host_port[..v6.len() + 2], port)
    } else {
        match host_port.rsplit_once(':') {
            Some((h, p)) if p.chars().all(|c| c.is_ascii_digit()) => (h, p),
            Some(_) => return None,
            None => (host_port, ""),
        }
    };

    if host.is_empty() {
        return None;
    }

    Some(SshAddress {
        host,
        port,
        path: path.trim_end_matches('/'),
    })
}

/// Clone prefix such that `prefix + full_name` is a valid clone address.
///
/// On the default port the scp-like form `user@host:` is used; any other port
/// needs the full `ssh://user@host:port/` URL.
#[must_use]
pub fn clone_ssh_prefix(ssh_host_name: &str, git_user: &str) -> String {
    let Some(addr) = parse_ssh_address(ssh_host_name) else {
        return String::new();
    };

    if addr.port.is_empty() || addr.port == "22" {
        format!("{git_user}@{}:", addr.host)
    } else {
        format!(
            "ssh://{git_user}@{}:{}{}/",
            addr.host, addr.port, addr.path
        )
    }
}
