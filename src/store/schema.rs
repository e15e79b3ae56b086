/// Table definitions. `{p}` is replaced by the configured table prefix.
const SCHEMA_TEMPLATE: &str = r#"
CREATE TABLE IF NOT EXISTS {p}user (
    user_name TEXT PRIMARY KEY,
    user_title TEXT NOT NULL DEFAULT '',
    user_email TEXT NOT NULL DEFAULT '',
    user_bio TEXT NOT NULL DEFAULT '',
    user_website TEXT NOT NULL DEFAULT '',
    user_password_hash TEXT NOT NULL DEFAULT '',
    user_status TEXT NOT NULL DEFAULT 'normal',
    user_reg_datetime TEXT DEFAULT (datetime('now'))
);

-- SSH keys used to authenticate on the shell path
CREATE TABLE IF NOT EXISTS {p}user_authkey (
    user_name TEXT NOT NULL REFERENCES {p}user(user_name) ON DELETE CASCADE,
    key_name TEXT NOT NULL,
    key_text TEXT NOT NULL,
    PRIMARY KEY (user_name, key_name)
);

CREATE TABLE IF NOT EXISTS {p}user_signkey (
    user_name TEXT NOT NULL REFERENCES {p}user(user_name) ON DELETE CASCADE,
    key_name TEXT NOT NULL,
    key_text TEXT NOT NULL,
    PRIMARY KEY (user_name, key_name)
);

CREATE TABLE IF NOT EXISTS {p}namespace (
    ns_name TEXT PRIMARY KEY,
    ns_title TEXT NOT NULL DEFAULT '',
    ns_description TEXT NOT NULL DEFAULT '',
    ns_email TEXT NOT NULL DEFAULT '',
    ns_owner TEXT NOT NULL,
    ns_reg_datetime TEXT DEFAULT (datetime('now')),
    ns_status TEXT NOT NULL DEFAULT 'public',
    ns_acl TEXT NOT NULL DEFAULT '{}'
);

-- repo_namespace is '' when the instance runs without namespaces
CREATE TABLE IF NOT EXISTS {p}repository (
    repo_type TEXT NOT NULL DEFAULT 'git',
    repo_namespace TEXT NOT NULL,
    repo_name TEXT NOT NULL,
    repo_description TEXT NOT NULL DEFAULT '',
    repo_owner TEXT NOT NULL,
    repo_acl TEXT NOT NULL DEFAULT '{}',
    repo_status TEXT NOT NULL DEFAULT 'public',
    repo_fork_origin_namespace TEXT,
    repo_fork_origin_name TEXT,
    repo_labels TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY (repo_namespace, repo_name)
);

CREATE INDEX IF NOT EXISTS idx_{p}repository_owner ON {p}repository(repo_owner);

CREATE TABLE IF NOT EXISTS {p}issue (
    repo_namespace TEXT NOT NULL,
    repo_name TEXT NOT NULL,
    issue_id INTEGER NOT NULL,
    issue_author TEXT NOT NULL,
    issue_assignee TEXT,
    issue_timestamp INTEGER NOT NULL,
    issue_title TEXT NOT NULL,
    issue_content TEXT NOT NULL DEFAULT '',
    issue_status INTEGER NOT NULL DEFAULT 1,
    issue_priority INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (repo_namespace, repo_name, issue_id)
);

CREATE TABLE IF NOT EXISTS {p}issue_event (
    repo_namespace TEXT NOT NULL,
    repo_name TEXT NOT NULL,
    issue_id INTEGER NOT NULL,
    issue_event_type INTEGER NOT NULL,
    issue_event_timestamp INTEGER NOT NULL,
    issue_event_author TEXT NOT NULL,
    issue_event_content TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_{p}issue_event_issue
    ON {p}issue_event(repo_namespace, repo_name, issue_id);

CREATE TABLE IF NOT EXISTS {p}pull_request (
    repo_namespace TEXT NOT NULL,
    repo_name TEXT NOT NULL,
    pull_request_id INTEGER NOT NULL,
    pull_request_title TEXT NOT NULL,
    pull_request_author TEXT NOT NULL,
    pull_request_timestamp INTEGER NOT NULL,
    receiver_branch TEXT NOT NULL,
    provider_namespace TEXT NOT NULL,
    provider_name TEXT NOT NULL,
    provider_branch TEXT NOT NULL,
    merge_conflict_check_result TEXT,
    merge_conflict_check_timestamp INTEGER,
    pull_request_status INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (repo_namespace, repo_name, pull_request_id)
);

CREATE TABLE IF NOT EXISTS {p}pull_request_event (
    repo_namespace TEXT NOT NULL,
    repo_name TEXT NOT NULL,
    pull_request_id INTEGER NOT NULL,
    event_type INTEGER NOT NULL,
    event_timestamp INTEGER NOT NULL,
    event_author TEXT NOT NULL,
    event_content TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_{p}pull_request_event_pr
    ON {p}pull_request_event(repo_namespace, repo_name, pull_request_id);

CREATE TABLE IF NOT EXISTS {p}webhook_log (
    uuid TEXT PRIMARY KEY,
    repo_namespace TEXT NOT NULL,
    repo_name TEXT NOT NULL,
    webhook_timestamp INTEGER NOT NULL,
    webhook_url TEXT NOT NULL,
    webhook_payload TEXT NOT NULL DEFAULT '',
    webhook_result_code INTEGER,
    webhook_result_message TEXT NOT NULL DEFAULT ''
);
"#;

/// Names of every table the schema creates, without prefix.
pub const TABLES: &[&str] = &[
    "user",
    "user_authkey",
    "user_signkey",
    "namespace",
    "repository",
    "issue",
    "issue_event",
    "pull_request",
    "pull_request_event",
    "webhook_log",
];

#[must_use]
pub fn schema(prefix: &str) -> String {
    SCHEMA_TEMPLATE.replace("{p}", prefix)
}
