use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: String,
    pub registered_at: Option<DateTime<Utc>>,
    /// True for the session making the request.
    pub current: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NamespaceView {
    pub name: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Repositories the viewer may pull, by name.
    pub repositories: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RepositoryView {
    pub namespace: String,
    pub name: String,
    pub full_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clone_url: Option<String>,
}
