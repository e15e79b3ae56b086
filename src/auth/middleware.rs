use std::convert::Infallible;

use axum::{
    Json,
    extract::FromRequestParts,
    http::{HeaderMap, StatusCode, header::COOKIE, request::Parts},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::session::SessionStore;

pub const SESSION_COOKIE: &str = "gitus_session";

/// A verified web session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPrincipal {
    pub username: String,
    pub session_id: String,
}

/// Who is making the request. Resolved once per request by the server's
/// gate layer and stored in the request extensions.
#[derive(Debug, Clone, Default)]
pub struct Viewer(pub Option<SessionPrincipal>);

impl Viewer {
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.0.as_ref().map(|p| p.username.as_str())
    }

    /// Looks the session cookie up in `sessions`. Anything that does not
    /// verify, including a backend failure, is an anonymous viewer.
    pub fn resolve(sessions: &dyn SessionStore, headers: &HeaderMap) -> Self {
        let Some((username, session_id)) = session_from_headers(headers) else {
            return Self(None);
        };

        match sessions.verify_session(&username, &session_id) {
            Ok(true) => Self(Some(SessionPrincipal {
                username,
                session_id,
            })),
            Ok(false) => Self(None),
            Err(e) => {
                tracing::warn!("Session lookup for {} failed: {}", username, e);
                Self(None)
            }
        }
    }
}

/// `(username, session id)` from the session cookie.
#[must_use]
pub fn session_from_headers(headers: &HeaderMap) -> Option<(String, String)> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| value.split_once(':'))
        .filter(|(user, sid)| !user.is_empty() && !sid.is_empty())
        .map(|(user, sid)| (user.to_string(), sid.to_string()))
}

/// `Set-Cookie` value establishing a session.
#[must_use]
pub fn session_cookie(username: &str, session_id: &str) -> String {
    format!("{SESSION_COOKIE}={username}:{session_id}; Path=/; HttpOnly; SameSite=Lax")
}

/// `Set-Cookie` value dropping the session.
#[must_use]
pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Extractor that requires a signed-in user.
pub struct RequireSession(pub SessionPrincipal);

#[derive(Debug)]
pub enum AuthError {
    MissingSession,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingSession => (StatusCode::UNAUTHORIZED, "Authentication required"),
        };

        let body = json!({ "data": null, "error": message });
        (status, Json(body)).into_response()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Viewer {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Viewer>().cloned().unwrap_or_default())
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequireSession {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Viewer>()
            .and_then(|v| v.0.clone())
            .map(RequireSession)
            .ok_or(AuthError::MissingSession)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;
    use axum::http::HeaderValue;

    fn headers(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    #[test]
    fn test_cookie_parsing() {
        assert_eq!(
            session_from_headers(&headers("theme=dark; gitus_session=alice:abc123")),
            Some(("alice".to_string(), "abc123".to_string()))
        );
        assert_eq!(session_from_headers(&headers("gitus_session=alice")), None);
        assert_eq!(session_from_headers(&headers("gitus_session=:abc")), None);
        assert_eq!(session_from_headers(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_viewer_requires_live_session() {
        let sessions = MemorySessionStore::new("test");
        sessions.register_session("alice", "abc123").unwrap();

        let viewer = Viewer::resolve(&sessions, &headers("gitus_session=alice:abc123"));
        assert_eq!(viewer.username(), Some("alice"));

        let forged = Viewer::resolve(&sessions, &headers("gitus_session=alice:zzz"));
        assert_eq!(forged.username(), None);

        sessions.revoke_session("alice", "abc123").unwrap();
        let revoked = Viewer::resolve(&sessions, &headers("gitus_session=alice:abc123"));
        assert_eq!(revoked.username(), None);
    }
}
