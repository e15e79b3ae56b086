mod codes;
pub mod keys;
mod middleware;
mod password;

pub use codes::CodeCache;
pub use keys::{KeyStore, fingerprint};
pub use middleware::{
    AuthError, RequireSession, SESSION_COOKIE, SessionPrincipal, Viewer, clear_session_cookie,
    session_cookie, session_from_headers,
};
pub use password::{Argon2Hasher, generate_session_id, random_token};
