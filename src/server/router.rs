use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{
    Router,
    routing::{delete, get, post},
};

use super::browse::{get_namespace, get_repository};
use super::response::{ApiError, notice};
use super::sessions::{list_sessions, login, logout, revoke_session};
use crate::auth::{Argon2Hasher, Viewer};
use crate::config::Config;
use crate::error::Error;
use crate::session::SessionStore;
use crate::simple::SimpleCache;
use crate::store::Store;
use crate::visibility;

pub struct AppState {
    pub config: Config,
    /// Present in normal mode only.
    pub store: Option<Arc<dyn Store>>,
    pub sessions: Arc<dyn SessionStore>,
    /// Populated in simple mode.
    pub simple: SimpleCache,
    pub hasher: Argon2Hasher,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: Config,
        store: Option<Arc<dyn Store>>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            config,
            store,
            sessions,
            simple: SimpleCache::new(),
            hasher: Argon2Hasher::new(),
        }
    }

    /// The metadata store, or a refusal when the instance does not keep
    /// accounts.
    pub fn store(&self) -> Result<&dyn Store, ApiError> {
        self.store
            .as_deref()
            .ok_or_else(|| ApiError::forbidden(format!("Not available in {} mode", self.config.mode)))
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

/// Resolves the session cookie and applies the instance-wide visibility
/// gate before any handler runs.
async fn gate_request(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let viewer = Viewer::resolve(state.sessions.as_ref(), request.headers());

    if let Err(e) = visibility::gate(&state.config, viewer.username()) {
        let message = match e {
            Error::PermissionDenied(message) => message,
            e => e.to_string(),
        };
        tracing::debug!(
            "Gate refused {} for {}",
            request.uri().path(),
            viewer.username().unwrap_or("anonymous")
        );
        return notice(&message);
    }

    request.extensions_mut().insert(viewer);
    next.run(request).await
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let gated = Router::new()
        .route("/api/v1/logout", post(logout))
        .route("/api/v1/sessions", get(list_sessions))
        .route("/api/v1/sessions/{sid}", delete(revoke_session))
        .route("/api/v1/namespaces/{ns}", get(get_namespace))
        .route("/api/v1/repos/{ns}/{repo}", get(get_repository))
        .route_layer(middleware::from_fn_with_state(state.clone(), gate_request));

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/login", post(login))
        .merge(gated)
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
