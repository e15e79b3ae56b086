use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::DateTime;

use crate::auth::{RequireSession, clear_session_cookie, generate_session_id, session_cookie};
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::{LoginRequest, LoginResponse, SessionView};
use crate::server::response::{ApiError, ApiResponse, notice};
use crate::visibility;

fn invalid_credentials() -> ApiError {
    ApiError::unauthorized("Invalid username or password")
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let store = state.store()?;

    let user = match store.get_user(&req.username) {
        Ok(user) => user,
        Err(Error::NotFound(_)) => return Err(invalid_credentials()),
        Err(e) => return Err(e.into()),
    };
    if user.password_hash.is_empty() || !state.hasher.verify(&req.password, &user.password_hash)? {
        tracing::warn!("Failed login for {}", req.username);
        return Err(invalid_credentials());
    }

    if let Err(Error::PermissionDenied(message)) = visibility::gate(&state.config, Some(&user.name)) {
        tracing::warn!("Refused login for {} by global visibility", user.name);
        return Ok(notice(&message));
    }

    let session_id = generate_session_id();
    state.sessions.register_session(&user.name, &session_id)?;
    tracing::info!("{} signed in", user.name);

    Ok((
        [(header::SET_COOKIE, session_cookie(&user.name, &session_id))],
        ApiResponse::success(LoginResponse { username: user.name }),
    )
        .into_response())
}

pub async fn logout(
    RequireSession(principal): RequireSession,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .sessions
        .revoke_session(&principal.username, &principal.session_id)?;

    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_session_cookie())],
    ))
}

pub async fn list_sessions(
    RequireSession(principal): RequireSession,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.sessions.retrieve_session(&principal.username)?;

    let views: Vec<SessionView> = sessions
        .into_iter()
        .map(|s| SessionView {
            current: s.session_id == principal.session_id,
            registered_at: DateTime::from_timestamp_millis(s.timestamp),
            session_id: s.session_id,
        })
        .collect();

    Ok(ApiResponse::success(views))
}

pub async fn revoke_session(
    RequireSession(principal): RequireSession,
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .sessions
        .revoke_session(&principal.username, &session_id)?;
    Ok(StatusCode::NO_CONTENT)
}
