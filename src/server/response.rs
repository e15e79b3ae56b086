use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::error::Error;

/// Seconds before a notice page sends the browser back to `/`.
const NOTICE_REFRESH_SECS: u32 = 5;

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    #[must_use]
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// API error that converts to a proper HTTP response
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound(what) => Self::not_found(capitalise(&format!("{what} not found"))),
            Error::BadPath(_)
            | Error::InvalidCommand(_)
            | Error::InvalidKey(_)
            | Error::InvalidPassword(_) => {
                Self::bad_request(e.to_string())
            }
            Error::AlreadyExists(_) => Self {
                status: StatusCode::CONFLICT,
                message: e.to_string(),
            },
            Error::PermissionDenied(message) => Self::forbidden(message),
            Error::ArchivedRepository => Self::forbidden(e.to_string()),
            e => {
                tracing::error!("Request failed: {}", e);
                Self::internal("Internal server error")
            }
        }
    }
}

fn capitalise(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "data": null, "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

/// A refusal from the visibility gate: plain text that sends the browser
/// home after a few seconds.
#[must_use]
pub fn notice(message: &str) -> Response {
    (
        StatusCode::FORBIDDEN,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::REFRESH, format!("{NOTICE_REFRESH_SECS}; url=/")),
        ],
        message.to_string(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_statuses() {
        let cases = [
            (Error::NotFound("repository"), StatusCode::NOT_FOUND, "Repository not found"),
            (Error::BadPath("x".into()), StatusCode::BAD_REQUEST, "invalid repository path: x"),
            (Error::permission_denied(), StatusCode::FORBIDDEN, "Not enough permission"),
            (Error::ArchivedRepository, StatusCode::FORBIDDEN, "Repository is archived"),
            (Error::Fatal("disk on fire".into()), StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        ];

        for (error, status, message) in cases {
            let api = ApiError::from(error);
            assert_eq!(api.status, status);
            assert_eq!(api.message, message);
        }
    }

    #[test]
    fn test_notice_headers() {
        let response = notice("Down for maintenance");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()[header::REFRESH], "5; url=/");
    }
}
