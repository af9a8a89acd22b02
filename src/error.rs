use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::auth::repo::StoreError;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("validation failed")]
    Validation(Vec<String>),
    #[error("Email already in use")]
    EmailTaken,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Account locked due to multiple failed attempts. Try later.")]
    Locked,
    #[error("Authentication required")]
    AuthenticationRequired,
    #[error("Invalid or expired token")]
    InvalidSession,
    #[error("Invalid or expired token")]
    ExpiredSession,
    #[error("Session expired. Please login again.")]
    StaleSession,
    #[error("Forbidden: insufficient privileges")]
    Forbidden,
    #[error("Old password incorrect")]
    OldPasswordMismatch,
    #[error("Invalid or expired password reset token")]
    InvalidOrExpiredResetToken,
    #[error("Too many requests, please try again later.")]
    RateLimited,
    #[error("Account was modified concurrently, please retry")]
    ConcurrentModification,
    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AuthError::EmailTaken | AuthError::ConcurrentModification => StatusCode::CONFLICT,
            AuthError::InvalidCredentials
            | AuthError::AuthenticationRequired
            | AuthError::InvalidSession
            | AuthError::ExpiredSession
            | AuthError::StaleSession => StatusCode::UNAUTHORIZED,
            AuthError::Locked => StatusCode::LOCKED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::OldPasswordMismatch | AuthError::InvalidOrExpiredResetToken => {
                StatusCode::BAD_REQUEST
            }
            AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AuthError::Validation(vec![message.into()])
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::EmailTaken => AuthError::EmailTaken,
            StoreError::Concurrency => AuthError::ConcurrentModification,
            StoreError::Database(e) => AuthError::Internal(anyhow::Error::new(e).context("store")),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AuthError::Validation(errors) => json!({ "error": self.to_string(), "errors": errors }),
            AuthError::Internal(err) => {
                tracing::error!(error = ?err, "internal error");
                if cfg!(debug_assertions) {
                    json!({ "error": self.to_string(), "detail": format!("{err:?}") })
                } else {
                    json!({ "error": self.to_string() })
                }
            }
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
