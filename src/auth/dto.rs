use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::{
    auth::repo_types::{Role, User},
    error::{AuthError, AuthResult},
};

/// JSON request body whose rejections (syntax, wrong types, missing
/// content type) surface as [`AuthError::Validation`].
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                let reason = rejection.body_text();
                debug!(%reason, "request body rejected");
                Err(AuthError::validation(reason))
            }
        }
    }
}

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub name: String,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub old_password: String,
    #[serde(default)]
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&User> for ProfileResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
            last_login: user.last_login,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityResponse {
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login: Option<OffsetDateTime>,
    pub login_attempts: i32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub lock_until: Option<OffsetDateTime>,
}

impl From<&User> for ActivityResponse {
    fn from(user: &User) -> Self {
        Self {
            last_login: user.last_login,
            login_attempts: user.login_attempts,
            lock_until: user.lock_until,
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// At least 8 characters with a lowercase letter, an uppercase letter, a digit
/// and a symbol.
pub(crate) fn is_strong_password(password: &str) -> bool {
    password.chars().count() >= 8
        && password.chars().any(|c| c.is_lowercase())
        && password.chars().any(|c| c.is_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace())
}

fn check(errors: &mut Vec<String>, ok: bool, message: &str) {
    if !ok {
        errors.push(message.to_string());
    }
}

fn finish(errors: Vec<String>) -> AuthResult<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AuthError::Validation(errors))
    }
}

impl RegisterRequest {
    /// Normalizes the email in place, then validates every field.
    pub fn validate(&mut self) -> AuthResult<()> {
        self.email = normalize_email(&self.email);
        self.name = self.name.trim().to_string();
        let mut errors = Vec::new();
        check(&mut errors, is_valid_email(&self.email), "Valid email is required");
        check(&mut errors, is_strong_password(&self.password), "Password must be strong");
        check(&mut errors, !self.name.is_empty(), "Name is required");
        finish(errors)
    }
}

impl LoginRequest {
    pub fn validate(&mut self) -> AuthResult<()> {
        self.email = normalize_email(&self.email);
        let mut errors = Vec::new();
        check(&mut errors, is_valid_email(&self.email), "Valid email is required");
        check(&mut errors, !self.password.is_empty(), "Password is required");
        finish(errors)
    }
}

impl ChangePasswordRequest {
    pub fn validate(&self) -> AuthResult<()> {
        let mut errors = Vec::new();
        check(&mut errors, !self.old_password.is_empty(), "Old password is required");
        check(
            &mut errors,
            is_strong_password(&self.new_password),
            "New password must be strong",
        );
        finish(errors)
    }
}

impl ForgotPasswordRequest {
    pub fn validate(&mut self) -> AuthResult<()> {
        self.email = normalize_email(&self.email);
        let mut errors = Vec::new();
        check(&mut errors, is_valid_email(&self.email), "Valid email is required");
        finish(errors)
    }
}

impl ResetPasswordRequest {
    pub fn validate(&self) -> AuthResult<()> {
        let mut errors = Vec::new();
        check(&mut errors, is_strong_password(&self.password), "Password must be strong");
        finish(errors)
    }
}
