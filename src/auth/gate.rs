use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::{
    auth::{
        claims::Claims,
        jwt::verify_session,
        repo_types::{Role, User},
    },
    error::{AuthError, AuthResult},
    state::AppState,
};

/// Empty `required` means any authenticated user.
pub fn authorize(role: Role, required: &[Role]) -> AuthResult<()> {
    if required.is_empty() || required.contains(&role) {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}

/// State for [`role_gate`]: the app state plus the roles a route accepts.
#[derive(Clone)]
pub struct RoleGate {
    pub state: AppState,
    pub roles: &'static [Role],
}

impl RoleGate {
    pub fn any(state: AppState) -> Self {
        Self { state, roles: &[] }
    }

    pub fn only(state: AppState, roles: &'static [Role]) -> Self {
        Self { state, roles }
    }
}

/// The authenticated caller, as loaded when the session was verified.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub claims: Claims,
}

fn bearer_token(parts: &Parts) -> AuthResult<&str> {
    let header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::AuthenticationRequired)?;

    header
        .strip_prefix("Bearer ")
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::AuthenticationRequired)
}

async fn authenticate(parts: &Parts, state: &AppState) -> AuthResult<AuthUser> {
    let token = bearer_token(parts)?;
    let (user, claims) = verify_session(state, token).await?;
    Ok(AuthUser { user, claims })
}

/// Verifies the bearer session, checks the role set, and hands the caller to
/// downstream handlers through the request extensions.
pub async fn role_gate(State(gate): State<RoleGate>, req: Request, next: Next) -> Response {
    let (mut parts, body) = req.into_parts();

    let auth = match authenticate(&parts, &gate.state).await {
        Ok(auth) => auth,
        Err(e) => return e.into_response(),
    };

    if let Err(e) = authorize(auth.user.role, gate.roles) {
        warn!(user_id = %auth.user.id, role = auth.user.role.as_str(), "insufficient role");
        return e.into_response();
    }

    parts.extensions.insert(auth);
    next.run(Request::from_parts(parts, body)).await
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(auth) = parts.extensions.get::<AuthUser>() {
            return Ok(auth.clone());
        }
        authenticate(parts, state).await
    }
}
