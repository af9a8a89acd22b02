use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, patch, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            ActivityResponse, ChangePasswordRequest, ForgotPasswordRequest, JsonBody,
            LoginRequest, MessageResponse, ProfileResponse, RegisterRequest, ResetPasswordRequest,
            TokenResponse,
        },
        gate::{role_gate, AuthUser, RoleGate},
        reset, services,
    },
    error::AuthResult,
    rate_limit::rate_limit,
    state::AppState,
};

pub fn auth_routes(state: &AppState) -> Router<AppState> {
    let limited = Router::new()
        .route("/login", post(login))
        .route("/forgot", post(forgot_password))
        .route_layer(middleware::from_fn_with_state(
            state.limiter.clone(),
            rate_limit,
        ));

    Router::new()
        .route("/register", post(register))
        .route("/reset/:token", post(reset_password))
        .merge(limited)
}

pub fn session_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me))
        .route("/password", patch(change_password))
        .route("/activity", get(get_activity))
        .route_layer(middleware::from_fn_with_state(
            RoleGate::any(state.clone()),
            role_gate,
        ))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(mut payload): JsonBody<RegisterRequest>,
) -> AuthResult<(StatusCode, Json<MessageResponse>)> {
    payload.validate()?;
    services::register(&state, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("User registered successfully")),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(mut payload): JsonBody<LoginRequest>,
) -> AuthResult<Json<TokenResponse>> {
    payload.validate()?;
    let token = services::login(&state, payload).await?;
    Ok(Json(TokenResponse { token }))
}

#[instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn get_me(auth: AuthUser) -> Json<ProfileResponse> {
    Json(ProfileResponse::from(&auth.user))
}

#[instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthUser,
    JsonBody(payload): JsonBody<ChangePasswordRequest>,
) -> AuthResult<Json<MessageResponse>> {
    payload.validate()?;
    services::change_password(&state, auth.user, payload).await?;
    Ok(Json(MessageResponse::new("Password updated successfully")))
}

#[instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn get_activity(auth: AuthUser) -> Json<ActivityResponse> {
    Json(ActivityResponse::from(&auth.user))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    JsonBody(mut payload): JsonBody<ForgotPasswordRequest>,
) -> AuthResult<Json<MessageResponse>> {
    payload.validate()?;
    let message = reset::issue(&state, &payload.email).await?;
    Ok(Json(MessageResponse::new(message)))
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    JsonBody(payload): JsonBody<ResetPasswordRequest>,
) -> AuthResult<Json<MessageResponse>> {
    payload.validate()?;
    reset::consume(&state, &token, &payload.password).await?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}
