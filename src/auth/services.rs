use tracing::{info, warn};

use crate::{
    auth::{
        dto::{ChangePasswordRequest, LoginRequest, RegisterRequest},
        lockout::{Decision, LoginState},
        repo::StoreError,
        repo_types::{NewUser, User},
    },
    error::{AuthError, AuthResult},
    state::AppState,
};

/// Expects a validated request.
pub async fn register(state: &AppState, req: RegisterRequest) -> AuthResult<User> {
    if state.store.find_by_email(&req.email).await?.is_some() {
        warn!(email = %req.email, "email already registered");
        return Err(AuthError::EmailTaken);
    }

    let password_hash = state.hasher.hash(&req.password).await?;
    let user = state
        .store
        .create(
            NewUser {
                email: req.email,
                password_hash,
                name: req.name,
            },
            state.clock.now(),
        )
        .await?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(user)
}

/// Runs the lockout policy around password verification and returns a
/// session token on success. Unknown emails and wrong passwords produce the
/// same error after the same amount of hashing work.
pub async fn login(state: &AppState, req: LoginRequest) -> AuthResult<String> {
    let now = state.clock.now();

    let Some(mut user) = state.store.find_by_email(&req.email).await? else {
        state.hasher.verify_dummy(&req.password).await?;
        warn!(email = %req.email, "login for unknown email");
        return Err(AuthError::InvalidCredentials);
    };

    let current = LoginState::of(&user);
    if let Some(until) = state.lockout.locked_until(&current, now) {
        warn!(user_id = %user.id, %until, "login attempt while locked");
        return Err(AuthError::Locked);
    }

    let matched = state.hasher.verify(&req.password, &user.password_hash).await?;

    match state.lockout.evaluate(current, now, matched) {
        Decision::Locked { .. } => Err(AuthError::Locked),
        Decision::Failed { next, locked_now } => {
            next.apply_to(&mut user);
            match state.store.save(&user, now).await {
                Ok(_) => {}
                // must answer exactly like an unknown email
                Err(StoreError::Concurrency) => {
                    warn!(user_id = %user.id, "failed attempt lost to a concurrent update");
                    return Err(AuthError::InvalidCredentials);
                }
                Err(e) => return Err(e.into()),
            }
            if locked_now {
                warn!(user_id = %user.id, attempts = next.attempts, "account locked out");
            }
            warn!(user_id = %user.id, attempts = next.attempts, "login invalid password");
            Err(AuthError::InvalidCredentials)
        }
        Decision::Succeeded(next) => {
            next.apply_to(&mut user);
            let user = state.store.save(&user, now).await?;
            let token = state.keys.sign(user.id, user.role, now)?;
            info!(user_id = %user.id, email = %user.email, "user logged in");
            Ok(token)
        }
    }
}

/// Expects a validated request. Stamps `password_changed_at`, which retires
/// every session issued before now, including the caller's.
pub async fn change_password(
    state: &AppState,
    mut user: User,
    req: ChangePasswordRequest,
) -> AuthResult<()> {
    if !state.hasher.verify(&req.old_password, &user.password_hash).await? {
        warn!(user_id = %user.id, "change password with wrong old password");
        return Err(AuthError::OldPasswordMismatch);
    }

    let now = state.clock.now();
    let hash = state.hasher.hash(&req.new_password).await?;
    user.set_password_hash(hash, now);
    state.store.save(&user, now).await?;

    info!(user_id = %user.id, "user password changed");
    Ok(())
}
