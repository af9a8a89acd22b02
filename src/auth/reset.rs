//! Single-use, time-limited password reset tokens.
//!
//! Only a SHA-256 digest of the token is stored. Issuing always walks the same
//! steps and returns the same message whether or not the email is registered.
//! Delivery failures and lost write races are logged, not reported, so they
//! cannot reveal an account either. Every consume failure is the same
//! `InvalidOrExpiredResetToken`.

use anyhow::Context;
use async_trait::async_trait;
use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::Duration;
use tracing::{debug, error, info, warn};

use crate::{
    auth::repo::StoreError,
    error::{AuthError, AuthResult},
    state::AppState,
};

pub const RESET_ISSUED_MESSAGE: &str = "If the email exists, reset instructions have been sent";

/// Out-of-band delivery of raw reset tokens.
#[async_trait]
pub trait ResetMailer: Send + Sync {
    async fn send_reset_token(&self, email: &str, token: &str) -> anyhow::Result<()>;
}

/// Writes the token to the log. Stand-in until a mail transport exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl ResetMailer for LogMailer {
    async fn send_reset_token(&self, email: &str, token: &str) -> anyhow::Result<()> {
        info!(%email, %token, "password reset token issued");
        Ok(())
    }
}

pub fn generate_token() -> anyhow::Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate reset token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    Base64::encode_string(&hasher.finalize())
}

/// `email` must already be normalized.
pub async fn issue(state: &AppState, email: &str) -> AuthResult<&'static str> {
    let now = state.clock.now();
    let token = generate_token()?;
    let digest = hash_token(&token);
    let expires_at = now + Duration::minutes(state.config.security.reset_token_ttl_minutes);

    match state.store.find_by_email(email).await? {
        Some(mut user) => {
            user.set_reset_token(Some((digest, expires_at)));
            match state.store.save(&user, now).await {
                Ok(_) => {}
                // another writer won the race; no token was stored
                Err(StoreError::Concurrency) => {
                    warn!(user_id = %user.id, "reset token not stored: concurrent update");
                    return Ok(RESET_ISSUED_MESSAGE);
                }
                Err(e) => return Err(e.into()),
            }
            if let Err(e) = state.mailer.send_reset_token(email, &token).await {
                error!(user_id = %user.id, error = ?e, "reset token delivery failed");
                return Ok(RESET_ISSUED_MESSAGE);
            }
            info!(user_id = %user.id, "password reset issued");
        }
        None => {
            debug!(%email, "password reset requested for unknown email");
        }
    }

    Ok(RESET_ISSUED_MESSAGE)
}

pub async fn consume(state: &AppState, raw_token: &str, new_password: &str) -> AuthResult<()> {
    let now = state.clock.now();
    let digest = hash_token(raw_token);

    let Some(mut user) = state.store.find_by_reset_token(&digest, now).await? else {
        warn!("invalid or expired reset token presented");
        return Err(AuthError::InvalidOrExpiredResetToken);
    };

    let hash = state.hasher.hash(new_password).await?;
    user.set_password_hash(hash, now);
    user.set_reset_token(None);
    state.store.save(&user, now).await?;

    info!(user_id = %user.id, "password reset successful");
    Ok(())
}
