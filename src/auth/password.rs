use std::sync::Arc;

use anyhow::Context;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use tokio::sync::Semaphore;
use tracing::error;

use crate::config::HashConfig;

/// Argon2id hashing on the blocking pool, at most `workers` jobs at a time.
#[derive(Clone)]
pub struct CredentialHasher {
    argon2: Argon2<'static>,
    permits: Arc<Semaphore>,
    dummy_hash: Arc<str>,
}

impl CredentialHasher {
    pub fn new(cfg: &HashConfig) -> anyhow::Result<Self> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, cfg.parallelism, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 parameters: {e}"))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let dummy_hash = hash_blocking(&argon2, "dummy password for unknown accounts")?;
        Ok(Self {
            argon2,
            permits: Arc::new(Semaphore::new(cfg.workers.max(1))),
            dummy_hash: dummy_hash.into(),
        })
    }

    pub async fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let _permit = self.permits.acquire().await.context("hasher pool closed")?;
        let argon2 = self.argon2.clone();
        let plain = plain.to_owned();
        tokio::task::spawn_blocking(move || hash_blocking(&argon2, &plain))
            .await
            .context("hash task failed")?
    }

    pub async fn verify(&self, plain: &str, hash: &str) -> anyhow::Result<bool> {
        let _permit = self.permits.acquire().await.context("hasher pool closed")?;
        let argon2 = self.argon2.clone();
        let plain = plain.to_owned();
        let hash = hash.to_owned();
        tokio::task::spawn_blocking(move || verify_blocking(&argon2, &plain, &hash))
            .await
            .context("verify task failed")?
    }

    /// Burns one verification against a fixed hash so an unknown email costs
    /// as much as a wrong password.
    pub async fn verify_dummy(&self, plain: &str) -> anyhow::Result<()> {
        let dummy = self.dummy_hash.clone();
        self.verify(plain, &dummy).await.map(|_| ())
    }
}

fn hash_blocking(argon2: &Argon2<'_>, plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

fn verify_blocking(argon2: &Argon2<'_>, plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(argon2.verify_password(plain.as_bytes(), &parsed).is_ok())
}
