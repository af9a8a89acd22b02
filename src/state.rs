use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::{
    auth::{
        jwt::JwtKeys,
        lockout::LockoutPolicy,
        password::CredentialHasher,
        repo::{MemoryUserStore, PgUserStore, UserStore},
        reset::{LogMailer, ResetMailer},
    },
    clock::{Clock, SystemClock},
    config::{AppConfig, StoreBackend},
    rate_limit::RateLimiter,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub config: Arc<AppConfig>,
    pub keys: JwtKeys,
    pub hasher: CredentialHasher,
    pub lockout: LockoutPolicy,
    pub limiter: RateLimiter,
    pub mailer: Arc<dyn ResetMailer>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn UserStore> = match config.store {
            StoreBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .context("DATABASE_URL is required for the postgres store")?;
                let db = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;
                sqlx::migrate!("./migrations")
                    .run(&db)
                    .await
                    .context("run migrations")?;
                Arc::new(PgUserStore::new(db))
            }
            StoreBackend::Memory => {
                tracing::warn!("using in-memory credential store; accounts are lost on restart");
                Arc::new(MemoryUserStore::new())
            }
        };

        Self::from_parts(
            config,
            store,
            Arc::new(LogMailer),
            Arc::new(SystemClock),
        )
    }

    pub fn from_parts(
        config: AppConfig,
        store: Arc<dyn UserStore>,
        mailer: Arc<dyn ResetMailer>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let hasher = CredentialHasher::new(&config.hashing)?;
        Ok(Self {
            store,
            keys: JwtKeys::from_config(&config.jwt),
            hasher,
            lockout: LockoutPolicy::from(&config.security),
            limiter: RateLimiter::from_config(&config.rate_limit),
            mailer,
            clock,
            config: Arc::new(config),
        })
    }
}
