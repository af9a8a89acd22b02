use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Lockout and reset-token parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub max_login_attempts: i32,
    pub lock_minutes: i64,
    pub reset_token_ttl_minutes: i64,
}

/// Argon2id cost parameters and the size of the blocking hash pool.
#[derive(Debug, Clone, Deserialize)]
pub struct HashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    pub workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_minutes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub security: SecurityConfig,
    pub hashing: HashConfig,
    pub rate_limit: RateLimitConfig,
    pub request_timeout_secs: u64,
    /// `*` or a comma-separated list of allowed origins.
    pub cors_origin: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let store = match std::env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "postgres".into())
            .to_lowercase()
            .as_str()
        {
            "postgres" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            other => anyhow::bail!("unknown STORE_BACKEND {other:?}"),
        };

        let database_url = std::env::var("DATABASE_URL").ok();
        if store == StoreBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL is required when STORE_BACKEND=postgres");
        }

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "invoice-auth".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "invoice-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 12 * 60),
        };

        let security = SecurityConfig {
            max_login_attempts: env_or("LOGIN_MAX_ATTEMPTS", 5),
            lock_minutes: env_or("LOGIN_LOCK_MINUTES", 15),
            reset_token_ttl_minutes: env_or("RESET_TOKEN_TTL_MINUTES", 60),
        };

        let default_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        let hashing = HashConfig {
            memory_kib: env_or("ARGON2_MEMORY_KIB", argon2::Params::DEFAULT_M_COST),
            iterations: env_or("ARGON2_ITERATIONS", argon2::Params::DEFAULT_T_COST),
            parallelism: env_or("ARGON2_PARALLELISM", argon2::Params::DEFAULT_P_COST),
            workers: env_or("HASH_WORKERS", default_workers),
        };

        let rate_limit = RateLimitConfig {
            max_requests: env_or("RATE_LIMIT_MAX", 10),
            window_minutes: env_or("RATE_LIMIT_WINDOW_MINUTES", 15),
        };

        Ok(Self {
            store,
            database_url,
            jwt,
            security,
            hashing,
            rate_limit,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30),
            cors_origin: std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "*".into()),
        })
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
impl AppConfig {
    /// Cheap hashing parameters and the memory store.
    pub fn for_tests() -> Self {
        Self {
            store: StoreBackend::Memory,
            database_url: None,
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 12 * 60,
            },
            security: SecurityConfig {
                max_login_attempts: 5,
                lock_minutes: 15,
                reset_token_ttl_minutes: 60,
            },
            hashing: HashConfig {
                memory_kib: 8,
                iterations: 1,
                parallelism: 1,
                workers: 2,
            },
            rate_limit: RateLimitConfig {
                max_requests: 10,
                window_minutes: 15,
            },
            request_timeout_secs: 30,
            cors_origin: "*".into(),
        }
    }
}
