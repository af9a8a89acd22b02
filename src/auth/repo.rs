use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    EmailTaken,
    #[error("record was modified by another writer")]
    Concurrency,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for credential records.
///
/// `save` is a conditional write keyed on `User::version`: it succeeds only if
/// nobody else saved the record since it was read, and returns the record with
/// its new version. Callers never retry on `StoreError::Concurrency`.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, new: NewUser, now: OffsetDateTime) -> StoreResult<User>;
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    /// Record whose reset token hash matches and whose expiry is after `now`.
    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>>;
    async fn save(&self, user: &User, now: OffsetDateTime) -> StoreResult<User>;
}

const USER_COLUMNS: &str = "id, email, password_hash, name, role, login_attempts, lock_until, \
     reset_token_hash, reset_token_expires_at, password_changed_at, last_login, \
     created_at, updated_at, version";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, new: NewUser, now: OffsetDateTime) -> StoreResult<User> {
        let user = User::from_new(new, now);
        let sql = format!(
            r#"
            INSERT INTO users (id, email, password_hash, name, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.name)
            .bind(user.role)
            .bind(now)
            .fetch_one(&self.db)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::EmailTaken
                } else {
                    StoreError::Database(e)
                }
            })
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE reset_token_hash = $1 AND reset_token_expires_at > $2"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn save(&self, user: &User, now: OffsetDateTime) -> StoreResult<User> {
        let sql = format!(
            r#"
            UPDATE users
            SET password_hash = $3,
                name = $4,
                role = $5,
                login_attempts = $6,
                lock_until = $7,
                reset_token_hash = $8,
                reset_token_expires_at = $9,
                password_changed_at = $10,
                last_login = $11,
                updated_at = $12,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(user.id)
            .bind(user.version)
            .bind(&user.password_hash)
            .bind(&user.name)
            .bind(user.role)
            .bind(user.login_attempts)
            .bind(user.lock_until)
            .bind(&user.reset_token_hash)
            .bind(user.reset_token_expires_at)
            .bind(user.password_changed_at)
            .bind(user.last_login)
            .bind(now)
            .fetch_optional(&self.db)
            .await?
            .ok_or(StoreError::Concurrency)
    }
}

/// Process-local store with the same contract as [`PgUserStore`].
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, User>> {
        self.users.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, new: NewUser, now: OffsetDateTime) -> StoreResult<User> {
        let mut users = self.lock();
        if users.values().any(|u| u.email == new.email) {
            return Err(StoreError::EmailTaken);
        }
        let user = User::from_new(new, now);
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.lock().values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        Ok(self
            .lock()
            .values()
            .find(|u| {
                u.reset_token_hash.as_deref() == Some(token_hash)
                    && u.reset_token_expires_at.is_some_and(|exp| exp > now)
            })
            .cloned())
    }

    async fn save(&self, user: &User, now: OffsetDateTime) -> StoreResult<User> {
        let mut users = self.lock();
        let current = users.get_mut(&user.id).ok_or(StoreError::Concurrency)?;
        if current.version != user.version {
            return Err(StoreError::Concurrency);
        }
        let mut saved = user.clone();
        saved.email = current.email.clone();
        saved.created_at = current.created_at;
        saved.updated_at = now;
        saved.version = current.version + 1;
        *current = saved.clone();
        Ok(saved)
    }
}
