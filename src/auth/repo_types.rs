use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Closed set of account roles. New accounts are owners.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Role {
    #[default]
    Owner,
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

/// Credential record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,                                // lowercase, unique
    #[serde(skip_serializing)]
    pub password_hash: String,                        // Argon2 PHC string
    pub name: String,
    pub role: Role,
    pub login_attempts: i32,
    pub lock_until: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub reset_token_hash: Option<String>,
    pub reset_token_expires_at: Option<OffsetDateTime>,
    pub password_changed_at: Option<OffsetDateTime>,
    pub last_login: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub version: i64,                                 // bumped by every save
}

/// Fields of a record that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: String,
}

impl User {
    pub(crate) fn from_new(new: NewUser, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: new.email,
            password_hash: new.password_hash,
            name: new.name,
            role: Role::default(),
            login_attempts: 0,
            lock_until: None,
            reset_token_hash: None,
            reset_token_expires_at: None,
            password_changed_at: None,
            last_login: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Sets or clears the reset token; hash and expiry always move together.
    pub fn set_reset_token(&mut self, token: Option<(String, OffsetDateTime)>) {
        match token {
            Some((hash, expires_at)) => {
                self.reset_token_hash = Some(hash);
                self.reset_token_expires_at = Some(expires_at);
            }
            None => {
                self.reset_token_hash = None;
                self.reset_token_expires_at = None;
            }
        }
    }

    /// Replaces the password hash and stamps the change, which makes every
    /// session issued before `now` stale.
    pub fn set_password_hash(&mut self, hash: String, now: OffsetDateTime) {
        self.password_hash = hash;
        self.password_changed_at = Some(now);
    }
}
