//! Brute-force lockout as a pure state machine.
//!
//! An account is `Unlocked(attempts)` or `Locked(until)`. The lock is derived
//! from `lock_until > now`; nothing writes an explicit unlock. Attempts are
//! reset only by a successful login, so once a lock has lapsed a single further
//! failure re-locks the account.

use time::{Duration, OffsetDateTime};

use crate::auth::repo_types::User;
use crate::config::SecurityConfig;

/// The lockout-relevant slice of a credential record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginState {
    pub attempts: i32,
    pub lock_until: Option<OffsetDateTime>,
    pub last_login: Option<OffsetDateTime>,
}

impl LoginState {
    pub fn of(user: &User) -> Self {
        Self {
            attempts: user.login_attempts,
            lock_until: user.lock_until,
            last_login: user.last_login,
        }
    }

    pub fn apply_to(self, user: &mut User) {
        user.login_attempts = self.attempts;
        user.lock_until = self.lock_until;
        user.last_login = self.last_login;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Rejected without looking at the password; state is unchanged.
    Locked { until: OffsetDateTime },
    Succeeded(LoginState),
    /// Wrong password. `next.lock_until` is set when this failure tripped the lock.
    Failed { next: LoginState, locked_now: bool },
}

#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_attempts: i32,
    pub lock_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lock_duration: Duration::minutes(15),
        }
    }
}

impl From<&SecurityConfig> for LockoutPolicy {
    fn from(cfg: &SecurityConfig) -> Self {
        Self {
            max_attempts: cfg.max_login_attempts,
            lock_duration: Duration::minutes(cfg.lock_minutes),
        }
    }
}

impl LockoutPolicy {
    /// `Some(until)` while the account is locked at `now`.
    pub fn locked_until(&self, state: &LoginState, now: OffsetDateTime) -> Option<OffsetDateTime> {
        state.lock_until.filter(|until| *until > now)
    }

    pub fn evaluate(&self, state: LoginState, now: OffsetDateTime, password_matched: bool) -> Decision {
        if let Some(until) = self.locked_until(&state, now) {
            return Decision::Locked { until };
        }

        if password_matched {
            return Decision::Succeeded(LoginState {
                attempts: 0,
                lock_until: None,
                last_login: Some(now),
            });
        }

        let attempts = state.attempts.saturating_add(1);
        let locked_now = attempts >= self.max_attempts;
        let lock_until = if locked_now {
            Some(now + self.lock_duration)
        } else {
            state.lock_until
        };
        Decision::Failed {
            next: LoginState {
                attempts,
                lock_until,
                last_login: state.last_login,
            },
            locked_now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> LoginState {
        LoginState {
            attempts: 0,
            lock_until: None,
            last_login: None,
        }
    }

    fn fail(policy: &LockoutPolicy, state: LoginState, now: OffsetDateTime) -> LoginState {
        match policy.evaluate(state, now, false) {
            Decision::Failed { next, .. } => next,
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn failures_below_threshold_only_count() {
        let policy = LockoutPolicy::default();
        let now = OffsetDateTime::now_utc();
        let mut state = fresh();
        for n in 1..=4 {
            state = fail(&policy, state, now);
            assert_eq!(state.attempts, n);
            assert!(state.lock_until.is_none());
        }
    }

    #[test]
    fn fifth_failure_locks_for_fifteen_minutes() {
        let policy = LockoutPolicy::default();
        let now = OffsetDateTime::now_utc();
        let mut state = fresh();
        for _ in 0..4 {
            state = fail(&policy, state, now);
        }
        match policy.evaluate(state, now, false) {
            Decision::Failed { next, locked_now } => {
                assert!(locked_now);
                assert_eq!(next.attempts, 5);
                assert_eq!(next.lock_until, Some(now + Duration::minutes(15)));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn locked_rejects_even_the_right_password() {
        let policy = LockoutPolicy::default();
        let now = OffsetDateTime::now_utc();
        let until = now + Duration::minutes(10);
        let state = LoginState {
            attempts: 5,
            lock_until: Some(until),
            last_login: None,
        };
        assert_eq!(policy.evaluate(state, now, true), Decision::Locked { until });
        assert_eq!(policy.evaluate(state, now, false), Decision::Locked { until });
    }

    #[test]
    fn success_resets_counter_and_lock() {
        let policy = LockoutPolicy::default();
        let now = OffsetDateTime::now_utc();
        let state = LoginState {
            attempts: 3,
            lock_until: None,
            last_login: None,
        };
        assert_eq!(
            policy.evaluate(state, now, true),
            Decision::Succeeded(LoginState {
                attempts: 0,
                lock_until: None,
                last_login: Some(now),
            })
        );
    }

    #[test]
    fn expired_lock_is_inactive_and_success_clears_it() {
        let policy = LockoutPolicy::default();
        let now = OffsetDateTime::now_utc();
        let state = LoginState {
            attempts: 5,
            lock_until: Some(now - Duration::seconds(1)),
            last_login: None,
        };
        assert!(policy.locked_until(&state, now).is_none());
        match policy.evaluate(state, now, true) {
            Decision::Succeeded(next) => {
                assert_eq!(next.attempts, 0);
                assert!(next.lock_until.is_none());
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn failure_after_expired_lock_relocks_immediately() {
        let policy = LockoutPolicy::default();
        let now = OffsetDateTime::now_utc();
        let state = LoginState {
            attempts: 5,
            lock_until: Some(now - Duration::seconds(1)),
            last_login: None,
        };
        match policy.evaluate(state, now, false) {
            Decision::Failed { next, locked_now } => {
                assert!(locked_now);
                assert_eq!(next.attempts, 6);
                assert_eq!(next.lock_until, Some(now + Duration::minutes(15)));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn lock_boundary_is_exclusive() {
        let policy = LockoutPolicy::default();
        let now = OffsetDateTime::now_utc();
        let state = LoginState {
            attempts: 5,
            lock_until: Some(now),
            last_login: None,
        };
        assert!(policy.locked_until(&state, now).is_none());
    }
}
