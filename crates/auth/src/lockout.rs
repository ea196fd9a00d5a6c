//! Account lockout policy.
//!
//! The policy is a pure state transition; stores apply it atomically (single
//! conditional update or under a write lock) so concurrent failures are never
//! under-counted.

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

/// Default number of consecutive failures before an account is locked.
pub const DEFAULT_MAX_LOGIN_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutPolicy {
    pub max_attempts: NonZeroU32,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: NonZeroU32::new(DEFAULT_MAX_LOGIN_ATTEMPTS)
                .unwrap_or(NonZeroU32::MIN),
        }
    }
}

/// Counter state after a failed login has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginAttemptOutcome {
    pub login_attempts: u32,
    pub locked: bool,
    /// True when this failure is the one that locked the account.
    pub newly_locked: bool,
}

impl LockoutPolicy {
    pub fn new(max_attempts: NonZeroU32) -> Self {
        Self { max_attempts }
    }

    /// Apply one failed attempt to `(attempts, locked)`.
    ///
    /// A locked account keeps its counter unchanged.
    pub fn on_failure(&self, attempts: u32, locked: bool) -> LoginAttemptOutcome {
        if locked {
            return LoginAttemptOutcome {
                login_attempts: attempts,
                locked: true,
                newly_locked: false,
            };
        }

        let attempts = attempts.saturating_add(1);
        let locked = attempts >= self.max_attempts.get();
        LoginAttemptOutcome {
            login_attempts: attempts,
            locked,
            newly_locked: locked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(n: u32) -> LockoutPolicy {
        LockoutPolicy::new(NonZeroU32::new(n).unwrap())
    }

    #[test]
    fn locks_when_threshold_reached() {
        let p = policy(3);
        let first = p.on_failure(0, false);
        assert_eq!((first.login_attempts, first.locked), (1, false));
        let second = p.on_failure(first.login_attempts, first.locked);
        assert!(!second.locked);
        let third = p.on_failure(second.login_attempts, second.locked);
        assert!(third.locked);
        assert!(third.newly_locked);
    }

    #[test]
    fn locked_account_counter_is_unchanged() {
        let outcome = policy(3).on_failure(3, true);
        assert_eq!(outcome.login_attempts, 3);
        assert!(outcome.locked);
        assert!(!outcome.newly_locked);
    }

    #[test]
    fn threshold_of_one_locks_immediately() {
        assert!(policy(1).on_failure(0, false).locked);
    }

    #[test]
    fn default_threshold() {
        assert_eq!(LockoutPolicy::default().max_attempts.get(), DEFAULT_MAX_LOGIN_ATTEMPTS);
    }
}
