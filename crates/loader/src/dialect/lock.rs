//! Pessimistic lock options

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LockMode {
    /// No lock beyond what the isolation level gives
    #[default]
    None,
    /// Shared lock, `for share` or the dialect's equivalent
    PessimisticRead,
    /// Exclusive lock, `for update` or the dialect's equivalent
    PessimisticWrite,
}

/// How long to wait for a row lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LockTimeout {
    #[default]
    WaitForever,
    NoWait,
    SkipLocked,
    Millis(u32),
}

impl LockTimeout {
    /// Whole seconds to wait, rounded up; only for `Millis`
    pub fn seconds(&self) -> Option<u32> {
        match self {
            LockTimeout::Millis(ms) => Some(ms.div_ceil(1000)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LockOptions {
    pub mode: LockMode,
    pub timeout: LockTimeout,
}

impl LockOptions {
    pub const NONE: LockOptions = LockOptions {
        mode: LockMode::None,
        timeout: LockTimeout::WaitForever,
    };

    pub fn new(mode: LockMode) -> Self {
        Self {
            mode,
            timeout: LockTimeout::WaitForever,
        }
    }

    pub fn upgrade() -> Self {
        Self::new(LockMode::PessimisticWrite)
    }

    pub fn with_timeout(mut self, timeout: LockTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_locking(&self) -> bool {
        self.mode != LockMode::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_seconds_round_up() {
        assert_eq!(LockTimeout::Millis(1).seconds(), Some(1));
        assert_eq!(LockTimeout::Millis(2000).seconds(), Some(2));
        assert_eq!(LockTimeout::Millis(2001).seconds(), Some(3));
        assert_eq!(LockTimeout::NoWait.seconds(), None);
        assert!(!LockOptions::default().is_locking());
        assert!(LockOptions::upgrade().is_locking());
    }
}
