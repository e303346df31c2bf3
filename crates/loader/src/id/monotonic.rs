//! Shared `(timestamp, sequence)` state of the monotonic generators
//!
//! The current state lives behind an epoch-managed atomic pointer. Callers
//! read it, compute the successor and publish it with a compare-and-swap,
//! retrying on contention. Every published state is strictly greater than
//! the one it replaced, so concurrent callers always observe distinct,
//! totally ordered values.

use std::sync::atomic::Ordering;

use crossbeam::epoch::{self, Atomic, Owned};
use rand::Rng;

/// Largest value of the 14-bit sequence
pub const MAX_SEQUENCE: u16 = 0x3FFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tick {
    pub timestamp: u64,
    pub sequence: u16,
}

impl Tick {
    /// Successor of `previous` given the current clock reading
    pub fn following(previous: Option<Tick>, now: u64) -> Tick {
        match previous {
            Some(previous) if previous.timestamp >= now => {
                if previous.sequence >= MAX_SEQUENCE {
                    Tick {
                        timestamp: previous.timestamp + 1,
                        sequence: random_sequence(),
                    }
                } else {
                    Tick {
                        timestamp: previous.timestamp,
                        sequence: previous.sequence + 1,
                    }
                }
            }
            _ => Tick {
                timestamp: now,
                sequence: random_sequence(),
            },
        }
    }
}

fn random_sequence() -> u16 {
    rand::thread_rng().gen_range(0..=MAX_SEQUENCE)
}

#[derive(Debug)]
pub struct MonotonicState {
    current: Atomic<Tick>,
}

impl MonotonicState {
    pub fn new() -> Self {
        Self {
            current: Atomic::null(),
        }
    }

    /// Publish and return the state following the current one
    pub fn advance(&self, now: u64) -> Tick {
        let guard = epoch::pin();
        loop {
            let current = self.current.load(Ordering::Acquire, &guard);
            // SAFETY: states are only reclaimed through `defer_destroy`, which
            // waits for every guard pinned while they were reachable.
            let previous = unsafe { current.as_ref() }.copied();
            let next = Tick::following(previous, now);

            match self.current.compare_exchange(
                current,
                Owned::new(next),
                Ordering::AcqRel,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(_) => {
                    if !current.is_null() {
                        // SAFETY: `current` was just unlinked and is no longer
                        // reachable for guards pinned after this point.
                        unsafe { guard.defer_destroy(current) };
                    }
                    return next;
                }
                Err(_) => continue,
            }
        }
    }

    pub fn current(&self) -> Option<Tick> {
        let guard = epoch::pin();
        let current = self.current.load(Ordering::Acquire, &guard);
        // SAFETY: see `advance`.
        unsafe { current.as_ref() }.copied()
    }
}

impl Default for MonotonicState {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MonotonicState {
    fn drop(&mut self) {
        // SAFETY: `&mut self` guarantees no other thread holds the state.
        unsafe {
            let guard = epoch::unprotected();
            let current = self.current.load(Ordering::Relaxed, guard);
            if !current.is_null() {
                drop(current.into_owned());
            }
        }
    }
}
