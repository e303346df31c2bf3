//! Fetch strategies
//!
//! Each association carries a strategy: *when* the associated data is
//! loaded (timing) and *how* (style). Only `Immediate` + `Join` adds the
//! association to the load plan's SQL; everything else is resolved after
//! the rows have been processed, or on first access.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchTiming {
    /// Loaded as part of the owning load
    Immediate,
    /// Loaded on first access, possibly together with siblings
    Delayed,
    /// Loaded on first access, one at a time
    Lazy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchStyle {
    Join,
    Select,
    Subselect,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchStrategy {
    pub timing: FetchTiming,
    pub style: FetchStyle,
}

impl FetchStrategy {
    pub const JOIN: FetchStrategy = FetchStrategy::new(FetchTiming::Immediate, FetchStyle::Join);
    pub const EAGER_SELECT: FetchStrategy =
        FetchStrategy::new(FetchTiming::Immediate, FetchStyle::Select);
    pub const LAZY_SELECT: FetchStrategy =
        FetchStrategy::new(FetchTiming::Delayed, FetchStyle::Select);
    pub const BATCH: FetchStrategy = FetchStrategy::new(FetchTiming::Delayed, FetchStyle::Batch);

    pub const fn new(timing: FetchTiming, style: FetchStyle) -> Self {
        Self { timing, style }
    }

    /// Whether the association is rendered as a SQL join
    pub fn is_join(&self) -> bool {
        self.style == FetchStyle::Join && self.timing == FetchTiming::Immediate
    }

    pub fn is_eager(&self) -> bool {
        self.timing == FetchTiming::Immediate
    }

    /// The strategy once a join has been ruled out
    pub fn without_join(&self) -> Self {
        match self.style {
            FetchStyle::Join => FetchStrategy::new(self.timing, FetchStyle::Select),
            _ => *self,
        }
    }
}

impl Default for FetchStrategy {
    fn default() -> Self {
        FetchStrategy::LAZY_SELECT
    }
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.timing, self.style)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_immediate_join_is_rendered() {
        assert!(FetchStrategy::JOIN.is_join());
        assert!(!FetchStrategy::new(FetchTiming::Delayed, FetchStyle::Join).is_join());
        assert!(!FetchStrategy::EAGER_SELECT.is_join());
        assert_eq!(FetchStrategy::JOIN.without_join(), FetchStrategy::EAGER_SELECT);
        assert_eq!(FetchStrategy::BATCH.without_join(), FetchStrategy::BATCH);
    }
}
