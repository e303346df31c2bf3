//! Identifier generation
//!
//! Pluggable strategies produce UUID identifiers before an entity is
//! inserted: random version 4, a custom time-based version 1 layout, and
//! monotonic versions 6 and 7 whose embedded `(timestamp, sequence)` never
//! decreases for one generator instance, even under concurrent use.

pub mod monotonic;
pub mod random;
pub mod registry;
pub mod version6;
pub mod version7;
pub mod version_one;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ConfigError;

pub use monotonic::{MonotonicState, Tick};
pub use random::RandomUuidGenerator;
pub use registry::{GeneratorFactory, IdGeneration, IdentifierGeneratorRegistry};
pub use version6::Version6Generator;
pub use version7::Version7Generator;
pub use version_one::{CustomVersionOneGenerator, VersionOneConfig};

/// Produces identifier values
pub trait UuidValueGenerator: Send + Sync + fmt::Debug {
    fn generate_uuid(&self) -> Uuid;
}

/// Built-in generation strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UuidStrategy {
    Random,
    Time,
    Version6,
    Version7,
}

impl UuidStrategy {
    /// Instantiate the strategy; built-in strategies never fail
    pub fn build(&self, version_one: VersionOneConfig) -> Arc<dyn UuidValueGenerator> {
        match self {
            UuidStrategy::Random => Arc::new(RandomUuidGenerator::new()),
            UuidStrategy::Time => Arc::new(CustomVersionOneGenerator::new(version_one)),
            UuidStrategy::Version6 => Arc::new(Version6Generator::new()),
            UuidStrategy::Version7 => Arc::new(Version7Generator::new()),
        }
    }
}

impl fmt::Display for UuidStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UuidStrategy::Random => write!(f, "random"),
            UuidStrategy::Time => write!(f, "time"),
            UuidStrategy::Version6 => write!(f, "v6"),
            UuidStrategy::Version7 => write!(f, "v7"),
        }
    }
}

impl FromStr for UuidStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "random" | "v4" => Ok(UuidStrategy::Random),
            "time" | "v1" => Ok(UuidStrategy::Time),
            "v6" | "version6" => Ok(UuidStrategy::Version6),
            "v7" | "version7" => Ok(UuidStrategy::Version7),
            _ => Err(ConfigError::invalid_value(
                "uuid_strategy",
                s,
                "random, time, v6 or v7",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::net::Ipv4Addr;
    use std::thread;

    fn concurrent_ticks(generator: Arc<dyn UuidValueGenerator>, decode: fn(&Uuid) -> Tick) {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = generator.clone();
                thread::spawn(move || {
                    (0..5_000)
                        .map(|_| decode(&generator.generate_uuid()))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            let ticks = handle.join().unwrap();
            // each thread observes a strictly increasing series
            assert!(ticks.windows(2).all(|pair| pair[0] < pair[1]));
            all.extend(ticks);
        }
        // and no two threads ever received the same pair
        assert_eq!(all.len(), 8 * 5_000);
    }

    #[test]
    fn test_version6_concurrent_monotonicity() {
        concurrent_ticks(Arc::new(Version6Generator::new()), Version6Generator::decode);
    }

    #[test]
    fn test_version7_concurrent_monotonicity() {
        concurrent_ticks(Arc::new(Version7Generator::new()), Version7Generator::decode);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("V7".parse::<UuidStrategy>().unwrap(), UuidStrategy::Version7);
        assert_eq!("time".parse::<UuidStrategy>().unwrap(), UuidStrategy::Time);
        assert!("v9".parse::<UuidStrategy>().is_err());
    }

    #[test]
    fn test_built_in_strategies_produce_their_versions() {
        let config = VersionOneConfig::new(Ipv4Addr::LOCALHOST, 0);
        let expectations = [
            (UuidStrategy::Random, 4),
            (UuidStrategy::Time, 1),
            (UuidStrategy::Version6, 6),
            (UuidStrategy::Version7, 7),
        ];
        for (strategy, version) in expectations {
            assert_eq!(strategy.build(config).generate_uuid().get_version_num(), version);
        }
    }
}
