//! Monotonic version 6 identifiers
//!
//! 60-bit count of 100ns intervals since 1582-10-15 split around the
//! version nibble, followed by the variant, a 14-bit sequence and a random
//! 48-bit node.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use uuid::Uuid;

use super::monotonic::{MonotonicState, Tick};
use super::UuidValueGenerator;

/// 100ns intervals between the Gregorian reform and the Unix epoch
const GREGORIAN_OFFSET: u64 = 0x01B2_1DD2_1381_4000;

#[derive(Debug, Default)]
pub struct Version6Generator {
    state: MonotonicState,
}

impl Version6Generator {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn encode(tick: Tick, node: u64) -> Uuid {
        let most = (tick.timestamp << 4 & 0xFFFF_FFFF_FFFF_0000)
            | 0x6000
            | (tick.timestamp & 0x0FFF);
        let least = 0x8000_0000_0000_0000
            | (tick.sequence as u64) << 48
            | (node & 0xFFFF_FFFF_FFFF)
            | 0x0000_0100_0000_0000;
        Uuid::from_u64_pair(most, least)
    }

    /// Timestamp and sequence embedded in a version 6 identifier
    pub fn decode(uuid: &Uuid) -> Tick {
        let (most, least) = uuid.as_u64_pair();
        Tick {
            timestamp: (most >> 16) << 12 | (most & 0x0FFF),
            sequence: ((least >> 48) & 0x3FFF) as u16,
        }
    }
}

impl UuidValueGenerator for Version6Generator {
    fn generate_uuid(&self) -> Uuid {
        let tick = self.state.advance(gregorian_ticks());
        Self::encode(tick, rand::thread_rng().gen::<u64>())
    }
}

fn gregorian_ticks() -> u64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.as_nanos() / 100) as u64)
        .unwrap_or(0);
    since_epoch + GREGORIAN_OFFSET
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let tick = Tick {
            timestamp: 0x0ABC_DEF0_1234_5678,
            sequence: 0x1234,
        };
        let uuid = Version6Generator::encode(tick, 0);
        assert_eq!(uuid.get_version_num(), 6);
        assert_eq!(uuid.get_variant(), uuid::Variant::RFC4122);
        assert_eq!(Version6Generator::decode(&uuid), tick);
    }

    #[test]
    fn test_node_is_marked_multicast() {
        let tick = Tick {
            timestamp: 1,
            sequence: 0,
        };
        let uuid = Version6Generator::encode(tick, 0x0000_0000_0000);
        let node = &uuid.as_bytes()[10..];
        assert_eq!(node, &[0x01, 0, 0, 0, 0, 0]);
        let uuid = Version6Generator::encode(tick, 0xFE00_0000_0000);
        assert_eq!(uuid.as_bytes()[10], 0xFF);
    }

    #[test]
    fn test_sequential_values_increase() {
        let generator = Version6Generator::new();
        let mut last = Version6Generator::decode(&generator.generate_uuid());
        for _ in 0..10_000 {
            let next = Version6Generator::decode(&generator.generate_uuid());
            assert!(next > last);
            last = next;
        }
    }
}
