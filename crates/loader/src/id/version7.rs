//! Monotonic version 7 identifiers
//!
//! 48-bit Unix milliseconds, the version nibble and a 12-bit sub-millisecond
//! fraction, followed by the variant, a 14-bit counter and 48 random bits.
//! The shared state counts in 1/4096 ms units so that the millisecond and
//! fraction fields together never go backwards.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use uuid::Uuid;

use super::monotonic::{MonotonicState, Tick};
use super::UuidValueGenerator;

const FRACTION_BITS: u32 = 12;
const FRACTION_UNITS: u64 = 1 << FRACTION_BITS;

#[derive(Debug, Default)]
pub struct Version7Generator {
    state: MonotonicState,
}

impl Version7Generator {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn encode(tick: Tick, random: u64) -> Uuid {
        let millis = tick.timestamp >> FRACTION_BITS;
        let fraction = tick.timestamp & (FRACTION_UNITS - 1);
        let most = (millis << 16 & 0xFFFF_FFFF_FFFF_0000) | 0x7000 | fraction;
        let least = 0x8000_0000_0000_0000
            | (tick.sequence as u64) << 48
            | (random & 0xFFFF_FFFF_FFFF);
        Uuid::from_u64_pair(most, least)
    }

    /// Timestamp (in 1/4096 ms) and counter embedded in a version 7 identifier
    pub fn decode(uuid: &Uuid) -> Tick {
        let (most, least) = uuid.as_u64_pair();
        Tick {
            timestamp: (most >> 16) << FRACTION_BITS | (most & 0x0FFF),
            sequence: ((least >> 48) & 0x3FFF) as u16,
        }
    }
}

impl UuidValueGenerator for Version7Generator {
    fn generate_uuid(&self) -> Uuid {
        let tick = self.state.advance(fractional_millis());
        Self::encode(tick, rand::thread_rng().gen::<u64>())
    }
}

fn fractional_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| {
            let millis = d.as_millis() as u64;
            let sub_millis = (d.subsec_nanos() % 1_000_000) as u64;
            millis << FRACTION_BITS | (sub_millis * FRACTION_UNITS / 1_000_000)
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let tick = Tick {
            timestamp: (1_700_000_000_123u64 << FRACTION_BITS) | 0x0ABC,
            sequence: 0x2001,
        };
        let uuid = Version7Generator::encode(tick, u64::MAX);
        assert_eq!(uuid.get_version_num(), 7);
        assert_eq!(uuid.get_variant(), uuid::Variant::RFC4122);
        assert_eq!(Version7Generator::decode(&uuid), tick);
        // the leading 48 bits are plain Unix milliseconds
        assert_eq!(uuid.as_u64_pair().0 >> 16, 1_700_000_000_123);
    }

    #[test]
    fn test_values_sort_in_generation_order() {
        let generator = Version7Generator::new();
        let values: Vec<Uuid> = (0..10_000).map(|_| generator.generate_uuid()).collect();
        let mut sorted = values.clone();
        sorted.sort();
        assert_eq!(values, sorted);
    }
}
