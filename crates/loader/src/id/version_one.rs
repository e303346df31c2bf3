//! Time-based identifiers in a custom version 1 layout
//!
//! The most significant half is fixed per generator: four host address
//! bytes, four process identifier bytes and the version nibble. The least
//! significant half carries the current time in milliseconds, a shared
//! short counter and the variant bits.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use super::UuidValueGenerator;

const COUNTER_MAX: u16 = i16::MAX as u16;

/// Process-scoped inputs of the version 1 layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionOneConfig {
    pub address: [u8; 4],
    /// Process identifier bytes, the start time in milliseconds shifted right by 8
    pub process_bytes: [u8; 4],
}

impl VersionOneConfig {
    pub fn new(address: Ipv4Addr, process_start_millis: u64) -> Self {
        Self {
            address: address.octets(),
            process_bytes: ((process_start_millis >> 8) as u32).to_be_bytes(),
        }
    }

    /// Configuration for the current process, started now
    pub fn for_current_process(address: Ipv4Addr) -> Self {
        Self::new(address, current_millis())
    }
}

#[derive(Debug)]
pub struct CustomVersionOneGenerator {
    most_significant_bits: u64,
    counter: AtomicU16,
}

impl CustomVersionOneGenerator {
    pub fn new(config: VersionOneConfig) -> Self {
        let mut hi_bits = [0u8; 8];
        hi_bits[..4].copy_from_slice(&config.address);
        hi_bits[4..].copy_from_slice(&config.process_bytes);
        hi_bits[6] &= 0x0f;
        hi_bits[6] |= 0x10;

        Self {
            most_significant_bits: u64::from_be_bytes(hi_bits),
            counter: AtomicU16::new(0),
        }
    }

    pub fn most_significant_bits(&self) -> u64 {
        self.most_significant_bits
    }

    /// Least significant bits for a given time seed in milliseconds
    pub fn generate_least_significant_bits(&self, seed: u64) -> u64 {
        let hi_time = (seed >> 32) as u16;
        let lo_time = seed as u32;

        let mut lo_bits = [0u8; 8];
        lo_bits[..2].copy_from_slice(&hi_time.to_be_bytes());
        lo_bits[2..6].copy_from_slice(&lo_time.to_be_bytes());
        lo_bits[6..].copy_from_slice(&self.next_count().to_be_bytes());
        lo_bits[0] &= 0x3f;
        lo_bits[0] |= 0x80;

        u64::from_be_bytes(lo_bits)
    }

    // Wraps from i16::MAX back to 0, never negative
    fn next_count(&self) -> u16 {
        let result = self
            .counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(if count >= COUNTER_MAX { 0 } else { count + 1 })
            });
        match result {
            Ok(previous) | Err(previous) => previous,
        }
    }
}

impl UuidValueGenerator for CustomVersionOneGenerator {
    fn generate_uuid(&self) -> Uuid {
        let least = self.generate_least_significant_bits(current_millis());
        Uuid::from_u64_pair(self.most_significant_bits, least)
    }
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn generator() -> CustomVersionOneGenerator {
        CustomVersionOneGenerator::new(VersionOneConfig::new(
            Ipv4Addr::new(192, 168, 1, 20),
            1_700_000_000_000,
        ))
    }

    #[test]
    fn test_fixed_bits_carry_version_one() {
        let generator = generator();
        let uuid = generator.generate_uuid();
        assert_eq!(uuid.get_version_num(), 1);
        assert_eq!(uuid.get_variant(), uuid::Variant::RFC4122);
        assert_eq!(&uuid.as_bytes()[..4], &[192, 168, 1, 20]);
        assert_eq!(uuid.as_u64_pair().0, generator.most_significant_bits());
    }

    #[test]
    fn test_ten_thousand_values_with_fixed_seed_are_distinct() {
        let generator = generator();
        let seed = 1_700_000_123_456;
        let values: HashSet<u64> = (0..10_000)
            .map(|_| generator.generate_least_significant_bits(seed))
            .collect();
        assert_eq!(values.len(), 10_000);
    }

    #[test]
    fn test_counter_wraps_to_zero() {
        let generator = generator();
        generator.counter.store(COUNTER_MAX, Ordering::SeqCst);
        assert_eq!(generator.next_count(), COUNTER_MAX);
        assert_eq!(generator.next_count(), 0);
        assert_eq!(generator.next_count(), 1);
    }
}
