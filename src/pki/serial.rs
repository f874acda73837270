//! Certificate serial numbers.
//!
//! Every serial is 16 octets: 8 fresh random octets followed by a 64-bit
//! counter owned by one CA instance. The counter makes serials unique within
//! the instance; the random half keeps them unpredictable across restarts.

use std::sync::atomic::{AtomicU64, Ordering};

use rcgen::SerialNumber;

/// Serial number generator scoped to one [`CertificateAuthority`](super::CertificateAuthority).
#[derive(Debug)]
pub struct SerialGenerator {
    counter: AtomicU64,
}

impl Default for SerialGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialGenerator {
    /// New generator; the first serial uses counter value 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }

    /// Next serial as raw big-endian octets.
    ///
    /// The leading octet is non-zero with its high bit clear, so the DER
    /// INTEGER is positive and minimally encoded.
    pub fn next_bytes(&self) -> [u8; 16] {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        let prefix: [u8; 8] = rand::random();

        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&prefix);
        bytes[8..].copy_from_slice(&count.to_be_bytes());

        bytes[0] &= 0x7f;
        if bytes[0] == 0 {
            bytes[0] = 0x01;
        }
        bytes
    }

    /// Next serial, ready for `rcgen`.
    pub fn next(&self) -> SerialNumber {
        SerialNumber::from_slice(&self.next_bytes())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn serials_are_unique_within_an_instance() {
        let generator = SerialGenerator::new();
        let serials: HashSet<[u8; 16]> = (0..1_000).map(|_| generator.next_bytes()).collect();
        assert_eq!(serials.len(), 1_000);
    }

    #[test]
    fn serial_is_positive_and_minimally_encoded() {
        let generator = SerialGenerator::new();
        for _ in 0..256 {
            let bytes = generator.next_bytes();
            assert_eq!(bytes[0] & 0x80, 0, "high bit must be clear");
            assert_ne!(bytes[0], 0, "leading octet must be non-zero");
        }
    }

    #[test]
    fn counter_half_is_monotonic() {
        let generator = SerialGenerator::new();
        let first = generator.next_bytes();
        let second = generator.next_bytes();
        assert_eq!(u64::from_be_bytes(first[8..].try_into().unwrap()), 1);
        assert_eq!(u64::from_be_bytes(second[8..].try_into().unwrap()), 2);
    }
}
