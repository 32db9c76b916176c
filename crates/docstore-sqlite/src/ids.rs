// crates/docstore-sqlite/src/ids.rs
// ============================================================================
// Module: Document Identifiers
// Description: Identifier generation for documents inserted without one.
// Purpose: Sortable, string-stable identifiers.
// Dependencies: rand
// ============================================================================

//! ## Overview
//! Identifiers are 26 lowercase hex digits: 12 of unix milliseconds, 6 of a
//! process-local counter, and 8 random. Within one process, lexicographic
//! order follows generation order.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Mask for the 48-bit timestamp field.
const TIMESTAMP_MASK: u64 = 0xffff_ffff_ffff;
/// Mask for the 24-bit counter field.
const COUNTER_MASK: u32 = 0x00ff_ffff;

/// Source of identifiers for documents inserted without `_id`.
pub trait IdGenerator: Send + Sync {
    /// Returns a fresh identifier.
    fn next_id(&self) -> String;
}

/// Time-ordered hex identifier generator.
#[derive(Debug, Default)]
pub struct TimeOrderedIdGenerator {
    /// Monotonic counter disambiguating identifiers within one millisecond.
    counter: AtomicU32,
}

impl TimeOrderedIdGenerator {
    /// Creates a generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for TimeOrderedIdGenerator {
    fn next_id(&self) -> String {
        let millis = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        let millis = u64::try_from(millis).unwrap_or(u64::MAX) & TIMESTAMP_MASK;
        let counter = self.counter.fetch_add(1, Ordering::Relaxed) & COUNTER_MASK;
        let random: u32 = rand::random();
        format!("{millis:012x}{counter:06x}{random:08x}")
    }
}

#[cfg(test)]
mod tests {
    use super::IdGenerator;
    use super::TimeOrderedIdGenerator;

    #[test]
    fn ids_are_fixed_width_and_ordered() {
        let generator = TimeOrderedIdGenerator::new();
        let first = generator.next_id();
        let second = generator.next_id();
        assert_eq!(first.len(), 26);
        assert!(first.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert!(first < second);
    }
}
