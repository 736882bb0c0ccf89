//! Correlation id generation.

use std::sync::atomic::{AtomicU32, Ordering};

/// Step between successive ids
pub const ID_STEP: u32 = 0x1001;

/// Modulus of the 24-bit id space
pub const ID_MODULUS: u32 = 0x100_0000;

/// Process-wide correlation id generator.
///
/// Starts at 1 and advances by [`ID_STEP`] modulo 2^24, never yielding zero.
#[derive(Debug)]
pub struct CorrelationIds {
    next: AtomicU32,
}

impl Default for CorrelationIds {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationIds {
    /// Create a generator whose first id is 1
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Take the current id and advance the generator
    pub fn next_id(&self) -> u32 {
        let mut current = self.next.load(Ordering::Relaxed);
        loop {
            let mut following = (current + ID_STEP) % ID_MODULUS;
            if following == 0 {
                following = (following + ID_STEP) % ID_MODULUS;
            }
            match self.next.compare_exchange_weak(
                current,
                following,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence() {
        let ids = CorrelationIds::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 0x1002);
        assert_eq!(ids.next_id(), 0x2003);
    }

    #[test]
    fn test_never_zero() {
        let ids = CorrelationIds::new();
        for _ in 0..100_000 {
            let id = ids.next_id();
            assert_ne!(id, 0);
            assert!(id < ID_MODULUS);
        }
    }

    #[test]
    fn test_concurrent_unique() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let ids = Arc::new(CorrelationIds::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..1000).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
    }
}
