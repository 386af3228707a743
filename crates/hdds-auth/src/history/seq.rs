// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sequence number generation for authentication messages and changes.
//!
//! One generator numbers the changes of a writer history, another numbers the
//! message identities of a security manager. Both start at 1 so that 0 can
//! mean "no related message".

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic sequence number generator
///
/// # Example
///
/// ```
/// use hdds_auth::history::SeqNumGenerator;
///
/// let gen = SeqNumGenerator::new();
/// assert_eq!(gen.next(), 1);
/// assert_eq!(gen.next(), 2);
/// assert_eq!(gen.peek(), 3);
/// ```
#[derive(Debug)]
pub struct SeqNumGenerator {
    next: AtomicU64,
}

impl SeqNumGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Get next sequence number (never repeats, never decreases).
    #[inline]
    pub fn next(&self) -> u64 {
        // fetch_add returns OLD value, so result is the seq we should use
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Next value `next()` would hand out, without consuming it.
    #[inline]
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for SeqNumGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_zero_is_never_issued() {
        let gen = SeqNumGenerator::new();
        assert_eq!(gen.peek(), 1);
        assert_ne!(gen.next(), 0);
    }

    #[test]
    fn test_concurrent_generators_issue_unique_values() {
        let gen = Arc::new(SeqNumGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gen = Arc::clone(&gen);
                thread::spawn(move || (0..250).map(|_| gen.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread should not panic"))
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1000);
        assert_eq!(all[0], 1);
        assert_eq!(gen.peek(), 1001);
    }
}
