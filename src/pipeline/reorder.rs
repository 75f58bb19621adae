//! Reorder stage: pages arrive in any order and leave in ascending order.
//!
//! The buffer has a single owner (the coordinator's consuming loop), so it
//! needs no locking. Every held item is keyed at or above
//! `next_expected`, and `next_expected` only moves forward.

use std::collections::BTreeMap;
use tracing::warn;

/// Holds early arrivals until their predecessors have been released.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next_expected: u32,
    pending: BTreeMap<u32, T>,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            next_expected: 1,
            pending: BTreeMap::new(),
        }
    }

    /// Insert `item` for `page` and return the run of items now ready, in
    /// ascending page order.
    ///
    /// A page that was already released, or is already held, is dropped
    /// and nothing is released.
    pub fn accept(&mut self, page: u32, item: T) -> Vec<(u32, T)> {
        if page < self.next_expected {
            warn!(
                "Ignoring page {} which was already released (next expected {})",
                page, self.next_expected
            );
            return Vec::new();
        }
        if self.pending.contains_key(&page) {
            warn!("Ignoring duplicate arrival of page {}", page);
            return Vec::new();
        }
        self.pending.insert(page, item);

        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.next_expected) {
            ready.push((self.next_expected, item));
            self.next_expected += 1;
        }
        ready
    }

    /// `false` if [`Self::accept`] would drop `page` as a repeat.
    pub fn admits(&self, page: u32) -> bool {
        page >= self.next_expected && !self.pending.contains_key(&page)
    }

    /// The page that must arrive before anything else can be released.
    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    /// Number of pages held waiting for a predecessor.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop everything held. Returns how many items were discarded.
    pub fn discard(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }
}
