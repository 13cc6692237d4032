//! Call id allocation.

use tether_types::CallId;

/// Issues call ids `0, 1, 2, ...` in order, each exactly once.
///
/// After `u64::MAX` has been issued the allocator is exhausted and every
/// further request returns `None`. Ids are never wrapped or recycled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdAllocator {
    /// `None` once the id space is spent.
    next: Option<u64>,
}

impl IdAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self { next: Some(0) }
    }

    /// Resume numbering at `next`, so ids from an earlier engine on the same
    /// peer cannot be matched again.
    #[must_use]
    pub const fn starting_at(next: u64) -> Self {
        Self { next: Some(next) }
    }

    /// Claim the next id.
    pub fn allocate(&mut self) -> Option<CallId> {
        let id = self.next?;
        self.next = id.checked_add(1);
        Some(CallId::new(id))
    }

    /// The id the next `allocate` would return.
    #[must_use]
    pub fn peek(&self) -> Option<CallId> {
        self.next.map(CallId::new)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
