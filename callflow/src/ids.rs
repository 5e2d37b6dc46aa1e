//! Request identity allocation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

static PROCESS_IDS: OnceLock<Arc<IdAllocator>> = OnceLock::new();

/// Issues monotonically increasing request identifiers.
///
/// Identifiers are only used for correlating log lines and for telling
/// requests apart in the captcha coordinator. Sessions draw from
/// [`IdAllocator::process`] unless built with their own allocator, so ids are
/// unique across every session in the process.
#[derive(Debug)]
pub struct IdAllocator {
    last: AtomicU64,
}

impl IdAllocator {
    /// Creates an allocator whose first id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_after(0)
    }

    /// Creates an allocator whose first id is `last + 1`.
    #[must_use]
    pub fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    /// The allocator shared by every session in the process.
    pub fn process() -> Arc<Self> {
        Arc::clone(PROCESS_IDS.get_or_init(|| Arc::new(Self::new())))
    }

    /// Returns the next id.
    pub fn next_id(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the most recently issued id (0 if none).
    #[must_use]
    pub fn last_issued(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_start_at_one() {
        let ids = IdAllocator::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
        assert_eq!(ids.last_issued(), 2);
    }

    #[test]
    fn test_starting_after() {
        let ids = IdAllocator::starting_after(41);
        assert_eq!(ids.next_id(), 42);
    }

    #[test]
    fn test_process_allocator_is_shared() {
        let a = IdAllocator::process();
        let b = IdAllocator::process();
        assert!(Arc::ptr_eq(&a, &b));
        let first = a.next_id();
        assert!(b.next_id() > first);
    }

    #[test]
    fn test_concurrent_ids_are_unique() {
        let ids = Arc::new(IdAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..500).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 4000);
    }
}
