use core::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// Counters of unreclaimed and reclaimed nodes in a domain.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    garbage: CachePadded<AtomicUsize>,
    reclaimed: CachePadded<AtomicUsize>,
}

impl Stats {
    pub(crate) fn incr_garb(&self, count: usize) {
        self.garbage.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn decr_garb(&self, count: usize) {
        self.garbage.fetch_sub(count, Ordering::Relaxed);
        self.reclaimed.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn garbage(&self) -> usize {
        self.garbage.load(Ordering::Relaxed)
    }

    pub(crate) fn reclaimed(&self) -> usize {
        self.reclaimed.load(Ordering::Relaxed)
    }
}
