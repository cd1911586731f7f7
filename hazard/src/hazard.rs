use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crossbeam_utils::CachePadded;
use rustc_hash::FxHashSet;

/// A single announcement slot. Only the thread holding the slot writes `hazard`; any reclaiming
/// thread reads it.
#[derive(Debug)]
pub(crate) struct HazardSlot {
    hazard: AtomicPtr<u8>,
    in_use: AtomicBool,
}

impl HazardSlot {
    fn new() -> Self {
        Self {
            hazard: AtomicPtr::new(ptr::null_mut()),
            in_use: AtomicBool::new(false),
        }
    }
}

/// Fixed-capacity table of hazard slots, one per registered thread.
#[derive(Debug)]
pub(crate) struct HazardSlots {
    slots: Box<[CachePadded<HazardSlot>]>,
}

impl HazardSlots {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity)
                .map(|_| CachePadded::new(HazardSlot::new()))
                .collect(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claims the first free slot, or `None` if all of them are taken.
    pub(crate) fn acquire(&self) -> Option<usize> {
        for (idx, slot) in self.slots.iter().enumerate() {
            if !slot.in_use.load(Ordering::Relaxed)
                && slot
                    .in_use
                    .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return Some(idx);
            }
        }
        None
    }

    /// Returns the slot to the pool. Its protection is dropped first.
    pub(crate) fn release(&self, idx: usize) {
        let slot = &self.slots[idx];
        slot.hazard.store(ptr::null_mut(), Ordering::Release);
        slot.in_use.store(false, Ordering::Release);
    }

    pub(crate) fn in_use(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.in_use.load(Ordering::Relaxed))
            .count()
    }

    #[inline]
    pub(crate) fn publish(&self, idx: usize, ptr: *mut u8) {
        self.slots[idx].hazard.store(ptr, Ordering::Release);
    }

    #[inline]
    pub(crate) fn clear(&self, idx: usize) {
        self.slots[idx].hazard.store(ptr::null_mut(), Ordering::Release);
    }

    #[inline]
    pub(crate) fn get(&self, idx: usize) -> *mut u8 {
        self.slots[idx].hazard.load(Ordering::Acquire)
    }

    pub(crate) fn is_protected(&self, ptr: *mut u8) -> bool {
        !ptr.is_null()
            && self
                .slots
                .iter()
                .any(|slot| slot.hazard.load(Ordering::Acquire) == ptr)
    }

    /// Snapshot of every announced pointer.
    pub(crate) fn collect_guarded_ptrs(&self) -> FxHashSet<*mut u8> {
        self.slots
            .iter()
            .map(|slot| slot.hazard.load(Ordering::Acquire))
            .filter(|ptr| !ptr.is_null())
            .collect()
    }
}
