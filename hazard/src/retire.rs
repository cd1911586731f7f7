use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use rustc_hash::FxHashSet;

/// A node that is unlinked but not yet freed.
#[derive(Debug)]
pub(crate) struct Retired {
    pub(crate) ptr: *mut u8,
    pub(crate) deleter: unsafe fn(ptr: *mut u8),
    pub(crate) seq: u64,
}

impl Retired {
    pub(crate) fn new<T>(ptr: *mut T, seq: u64) -> Self {
        Self {
            ptr: ptr as *mut u8,
            deleter: free::<T>,
            seq,
        }
    }

    /// # Safety
    /// No thread may access the pointee anymore.
    pub(crate) unsafe fn reclaim(self) {
        (self.deleter)(self.ptr)
    }
}

unsafe fn free<T>(ptr: *mut u8) {
    drop(Box::from_raw(ptr as *mut T))
}

/// Thread-local list of retired nodes.
#[derive(Debug, Default)]
pub(crate) struct RetireList {
    retired: Vec<Retired>,
    next_seq: u64,
}

impl RetireList {
    pub(crate) fn push<T>(&mut self, ptr: *mut T) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.retired.push(Retired::new(ptr, seq));
        seq
    }

    pub(crate) fn len(&self) -> usize {
        self.retired.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.retired.is_empty()
    }

    pub(crate) fn adopt(&mut self, mut orphans: Vec<Retired>) {
        self.retired.append(&mut orphans);
    }

    /// Sequence number of the oldest entry.
    pub(crate) fn oldest_seq(&self) -> Option<u64> {
        self.retired.iter().map(|r| r.seq).min()
    }

    pub(crate) fn take_all(&mut self) -> Vec<Retired> {
        core::mem::take(&mut self.retired)
    }

    /// Frees every entry missing from `guarded` and returns how many were freed.
    ///
    /// # Safety
    /// `guarded` must have been collected after all entries were unlinked.
    pub(crate) unsafe fn reclaim_unguarded(&mut self, guarded: &FxHashSet<*mut u8>) -> usize {
        let before = self.retired.len();
        self.retired = core::mem::take(&mut self.retired)
            .into_iter()
            .filter_map(|element| {
                if guarded.contains(&element.ptr) {
                    Some(element)
                } else {
                    element.reclaim();
                    None
                }
            })
            .collect();
        before - self.retired.len()
    }
}

/// Retired nodes left behind by deregistered threads. Push-only from the owning threads'
/// perspective; reclaimers take the whole list at once.
#[derive(Debug)]
pub(crate) struct Orphans {
    head: AtomicPtr<OrphanBatch>,
}

#[derive(Debug)]
struct OrphanBatch {
    retireds: Vec<Retired>,
    next: *mut OrphanBatch,
}

impl Orphans {
    pub(crate) const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub(crate) fn push(&self, retireds: Vec<Retired>) {
        let new = Box::leak(Box::new(OrphanBatch {
            retireds,
            next: ptr::null_mut(),
        }));

        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            new.next = head;
            match self
                .head
                .compare_exchange(head, new, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(head_new) => head = head_new,
            }
        }
    }

    pub(crate) fn pop_all(&self) -> Vec<Retired> {
        if self.head.load(Ordering::Relaxed).is_null() {
            return Vec::new();
        }
        let mut cur = self.head.swap(ptr::null_mut(), Ordering::Acquire);
        let mut retireds = Vec::new();
        while !cur.is_null() {
            let mut batch = unsafe { Box::from_raw(cur) };
            retireds.append(&mut batch.retireds);
            cur = batch.next;
        }
        retireds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn sequence_is_increasing() {
        let mut list = RetireList::default();
        let a = Box::into_raw(Box::new(1u32));
        let b = Box::into_raw(Box::new(2u32));
        assert_eq!(list.push(a), 0);
        assert_eq!(list.push(b), 1);
        assert_eq!(list.len(), 2);
        assert_eq!(list.oldest_seq(), Some(0));
        let freed = unsafe { list.reclaim_unguarded(&FxHashSet::default()) };
        assert_eq!(freed, 2);
        assert!(list.is_empty());
    }

    #[test]
    fn guarded_entries_survive() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut list = RetireList::default();
        let kept = Box::into_raw(Box::new(Tracked(drops.clone())));
        let freed = Box::into_raw(Box::new(Tracked(drops.clone())));
        list.push(kept);
        list.push(freed);

        let mut guarded = FxHashSet::default();
        guarded.insert(kept as *mut u8);
        assert_eq!(unsafe { list.reclaim_unguarded(&guarded) }, 1);
        assert_eq!(drops.load(Ordering::Relaxed), 1);
        assert_eq!(list.len(), 1);

        assert_eq!(unsafe { list.reclaim_unguarded(&FxHashSet::default()) }, 1);
        assert_eq!(drops.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn orphans_round_trip() {
        let orphans = Orphans::new();
        assert!(orphans.pop_all().is_empty());

        let mut list = RetireList::default();
        list.push(Box::into_raw(Box::new(1u64)));
        list.push(Box::into_raw(Box::new(2u64)));
        orphans.push(list.take_all());
        list.push(Box::into_raw(Box::new(3u64)));
        orphans.push(list.take_all());

        let all = orphans.pop_all();
        assert_eq!(all.len(), 3);
        assert!(orphans.pop_all().is_empty());
        for retired in all {
            unsafe { retired.reclaim() };
        }
    }
}
