use core::fmt;
use core::sync::atomic::{fence, Ordering};

use log::{debug, trace, warn};

use crate::domain::Domain;
use crate::retire::RetireList;
use crate::tag::{AtomicTaggedPtr, TaggedPtr};

/// Registration of one thread in a [`Domain`]: its hazard slot and its retire list.
///
/// Dropping the handle deregisters the thread. Retired nodes that are still protected at that
/// point are handed to the domain and reclaimed by a later [`Thread::try_reclaim`] of any thread,
/// or when the domain itself is dropped.
pub struct Thread<'domain> {
    domain: &'domain Domain,
    slot: usize,
    retired: RetireList,
    retired_since_scan: usize,
}

impl<'domain> Thread<'domain> {
    pub(crate) fn new(domain: &'domain Domain, slot: usize) -> Self {
        Self {
            domain,
            slot,
            retired: RetireList::default(),
            retired_since_scan: 0,
        }
    }

    pub fn domain(&self) -> &'domain Domain {
        self.domain
    }

    /// Index of the hazard slot held by this thread.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Announces `ptr` in this thread's slot.
    ///
    /// This alone does not make dereferencing `ptr` safe: the node may have been retired and
    /// scanned before the announcement became visible. Use [`Thread::try_protect`] or validate
    /// against the source location afterwards.
    #[inline]
    pub fn protect_raw<T>(&self, ptr: *mut T) {
        self.domain.slots.publish(self.slot, ptr as *mut u8);
    }

    /// Drops the current announcement, if any.
    #[inline]
    pub fn reset_protection(&self) {
        self.domain.slots.clear(self.slot);
    }

    /// The pointer currently announced by this thread.
    pub fn protected(&self) -> *mut u8 {
        self.domain.slots.get(self.slot)
    }

    /// Checks that `src` still holds `expected`. If not, returns the current value.
    ///
    /// If "`src` still holds `expected`" implies that the node is not retired, `Ok(())` means an
    /// announcement made before this call is validated.
    #[inline]
    pub fn validate<T>(
        expected: TaggedPtr<T>,
        src: &AtomicTaggedPtr<T>,
    ) -> Result<(), TaggedPtr<T>> {
        // Orders the announcement before the re-read; pairs with the fence in `try_reclaim`.
        fence(Ordering::SeqCst);
        let current = src.load(Ordering::Acquire);
        if current == expected {
            Ok(())
        } else {
            Err(current)
        }
    }

    /// Announces `expected.ptr()`, then re-reads `src`.
    pub fn try_protect<T>(
        &self,
        expected: TaggedPtr<T>,
        src: &AtomicTaggedPtr<T>,
    ) -> Result<(), TaggedPtr<T>> {
        self.protect_raw(expected.ptr());
        Self::validate(expected, src)
    }

    /// Loads `src` and protects the loaded pointer, retrying until the announcement is validated.
    pub fn protect<T>(&self, src: &AtomicTaggedPtr<T>) -> TaggedPtr<T> {
        let mut current = src.load(Ordering::Relaxed);
        while let Err(new) = self.try_protect(current, src) {
            current = new;
        }
        current
    }

    /// Defers freeing `ptr` until no hazard slot announces it, and returns its retire sequence
    /// number.
    ///
    /// Scans the domain once `retire_threshold` nodes were retired since the last scan. Nodes kept
    /// by a scan do not count towards the next one.
    ///
    /// # Safety
    /// * `ptr` was allocated as `Box<T>` (or with `Layout::new::<T>()`) and is retired only once.
    /// * `ptr` is no longer reachable from the shared structure.
    pub unsafe fn retire<T>(&mut self, ptr: *mut T) -> u64 {
        let seq = self.retired.push(ptr);
        self.domain.stats.incr_garb(1);
        self.retired_since_scan += 1;
        if self.retired_since_scan >= self.domain.config().retire_threshold {
            self.try_reclaim();
        }
        seq
    }

    /// Frees every node in the local retire list, plus any adopted orphans, that is not announced
    /// by a hazard slot. Returns the number of freed nodes.
    pub fn try_reclaim(&mut self) -> usize {
        self.retired_since_scan = 0;
        let orphans = self.domain.orphans.pop_all();
        if !orphans.is_empty() {
            self.retired.adopt(orphans);
        }
        if self.retired.is_empty() {
            return 0;
        }

        fence(Ordering::SeqCst);
        let guarded = self.domain.collect_guarded_ptrs();
        let scanned = self.retired.len();
        let freed = unsafe { self.retired.reclaim_unguarded(&guarded) };
        self.domain.stats.decr_garb(freed);
        trace!(
            "slot {}: scanned {}, freed {}, kept {}",
            self.slot,
            scanned,
            freed,
            scanned - freed
        );
        freed
    }

    /// Number of nodes retired by (or adopted into) this thread and not yet freed.
    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }
}

impl Drop for Thread<'_> {
    fn drop(&mut self) {
        self.reset_protection();
        self.try_reclaim();
        if !self.retired.is_empty() {
            warn!(
                "slot {} deregisters with {} protected nodes (oldest #{:?}); handing them to the domain",
                self.slot,
                self.retired.len(),
                self.retired.oldest_seq()
            );
            self.domain.orphans.push(self.retired.take_all());
        }
        self.domain.slots.release(self.slot);
        debug!("deregistered hazard slot {}", self.slot);
    }
}

impl fmt::Debug for Thread<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("domain", &(self.domain as *const Domain))
            .field("slot", &self.slot)
            .field("retired", &format!("[...; {}]", self.retired.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use core::ptr;

    use crate::{AtomicTaggedPtr, Domain, DomainConfig, TaggedPtr, Thread};

    #[test]
    fn try_protect_detects_change() {
        let domain = Domain::default();
        let t = domain.register().unwrap();
        let a = Box::into_raw(Box::new(1u32));
        let src = AtomicTaggedPtr::new(TaggedPtr::new(a, 0));

        let seen = src.load(core::sync::atomic::Ordering::Relaxed);
        src.store(seen.with_next_tag(a), core::sync::atomic::Ordering::Release);
        assert_eq!(t.try_protect(seen, &src), Err(TaggedPtr::new(a, 1)));

        let cur = t.protect(&src);
        assert_eq!(cur, TaggedPtr::new(a, 1));
        assert_eq!(t.protected(), a as *mut u8);
        assert!(domain.is_protected(a));

        t.reset_protection();
        assert!(!domain.is_protected(a));
        assert!(Thread::validate(cur, &src).is_ok());
        drop(unsafe { Box::from_raw(a) });
    }

    #[test]
    fn threshold_triggers_reclaim() {
        let domain = Domain::new(DomainConfig::default().retire_threshold(4)).unwrap();
        let mut t = domain.register().unwrap();
        for i in 0..3u64 {
            assert_eq!(unsafe { t.retire(Box::into_raw(Box::new(i))) }, i);
        }
        assert_eq!(t.retired_len(), 3);
        assert_eq!(domain.garbage_count(), 3);

        unsafe { t.retire(Box::into_raw(Box::new(3u64))) };
        assert_eq!(t.retired_len(), 0);
        assert_eq!(domain.garbage_count(), 0);
        assert_eq!(domain.reclaimed_count(), 4);
    }

    #[test]
    fn kept_nodes_do_not_retrigger_scan() {
        let domain = Domain::new(DomainConfig::default().retire_threshold(2)).unwrap();
        let mut t = domain.register().unwrap();
        let guard = domain.register().unwrap();
        let pinned = Box::into_raw(Box::new(0u64));
        guard.protect_raw(pinned);

        unsafe { t.retire(pinned) };
        unsafe { t.retire(Box::into_raw(Box::new(1u64))) };
        // Scanned: `pinned` is kept.
        assert_eq!(t.retired_len(), 1);
        assert_eq!(domain.reclaimed_count(), 1);

        // At the threshold again, but only one retirement since the scan.
        unsafe { t.retire(Box::into_raw(Box::new(2u64))) };
        assert_eq!(t.retired_len(), 2);
        assert_eq!(domain.reclaimed_count(), 1);

        unsafe { t.retire(Box::into_raw(Box::new(3u64))) };
        assert_eq!(t.retired_len(), 1);
        assert_eq!(domain.reclaimed_count(), 3);

        guard.reset_protection();
        assert_eq!(t.try_reclaim(), 1);
    }

    #[test]
    fn own_announcement_blocks_reclaim() {
        let domain = Domain::default();
        let mut t = domain.register().unwrap();
        let node = Box::into_raw(Box::new(7u8));
        t.protect_raw(node);
        unsafe { t.retire(node) };
        assert_eq!(t.try_reclaim(), 0);
        t.reset_protection();
        assert_eq!(t.try_reclaim(), 1);
        assert_eq!(t.protected(), ptr::null_mut());
    }

    #[test]
    fn orphans_are_adopted() {
        let domain = Domain::default();
        let mut leaving = domain.register().unwrap();
        let guard = domain.register().unwrap();
        let node = Box::into_raw(Box::new(String::from("orphan")));
        guard.protect_raw(node);
        unsafe { leaving.retire(node) };
        domain.deregister(leaving);
        assert_eq!(domain.garbage_count(), 1);

        let mut adopter = domain.register().unwrap();
        assert_eq!(adopter.try_reclaim(), 0);
        assert_eq!(adopter.retired_len(), 1);

        guard.reset_protection();
        assert_eq!(adopter.try_reclaim(), 1);
        assert_eq!(domain.garbage_count(), 0);
    }
}
