use core::fmt;
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::Ordering;

use portable_atomic::AtomicU128;

/// A pointer paired with a version tag.
///
/// Two tagged pointers are equal only if both the address and the tag match. A location that is
/// updated through [`TaggedPtr::with_next_tag`] therefore never shows the same value twice, even
/// when the allocator hands a freed address out again.
pub struct TaggedPtr<T> {
    ptr: *mut T,
    tag: u64,
}

impl<T> Clone for TaggedPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TaggedPtr<T> {}

impl<T> PartialEq for TaggedPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr && self.tag == other.tag
    }
}

impl<T> Eq for TaggedPtr<T> {}

impl<T> fmt::Debug for TaggedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{:p}, {}>", self.ptr, self.tag)
    }
}

impl<T> Default for TaggedPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> TaggedPtr<T> {
    /// The null pointer with tag 0.
    pub const fn null() -> Self {
        Self {
            ptr: ptr::null_mut(),
            tag: 0,
        }
    }

    pub const fn new(ptr: *mut T, tag: u64) -> Self {
        Self { ptr, tag }
    }

    #[inline]
    pub fn ptr(self) -> *mut T {
        self.ptr
    }

    #[inline]
    pub fn tag(self) -> u64 {
        self.tag
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.ptr.is_null()
    }

    /// Returns `ptr` tagged with the version that follows this one.
    ///
    /// The tag wraps after 2^64 updates of the same location.
    #[inline]
    pub fn with_next_tag(self, ptr: *mut T) -> Self {
        Self {
            ptr,
            tag: self.tag.wrapping_add(1),
        }
    }

    /// Dereferences the pointer part.
    ///
    /// # Safety
    /// The pointee must be alive for `'a`, e.g. because it is protected by a validated hazard
    /// pointer or exclusively owned by the caller.
    #[inline]
    pub unsafe fn as_ref<'a>(self) -> Option<&'a T> {
        self.ptr.as_ref()
    }
}

/// An atomic [`TaggedPtr`]. The address and the tag are loaded, stored and compared as one
/// 128-bit unit.
pub struct AtomicTaggedPtr<T> {
    link: AtomicU128,
    _marker: PhantomData<*mut T>,
}

unsafe impl<T> Sync for AtomicTaggedPtr<T> {}
unsafe impl<T> Send for AtomicTaggedPtr<T> {}

impl<T> Default for AtomicTaggedPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> fmt::Debug for AtomicTaggedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicTaggedPtr")
            .field(&self.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T> AtomicTaggedPtr<T> {
    pub const fn null() -> Self {
        Self {
            link: AtomicU128::new(0),
            _marker: PhantomData,
        }
    }

    pub fn new(init: TaggedPtr<T>) -> Self {
        Self {
            link: AtomicU128::new(compose_u128(init.tag, init.ptr)),
            _marker: PhantomData,
        }
    }

    /// Whether the double-width operations compile to native instructions on this machine.
    /// Otherwise `portable_atomic` falls back to its internal lock-based implementation.
    pub fn is_lock_free() -> bool {
        AtomicU128::is_lock_free()
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> TaggedPtr<T> {
        decompose_u128(self.link.load(order))
    }

    #[inline]
    pub fn store(&self, value: TaggedPtr<T>, order: Ordering) {
        self.link.store(compose_u128(value.tag, value.ptr), order);
    }

    /// Stores `new` if the current value equals `current` in both address and tag.
    ///
    /// On failure returns the value that was observed instead, which the caller uses for its
    /// next attempt.
    #[inline]
    pub fn compare_exchange(
        &self,
        current: TaggedPtr<T>,
        new: TaggedPtr<T>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<TaggedPtr<T>, TaggedPtr<T>> {
        self.link
            .compare_exchange(
                compose_u128(current.tag, current.ptr),
                compose_u128(new.tag, new.ptr),
                success,
                failure,
            )
            .map(decompose_u128)
            .map_err(decompose_u128)
    }
}

#[inline]
fn compose_u128<T>(tag: u64, ptr: *mut T) -> u128 {
    ((tag as u128) << 64) | (ptr as usize as u128)
}

#[inline]
fn decompose_u128<T>(value: u128) -> TaggedPtr<T> {
    TaggedPtr {
        ptr: (value & (u64::MAX as u128)) as usize as *mut T,
        tag: (value >> 64) as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_needs_both_fields() {
        let mut x = 7u32;
        let p: *mut u32 = &mut x;
        assert_eq!(TaggedPtr::new(p, 3), TaggedPtr::new(p, 3));
        assert_ne!(TaggedPtr::new(p, 3), TaggedPtr::new(p, 4));
        assert_ne!(TaggedPtr::new(p, 3), TaggedPtr::new(ptr::null_mut(), 3));
        assert!(TaggedPtr::<u32>::null().is_null());
    }

    #[test]
    fn pack_keeps_address_and_tag() {
        let b = Box::into_raw(Box::new(5u64));
        let atomic = AtomicTaggedPtr::new(TaggedPtr::new(b, u64::MAX - 1));
        let loaded = atomic.load(Ordering::Acquire);
        assert_eq!(loaded.ptr(), b);
        assert_eq!(loaded.tag(), u64::MAX - 1);
        assert_eq!(loaded.with_next_tag(b).with_next_tag(b).tag(), 0);
        drop(unsafe { Box::from_raw(b) });
    }

    #[test]
    fn failed_cas_reports_current() {
        let atomic = AtomicTaggedPtr::<u8>::null();
        let stale = TaggedPtr::new(ptr::null_mut(), 9);
        let err = atomic
            .compare_exchange(
                stale,
                stale.with_next_tag(ptr::null_mut()),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .unwrap_err();
        assert_eq!(err, TaggedPtr::null());
    }

    // A thread snapshots the head, stalls, and meanwhile the node is unlinked, freed and the same
    // address is linked again. The stalled CAS must fail on the tag.
    #[test]
    fn stale_snapshot_after_address_reuse() {
        let node = Box::into_raw(Box::new(1usize));
        let head = AtomicTaggedPtr::new(TaggedPtr::new(node, 0));

        let stale = head.load(Ordering::Acquire);

        // pop: unlink
        let popped = head
            .compare_exchange(
                stale,
                stale.with_next_tag(ptr::null_mut()),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .unwrap();
        assert_eq!(popped, stale);
        let after_pop = head.load(Ordering::Acquire);

        // push: the same address comes back
        head.compare_exchange(
            after_pop,
            after_pop.with_next_tag(node),
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .unwrap();
        let live = head.load(Ordering::Acquire);
        assert_eq!(live.ptr(), stale.ptr());

        let res = head.compare_exchange(
            stale,
            stale.with_next_tag(ptr::null_mut()),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        assert_eq!(res, Err(live));
        assert_eq!(head.load(Ordering::Acquire).ptr(), node);
        drop(unsafe { Box::from_raw(node) });
    }
}
