//! `push` hands the value back and leaves the stack unchanged when the node cannot be allocated.
//! The global allocator below fails the next allocation of an armed size.

use std::alloc::{GlobalAlloc, Layout, System};
use std::mem::size_of;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use hp_stack::{Domain, LockFreeStack};

struct FailOnce;

static FAIL_SIZE: AtomicUsize = AtomicUsize::new(0);

unsafe impl GlobalAlloc for FailOnce {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size();
        if size != 0
            && FAIL_SIZE
                .compare_exchange(size, 0, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return ptr::null_mut();
        }
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static ALLOC: FailOnce = FailOnce;

type Payload = [u64; 37];

#[test]
fn push_hands_value_back() {
    // A node is the payload plus the `next` pointer.
    let node_size = size_of::<Payload>() + size_of::<usize>();

    let domain = Domain::default();
    let stack = LockFreeStack::<Payload>::new(&domain);
    let mut handle = domain.register().unwrap();
    stack.push([1; 37]).unwrap();

    FAIL_SIZE.store(node_size, Ordering::SeqCst);
    let err = stack.push([2; 37]).unwrap_err();
    assert_eq!(FAIL_SIZE.load(Ordering::SeqCst), 0);
    assert_eq!(err.to_string(), "failed to allocate a stack node");
    assert_eq!(err.into_inner(), [2; 37]);

    // The next allocation succeeds again.
    stack.push([3; 37]).unwrap();
    assert_eq!(stack.pop(&mut handle), Some([3; 37]));
    assert_eq!(stack.pop(&mut handle), Some([1; 37]));
    assert_eq!(stack.pop(&mut handle), None);
}
