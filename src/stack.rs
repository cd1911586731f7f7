use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ptr;
use core::sync::atomic::Ordering;
use std::alloc::{alloc, Layout};

use crossbeam_utils::{Backoff, CachePadded};
use hazard::{AtomicTaggedPtr, Domain, TaggedPtr, Thread};

use crate::error::AllocError;

/// Treiber's lock-free stack, reclaimed with hazard pointers.
///
/// The head is a tagged pointer whose tag advances on every successful push and pop, so a stale
/// snapshot never passes a CAS even if its address was freed and allocated again. Popping
/// requires a [`Thread`] registered in the stack's [`Domain`]; popped nodes are retired through
/// it.
///
/// Dropping the stack frees the nodes still linked into it. Nodes popped earlier stay in the retire
/// lists of the threads that popped them, and are freed by those threads' next reclamation, when
/// they deregister, or at the latest when the domain is dropped.
pub struct LockFreeStack<'domain, T> {
    head: CachePadded<AtomicTaggedPtr<Node<T>>>,
    domain: &'domain Domain,
    _marker: PhantomData<T>,
}

struct Node<T> {
    data: ManuallyDrop<T>,
    next: *mut Node<T>,
}

unsafe impl<T: Send> Send for LockFreeStack<'_, T> {}
unsafe impl<T: Send> Sync for LockFreeStack<'_, T> {}

/// Steps of one `pop`. `Success` and `Empty` are terminal.
#[derive(Debug)]
enum PopState<T> {
    ReadHead,
    PublishHazard(TaggedPtr<Node<T>>),
    RevalidateHead(TaggedPtr<Node<T>>),
    ComputeNext(TaggedPtr<Node<T>>),
    AttemptCas {
        old: TaggedPtr<Node<T>>,
        new: TaggedPtr<Node<T>>,
    },
    Success(TaggedPtr<Node<T>>),
    Empty,
}

impl<'domain, T> LockFreeStack<'domain, T> {
    pub fn new(domain: &'domain Domain) -> Self {
        Self {
            head: CachePadded::new(AtomicTaggedPtr::null()),
            domain,
            _marker: PhantomData,
        }
    }

    pub fn domain(&self) -> &'domain Domain {
        self.domain
    }

    fn alloc_node(value: T) -> Result<*mut Node<T>, AllocError<T>> {
        // `Node` is never zero-sized because of `next`.
        let node = unsafe { alloc(Layout::new::<Node<T>>()) } as *mut Node<T>;
        if node.is_null() {
            return Err(AllocError(value));
        }
        unsafe {
            node.write(Node {
                data: ManuallyDrop::new(value),
                next: ptr::null_mut(),
            })
        };
        Ok(node)
    }

    /// Pushes `value` on top of the stack.
    ///
    /// Fails only if the node cannot be allocated, in which case the value is handed back and the
    /// stack is unchanged.
    pub fn push(&self, value: T) -> Result<(), AllocError<T>> {
        let node = Self::alloc_node(value)?;
        let backoff = Backoff::new();
        let mut old = self.head.load(Ordering::Relaxed);
        loop {
            // `node` is private to this thread until the CAS succeeds.
            unsafe { (*node).next = old.ptr() };
            match self.head.compare_exchange(
                old,
                old.with_next_tag(node),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(current) => {
                    old = current;
                    backoff.spin();
                }
            }
        }
    }

    /// Attempts to pop the top element from the stack.
    ///
    /// Returns `None` if the stack is empty.
    ///
    /// # Panics
    /// If `thread` is not registered in the stack's domain. Its announcements would be invisible
    /// to the threads reclaiming this stack's nodes.
    pub fn pop(&self, thread: &mut Thread<'_>) -> Option<T> {
        assert!(
            ptr::eq(thread.domain(), self.domain),
            "thread is registered in another domain"
        );
        let backoff = Backoff::new();
        let mut state = PopState::ReadHead;
        loop {
            state = match self.step(state, thread) {
                PopState::Success(old) => {
                    let node = old.ptr();
                    // SAFETY: the unlinking CAS succeeded, so no other thread takes this value.
                    let data = unsafe { ManuallyDrop::take(&mut (*node).data) };
                    thread.reset_protection();
                    unsafe { thread.retire(node) };
                    return Some(data);
                }
                PopState::Empty => return None,
                PopState::ReadHead => {
                    backoff.spin();
                    PopState::ReadHead
                }
                next => next,
            };
        }
    }

    fn step(&self, state: PopState<T>, thread: &Thread<'_>) -> PopState<T> {
        match state {
            PopState::ReadHead => {
                let old = self.head.load(Ordering::Acquire);
                if old.is_null() {
                    PopState::Empty
                } else {
                    PopState::PublishHazard(old)
                }
            }
            PopState::PublishHazard(old) => {
                thread.protect_raw(old.ptr());
                PopState::RevalidateHead(old)
            }
            PopState::RevalidateHead(old) => match Thread::validate(old, &*self.head) {
                Ok(()) => PopState::ComputeNext(old),
                Err(_) => {
                    thread.reset_protection();
                    PopState::ReadHead
                }
            },
            PopState::ComputeNext(old) => {
                // SAFETY: `old` is announced and was still the head after the announcement.
                let next = unsafe { (*old.ptr()).next };
                PopState::AttemptCas {
                    old,
                    new: old.with_next_tag(next),
                }
            }
            PopState::AttemptCas { old, new } => {
                match self
                    .head
                    .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
                {
                    Ok(_) => PopState::Success(old),
                    Err(_) => {
                        thread.reset_protection();
                        PopState::ReadHead
                    }
                }
            }
            terminal @ (PopState::Success(_) | PopState::Empty) => terminal,
        }
    }

    /// Whether the stack was empty at the time of the read. Advisory only: a following `pop`
    /// may still return `None`, or find an element pushed in between.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed).is_null()
    }
}

impl<T> Drop for LockFreeStack<'_, T> {
    fn drop(&mut self) {
        let mut curr = self.head.load(Ordering::Relaxed).ptr();
        while !curr.is_null() {
            let mut node = unsafe { Box::from_raw(curr) };
            unsafe { ManuallyDrop::drop(&mut node.data) };
            curr = node.next;
        }
    }
}
