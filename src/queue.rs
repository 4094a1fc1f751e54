//! An intrusive lock-free list of raw nodes that is only ever consumed as a
//! whole.
//!
//! Nodes are prepended with a *compare-and-swap* loop and removed all at once
//! with a single *swap*, so no node is ever unlinked while another thread may
//! still traverse it and the list needs no reclamation scheme of its own.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::sanitize;

////////////////////////////////////////////////////////////////////////////////////////////////////
// RawNode (trait)
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A node type with an intrusive `next` link that is accessed through raw
/// pointers.
pub(crate) trait RawNode {
    /// Returns the `next` link of `node`.
    ///
    /// # Safety
    ///
    /// `node` must be non-null, valid and not concurrently mutated.
    unsafe fn next(node: *mut Self) -> *mut Self;

    /// Sets the `next` link of `node`.
    ///
    /// # Safety
    ///
    /// `node` must be non-null, valid and exclusively owned by the caller.
    unsafe fn set_next(node: *mut Self, next: *mut Self);
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// RawQueue
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A lock-free singly linked list of raw nodes, newest first.
#[derive(Debug)]
pub(crate) struct RawQueue<N> {
    head: AtomicPtr<N>,
}

/********** impl inherent *************************************************************************/

impl<N> RawQueue<N> {
    /// Creates a new empty `RawQueue`.
    #[inline]
    pub const fn new() -> Self {
        Self { head: AtomicPtr::new(ptr::null_mut()) }
    }

    /// Returns `true` if the queue is currently empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed).is_null()
    }

    /// Detaches all nodes and leaves the queue empty.
    ///
    /// The caller becomes the exclusive owner of the returned chain of nodes.
    #[inline]
    pub fn take_all(&self) -> *mut N {
        // this avoids the swap if the queue is empty
        if self.is_empty() {
            return ptr::null_mut();
        }

        // (QUE:1) this `Acquire` swap synchronizes-with the `Release` CAS in (QUE:2)
        self.head.swap(ptr::null_mut(), Ordering::Acquire)
    }

    /// Detaches all nodes without synchronization, exclusive access is
    /// guaranteed by the `&mut self` receiver.
    #[inline]
    pub fn take_all_unsync(&mut self) -> *mut N {
        let head = self.head.get_mut();
        let first = *head;
        *head = ptr::null_mut();
        first
    }
}

impl<N: RawNode> RawQueue<N> {
    /// Prepends the chain of nodes formed by `first` and `last`.
    ///
    /// # Safety
    ///
    /// `first` and `last` must be the head and the tail of a consecutively
    /// linked chain of nodes (`first == last` for a single node).
    /// Both must be non-null and the chain must be exclusively owned by the
    /// caller.
    #[inline]
    pub unsafe fn push_many(&self, (first, last): (*mut N, *mut N)) {
        let mut head = self.head.load(sanitize::RELAXED_LOAD);
        loop {
            N::set_next(last, head);

            // (QUE:2) this `Release` CAS synchronizes-with the `Acquire` swap in (QUE:1)
            match self.head.compare_exchange_weak(
                head,
                first,
                sanitize::RELEASE_SUCCESS,
                sanitize::RELEASE_FAIL,
            ) {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }
}
