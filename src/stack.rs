//! The lock-free (Treiber) stack.

use core::fmt;
use core::mem::ManuallyDrop;
use core::ptr::{self, NonNull};
use core::sync::atomic::{
    AtomicPtr,
    Ordering::{AcqRel, Acquire, Relaxed, Release},
};
use std::sync::Arc;

use crossbeam_utils::Backoff;
use tracing::trace;

use crate::domain::Domain;
use crate::error::Error;
use crate::global;
use crate::guard::HazardGuard;
use crate::retired::Retired;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Stack
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An unbounded lock-free LIFO stack.
///
/// Nodes removed by [`pop`][Stack::pop] are only deallocated once no other
/// thread's hazard slot in the stack's [`Domain`] protects them.
pub struct Stack<T> {
    head: AtomicPtr<Node<T>>,
    domain: Arc<Domain>,
}

/********** impl Send + Sync **********************************************************************/

unsafe impl<T: Send> Send for Stack<T> {}
unsafe impl<T: Send> Sync for Stack<T> {}

/********** impl inherent *************************************************************************/

impl<T> Stack<T> {
    /// Creates a new empty stack bound to the process-wide environment.
    ///
    /// # Panics
    ///
    /// Panics if [`initialize_environment`][crate::initialize_environment]
    /// has not been called before.
    #[inline]
    pub fn new() -> Self {
        let domain = global::environment()
            .unwrap_or_else(|| panic!("stack created before the hazard environment was initialized"));
        Self::with_domain(domain)
    }

    /// Creates a new empty stack bound to `domain`.
    #[inline]
    pub fn with_domain(domain: Arc<Domain>) -> Self {
        Self { head: AtomicPtr::new(ptr::null_mut()), domain }
    }

    /// Returns the domain the stack is bound to.
    #[inline]
    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    /// Returns `true` if the stack is currently empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.load(Acquire).is_null()
    }

    /// Pushes `elem` on top of the stack.
    #[inline]
    pub fn push(&self, elem: T) {
        let node = Box::into_raw(Box::new(Node::new(elem)));
        let backoff = Backoff::new();

        let mut head = self.head.load(Relaxed);
        loop {
            // the node is not yet visible to other threads
            unsafe { (*node).next.store(head, Relaxed) };

            // (STA:1) this `Release` CAS synchronizes-with the `SeqCst` load in (GUA:1) and the
            // `AcqRel` CAS in (STA:2)
            match self.head.compare_exchange_weak(head, node, Release, Relaxed) {
                Ok(_) => return,
                Err(actual) => {
                    head = actual;
                    self.domain.backoff(&backoff);
                }
            }
        }
    }

    /// Pops the top element off the stack.
    ///
    /// The calling thread's hazard slot is used for the duration of the call.
    /// If the thread already holds a [`HazardGuard`] for the stack's domain,
    /// that guard's slot is reused and its published address is cleared when
    /// this returns, otherwise a slot is claimed and released again.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::CapacityExceeded`] if the calling thread owns no
    /// hazard slot and the stack's domain has no free one.
    #[inline]
    pub fn pop(&self) -> Result<Option<T>, Error> {
        let guard = self.domain.acquire_guard()?;
        Ok(self.pop_with(&guard))
    }

    /// Pops the top element off the stack, protecting the head node with
    /// `guard`.
    ///
    /// The guard is left cleared when this returns.
    ///
    /// # Panics
    ///
    /// Panics if `guard` was not acquired from the stack's domain.
    pub fn pop_with(&self, guard: &HazardGuard<'_>) -> Option<T> {
        assert!(
            ptr::eq(guard.domain(), &*self.domain),
            "hazard guard belongs to a different domain than the stack"
        );

        let backoff = Backoff::new();
        let node = loop {
            let head = guard.protect(&self.head);
            if head.is_null() {
                return None;
            }

            // safety: `head` is protected and validated, so it can not have been reclaimed
            let next = unsafe { (*head).next.load(Relaxed) };

            // (STA:2) this `AcqRel` CAS synchronizes-with the `Release` CAS in (STA:1)
            if self.head.compare_exchange_weak(head, next, AcqRel, Relaxed).is_ok() {
                break head;
            }

            guard.clear();
            self.domain.backoff(&backoff);
        };

        guard.clear();

        // safety: the successful CAS makes this thread the only one to take the element, other
        // threads may only still read the `next` field
        let elem = unsafe { ptr::read(&*(*node).elem) };

        if self.domain.is_hazardous(node) {
            trace!(node = ?node, "popped node still protected, retiring");
            // safety: dropping a node never drops its element
            unsafe { self.domain.retire_record(Retired::new_unchecked(NonNull::new_unchecked(node))) };
        } else {
            // safety: no thread protects the node and it is no longer reachable
            drop(unsafe { Box::from_raw(node) });
        }

        self.domain.increase_ops_count();
        Some(elem)
    }
}

/********** impl Default **************************************************************************/

impl<T> Default for Stack<T> {
    /// Creates a new empty stack bound to the process-wide environment.
    ///
    /// # Panics
    ///
    /// Panics if [`initialize_environment`][crate::initialize_environment]
    /// has not been called before.
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/********** impl Debug ****************************************************************************/

impl<T> fmt::Debug for Stack<T> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Stack")
            .field("head", &self.head.load(Relaxed))
            .field("domain", &(&*self.domain as *const Domain))
            .finish()
    }
}

/********** impl Drop *****************************************************************************/

impl<T> Drop for Stack<T> {
    fn drop(&mut self) {
        let mut curr = *self.head.get_mut();

        // it's necessary to manually drop all elements iteratively
        while !curr.is_null() {
            let mut node = unsafe { Box::from_raw(curr) };
            unsafe { ManuallyDrop::drop(&mut node.elem) };
            curr = *node.next.get_mut();
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Node
////////////////////////////////////////////////////////////////////////////////////////////////////

struct Node<T> {
    elem: ManuallyDrop<T>,
    next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    #[inline]
    fn new(elem: T) -> Self {
        Self { elem: ManuallyDrop::new(elem), next: AtomicPtr::new(ptr::null_mut()) }
    }
}
