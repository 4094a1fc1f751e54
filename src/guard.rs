use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::domain::Domain;
use crate::hazard::{HazardSlot, ThreadToken};

////////////////////////////////////////////////////////////////////////////////////////////////////
// HazardGuard
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Handle to the calling thread's hazard slot of a [`Domain`].
///
/// A guard is obtained with [`Domain::acquire_guard`] and belongs to the
/// acquiring thread, it can not be sent to another thread.
/// All guards a thread holds on the same domain share one slot, which is
/// released when the last of them is dropped, including during unwinding.
/// Afterwards the slot may be claimed by any other thread.
pub struct HazardGuard<'d> {
    domain: &'d Domain,
    slot: &'d HazardSlot,
    token: ThreadToken,
    // guards are bound to the thread that claimed the slot
    _not_send: PhantomData<*mut ()>,
}

/********** impl inherent *************************************************************************/

impl<'d> HazardGuard<'d> {
    #[inline]
    pub(crate) fn new(domain: &'d Domain, slot: &'d HazardSlot, token: ThreadToken) -> Self {
        debug_assert!(slot.is_owned_by(token));
        Self { domain, slot, token, _not_send: PhantomData }
    }

    /// Returns the domain this guard was claimed from.
    #[inline]
    pub fn domain(&self) -> &'d Domain {
        self.domain
    }

    /// Publishes `ptr` as the address the current thread is about to
    /// de-reference.
    ///
    /// Publishing only protects `ptr` from reclamation if the caller
    /// afterwards validates that `ptr` is still reachable, see
    /// [`protect`][HazardGuard::protect].
    #[inline]
    pub fn publish<T>(&self, ptr: NonNull<T>) {
        self.slot.set_protected(ptr.cast());
    }

    /// Clears the published address.
    #[inline]
    pub fn clear(&self) {
        self.slot.clear(Ordering::Release);
    }

    /// Loads the current value of `atomic` and protects it from reclamation.
    ///
    /// The value is read, published and read again until both reads agree,
    /// at which point the returned pointer is safe to de-reference for as
    /// long as it stays published.
    /// A `null` pointer clears the guard and is returned as is.
    #[inline]
    pub fn protect<T>(&self, atomic: &AtomicPtr<T>) -> *mut T {
        let mut ptr = atomic.load(Ordering::Relaxed);
        loop {
            match NonNull::new(ptr) {
                None => {
                    self.clear();
                    return ptr;
                }
                Some(protect) => {
                    self.publish(protect);
                    // (GUA:1) this `SeqCst` load is ordered after the `SeqCst` store (HAZ:3), so a
                    // reclaiming thread either sees the hazard or this load sees its unlink
                    let reread = atomic.load(Ordering::SeqCst);
                    if reread == ptr {
                        return ptr;
                    }

                    ptr = reread;
                }
            }
        }
    }

    /// Gives up the guard explicitly, this is equivalent to dropping it.
    #[inline]
    pub fn release(self) {}

    #[cfg(test)]
    pub(crate) fn slot(&self) -> &'d HazardSlot {
        self.slot
    }
}

/********** impl Debug ****************************************************************************/

impl fmt::Debug for HazardGuard<'_> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HazardGuard")
            .field("slot", &(self.slot as *const HazardSlot))
            .field("protected", &self.slot.protected(Ordering::Relaxed).map(|p| p.as_ptr()))
            .finish()
    }
}

/********** impl Drop *****************************************************************************/

impl Drop for HazardGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        if !self.slot.remove_handle(self.token) && !std::thread::panicking() {
            panic!("hazard slot released by a thread that does not own it (double release)");
        }
    }
}

#[cfg(test)]
mod tests {
    use core::ptr::{self, NonNull};
    use core::sync::atomic::{AtomicPtr, Ordering};
    use std::thread;

    use matches::assert_matches;

    use crate::domain::Domain;
    use crate::error::Error;

    #[test]
    fn publish_and_clear() {
        let domain = Domain::new(1).unwrap();
        let guard = domain.acquire_guard().unwrap();
        let mut value = 5;
        let ptr = NonNull::from(&mut value);

        guard.publish(ptr);
        assert!(domain.is_hazardous(ptr.as_ptr()));
        guard.clear();
        assert!(!domain.is_hazardous(ptr.as_ptr()));
    }

    #[test]
    fn protect_null() {
        let domain = Domain::new(1).unwrap();
        let guard = domain.acquire_guard().unwrap();
        let atomic: AtomicPtr<i32> = AtomicPtr::new(ptr::null_mut());
        assert!(guard.protect(&atomic).is_null());
        assert!(guard.slot().protected(Ordering::Relaxed).is_none());
    }

    #[test]
    fn protect_value() {
        let domain = Domain::new(1).unwrap();
        let guard = domain.acquire_guard().unwrap();
        let raw = Box::into_raw(Box::new(3));
        let atomic = AtomicPtr::new(raw);

        let protected = guard.protect(&atomic);
        assert_eq!(protected, raw);
        assert!(domain.is_hazardous(raw));
        assert_eq!(unsafe { *protected }, 3);

        guard.clear();
        drop(unsafe { Box::from_raw(raw) });
    }

    #[test]
    fn drop_releases_slot() {
        let domain = Domain::new(0).unwrap();
        let guard = domain.acquire_guard().unwrap();
        let res = thread::scope(|scope| scope.spawn(|| domain.acquire_guard().map(drop)).join());
        assert_matches!(res.unwrap(), Err(Error::CapacityExceeded { capacity: 1 }));

        guard.release();
        assert_eq!(domain.registered_threads(), 0);
        let res = thread::scope(|scope| scope.spawn(|| domain.acquire_guard().map(drop)).join());
        assert!(res.unwrap().is_ok());
    }

    #[test]
    fn same_thread_shares_slot() {
        let domain = Domain::new(0).unwrap();
        let outer = domain.acquire_guard().unwrap();
        let inner = domain.acquire_guard().unwrap();
        assert!(ptr::eq(outer.slot(), inner.slot()));
        assert_eq!(domain.registered_threads(), 1);

        let mut value = 1;
        inner.publish(NonNull::from(&mut value));
        assert!(domain.is_hazardous(&value as *const i32));

        // the slot stays claimed and keeps its protection until the last guard is gone
        drop(inner);
        assert_eq!(domain.registered_threads(), 1);
        assert!(domain.is_hazardous(&value as *const i32));
        assert!(domain.acquire_guard().is_ok());

        drop(outer);
        assert_eq!(domain.registered_threads(), 0);
        assert!(!domain.is_hazardous(&value as *const i32));
    }
}
