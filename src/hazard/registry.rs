use std::sync::atomic::{self, Ordering};

use crossbeam_utils::CachePadded;

use crate::error::Error;
use crate::hazard::{HazardSlot, ProtectedPtr, ThreadToken};
use crate::sanitize;

/// Fixed-capacity table of hazard slots, one for each concurrently registered
/// thread.
///
/// The capacity is decided once at construction and never changes, so slots
/// can be handed out as plain references for the lifetime of the registry.
#[derive(Debug)]
pub(crate) struct HazardRegistry {
    slots: Box<[CachePadded<HazardSlot>]>,
}

impl HazardRegistry {
    /// Creates a registry with `max_threads + 1` unowned slots.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ResourceExhausted`] if the slot table can not be
    /// allocated.
    pub fn new(max_threads: usize) -> Result<Self, Error> {
        const WHAT: &str = "hazard registry";

        let capacity = max_threads.checked_add(1).ok_or(Error::ResourceExhausted { what: WHAT })?;
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity).map_err(|_| Error::ResourceExhausted { what: WHAT })?;
        slots.extend((0..capacity).map(|_| CachePadded::new(HazardSlot::new())));

        Ok(Self { slots: slots.into_boxed_slice() })
    }

    /// Returns the total number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of slots currently owned by some thread.
    #[inline]
    pub fn owned(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.is_empty()).count()
    }

    /// Returns the slot currently owned by `token`, if there is one.
    #[inline]
    pub fn find_owned(&self, token: ThreadToken) -> Option<&HazardSlot> {
        self.slots.iter().map(|slot| &**slot).find(|slot| slot.is_owned_by(token))
    }

    /// Scans the registry from the front and claims the first unowned slot for
    /// `token`.
    ///
    /// Returns `None` if every slot is owned by a live thread.
    #[inline]
    pub fn claim(&self, token: ThreadToken) -> Option<&HazardSlot> {
        self.slots.iter().map(|slot| &**slot).find(|slot| slot.try_claim(token))
    }

    /// Returns `true` if any slot currently protects `ptr`.
    ///
    /// A `true` result is authoritative, a `false` result only holds for
    /// threads that have not yet validated their reads of `ptr`.
    #[inline]
    pub fn is_hazardous(&self, ptr: *const ()) -> bool {
        if ptr.is_null() {
            return false;
        }

        // (REG:1) this `SeqCst` fence establishes a total order with the `SeqCst` stores (HAZ:3)
        // and the `SeqCst` loads (GUA:1), so any protection that is validated after this point
        // must also fail its validation
        atomic::fence(Ordering::SeqCst);
        self.slots.iter().any(|slot| match slot.protected(sanitize::RELAXED_LOAD) {
            Some(protected) => protected.as_ptr() == ptr,
            None => false,
        })
    }

    /// Collects all currently protected addresses into the supplied `Vec` and
    /// sorts it, so it can be binary searched.
    #[inline]
    pub fn collect_protected(&self, vec: &mut Vec<ProtectedPtr>) {
        vec.clear();

        // (REG:2) this `SeqCst` fence has the same purpose as (REG:1)
        atomic::fence(Ordering::SeqCst);
        vec.extend(self.slots.iter().filter_map(|slot| slot.protected(sanitize::RELAXED_LOAD)));
        vec.sort_unstable();
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;
    use std::sync::mpsc;
    use std::thread;

    use matches::assert_matches;

    use super::HazardRegistry;
    use crate::error::Error;
    use crate::hazard::ThreadToken;

    #[test]
    fn capacity() {
        let registry = HazardRegistry::new(3).unwrap();
        assert_eq!(registry.capacity(), 4);
        assert_eq!(registry.owned(), 0);
        assert_matches!(HazardRegistry::new(usize::MAX), Err(Error::ResourceExhausted { .. }));
    }

    #[test]
    fn claim_until_exhausted() {
        let token = ThreadToken::current();
        let registry = HazardRegistry::new(1).unwrap();

        let first = registry.claim(token).unwrap();
        let second = registry.claim(token).unwrap();
        assert!(!std::ptr::eq(first, second));
        assert!(registry.claim(token).is_none());
        assert_eq!(registry.owned(), 2);

        assert!(first.release(token));
        let third = registry.claim(token).unwrap();
        assert!(std::ptr::eq(first, third), "released slots must be reusable");
    }

    #[test]
    fn find_owned() {
        let token = ThreadToken::current();
        let registry = HazardRegistry::new(1).unwrap();
        assert!(registry.find_owned(token).is_none());

        let slot = registry.claim(token).unwrap();
        assert!(std::ptr::eq(registry.find_owned(token).unwrap(), slot));

        let other = thread::spawn(ThreadToken::current).join().unwrap();
        assert!(registry.find_owned(other).is_none());

        assert!(slot.release(token));
        assert!(registry.find_owned(token).is_none());
    }

    #[test]
    fn hazard_scan() {
        let token = ThreadToken::current();
        let registry = HazardRegistry::new(2).unwrap();
        let (mut a, mut b) = (1, 2);
        let (ptr_a, ptr_b) = (NonNull::from(&mut a).cast::<()>(), NonNull::from(&mut b).cast::<()>());

        assert!(!registry.is_hazardous(std::ptr::null()));
        assert!(!registry.is_hazardous(ptr_a.as_ptr()));

        let slot = registry.claim(token).unwrap();
        slot.set_protected(ptr_a);
        assert!(registry.is_hazardous(ptr_a.as_ptr()));
        assert!(!registry.is_hazardous(ptr_b.as_ptr()));

        let mut vec = Vec::new();
        registry.collect_protected(&mut vec);
        assert_eq!(vec.len(), 1);
        assert_eq!(vec[0].as_ptr(), ptr_a.as_ptr() as *const ());

        slot.clear(std::sync::atomic::Ordering::Release);
        assert!(!registry.is_hazardous(ptr_a.as_ptr()));
    }

    #[test]
    fn foreign_hazard_is_visible() {
        let registry = HazardRegistry::new(2).unwrap();
        let value = Box::new(7u64);
        let addr = &*value as *const u64 as usize;

        let (published_tx, published_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        thread::scope(|scope| {
            let registry = &registry;
            scope.spawn(move || {
                let token = ThreadToken::current();
                let slot = registry.claim(token).unwrap();
                slot.set_protected(NonNull::new(addr as *mut ()).unwrap());
                published_tx.send(()).unwrap();
                done_rx.recv().unwrap();
                assert!(slot.release(token));
            });

            published_rx.recv().unwrap();
            assert!(registry.is_hazardous(addr as *const ()));
            done_tx.send(()).unwrap();
        });

        assert!(!registry.is_hazardous(addr as *const ()));
        assert_eq!(registry.owned(), 0);
    }
}
