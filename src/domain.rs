//! The reclamation domain shared by all threads operating on the same
//! lock-free data structures.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, Ordering};

use crossbeam_utils::Backoff;
use tracing::{debug, trace, warn};

use crate::config::{Config, ConfigBuilder};
use crate::error::Error;
use crate::guard::HazardGuard;
use crate::hazard::{HazardRegistry, ThreadToken};
use crate::retired::{RetireList, Retired};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Domain
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A hazard registry paired with the list of records retired against it.
///
/// Every thread operating on a data structure bound to a domain claims one
/// of the domain's hazard slots and accesses it through [`HazardGuard`]s.
/// A domain is usually shared through an `Arc`, when it is dropped all
/// records that are still retired are reclaimed.
#[derive(Debug)]
pub struct Domain {
    config: Config,
    registry: HazardRegistry,
    retired: RetireList,
    /// The counter for determining when to attempt reclamation of retired
    /// records.
    ops_count: AtomicU32,
}

/********** impl inherent *************************************************************************/

impl Domain {
    /// Creates a new domain for up to `max_threads` concurrent threads and
    /// default values for all other parameters.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ResourceExhausted`] if the hazard registry can not
    /// be allocated.
    #[inline]
    pub fn new(max_threads: usize) -> Result<Self, Error> {
        Self::with_config(ConfigBuilder::new().max_threads(max_threads).build())
    }

    /// Creates a new domain with the given `config`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ResourceExhausted`] if the hazard registry can not
    /// be allocated.
    pub fn with_config(config: Config) -> Result<Self, Error> {
        let registry = HazardRegistry::new(config.max_threads())?;
        debug!(
            capacity = registry.capacity(),
            scan_threshold = config.scan_threshold(),
            "hazard registry initialized"
        );

        Ok(Self { config, registry, retired: RetireList::new(), ops_count: AtomicU32::new(0) })
    }

    /// Returns the domain's configuration.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the number of hazard slots, which is one more than the
    /// configured maximum number of threads.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.registry.capacity()
    }

    /// Returns the number of threads currently owning a hazard slot.
    #[inline]
    pub fn registered_threads(&self) -> usize {
        self.registry.owned()
    }

    /// Returns the (approximate) number of records that have been retired but
    /// not yet reclaimed.
    #[inline]
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Returns a guard for the calling thread's hazard slot.
    ///
    /// A thread owns at most one slot per domain. If the calling thread
    /// already holds a guard, the returned guard shares that guard's slot,
    /// otherwise an unowned slot is claimed. The slot is released once the
    /// thread's last guard is dropped.
    ///
    /// Since the slot is shared, publishing through one guard replaces the
    /// address published through any other guard of the same thread.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::CapacityExceeded`] if the calling thread owns no
    /// slot and every slot is owned by another thread.
    /// Already claimed slots are not affected.
    pub fn acquire_guard(&self) -> Result<HazardGuard<'_>, Error> {
        let token = ThreadToken::current();
        if let Some(slot) = self.registry.find_owned(token) {
            slot.add_handle(token);
            return Ok(HazardGuard::new(self, slot, token));
        }

        match self.registry.claim(token) {
            Some(slot) => Ok(HazardGuard::new(self, slot, token)),
            None => {
                let capacity = self.registry.capacity();
                warn!(capacity, "hazard registry exhausted");
                Err(Error::CapacityExceeded { capacity })
            }
        }
    }

    /// Returns `true` if any thread currently publishes `ptr` as hazardous.
    #[inline]
    pub fn is_hazardous<T>(&self, ptr: *const T) -> bool {
        self.registry.is_hazardous(ptr as *const ())
    }

    /// Retires a heap allocated record, which will be dropped and deallocated
    /// by some future [`sweep`][Domain::sweep] once no hazard slot protects
    /// it anymore.
    ///
    /// # Safety
    ///
    /// `record` must have been allocated through `Box` and must already be
    /// unreachable for any thread that has not yet published and validated it.
    /// It must not be retired twice.
    #[inline]
    pub unsafe fn retire<T: Send + 'static>(&self, record: NonNull<T>) {
        self.retire_record(Retired::new_unchecked(record));
    }

    #[inline]
    pub(crate) fn retire_record(&self, retired: Retired) {
        self.retired.retire(retired);
    }

    /// Attempts to reclaim all retired records and returns the number of
    /// records that were reclaimed.
    ///
    /// Records that are still protected are kept for a later sweep.
    /// Sweeps may run concurrently, every sweep only reclaims the records it
    /// has itself detached.
    /// If dropping a record panics, the panic is propagated and all records
    /// not yet visited by this sweep are kept.
    pub fn sweep(&self) -> usize {
        let taken = self.retired.take_all();
        if taken.is_empty() {
            return 0;
        }

        let mut scan_cache = Vec::with_capacity(self.registry.capacity());
        self.registry.collect_protected(&mut scan_cache);

        // safety: the scan cache is collected after the records were detached
        let reclaimed = unsafe { taken.reclaim_all_unprotected(&scan_cache) };

        trace!(reclaimed, pending = self.retired.len(), "swept retired records");
        reclaimed
    }

    /// Counts one operation towards the scan threshold and sweeps if the
    /// threshold is reached.
    #[inline]
    pub(crate) fn increase_ops_count(&self) {
        let count = self.ops_count.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if count % self.config.scan_threshold() == 0 {
            self.sweep();
        }
    }

    /// Performs one step of back-off in a contended retry loop.
    #[inline]
    pub(crate) fn backoff(&self, backoff: &Backoff) {
        if self.config.yield_on_contention() {
            backoff.snooze();
        } else {
            backoff.spin();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;

    use matches::assert_matches;

    use super::Domain;
    use crate::config::ConfigBuilder;
    use crate::error::Error;

    struct DropCount(Arc<AtomicUsize>);
    impl Drop for DropCount {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn leak(count: &Arc<AtomicUsize>) -> NonNull<DropCount> {
        NonNull::from(Box::leak(Box::new(DropCount(Arc::clone(count)))))
    }

    #[test]
    fn capacity_exceeded() {
        let domain = Domain::new(1).unwrap();
        assert_eq!(domain.capacity(), 2);

        let guards: Vec<_> = (0..3).map(|_| domain.acquire_guard().unwrap()).collect();
        assert_eq!(domain.registered_threads(), 1, "guards of one thread share its slot");

        let (held_tx, held_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        thread::scope(|scope| {
            let domain = &domain;
            scope.spawn(move || {
                let _guard = domain.acquire_guard().unwrap();
                held_tx.send(()).unwrap();
                done_rx.recv().unwrap();
            });

            held_rx.recv().unwrap();
            assert_eq!(domain.registered_threads(), 2);
            let res = scope.spawn(move || domain.acquire_guard().map(drop)).join().unwrap();
            assert_matches!(res, Err(Error::CapacityExceeded { capacity: 2 }));
            // the owning threads are not affected by the failed registration
            assert!(domain.acquire_guard().is_ok());
            done_tx.send(()).unwrap();
        });

        assert_eq!(domain.registered_threads(), 1);
        drop(guards);
        assert_eq!(domain.registered_threads(), 0);
        assert!(domain.acquire_guard().is_ok());
    }

    #[test]
    fn sweep_respects_hazards() {
        let count = Arc::new(AtomicUsize::new(0));
        let domain = Domain::new(1).unwrap();
        let guard = domain.acquire_guard().unwrap();

        let (protected, unprotected) = (leak(&count), leak(&count));
        guard.publish(protected);
        unsafe {
            domain.retire(protected);
            domain.retire(unprotected);
        }
        assert_eq!(domain.retired_count(), 2);

        assert_eq!(domain.sweep(), 1);
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(domain.retired_count(), 1);

        // still protected, the record must survive repeated sweeps
        assert_eq!(domain.sweep(), 0);
        assert_eq!(count.load(Ordering::Relaxed), 1);

        guard.clear();
        assert_eq!(domain.sweep(), 1);
        assert_eq!(count.load(Ordering::Relaxed), 2);
        assert_eq!(domain.retired_count(), 0);
        assert_eq!(domain.sweep(), 0);
    }

    #[test]
    fn drop_reclaims_retired() {
        let count = Arc::new(AtomicUsize::new(0));
        let domain = Domain::new(1).unwrap();
        {
            let guard = domain.acquire_guard().unwrap();
            let record = leak(&count);
            guard.publish(record);
            unsafe { domain.retire(record) };
            assert_eq!(domain.sweep(), 0);
        }

        drop(domain);
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn scan_threshold() {
        let count = Arc::new(AtomicUsize::new(0));
        let domain = Domain::with_config(ConfigBuilder::new().scan_threshold(3).build()).unwrap();
        unsafe { domain.retire(leak(&count)) };

        domain.increase_ops_count();
        domain.increase_ops_count();
        assert_eq!(count.load(Ordering::Relaxed), 0);
        domain.increase_ops_count();
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
