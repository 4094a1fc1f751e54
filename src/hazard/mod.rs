mod registry;

use core::cmp;
use core::num::NonZeroU64;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};

pub(crate) use self::registry::HazardRegistry;

/// Owner state of a slot that is not claimed by any thread.
const EMPTY: u64 = 0;

/// The source of per-thread identity tokens, `0` is reserved for [`EMPTY`].
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local!(static TOKEN: ThreadToken = ThreadToken::next());

////////////////////////////////////////////////////////////////////////////////////////////////////
// ThreadToken
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A process-unique identity of a thread, used to mark hazard slot ownership.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) struct ThreadToken(NonZeroU64);

/********** impl inherent *************************************************************************/

impl ThreadToken {
    /// Returns the token of the calling thread.
    #[inline]
    pub fn current() -> Self {
        TOKEN.with(|token| *token)
    }

    #[inline]
    fn next() -> Self {
        let raw = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU64::new(raw).expect("thread token counter overflowed"))
    }

    #[inline]
    fn get(self) -> u64 {
        self.0.get()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// HazardSlot
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A registry entry pairing the identity of the owning thread with the
/// address that thread is currently de-referencing.
///
/// Only the owning thread writes the protected address and the handle count,
/// every thread may read the address while scanning for hazards.
#[derive(Debug)]
pub(crate) struct HazardSlot {
    owner: AtomicU64,
    protected: AtomicPtr<()>,
    /// The number of live guards of the owning thread sharing this slot.
    handles: AtomicUsize,
}

/********** impl inherent *************************************************************************/

impl HazardSlot {
    /// Creates a new unowned [`HazardSlot`] protecting nothing.
    #[inline]
    pub const fn new() -> Self {
        Self {
            owner: AtomicU64::new(EMPTY),
            protected: AtomicPtr::new(ptr::null_mut()),
            handles: AtomicUsize::new(0),
        }
    }

    /// Attempts to claim the slot for `token`, which only succeeds if the slot
    /// is currently unowned.
    #[inline]
    pub fn try_claim(&self, token: ThreadToken) -> bool {
        // fast path check avoids the CAS for slots that are obviously taken
        if self.owner.load(Ordering::Relaxed) != EMPTY {
            return false;
        }

        // (HAZ:1) this `Acquire` CAS synchronizes-with the `Release` CAS in (HAZ:2)
        let claimed = self
            .owner
            .compare_exchange(EMPTY, token.get(), Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        if claimed {
            self.handles.store(1, Ordering::Relaxed);
        }

        claimed
    }

    /// Registers one more guard of the owning thread on this slot.
    ///
    /// Must only be called by the owning thread.
    #[inline]
    pub fn add_handle(&self, token: ThreadToken) {
        debug_assert!(self.is_owned_by(token));
        self.handles.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops one guard of the owning thread and releases the slot once the
    /// last one is gone.
    ///
    /// Returns `false` if the slot was not owned by `token` or has no live
    /// guards, in which case the slot is left untouched.
    #[inline]
    pub fn remove_handle(&self, token: ThreadToken) -> bool {
        if !self.is_owned_by(token) {
            return false;
        }

        match self.handles.load(Ordering::Relaxed) {
            0 => false,
            1 => {
                self.handles.store(0, Ordering::Relaxed);
                self.release(token)
            }
            n => {
                self.handles.store(n - 1, Ordering::Relaxed);
                true
            }
        }
    }

    /// Returns the number of live guards sharing this slot.
    #[inline]
    pub fn handles(&self) -> usize {
        self.handles.load(Ordering::Relaxed)
    }

    /// Clears the protected address and gives up ownership.
    ///
    /// Returns `false` if the slot was not owned by `token`, in which case the
    /// slot is left untouched.
    #[inline]
    pub fn release(&self, token: ThreadToken) -> bool {
        if self.owner.load(Ordering::Relaxed) != token.get() {
            return false;
        }

        self.protected.store(ptr::null_mut(), Ordering::Release);
        // (HAZ:2) this `Release` CAS synchronizes-with the `Acquire` CAS in (HAZ:1)
        self.owner
            .compare_exchange(token.get(), EMPTY, Ordering::Release, Ordering::Relaxed)
            .is_ok()
    }

    /// Returns `true` if the slot is currently owned by `token`.
    #[inline]
    pub fn is_owned_by(&self, token: ThreadToken) -> bool {
        self.owner.load(Ordering::Relaxed) == token.get()
    }

    /// Returns `true` if the slot is not owned by any thread.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == EMPTY
    }

    /// Publishes `protected` as the address currently being de-referenced.
    #[inline]
    pub fn set_protected(&self, protected: NonNull<()>) {
        // (HAZ:3) this `SeqCst` store is part of the total order with the `SeqCst` fence in (REG:1)
        self.protected.store(protected.as_ptr(), Ordering::SeqCst);
    }

    /// Clears the protected address.
    #[inline]
    pub fn clear(&self, order: Ordering) {
        self.protected.store(ptr::null_mut(), order);
    }

    /// Returns the currently protected address, if there is any.
    #[inline]
    pub fn protected(&self, order: Ordering) -> Option<ProtectedPtr> {
        NonNull::new(self.protected.load(order)).map(ProtectedPtr)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ProtectedPtr
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An untyped pointer protected from reclamation, because it is stored within a hazard slot.
///
/// The type information is deliberately stripped as it is not needed in order to determine whether
/// a pointer is protected or not.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub(crate) struct ProtectedPtr(NonNull<()>);

/********** impl inherent *************************************************************************/

impl ProtectedPtr {
    #[inline]
    pub fn compare_with(self, ptr: *const ()) -> cmp::Ordering {
        self.as_ptr().cmp(&ptr)
    }

    #[inline]
    pub fn as_ptr(self) -> *const () {
        self.0.as_ptr() as _
    }
}
