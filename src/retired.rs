//! Caching for retired records until they can be safely dropped and deallocated.
//!
//! # Retired Records
//!
//! Pointers to retired records are stored in [`Retired`] structs. These contain
//! fat pointers, so they do maintain dynamic type information, of which only the
//! concrete `Drop` implementation is actually required.
//!
//! # Retire List
//!
//! Retired records are wrapped in [`RetireEntry`] nodes and stored in a single
//! [`RawQueue`] that is shared by all threads of a domain.
//! A reclaiming thread detaches the entire queue at once, which makes it the
//! exclusive owner of all detached entries, so concurrent sweeps can never
//! reclaim the same entry twice.
//! Entries that are still protected are linked back into the queue as one
//! sub-list without any further allocation, which also happens for all
//! remaining entries if dropping a record panics.

use core::fmt;
use core::mem;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::hazard::ProtectedPtr;
use crate::queue::{RawNode, RawQueue};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Reclaim (trait)
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Any heap allocated record that can be dropped and deallocated through a
/// type-erased pointer.
trait Reclaim {}
impl<T> Reclaim for T {}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Retired
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Fat pointer to a retired record that has not yet been reclaimed.
///
/// The record is dropped and deallocated when the `Retired` is dropped.
pub(crate) struct Retired {
    record: NonNull<dyn Reclaim + 'static>,
}

/********** impl inherent *************************************************************************/

impl Retired {
    /// Creates a new `Retired` record from a raw pointer of arbitrary type.
    ///
    /// # Safety
    ///
    /// `record` must have been allocated through a `Box` and must not be
    /// accessed by the caller afterwards.
    /// The record will be dropped at an unspecified time by an unspecified
    /// thread, which means it may potentially outlive any (non-static)
    /// lifetime. This is safe, as long as the type's `Drop` implementation
    /// does not access any non-static references and may run on any thread.
    #[inline]
    pub unsafe fn new_unchecked<'a, T: 'a>(record: NonNull<T>) -> Self {
        // lifetime transmuting is sound when no non-static references are accessed during drop
        let any: NonNull<dyn Reclaim + 'a> = record;
        let any: NonNull<dyn Reclaim + 'static> = mem::transmute(any);
        Self { record: any }
    }

    /// Gets the memory address of the retired record.
    #[inline]
    pub fn address(&self) -> *const () {
        self.record.as_ptr() as *const ()
    }
}

/********** impl Send *****************************************************************************/

// records are only ever dropped, never accessed, by the reclaiming thread
unsafe impl Send for Retired {}

/********** impl Debug ****************************************************************************/

impl fmt::Debug for Retired {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Retired").field("address", &self.address()).finish()
    }
}

/********** impl Drop *****************************************************************************/

impl Drop for Retired {
    #[inline]
    fn drop(&mut self) {
        mem::drop(unsafe { Box::from_raw(self.record.as_ptr()) });
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// RetireEntry
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A node of the [`RetireList`].
#[derive(Debug)]
pub(crate) struct RetireEntry {
    retired: Retired,
    next: *mut RetireEntry,
}

/********** impl RawNode **************************************************************************/

impl RawNode for RetireEntry {
    #[inline]
    unsafe fn next(node: *mut Self) -> *mut Self {
        (*node).next
    }

    #[inline]
    unsafe fn set_next(node: *mut Self, next: *mut Self) {
        (*node).next = next;
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// RetireList
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Unbounded lock-free list of retired records waiting for reclamation.
#[derive(Debug)]
pub(crate) struct RetireList {
    entries: RawQueue<RetireEntry>,
    len: AtomicUsize,
}

/********** impl inherent *************************************************************************/

impl RetireList {
    /// Creates a new empty `RetireList`.
    #[inline]
    pub const fn new() -> Self {
        Self { entries: RawQueue::new(), len: AtomicUsize::new(0) }
    }

    /// Returns the number of records that have been retired but not yet
    /// reclaimed.
    ///
    /// Records currently detached by a sweep in progress are included.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Returns `true` if the list is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Prepends `retired` to the list.
    #[inline]
    pub fn retire(&self, retired: Retired) {
        let entry = Box::into_raw(Box::new(RetireEntry { retired, next: ptr::null_mut() }));
        self.len.fetch_add(1, Ordering::Relaxed);
        unsafe { self.entries.push_many((entry, entry)) };
    }

    /// Detaches the entire list and leaves it empty.
    ///
    /// The returned [`Taken`] exclusively owns all detached entries and
    /// links every entry it does not reclaim back into the list when it is
    /// dropped.
    #[inline]
    pub fn take_all(&self) -> Taken<'_> {
        Taken { list: self, curr: self.entries.take_all(), kept: None, reclaimed: 0 }
    }
}

/********** impl Drop *****************************************************************************/

impl Drop for RetireList {
    #[inline(never)]
    fn drop(&mut self) {
        // when the list is dropped there can be no more hazards protecting any of its records, so
        // all of them can be simply de-allocated
        let mut curr = self.entries.take_all_unsync();
        while !curr.is_null() {
            let entry = unsafe { Box::from_raw(curr) };
            curr = entry.next;
        }

        *self.len.get_mut() = 0;
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Taken
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The entries detached from a [`RetireList`] by a single sweep.
///
/// Entries that are neither reclaimed nor kept when this is dropped (because
/// dropping a record panicked) are kept as well, so no entry is leaked.
#[must_use]
pub(crate) struct Taken<'a> {
    list: &'a RetireList,
    /// The next entry to be visited.
    curr: *mut RetireEntry,
    /// Head and tail of the sub-list of entries to be linked back.
    kept: Option<(*mut RetireEntry, *mut RetireEntry)>,
    reclaimed: usize,
}

/********** impl inherent *************************************************************************/

impl Taken<'_> {
    /// Returns `true` if no entries were detached.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.curr.is_null() && self.kept.is_none()
    }

    /// Reclaims every entry whose address is not contained in `scan_cache`,
    /// which must be sorted, and returns the number of reclaimed records.
    ///
    /// All still protected entries are linked back into the list.
    ///
    /// # Safety
    ///
    /// `scan_cache` must have been collected after the entries were detached.
    pub unsafe fn reclaim_all_unprotected(mut self, scan_cache: &[ProtectedPtr]) -> usize {
        while !self.curr.is_null() {
            let entry = self.curr;
            // the cursor is advanced before `entry` may be de-allocated
            self.curr = RetireEntry::next(entry);

            let address = (*entry).retired.address();
            match scan_cache.binary_search_by(|protected| protected.compare_with(address)) {
                // the record is still protected by some hazard slot
                Ok(_) => self.keep(entry),
                // the record can be reclaimed, dropping the entry drops the record
                Err(_) => {
                    // counted first, a panicking record is gone all the same
                    self.reclaimed += 1;
                    mem::drop(Box::from_raw(entry));
                }
            }
        }

        self.reclaimed
    }

    /// Appends `entry` to the sub-list of kept entries.
    #[inline]
    unsafe fn keep(&mut self, entry: *mut RetireEntry) {
        RetireEntry::set_next(entry, ptr::null_mut());
        self.kept = match self.kept {
            None => Some((entry, entry)),
            Some((first, last)) => {
                RetireEntry::set_next(last, entry);
                Some((first, entry))
            }
        };
    }
}

/********** impl Drop *****************************************************************************/

impl Drop for Taken<'_> {
    #[inline]
    fn drop(&mut self) {
        unsafe {
            while !self.curr.is_null() {
                let entry = self.curr;
                self.curr = RetireEntry::next(entry);
                self.keep(entry);
            }

            if let Some(kept) = self.kept.take() {
                self.list.entries.push_many(kept);
            }
        }

        self.list.len.fetch_sub(self.reclaimed, Ordering::Relaxed);
    }
}
