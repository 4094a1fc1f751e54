//! A lock-free stack with hazard pointer based memory reclamation.
//!
//! Popping a node off a lock-free stack unlinks it, but a concurrent popper
//! may have loaded the same head pointer an instant earlier and still be
//! about to read the node's `next` field.
//! Freeing the node immediately would turn that read into a use-after-free,
//! so unlinked nodes may only be freed once no thread can reach them anymore.
//!
//! Hazard pointers (Maged M. Michael, 2004 [[1]]) track exactly that: a thread
//! announces the address it is about to de-reference in a shared slot and
//! re-checks that the address is still reachable before using it.
//! A node whose address is announced in some slot when it is unlinked is
//! *retired* and freed by a later sweep of the retire list, every other node
//! is freed right away.
//!
//! # Domains, Guards and the Stack
//!
//! A [`Domain`] owns a fixed number of hazard slots (one more than the
//! maximum number of threads it is built for) and the list of retired
//! records.
//! A thread claims one slot per domain and accesses it through
//! [`HazardGuard`]s, all guards of a thread share that slot and the slot is
//! released when the last of them is dropped.
//! A [`Stack`] is bound to one domain, it uses a guard to protect the head
//! node while popping and hands unlinked nodes that are still protected by
//! another thread to the domain's retire list.
//! Every successful pop counts towards the domain's scan threshold, each
//! time the threshold is reached, the retire list is swept and all records no
//! longer protected by any slot are deallocated.
//!
//! ```
//! use std::sync::Arc;
//!
//! use hazard_stack::{Domain, Stack};
//!
//! let domain = Arc::new(Domain::new(4).unwrap());
//! let stack = Stack::with_domain(domain);
//!
//! stack.push(1);
//! stack.push(2);
//! assert_eq!(stack.pop(), Ok(Some(2)));
//! assert_eq!(stack.pop(), Ok(Some(1)));
//! assert_eq!(stack.pop(), Ok(None));
//! ```
//!
//! # Process-wide Environment
//!
//! For programs that only need a single domain, [`initialize_environment`]
//! installs one process-wide, [`Stack::new`] binds to it and
//! [`shutdown_environment`] removes it again.
//!
//! # Progress
//!
//! All operations are lock-free but not wait-free: contended
//! *compare-and-swap* loops retry without bound, optionally yielding the
//! processor (see [`ConfigBuilder::yield_on_contention`]).
//!
//! [1]: https://dl.acm.org/citation.cfm?id=987595

#![warn(missing_docs)]

mod config;
mod domain;
mod error;
mod global;
mod guard;
mod hazard;
mod queue;
mod retired;
mod stack;

pub use crate::config::{Config, ConfigBuilder};
pub use crate::domain::Domain;
pub use crate::error::Error;
pub use crate::global::{
    environment, initialize_environment, initialize_environment_with, shutdown_environment,
};
pub use crate::guard::HazardGuard;
pub use crate::stack::Stack;

// The ThreadSanitizer can not correctly asses ordering restraints from explicit
// fences, so memory operations around such fences need stricter ordering than
// `Relaxed`, when instrumentation is chosen.

cfg_if::cfg_if! {
    if #[cfg(feature = "sanitize-threads")] {
        mod sanitize {
            use core::sync::atomic::Ordering;

            pub const RELAXED_LOAD: Ordering = Ordering::Acquire;

            pub const RELEASE_SUCCESS: Ordering = Ordering::AcqRel;
            pub const RELEASE_FAIL: Ordering = Ordering::Acquire;
        }
    } else {
        mod sanitize {
            use core::sync::atomic::Ordering;

            pub const RELAXED_LOAD: Ordering = Ordering::Relaxed;

            pub const RELEASE_SUCCESS: Ordering = Ordering::Release;
            pub const RELEASE_FAIL: Ordering = Ordering::Relaxed;
        }
    }
}
