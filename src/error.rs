//! Recoverable error conditions.
//!
//! Contract violations (using the process-wide environment before it has been
//! initialized, releasing a hazard slot twice, popping with a guard of a
//! different domain) are not represented here, they panic.

use thiserror::Error;

/// Error type for fallible domain and stack operations.
#[derive(Copy, Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    /// An allocation required by the operation could not be satisfied.
    #[error("failed to allocate {what}")]
    ResourceExhausted {
        /// The kind of object that could not be allocated.
        what: &'static str,
    },
    /// More threads attempted to register with a hazard registry than it has
    /// slots for.
    #[error("all {capacity} hazard slots are owned by live threads")]
    CapacityExceeded {
        /// The number of slots in the exhausted registry.
        capacity: usize,
    },
}
