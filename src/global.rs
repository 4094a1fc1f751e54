//! The process-wide environment: a single shared [`Domain`] that stacks bind
//! to when created with [`Stack::new`][crate::Stack::new].

use std::sync::{Arc, PoisonError, RwLock};

use conquer_once::Lazy;
use tracing::debug;

use crate::config::{Config, ConfigBuilder};
use crate::domain::Domain;
use crate::error::Error;

/********** globals *******************************************************************************/

/// The currently installed process-wide domain.
static ENVIRONMENT: Lazy<RwLock<Option<Arc<Domain>>>> = Lazy::new(RwLock::default);

/********** public functions **********************************************************************/

/// Installs a process-wide domain with room for `max_threads` concurrent
/// threads.
///
/// This must be called before any stack is created with
/// [`Stack::new`][crate::Stack::new].
/// Re-initializing replaces the installed domain, stacks created before keep
/// using the domain they were created with.
///
/// # Errors
///
/// Fails with [`Error::ResourceExhausted`] if the hazard registry can not be
/// allocated, the previously installed domain (if any) is kept in that case.
#[inline]
pub fn initialize_environment(max_threads: usize) -> Result<(), Error> {
    initialize_environment_with(ConfigBuilder::new().max_threads(max_threads).build())
}

/// Installs a process-wide domain built from `config`.
///
/// # Errors
///
/// See [`initialize_environment`].
pub fn initialize_environment_with(config: Config) -> Result<(), Error> {
    let domain = Arc::new(Domain::with_config(config)?);
    let previous = ENVIRONMENT.write().unwrap_or_else(PoisonError::into_inner).replace(domain);
    debug!(replaced = previous.is_some(), "hazard environment installed");
    Ok(())
}

/// Removes the installed process-wide domain.
///
/// The domain itself is dropped once the last stack bound to it is dropped.
///
/// # Panics
///
/// Panics if no environment is installed.
pub fn shutdown_environment() {
    let previous = ENVIRONMENT.write().unwrap_or_else(PoisonError::into_inner).take();
    match previous {
        Some(domain) => debug!(pending = domain.retired_count(), "hazard environment removed"),
        None => panic!("hazard environment shut down without being initialized"),
    }
}

/// Returns the installed process-wide domain, if there is one.
#[inline]
pub fn environment() -> Option<Arc<Domain>> {
    ENVIRONMENT.read().unwrap_or_else(PoisonError::into_inner).as_ref().map(Arc::clone)
}
