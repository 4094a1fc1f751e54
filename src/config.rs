//! Types for configuring the runtime parameters of a reclamation
//! [`Domain`][crate::Domain].

include!(concat!(env!("OUT_DIR"), "/build_constants.rs"));

const DEFAULT_MAX_THREADS: usize = 8;
const DEFAULT_SCAN_THRESHOLD: u32 = SCAN_THRESHOLD;
const DEFAULT_YIELD_ON_CONTENTION: bool = false;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Config
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Runtime configuration parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Config {
    max_threads: usize,
    scan_threshold: u32,
    yield_on_contention: bool,
}

/********** impl Default **************************************************************************/

impl Default for Config {
    #[inline]
    fn default() -> Self {
        ConfigBuilder::new().build()
    }
}

/********** impl inherent *************************************************************************/

impl Config {
    /// Creates a new [`Config`] with the given parameters
    ///
    /// # Panics
    ///
    /// This function panics, if `scan_threshold` is 0.
    #[inline]
    pub fn with_params(max_threads: usize, scan_threshold: u32, yield_on_contention: bool) -> Self {
        assert!(scan_threshold > 0, "scan threshold must be greater than 0");
        Self { max_threads, scan_threshold, yield_on_contention }
    }

    /// Returns the maximum number of threads expected to operate concurrently
    /// on a domain.
    ///
    /// The hazard registry is sized to hold one more slot than this.
    #[inline]
    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// Returns the scan threshold.
    ///
    /// Every successful pop counts towards this threshold.
    /// Once it is reached, the retire list is swept.
    #[inline]
    pub fn scan_threshold(&self) -> u32 {
        self.scan_threshold
    }

    /// Returns `true` if contended retry loops yield the processor after
    /// spinning for a while.
    #[inline]
    pub fn yield_on_contention(&self) -> bool {
        self.yield_on_contention
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ConfigBuilder
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A builder type for gradually initializing a [`Config`].
#[derive(Copy, Clone, Debug, Default)]
pub struct ConfigBuilder {
    max_threads: Option<usize>,
    scan_threshold: Option<u32>,
    yield_on_contention: Option<bool>,
}

impl ConfigBuilder {
    /// Creates a new [`ConfigBuilder`] with default values.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of concurrently registered threads.
    #[inline]
    pub fn max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = Some(max_threads);
        self
    }

    /// Sets the scan threshold.
    #[inline]
    pub fn scan_threshold(mut self, scan_threshold: u32) -> Self {
        self.scan_threshold = Some(scan_threshold);
        self
    }

    /// Sets whether contended retry loops should eventually yield.
    #[inline]
    pub fn yield_on_contention(mut self, yield_on_contention: bool) -> Self {
        self.yield_on_contention = Some(yield_on_contention);
        self
    }

    /// Consumes the [`ConfigBuilder`] and returns a initialized [`Config`].
    ///
    /// Unspecified parameters are initialized with their default values.
    #[inline]
    pub fn build(self) -> Config {
        Config::with_params(
            self.max_threads.unwrap_or(DEFAULT_MAX_THREADS),
            self.scan_threshold.unwrap_or(DEFAULT_SCAN_THRESHOLD),
            self.yield_on_contention.unwrap_or(DEFAULT_YIELD_ON_CONTENTION),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigBuilder, DEFAULT_MAX_THREADS};

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.max_threads(), DEFAULT_MAX_THREADS);
        assert!(config.scan_threshold() > 0);
        assert!(!config.yield_on_contention());
    }

    #[test]
    fn builder() {
        let config =
            ConfigBuilder::new().max_threads(3).scan_threshold(16).yield_on_contention(true).build();
        assert_eq!(config, Config::with_params(3, 16, true));
    }

    #[test]
    #[should_panic(expected = "scan threshold must be greater than 0")]
    fn zero_threshold() {
        let _ = ConfigBuilder::new().scan_threshold(0).build();
    }
}
