/// Sizing of a [`Domain`](crate::Domain).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainConfig {
    /// Number of hazard slots, i.e. how many threads may be registered at the same time.
    pub max_concurrent_threads: usize,
    /// A thread scans the hazard slots once its retire list holds this many nodes.
    pub retire_threshold: usize,
}

impl DomainConfig {
    pub const DEFAULT_MAX_THREADS: usize = 128;
    pub const DEFAULT_RETIRE_THRESHOLD: usize = 64;

    pub fn max_concurrent_threads(mut self, threads: usize) -> Self {
        self.max_concurrent_threads = threads;
        self
    }

    pub fn retire_threshold(mut self, threshold: usize) -> Self {
        self.retire_threshold = threshold;
        self
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.max_concurrent_threads == 0 {
            return Err(crate::Error::InvalidConfig(
                "max_concurrent_threads must be greater than zero",
            ));
        }
        if self.retire_threshold == 0 {
            return Err(crate::Error::InvalidConfig(
                "retire_threshold must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            max_concurrent_threads: Self::DEFAULT_MAX_THREADS,
            retire_threshold: Self::DEFAULT_RETIRE_THRESHOLD,
        }
    }
}
