use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// Every hazard slot of the domain is held by a registered thread. Registration can be
    /// retried once some thread deregisters.
    #[error("hazard registry exhausted: all {capacity} slots are registered")]
    RegistryExhausted { capacity: usize },

    #[error("invalid domain configuration: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
