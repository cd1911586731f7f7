use core::fmt;

use thiserror::Error;

/// The node for a pushed value could not be allocated. Holds the value that was not pushed.
#[derive(Error)]
#[error("failed to allocate a stack node")]
pub struct AllocError<T>(pub T);

impl<T> AllocError<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for AllocError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocError").finish_non_exhaustive()
    }
}
