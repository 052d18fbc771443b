use std::fmt::Debug;
use thiserror::Error;

/// Failures that abort a cycle search.
///
/// Running out of iterations is not an error: it is reported through
/// [`crate::cycle::CycleOutcome`].
#[derive(Debug, Error)]
pub enum CycleError<E> {
    #[error("tolerance must be positive and finite, got {0}.")]
    InvalidTolerance(String),

    #[error("max_iterations must be greater than zero.")]
    InvalidMaxIterations,

    /// The iterated map failed; its error is passed through untouched.
    #[error(transparent)]
    Map(E),
}

impl<E> CycleError<E> {
    pub(crate) fn invalid_tolerance(tolerance: impl Debug) -> Self {
        CycleError::InvalidTolerance(format!("{tolerance:?}"))
    }

    /// Returns the map's own error if that is what stopped the search.
    pub fn into_map_error(self) -> Option<E> {
        match self {
            CycleError::Map(err) => Some(err),
            _ => None,
        }
    }
}
