//! Error taxonomy for the mid-end (spec.md §7).
//!
//! `IteratorEnd` and `Yield` are deliberately not variants here: spec.md calls them
//! "positive signals", not failures, so they are represented as ordinary control-flow
//! values (`Option`, `std::ops::ControlFlow`) at their specific call sites instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("allocation failure: {0}")]
    MemAllocFailure(&'static str),
}

pub type OptResult<T> = Result<T, OptError>;
