//! Error type for the tracking engine.
//!
//! Only configuration and programmer errors surface here. Runtime conditions
//! the engine can recover from locally (motion-estimation failures, singular
//! innovation covariances, non-monotonic clock reads) are logged and absorbed
//! where they occur.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A cost matrix handed to the assignment solver contains a negative or
    /// non-finite entry. Costs are distances and must be non-negative.
    #[error("cost matrix entry at ({row}, {col}) is negative or non-finite")]
    CostMatrix { row: usize, col: usize },

    /// A frame buffer does not match its declared dimensions.
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height}")]
    FrameSize {
        width: usize,
        height: usize,
        expected: usize,
        actual: usize,
    },

    /// The tracking session has already ended.
    #[error("tracking session already ended")]
    SessionEnded,
}
