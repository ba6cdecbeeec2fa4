//! Error types for the paradigm engine

use thiserror::Error;

/// Engine-specific error types.
///
/// Only setup-time configuration problems surface as errors; transient
/// conditions (empty pool, out-of-range index, an entry destroyed by the
/// host) are logged warnings that never interrupt a run, and malformed
/// incoming wire text decodes to an unparsed record instead of raising.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid sequence range: max {max} < min {min}")]
    InvalidRange { min: i32, max: i32 },

    #[error("population method not implemented: {0}")]
    UnsupportedPopulation(&'static str),

    #[error("single-target training requires exactly one pool object, found {found}")]
    SingleTrainingPool { found: usize },

    #[error("requested flash frequency {requested} Hz is outside (0, {max}] at {frame_rate} fps")]
    InvalidFrequency {
        requested: f32,
        max: f32,
        frame_rate: f32,
    },

    #[error("frequency-coded paradigm configured with an empty frequency list")]
    EmptyFrequencyList,

    #[error("flash grid {rows}x{cols} cannot hold {pool_size} pool objects")]
    GridTooSmall {
        rows: usize,
        cols: usize,
        pool_size: usize,
    },
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
