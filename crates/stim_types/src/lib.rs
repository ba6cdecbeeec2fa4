//! Shared types for the stimulus paradigm engine
//!
//! This crate contains the vocabulary the engine and its host agree on: the
//! stimulus-object capability trait, the marker record model and wire codec,
//! and the marker transport traits used to talk to the external
//! signal-processing pipeline.

pub mod marker;
pub mod object;
pub mod transport;

// Re-export commonly used types
pub use marker::*;
pub use object::*;
pub use transport::*;
