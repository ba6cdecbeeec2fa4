//! Paradigm specializations
//!
//! Four concrete flashing strategies plug into the run state machine through
//! a small set of hooks: setup validation against the freshly populated
//! pool, an optional constant-cadence marker builder, and the per-run
//! stimulus routine itself.

pub mod epoch;
pub mod p300;
pub mod ssvep;
pub mod switch;

use std::sync::Arc;

use async_trait::async_trait;

use stim_types::EventMarker;

use crate::error::EngineResult;
use crate::runner::RunContext;

pub use epoch::EpochParadigm;
pub use p300::FlashParadigm;
pub use ssvep::SsvepParadigm;
pub use switch::SwitchParadigm;

/// Paradigm family. Also the controller registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParadigmKind {
    /// Single/multi flash patterns, P300-style.
    FlashPattern,
    /// Constant-frequency flashing, VEP-style.
    FrequencyCoded,
    /// Fixed-window epoch signaling.
    WindowedEpoch,
    /// Binary switch signaling.
    Switch,
}

/// Builds the constant-cadence epoch marker from the live pool size and
/// training target at each tick.
pub type EpochMarkerFn = Arc<dyn Fn(usize, Option<usize>) -> EventMarker + Send + Sync>;

/// Why a stimulus routine returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// The flash plan completed; the runner ends the run itself.
    Exhausted,
    /// The run was stopped while the routine was live.
    Cancelled,
}

/// One flashing strategy.
#[async_trait]
pub trait Paradigm: Send + Sync {
    fn kind(&self) -> ParadigmKind;

    /// Validate against the freshly populated pool. Runs at start, before
    /// any frame loop, so configuration errors surface at setup time.
    fn prepare(&mut self, cx: &RunContext) -> EngineResult<()> {
        let _ = cx;
        Ok(())
    }

    /// The constant-cadence marker builder, or `None` when this paradigm
    /// has no epoch cadence. Captured before the stimulus routine takes
    /// over, so the cadence task never contends with the frame loop.
    fn epoch_marker_factory(&self) -> Option<EpochMarkerFn> {
        None
    }

    /// The per-run stimulus routine. Must observe cancellation at least
    /// once per frame; the runner forces every pool object dark when the
    /// routine returns, whatever the reason.
    async fn drive(&mut self, cx: &RunContext) -> EngineResult<RunEnd>;
}
