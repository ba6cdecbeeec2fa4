//! Windowed epoch signaling
//!
//! No flashing: the paradigm idles cooperatively while the constant cadence
//! emits one `mi` marker per `window + inter-window` tick describing pool
//! size, training target, and window length. Used by non-visual paradigms
//! such as motor imagery.

use std::sync::Arc;

use async_trait::async_trait;

use stim_types::{EpochKind, EventMarker};

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::modes::{EpochMarkerFn, Paradigm, ParadigmKind, RunEnd};
use crate::runner::RunContext;

pub struct EpochParadigm {
    window_s: f32,
}

impl EpochParadigm {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            window_s: config.window_length_s,
        }
    }
}

#[async_trait]
impl Paradigm for EpochParadigm {
    fn kind(&self) -> ParadigmKind {
        ParadigmKind::WindowedEpoch
    }

    fn epoch_marker_factory(&self) -> Option<EpochMarkerFn> {
        let window_s = self.window_s;
        Some(Arc::new(move |pool_size, train_target| {
            EventMarker::Epoch {
                kind: EpochKind::MotorImagery,
                pool_size,
                train_target,
                window_s,
            }
        }))
    }

    async fn drive(&mut self, cx: &RunContext) -> EngineResult<RunEnd> {
        loop {
            if cx.is_cancelled() {
                return Ok(RunEnd::Cancelled);
            }
            cx.next_frame().await;
        }
    }
}
