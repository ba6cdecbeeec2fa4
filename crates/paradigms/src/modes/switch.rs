//! Switch-style binary signaling
//!
//! The same epoch cadence as the windowed paradigm with a two-option
//! convention and the `switch` tag. Pools larger than two members get a
//! non-fatal warning at setup.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use stim_types::{EpochKind, EventMarker};

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::modes::{EpochMarkerFn, Paradigm, ParadigmKind, RunEnd};
use crate::runner::RunContext;

pub struct SwitchParadigm {
    window_s: f32,
}

impl SwitchParadigm {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            window_s: config.window_length_s,
        }
    }
}

#[async_trait]
impl Paradigm for SwitchParadigm {
    fn kind(&self) -> ParadigmKind {
        ParadigmKind::Switch
    }

    fn prepare(&mut self, cx: &RunContext) -> EngineResult<()> {
        let size = cx.pool_size();
        if size > 2 {
            warn!(size, "switch paradigm expects at most two targets");
        }
        Ok(())
    }

    fn epoch_marker_factory(&self) -> Option<EpochMarkerFn> {
        let window_s = self.window_s;
        Some(Arc::new(move |pool_size, train_target| {
            EventMarker::Epoch {
                kind: EpochKind::Switch,
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
