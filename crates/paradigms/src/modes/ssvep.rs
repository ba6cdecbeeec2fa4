//! Frequency-coded flashing (VEP-style)
//!
//! Each target flashes at its own constant frequency through duty-cycle
//! scheduling against the logical frame rate. Every frame each target's
//! independent on/off counter advances; crossing its threshold toggles the
//! target and resets the counter.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use stim_types::EventMarker;

use crate::config::{EngineConfig, SsvepConfig};
use crate::error::{EngineError, EngineResult};
use crate::modes::{EpochMarkerFn, Paradigm, ParadigmKind, RunEnd};
use crate::runner::RunContext;

/// Frame counts for one target's flash cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DutyCycle {
    pub frames_on: u32,
    pub frames_off: u32,
    pub achieved_hz: f32,
}

/// Compute the duty cycle for one requested frequency.
///
/// `period = target_frame_rate / requested_hz`, `frames_off = ceil(period/2)`,
/// `frames_on = floor(period/2)`; the achievable frequency is
/// `target_frame_rate / (frames_on + frames_off)`. Requests outside
/// `(0, frame_rate/2]` cannot produce at least one lit frame per cycle and
/// are configuration errors.
pub fn duty_cycle(target_frame_rate: f32, requested_hz: f32) -> EngineResult<DutyCycle> {
    let max = target_frame_rate / 2.0;
    if requested_hz <= 0.0 || requested_hz > max {
        return Err(EngineError::InvalidFrequency {
            requested: requested_hz,
            max,
            frame_rate: target_frame_rate,
        });
    }
    let period = target_frame_rate / requested_hz;
    let frames_off = (period / 2.0).ceil() as u32;
    let frames_on = (period / 2.0).floor() as u32;
    Ok(DutyCycle {
        frames_on,
        frames_off,
        achieved_hz: target_frame_rate / (frames_on + frames_off) as f32,
    })
}

#[derive(Clone, Copy, Default)]
struct ToggleState {
    lit: bool,
    count: u32,
}

pub struct SsvepParadigm {
    config: SsvepConfig,
    window_s: f32,
    schedules: Vec<DutyCycle>,
}

impl SsvepParadigm {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.ssvep.clone(),
            window_s: config.window_length_s,
            schedules: Vec::new(),
        }
    }
}

#[async_trait]
impl Paradigm for SsvepParadigm {
    fn kind(&self) -> ParadigmKind {
        ParadigmKind::FrequencyCoded
    }

    fn prepare(&mut self, cx: &RunContext) -> EngineResult<()> {
        if self.config.frequencies_hz.is_empty() {
            return Err(EngineError::EmptyFrequencyList);
        }
        let size = cx.pool_size();
        if size > self.config.frequencies_hz.len() {
            warn!(
                size,
                frequencies = self.config.frequencies_hz.len(),
                "fewer frequencies than targets, cycling the request list"
            );
        }
        self.schedules = (0..size)
            .map(|i| {
                let requested = self.config.frequencies_hz[i % self.config.frequencies_hz.len()];
                duty_cycle(cx.frame_rate(), requested)
            })
            .collect::<EngineResult<_>>()?;
        Ok(())
    }

    fn epoch_marker_factory(&self) -> Option<EpochMarkerFn> {
        let window_s = self.window_s;
        let frequencies: Vec<f32> = self.schedules.iter().map(|s| s.achieved_hz).collect();
        Some(Arc::new(move |pool_size, train_target| {
            EventMarker::Ssvep {
                pool_size,
                train_target,
                window_s,
                frequencies: frequencies.clone(),
            }
        }))
    }

    async fn drive(&mut self, cx: &RunContext) -> EngineResult<RunEnd> {
        let mut states = vec![ToggleState::default(); self.schedules.len()];
        loop {
            if cx.is_cancelled() {
                return Ok(RunEnd::Cancelled);
            }
            cx.next_frame().await;
            for (index, (state, cycle)) in states.iter_mut().zip(&self.schedules).enumerate() {
                state.count += 1;
                if state.lit {
                    if state.count >= cycle.frames_on {
                        cx.pool().stop_stimulus(index);
                        state.lit = false;
                        state.count = 0;
                    }
                } else if state.count >= cycle.frames_off {
                    cx.pool().start_stimulus(index);
                    state.lit = true;
                    state.count = 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duty_cycle_60_10() {
        let cycle = duty_cycle(60.0, 10.0).unwrap();
        assert_eq!(cycle.frames_on, 3);
        assert_eq!(cycle.frames_off, 3);
        assert_eq!(cycle.achieved_hz, 10.0);
    }

    #[test]
    fn test_duty_cycle_rounds_toward_off() {
        // period = 7.5 frames: off gets the ceil half.
        let cycle = duty_cycle(60.0, 8.0).unwrap();
        assert_eq!(cycle.frames_off, 4);
        assert_eq!(cycle.frames_on, 3);
        assert!((cycle.achieved_hz - 60.0 / 7.0).abs() < 1e-5);
    }

    #[test]
    fn test_duty_cycle_exact_half_rate() {
        let cycle = duty_cycle(60.0, 30.0).unwrap();
        assert_eq!(cycle.frames_on, 1);
        assert_eq!(cycle.frames_off, 1);
        assert_eq!(cycle.achieved_hz, 30.0);
    }

    #[test]
    fn test_duty_cycle_rejects_unachievable_rates() {
        assert!(duty_cycle(60.0, 0.0).is_err());
        assert!(duty_cycle(60.0, -4.0).is_err());
        assert!(duty_cycle(60.0, 31.0).is_err());
    }
}
