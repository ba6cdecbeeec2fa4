//! Engine configuration

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How the selection pool is rebuilt on population.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PopulationMethod {
    /// Scan the tag registry for entities under this label and keep the
    /// selectable ones.
    Tag { label: String },
    /// Use the caller-supplied fixed list as-is.
    Predefined,
    /// Reserved: children-of-caller discovery. Not implemented.
    Children,
}

/// Which flash plan the flash-pattern paradigm runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlashPlan {
    /// Flat random order, one target at a time.
    Single,
    /// Whole grid rows and columns fire in randomized order.
    RowColumn,
    /// Parity-split checkerboard over a shuffled permutation.
    Checkerboard,
    /// Tour-ordered single flashes over the visible subset.
    ContextAwareSingle,
    /// Balanced bi-partition groups over the visible subset.
    ContextAwareMulti,
}

/// Timing and layout for the flash-pattern paradigm.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlashConfig {
    pub plan: FlashPlan,
    /// Flashes per target (Single/ContextAware) or full cycles (grids).
    pub repeats: usize,
    /// Seconds a flash stays lit.
    pub on_time_s: f32,
    /// Seconds of darkness after each flash.
    pub off_time_s: f32,
    /// Grid rows; 0 derives a near-square grid from the pool size.
    pub rows: usize,
    /// Grid columns; 0 derives a near-square grid from the pool size.
    pub cols: usize,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            plan: FlashPlan::Single,
            repeats: 5,
            on_time_s: 0.1,
            off_time_s: 0.075,
            rows: 0,
            cols: 0,
        }
    }
}

/// Frequency-coded paradigm settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SsvepConfig {
    /// Requested flash frequencies in Hz, one per target. Shorter lists
    /// cycle over the pool.
    pub frequencies_hz: Vec<f32>,
}

impl Default for SsvepConfig {
    fn default() -> Self {
        Self {
            frequencies_hz: vec![9.25, 11.25, 13.25, 15.25],
        }
    }
}

/// Training protocol settings shared by all four protocols.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// How many training selections one session runs.
    pub num_selections: usize,
    /// Seconds each training stimulus run lasts.
    pub train_time_s: f32,
    /// Rest between selections, in seconds.
    pub rest_time_s: f32,
    /// Fire a sham selection on the target after each run.
    pub sham_feedback: bool,
    /// Keep the target highlighted through the trial instead of unmarking
    /// between runs.
    pub persistent_highlight: bool,
    /// Iterative protocol: selections before the first classifier update.
    pub initial_classifier_update: usize,
    /// Iterative protocol: selections between subsequent updates.
    pub classifier_update_every: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            num_selections: 4,
            train_time_s: 4.0,
            rest_time_s: 1.0,
            sham_feedback: false,
            persistent_highlight: false,
            initial_classifier_update: 3,
            classifier_update_every: 1,
        }
    }
}

/// Configuration for one paradigm controller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Logical frames per second the host renders at.
    pub target_frame_rate: f32,
    /// Epoch window length in seconds.
    pub window_length_s: f32,
    /// Gap between epoch windows in seconds.
    pub inter_window_s: f32,
    /// How the pool is rebuilt at run start.
    pub population: PopulationMethod,
    pub flash: FlashConfig,
    pub ssvep: SsvepConfig,
    pub training: TrainingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_frame_rate: 60.0,
            window_length_s: 1.0,
            inter_window_s: 0.0,
            population: PopulationMethod::Tag {
                label: "BCI".to_string(),
            },
            flash: FlashConfig::default(),
            ssvep: SsvepConfig::default(),
            training: TrainingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// One epoch cadence period: window length plus the inter-window gap.
    pub fn epoch_period_s(&self) -> f32 {
        self.window_length_s + self.inter_window_s
    }
}

/// Load engine configuration from a JSON file.
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<EngineConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("could not read configuration file at '{}'", path.display()))?;
    let config: EngineConfig = serde_json::from_str(&contents)
        .with_context(|| format!("could not parse configuration file at '{}'", path.display()))?;
    Ok(config)
}
