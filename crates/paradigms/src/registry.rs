//! Controller registry
//!
//! An explicit registry object held by the composition root, replacing the
//! ambient global singleton pattern. Invariant: at most one active runner
//! per paradigm kind; activating a runner for a kind stops and replaces the
//! previous holder.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::info;

use crate::modes::ParadigmKind;
use crate::runner::StimulusRunner;

#[derive(Default)]
pub struct ControllerRegistry {
    active: Mutex<HashMap<ParadigmKind, StimulusRunner>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `runner` as the active controller for its paradigm kind.
    /// Any previous holder of that kind is stopped first.
    pub async fn activate(&self, runner: StimulusRunner) {
        let kind = runner.kind();
        let previous = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.insert(kind, runner)
        };
        if let Some(previous) = previous {
            info!(?kind, "replacing active controller");
            previous.stop().await;
        }
    }

    /// The active runner for a paradigm kind, if any.
    pub fn get(&self, kind: ParadigmKind) -> Option<StimulusRunner> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.get(&kind).cloned()
    }

    /// Remove and stop the active runner for a paradigm kind.
    pub async fn deactivate(&self, kind: ParadigmKind) {
        let removed = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.remove(&kind)
        };
        if let Some(runner) = removed {
            runner.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::ParadigmKind;

    #[test]
    fn test_empty_registry() {
        let registry = ControllerRegistry::new();
        assert!(registry.get(ParadigmKind::FlashPattern).is_none());
    }
}
