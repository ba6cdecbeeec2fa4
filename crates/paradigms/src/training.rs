//! Training orchestration
//!
//! Four training protocols layered on the run state machine. All share the
//! same skeleton: populate the pool, generate a non-repeating target order,
//! then for each target highlight it, run a stimulus run, optionally fire a
//! sham selection, and rest; the session ends with a `Training Complete`
//! marker. Each protocol is independently cancelable without leaking the
//! stimulus or marker tasks.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use stim_types::CommandMarker;

use crate::config::TrainingConfig;
use crate::error::{EngineError, EngineResult};
use crate::runner::{StimulusRunner, TrainingMode};
use crate::sequence;

/// Progress events surfaced to observers (UI, tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainingEvent {
    /// A target was highlighted as the training target.
    TargetHighlighted(usize),
    /// A classifier update was requested.
    ClassifierUpdate,
    /// The session ran to completion.
    Completed,
    /// The session was cancelled before completion.
    Cancelled,
}

/// One training session over a runner.
pub struct TrainingSession {
    runner: StimulusRunner,
    config: TrainingConfig,
    token: CancellationToken,
    events: flume::Sender<TrainingEvent>,
}

impl TrainingSession {
    /// Create a session and the receiver half of its progress stream.
    pub fn new(
        runner: StimulusRunner,
        config: TrainingConfig,
    ) -> (Self, flume::Receiver<TrainingEvent>) {
        let (events, rx) = flume::unbounded();
        (
            Self {
                runner,
                config,
                token: CancellationToken::new(),
                events,
            },
            rx,
        )
    }

    /// A token that cancels the session at its next checkpoint. The runner
    /// is stopped on the way out, so no frame or marker loop leaks.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Automated protocol: the common skeleton, markers on.
    pub async fn run_automated(&self) -> EngineResult<()> {
        self.runner.set_training_mode(TrainingMode::Automated);
        let outcome = self.run_selections(true, None).await;
        self.finish(outcome).await
    }

    /// Iterative protocol: automated plus `Update Classifier` markers after
    /// the configured number of selections and every so many thereafter.
    pub async fn run_iterative(&self) -> EngineResult<()> {
        self.runner.set_training_mode(TrainingMode::Iterative);
        let schedule = (
            self.config.initial_classifier_update.max(1),
            self.config.classifier_update_every.max(1),
        );
        let outcome = self.run_selections(true, Some(schedule)).await;
        self.finish(outcome).await
    }

    /// User-guided protocol: the common skeleton with every outgoing marker
    /// suppressed so a human can calibrate without touching the classifier
    /// log. Progress events still fire locally.
    pub async fn run_user(&self) -> EngineResult<()> {
        self.runner.set_training_mode(TrainingMode::User);
        self.runner.set_markers_enabled(false);
        let outcome = self.run_selections(true, None).await;
        // Restore after teardown so the completion marker stays suppressed.
        let result = self.finish(outcome).await;
        self.runner.set_markers_enabled(true);
        result
    }

    /// Single-shot protocol: exactly one pool member, one training run.
    pub async fn run_single(&self) -> EngineResult<()> {
        self.runner.set_training_mode(TrainingMode::Single);
        self.runner.pool().populate(&self.runner.config().population)?;
        let found = self.runner.pool().len();
        if found != 1 {
            self.runner.set_training_mode(TrainingMode::None);
            return Err(EngineError::SingleTrainingPool { found });
        }
        let outcome = self.train_one_target(0, true).await;
        self.finish(outcome).await
    }

    /// The shared skeleton. Returns Ok(false) when cancelled mid-session.
    async fn run_selections(
        &self,
        send_markers: bool,
        update_schedule: Option<(usize, usize)>,
    ) -> EngineResult<bool> {
        self.runner.pool().populate(&self.runner.config().population)?;
        let size = self.runner.pool().len();
        if size == 0 {
            warn!("training requested on an empty pool");
            return Ok(true);
        }

        let order = sequence::generate(self.config.num_selections, 0, size as i32 - 1)?;
        info!(?order, "training order generated");

        for (completed, &target) in order.iter().enumerate() {
            if self.token.is_cancelled() {
                return Ok(false);
            }
            if !self.train_one_target(target as usize, send_markers).await? {
                return Ok(false);
            }

            if let Some((initial, every)) = update_schedule {
                let done = completed + 1;
                if done == initial || (done > initial && (done - initial) % every == 0) {
                    self.runner
                        .emit_command(CommandMarker::UpdateClassifier)
                        .await;
                    let _ = self.events.send(TrainingEvent::ClassifierUpdate);
                }
            }

            if !self.rest(self.config.rest_time_s).await {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Highlight one target, run one stimulus run for the training time,
    /// stop, and apply the optional sham selection. Returns Ok(false) when
    /// cancelled.
    async fn train_one_target(&self, target: usize, send_markers: bool) -> EngineResult<bool> {
        self.runner.set_train_target(Some(target));
        self.runner.pool().mark_target(target);
        let _ = self.events.send(TrainingEvent::TargetHighlighted(target));

        let started = self.runner.start(send_markers).await;
        if let Err(err) = started {
            self.cleanup_target(target);
            return Err(err);
        }

        let finished = self.rest(self.config.train_time_s).await;
        self.runner.stop().await;

        if finished && self.config.sham_feedback {
            self.runner.select_by_index(target);
        }
        self.cleanup_target(target);
        Ok(finished)
    }

    fn cleanup_target(&self, target: usize) {
        if !self.config.persistent_highlight {
            self.runner.pool().unmark_target(target);
        }
        self.runner.set_train_target(None);
    }

    /// Cancellable sleep. Returns false when the session token fired first.
    async fn rest(&self, seconds: f32) -> bool {
        if seconds <= 0.0 {
            return !self.token.is_cancelled();
        }
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(Duration::from_secs_f32(seconds)) => true,
        }
    }

    /// Common teardown: make sure the runner is idle, clear highlights and
    /// the training mode, and emit the completion marker unless cancelled.
    async fn finish(&self, outcome: EngineResult<bool>) -> EngineResult<()> {
        if self.runner.is_running() {
            self.runner.stop().await;
        }
        if self.config.persistent_highlight {
            self.runner.pool().unmark_all();
        }
        self.runner.set_train_target(None);
        self.runner.set_training_mode(TrainingMode::None);

        match outcome {
            Ok(true) => {
                self.runner
                    .emit_command(CommandMarker::TrainingComplete)
                    .await;
                let _ = self.events.send(TrainingEvent::Completed);
                Ok(())
            }
            Ok(false) => {
                info!("training session cancelled");
                let _ = self.events.send(TrainingEvent::Cancelled);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
