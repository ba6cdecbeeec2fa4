//! Stimulus run state machine
//!
//! One [`StimulusRunner`] per controller instance orchestrates a run: start,
//! per-frame stimulus update, constant marker emission, stop, and selection
//! resolution. Scheduling is cooperative: the stimulus routine and the
//! marker cadence run as tokio tasks that observe a cancellation token at
//! frame boundaries, and starting a new task of either role first cancels
//! the existing one (replace, not stack).

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use stim_types::{
    CommandMarker, EventMarker, MarkerTransport, ObjectId, OutgoingMarker, PredictionHandler,
    SubscriberId,
};

use crate::clock::FrameClock;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::modes::{EpochMarkerFn, Paradigm, ParadigmKind, RunEnd};
use crate::pool::SelectionPool;

/// Which training protocol is currently layered on the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrainingMode {
    #[default]
    None,
    Automated,
    Iterative,
    User,
    Single,
}

/// The mutable run state record, one per controller instance.
#[derive(Debug)]
pub struct RunState {
    pub is_running: bool,
    pub last_selected: Option<ObjectId>,
    pub training_mode: TrainingMode,
    pub train_target: Option<usize>,
    deferred_selection: Option<usize>,
    markers_enabled: bool,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            is_running: false,
            last_selected: None,
            training_mode: TrainingMode::None,
            train_target: None,
            deferred_selection: None,
            markers_enabled: true,
        }
    }
}

struct TaskHandle {
    token: CancellationToken,
    _handle: tokio::task::JoinHandle<()>,
}

pub(crate) struct RunnerShared {
    config: EngineConfig,
    pool: Arc<SelectionPool>,
    transport: Arc<dyn MarkerTransport>,
    clock: Arc<dyn FrameClock>,
    state: Mutex<RunState>,
    paradigm: tokio::sync::Mutex<Box<dyn Paradigm>>,
    kind: ParadigmKind,
    stim_task: Mutex<Option<TaskHandle>>,
    marker_task: Mutex<Option<TaskHandle>>,
    selection_view: Mutex<Option<Vec<ObjectId>>>,
    subscriber_id: SubscriberId,
}

impl RunnerShared {
    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn emit(&self, marker: OutgoingMarker) {
        let enabled = self.state().markers_enabled;
        if !enabled {
            debug!(wire = %marker.to_wire(), "outgoing markers suppressed");
            return;
        }
        self.transport.push(&marker).await;
    }

    /// Shared Running -> Idle transition, reachable from `stop` and from a
    /// stimulus routine whose plan exhausted. Idempotent.
    async fn finish_run(&self) {
        let was_running = {
            let mut state = self.state();
            let was = state.is_running;
            state.is_running = false;
            was
        };
        if let Some(task) = self.stim_task.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            task.token.cancel();
        }
        if let Some(task) = self.marker_task.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            task.token.cancel();
        }
        if !was_running {
            return;
        }

        self.emit(CommandMarker::TrialEnds.into()).await;

        // Deferred end-of-run selection, first-writer-wins: only fires when
        // no other selection landed during the run.
        let deferred = {
            let mut state = self.state();
            if state.last_selected.is_none() {
                state.deferred_selection.take()
            } else {
                state.deferred_selection = None;
                None
            }
        };
        if let Some(index) = deferred {
            if let Some(id) = self.pool.select_by_index(index) {
                self.state().last_selected = Some(id);
                info!(id, index, "deferred end-of-run selection applied");
            }
        }
    }

    /// Resolve an incoming classifier selection onto a pool object. Goes
    /// through the paradigm's selection view when one is installed, so
    /// filtered-view indices never collide with full-pool indices.
    /// Predictions that arrive between runs are dropped.
    fn apply_selection(&self, selection: usize) {
        if !self.state().is_running {
            debug!(selection, "prediction received while idle, ignoring");
            return;
        }
        let view = self
            .selection_view
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let selected = match view {
            Some(view) => match view.get(selection) {
                Some(&id) => self.pool.select_by_id(id),
                None => {
                    warn!(
                        selection,
                        view_len = view.len(),
                        "prediction outside the visible view"
                    );
                    None
                }
            },
            None => self.pool.select_by_index(selection),
        };
        if let Some(id) = selected {
            self.state().last_selected = Some(id);
            info!(id, selection, "prediction resolved to selection");
        }
    }

    fn install_task(slot: &Mutex<Option<TaskHandle>>, new: TaskHandle) {
        let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = slot.take() {
            old.token.cancel();
        }
        *slot = Some(new);
    }
}

/// Routes transport predictions into the runner. Holds a weak link so a
/// dropped runner silently detaches from the transport.
struct PredictionRouter {
    shared: Weak<RunnerShared>,
}

impl PredictionHandler for PredictionRouter {
    fn on_prediction(&self, selection: usize) {
        if let Some(shared) = self.shared.upgrade() {
            shared.apply_selection(selection);
        }
    }
}

/// Everything a stimulus routine needs for one run.
#[derive(Clone)]
pub struct RunContext {
    shared: Arc<RunnerShared>,
    token: CancellationToken,
}

impl RunContext {
    pub fn pool(&self) -> &SelectionPool {
        &self.shared.pool
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn frame_rate(&self) -> f32 {
        self.shared.clock.frame_rate()
    }

    /// Whether the run has been stopped. Routines must check this at least
    /// once per frame.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Suspend until the next frame boundary.
    pub async fn next_frame(&self) {
        self.shared.clock.next_frame().await;
    }

    /// Suspend for `duration`, waking early on cancellation. Returns false
    /// when the wait was cut short.
    pub async fn wait(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = self.shared.clock.sleep(duration) => true,
        }
    }

    /// Emit one paradigm event marker.
    pub async fn emit(&self, marker: EventMarker) {
        self.shared.emit(marker.into()).await;
    }

    pub fn pool_size(&self) -> usize {
        self.shared.pool.len()
    }

    pub fn train_target(&self) -> Option<usize> {
        self.shared.state().train_target
    }

    /// Install or clear the filtered selection view: object ids addressed
    /// by the marker indices the paradigm is currently emitting.
    pub fn set_selection_view(&self, view: Option<Vec<ObjectId>>) {
        *self
            .shared
            .selection_view
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = view;
    }
}

/// The stimulus run state machine.
#[derive(Clone)]
pub struct StimulusRunner {
    shared: Arc<RunnerShared>,
}

impl StimulusRunner {
    pub fn new(
        config: EngineConfig,
        paradigm: Box<dyn Paradigm>,
        pool: Arc<SelectionPool>,
        transport: Arc<dyn MarkerTransport>,
        clock: Arc<dyn FrameClock>,
    ) -> Self {
        let kind = paradigm.kind();
        Self {
            shared: Arc::new(RunnerShared {
                config,
                pool,
                transport,
                clock,
                state: Mutex::new(RunState::default()),
                paradigm: tokio::sync::Mutex::new(paradigm),
                kind,
                stim_task: Mutex::new(None),
                marker_task: Mutex::new(None),
                selection_view: Mutex::new(None),
                subscriber_id: Uuid::new_v4(),
            }),
        }
    }

    pub fn kind(&self) -> ParadigmKind {
        self.shared.kind
    }

    pub fn pool(&self) -> &Arc<SelectionPool> {
        &self.shared.pool
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.shared.state().is_running
    }

    pub fn last_selected(&self) -> Option<ObjectId> {
        self.shared.state().last_selected
    }

    /// Begin a stimulus run. Re-entrant: starting while already running
    /// performs a full stop first.
    ///
    /// Emits `Trial Started`, subscribes for incoming predictions,
    /// repopulates the pool, validates the paradigm against it, then
    /// launches the stimulus routine and, unless suppressed, the constant
    /// marker cadence at `window_length + inter_window_interval`.
    pub async fn start(&self, send_constant_markers: bool) -> EngineResult<()> {
        if self.is_running() {
            self.stop().await;
        }

        {
            let mut state = self.shared.state();
            state.is_running = true;
            state.last_selected = None;
            state.deferred_selection = None;
        }
        self.shared.emit(CommandMarker::TrialStarted.into()).await;

        self.shared.transport.subscribe(
            self.shared.subscriber_id,
            Arc::new(PredictionRouter {
                shared: Arc::downgrade(&self.shared),
            }),
        );

        let stim_token = CancellationToken::new();
        let cx = RunContext {
            shared: self.shared.clone(),
            token: stim_token.clone(),
        };

        cx.set_selection_view(None);
        let setup = self.shared.pool.populate(&self.shared.config.population);
        let factory = match setup {
            Ok(()) => {
                let mut paradigm = self.shared.paradigm.lock().await;
                paradigm
                    .prepare(&cx)
                    .map(|()| paradigm.epoch_marker_factory())
            }
            Err(err) => Err(err),
        };
        let factory = match factory {
            Ok(factory) => factory,
            Err(err) => {
                // Unwind so every Trial Started still pairs with an end.
                self.shared.state().is_running = false;
                self.shared.emit(CommandMarker::TrialEnds.into()).await;
                return Err(err);
            }
        };

        self.spawn_stimulus_task(cx, stim_token);
        if send_constant_markers {
            if let Some(factory) = factory {
                self.spawn_marker_task(factory);
            }
        }
        Ok(())
    }

    /// End the run: clears the running flag, cancels both tasks, emits
    /// `Trial Ends`, and resolves a deferred selection if no other
    /// selection occurred during the run. The stimulus routine observes the
    /// cancellation at its next cooperative yield and forces every pool
    /// object dark before terminating.
    pub async fn stop(&self) {
        self.shared.finish_run().await;
    }

    /// Defer a selection to the Running -> Idle transition. Only fires if
    /// no other selection lands during the run (first-writer-wins).
    pub fn select_at_end_of_run(&self, index: usize) {
        let mut state = self.shared.state();
        if !state.is_running {
            warn!(index, "deferred selection requested while idle, ignoring");
            return;
        }
        state.deferred_selection = Some(index);
    }

    /// Manual selection by pool index, bypassing any filtered view.
    pub fn select_by_index(&self, index: usize) {
        if let Some(id) = self.shared.pool.select_by_index(index) {
            self.shared.state().last_selected = Some(id);
        }
    }

    /// Set or clear the training target carried in outgoing markers.
    pub fn set_train_target(&self, target: Option<usize>) {
        self.shared.state().train_target = target;
    }

    pub fn set_training_mode(&self, mode: TrainingMode) {
        self.shared.state().training_mode = mode;
    }

    pub fn training_mode(&self) -> TrainingMode {
        self.shared.state().training_mode
    }

    /// Gate every outgoing marker push. Used by user-guided training to
    /// keep the classifier log untouched.
    pub fn set_markers_enabled(&self, enabled: bool) {
        self.shared.state().markers_enabled = enabled;
    }

    /// Emit one command marker through the runner's suppression gate.
    pub async fn emit_command(&self, command: CommandMarker) {
        self.shared.emit(command.into()).await;
    }

    fn spawn_stimulus_task(&self, cx: RunContext, token: CancellationToken) {
        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            let end = {
                let mut paradigm = shared.paradigm.lock().await;
                paradigm.drive(&cx).await
            };
            // Stopping must never leave a target stuck lit.
            shared.pool.stop_all();
            match end {
                Ok(RunEnd::Exhausted) => shared.finish_run().await,
                Ok(RunEnd::Cancelled) => {}
                Err(err) => {
                    error!(%err, "stimulus routine failed, ending run");
                    shared.finish_run().await;
                }
            }
        });
        RunnerShared::install_task(
            &self.shared.stim_task,
            TaskHandle {
                token,
                _handle: handle,
            },
        );
    }

    fn spawn_marker_task(&self, factory: EpochMarkerFn) {
        let shared = self.shared.clone();
        let token = CancellationToken::new();
        let task_token = token.clone();
        let period = Duration::from_secs_f32(self.shared.config.epoch_period_s().max(f32::EPSILON));
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = shared.clock.sleep(period) => {}
                }
                let (size, target) = {
                    let state = shared.state();
                    (shared.pool.len(), state.train_target)
                };
                shared.emit(factory(size, target).into()).await;
            }
        });
        RunnerShared::install_task(
            &self.shared.marker_task,
            TaskHandle {
                token,
                _handle: handle,
            },
        );
    }
}
