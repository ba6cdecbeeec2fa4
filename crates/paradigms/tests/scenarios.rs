//! End-to-end scenarios for the paradigm engine, driven under tokio's
//! paused virtual time so frame loops advance deterministically.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use paradigms::clock::IntervalClock;
use paradigms::config::{EngineConfig, FlashConfig, FlashPlan, PopulationMethod, TrainingConfig};
use paradigms::error::EngineError;
use paradigms::modes::{EpochParadigm, FlashParadigm, SsvepParadigm};
use paradigms::pool::{SelectionPool, TagRegistry};
use paradigms::registry::ControllerRegistry;
use paradigms::runner::StimulusRunner;
use paradigms::training::{TrainingEvent, TrainingSession};
use stim_types::{LocalTransport, ObjectId, StimulusObject};

#[derive(Default)]
struct MockTarget {
    selectable: bool,
    position: Option<[f32; 2]>,
    id: AtomicU32,
    has_id: AtomicBool,
    lit: AtomicBool,
    marked: AtomicBool,
    selections: AtomicUsize,
}

impl MockTarget {
    fn selectable() -> Arc<Self> {
        Arc::new(Self {
            selectable: true,
            ..Default::default()
        })
    }

    fn selectable_at(position: [f32; 2]) -> Arc<Self> {
        Arc::new(Self {
            selectable: true,
            position: Some(position),
            ..Default::default()
        })
    }

    fn decoration() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn is_lit(&self) -> bool {
        self.lit.load(Ordering::SeqCst)
    }

    fn selection_count(&self) -> usize {
        self.selections.load(Ordering::SeqCst)
    }
}

impl StimulusObject for MockTarget {
    fn start_stimulus(&self) -> u64 {
        self.lit.store(true, Ordering::SeqCst);
        0
    }

    fn stop_stimulus(&self) {
        self.lit.store(false, Ordering::SeqCst);
    }

    fn mark_training_target(&self) {
        self.marked.store(true, Ordering::SeqCst);
    }

    fn unmark_training_target(&self) {
        self.marked.store(false, Ordering::SeqCst);
    }

    fn select(&self) {
        self.selections.fetch_add(1, Ordering::SeqCst);
    }

    fn is_selectable(&self) -> bool {
        self.selectable
    }

    fn object_id(&self) -> Option<ObjectId> {
        if self.has_id.load(Ordering::SeqCst) {
            Some(self.id.load(Ordering::SeqCst))
        } else {
            None
        }
    }

    fn assign_object_id(&self, id: ObjectId) {
        self.id.store(id, Ordering::SeqCst);
        self.has_id.store(true, Ordering::SeqCst);
    }

    fn screen_position(&self) -> Option<[f32; 2]> {
        self.position
    }
}

struct Harness {
    runner: StimulusRunner,
    transport: Arc<LocalTransport>,
    markers: flume::Receiver<String>,
    targets: Vec<Arc<MockTarget>>,
}

impl Harness {
    fn drain_markers(&self) -> Vec<String> {
        self.markers.drain().collect()
    }
}

fn epoch_harness(pool_size: usize, config: EngineConfig) -> Harness {
    build_harness(pool_size, config, |cfg| Box::new(EpochParadigm::new(cfg)))
}

fn ssvep_harness(pool_size: usize, config: EngineConfig) -> Harness {
    build_harness(pool_size, config, |cfg| Box::new(SsvepParadigm::new(cfg)))
}

fn build_harness(
    pool_size: usize,
    config: EngineConfig,
    paradigm: impl Fn(&EngineConfig) -> Box<dyn paradigms::modes::Paradigm>,
) -> Harness {
    let registry = Arc::new(TagRegistry::new());
    let mut targets = Vec::new();
    for _ in 0..pool_size {
        let target = MockTarget::selectable();
        registry.register("BCI", &(target.clone() as Arc<dyn StimulusObject>));
        targets.push(target);
    }

    let pool = Arc::new(SelectionPool::new(registry));
    let (transport, markers) = LocalTransport::new();
    let clock = Arc::new(IntervalClock::from_rate(config.target_frame_rate));
    let runner = StimulusRunner::new(
        config.clone(),
        paradigm(&config),
        pool,
        transport.clone(),
        clock,
    );
    Harness {
        runner,
        transport,
        markers,
        targets,
    }
}

fn base_config() -> EngineConfig {
    EngineConfig {
        population: PopulationMethod::Tag {
            label: "BCI".to_string(),
        },
        ..EngineConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn scenario_a_tag_population_indexes_selectables() {
    let registry = Arc::new(TagRegistry::new());
    let mut targets = Vec::new();
    for _ in 0..5 {
        let target = MockTarget::selectable();
        registry.register("BCI", &(target.clone() as Arc<dyn StimulusObject>));
        targets.push(target);
    }
    for _ in 0..2 {
        let target = MockTarget::decoration();
        registry.register("BCI", &(target.clone() as Arc<dyn StimulusObject>));
        targets.push(target);
    }

    let pool = SelectionPool::new(registry);
    pool.populate(&PopulationMethod::Tag {
        label: "BCI".to_string(),
    })
    .unwrap();

    assert_eq!(pool.len(), 5);
    let ids = pool.ids();
    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn scenario_b_restart_emits_ends_between_starts() {
    let harness = epoch_harness(2, base_config());

    harness.runner.start(false).await.unwrap();
    harness.runner.start(false).await.unwrap();

    let markers = harness.drain_markers();
    assert_eq!(
        markers,
        vec!["Trial Started", "Trial Ends", "Trial Started"]
    );
    assert!(harness.runner.is_running());

    harness.runner.stop().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_e_manual_selection_beats_deferred() {
    let harness = epoch_harness(3, base_config());

    harness.runner.start(false).await.unwrap();
    harness.runner.select_at_end_of_run(0);
    harness.runner.select_by_index(1);
    harness.runner.stop().await;

    let ids = harness.runner.pool().ids();
    assert_eq!(harness.runner.last_selected(), Some(ids[1]));
    assert_eq!(harness.targets[0].selection_count(), 0);
    assert_eq!(harness.targets[1].selection_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn deferred_selection_fires_when_run_ends_quiet() {
    let harness = epoch_harness(3, base_config());

    harness.runner.start(false).await.unwrap();
    harness.runner.select_at_end_of_run(2);
    harness.runner.stop().await;

    let ids = harness.runner.pool().ids();
    assert_eq!(harness.runner.last_selected(), Some(ids[2]));
    assert_eq!(harness.targets[2].selection_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn incoming_prediction_resolves_to_pool_index() {
    let harness = epoch_harness(4, base_config());

    harness.runner.start(false).await.unwrap();
    // Wire value 3 is 1-indexed: selects pool index 2.
    harness.transport.deliver("3");

    let ids = harness.runner.pool().ids();
    assert_eq!(harness.runner.last_selected(), Some(ids[2]));
    assert_eq!(harness.targets[2].selection_count(), 1);

    harness.runner.stop().await;
}

#[tokio::test(start_paused = true)]
async fn prediction_between_runs_is_dropped() {
    let harness = epoch_harness(3, base_config());

    harness.runner.start(false).await.unwrap();
    harness.runner.stop().await;
    harness.transport.deliver("2");

    assert_eq!(harness.runner.last_selected(), None);
    assert!(harness.targets.iter().all(|t| t.selection_count() == 0));
}

#[tokio::test(start_paused = true)]
async fn constant_marker_cadence_describes_the_pool() {
    let mut config = base_config();
    config.window_length_s = 1.0;
    config.inter_window_s = 0.0;
    let harness = epoch_harness(2, config);

    harness.runner.start(true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(3050)).await;
    harness.runner.stop().await;

    let markers = harness.drain_markers();
    assert_eq!(markers.first().map(String::as_str), Some("Trial Started"));
    assert_eq!(markers.last().map(String::as_str), Some("Trial Ends"));
    let epochs: Vec<&String> = markers.iter().filter(|m| m.starts_with("mi,")).collect();
    assert_eq!(epochs.len(), 3);
    for epoch in epochs {
        assert_eq!(epoch.as_str(), "mi,2,-1,1.00");
    }
}

#[tokio::test(start_paused = true)]
async fn stopping_forces_every_target_dark() {
    let mut config = base_config();
    config.ssvep.frequencies_hz = vec![10.0, 15.0];
    let harness = ssvep_harness(2, config);

    harness.runner.start(false).await.unwrap();
    // Let the duty cycles light something up.
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(harness.targets.iter().any(|t| t.is_lit()));

    harness.runner.stop().await;
    // The stimulus routine observes cancellation at the next frame boundary
    // and performs its cleanup before terminating.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.targets.iter().all(|t| !t.is_lit()));
}

#[tokio::test(start_paused = true)]
async fn scenario_d_automated_training_counts() {
    let mut config = base_config();
    config.training = TrainingConfig {
        num_selections: 2,
        train_time_s: 0.2,
        rest_time_s: 0.05,
        ..TrainingConfig::default()
    };
    let harness = epoch_harness(3, config.clone());

    let (session, events) = TrainingSession::new(harness.runner.clone(), config.training);
    session.run_automated().await.unwrap();

    let markers = harness.drain_markers();
    let completes = markers.iter().filter(|m| *m == "Training Complete").count();
    assert_eq!(completes, 1);

    let highlighted = events
        .drain()
        .filter(|e| matches!(e, TrainingEvent::TargetHighlighted(_)))
        .count();
    assert_eq!(highlighted, 2);
    assert!(!harness.runner.is_running());
    assert!(
        harness
            .targets
            .iter()
            .all(|t| !t.marked.load(Ordering::SeqCst)),
        "highlights must be cleared after the session"
    );
}

#[tokio::test(start_paused = true)]
async fn iterative_training_schedules_classifier_updates() {
    let mut config = base_config();
    config.training = TrainingConfig {
        num_selections: 4,
        train_time_s: 0.1,
        rest_time_s: 0.0,
        initial_classifier_update: 2,
        classifier_update_every: 1,
        ..TrainingConfig::default()
    };
    let harness = epoch_harness(3, config.clone());

    let (session, events) = TrainingSession::new(harness.runner.clone(), config.training);
    session.run_iterative().await.unwrap();

    let markers = harness.drain_markers();
    let updates = markers.iter().filter(|m| *m == "Update Classifier").count();
    assert_eq!(updates, 3, "updates after selections 2, 3 and 4");

    let update_events = events
        .drain()
        .filter(|e| matches!(e, TrainingEvent::ClassifierUpdate))
        .count();
    assert_eq!(update_events, 3);
}

#[tokio::test(start_paused = true)]
async fn user_training_suppresses_the_marker_log() {
    let mut config = base_config();
    config.training = TrainingConfig {
        num_selections: 1,
        train_time_s: 0.1,
        rest_time_s: 0.0,
        ..TrainingConfig::default()
    };
    let harness = epoch_harness(2, config.clone());

    let (session, events) = TrainingSession::new(harness.runner.clone(), config.training);
    session.run_user().await.unwrap();

    assert!(
        harness.drain_markers().is_empty(),
        "user-guided calibration must not touch the classifier log"
    );
    let events: Vec<TrainingEvent> = events.drain().collect();
    assert!(events
        .iter()
        .any(|e| matches!(e, TrainingEvent::TargetHighlighted(_))));
    assert!(events.contains(&TrainingEvent::Completed));
}

#[tokio::test(start_paused = true)]
async fn single_training_rejects_larger_pools() {
    let config = base_config();
    let harness = epoch_harness(2, config.clone());

    let (session, _events) = TrainingSession::new(harness.runner.clone(), config.training);
    match session.run_single().await {
        Err(EngineError::SingleTrainingPool { found: 2 }) => {}
        other => panic!("expected SingleTrainingPool, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn single_training_runs_the_lone_target() {
    let mut config = base_config();
    config.training = TrainingConfig {
        num_selections: 1,
        train_time_s: 0.1,
        rest_time_s: 0.0,
        ..TrainingConfig::default()
    };
    let harness = epoch_harness(1, config.clone());

    let (session, events) = TrainingSession::new(harness.runner.clone(), config.training);
    session.run_single().await.unwrap();

    let markers = harness.drain_markers();
    assert_eq!(
        markers.iter().filter(|m| *m == "Training Complete").count(),
        1
    );
    assert!(events
        .drain()
        .any(|e| e == TrainingEvent::TargetHighlighted(0)));
}

#[tokio::test(start_paused = true)]
async fn training_cancellation_stops_the_runner() {
    let mut config = base_config();
    config.training = TrainingConfig {
        num_selections: 10,
        train_time_s: 5.0,
        rest_time_s: 1.0,
        ..TrainingConfig::default()
    };
    let harness = epoch_harness(3, config.clone());

    let (session, events) = TrainingSession::new(harness.runner.clone(), config.training);
    let token = session.cancellation_token();
    let runner = harness.runner.clone();

    let driver = tokio::spawn(async move { session.run_automated().await });
    tokio::time::sleep(Duration::from_millis(500)).await;
    token.cancel();
    driver.await.unwrap().unwrap();

    assert!(!runner.is_running());
    let events: Vec<TrainingEvent> = events.drain().collect();
    assert!(events.contains(&TrainingEvent::Cancelled));
    assert!(!events.contains(&TrainingEvent::Completed));
    let markers = harness.drain_markers();
    assert!(!markers.iter().any(|m| m == "Training Complete"));
}

#[tokio::test(start_paused = true)]
async fn children_population_fails_the_start() {
    let mut config = base_config();
    config.population = PopulationMethod::Children;
    let harness = epoch_harness(2, config);

    match harness.runner.start(false).await {
        Err(EngineError::UnsupportedPopulation(_)) => {}
        other => panic!("expected UnsupportedPopulation, got {other:?}"),
    }
    assert!(!harness.runner.is_running());
}

#[tokio::test(start_paused = true)]
async fn exhausted_flash_plan_ends_the_run_itself() {
    let mut config = base_config();
    config.flash = FlashConfig {
        plan: FlashPlan::Single,
        repeats: 1,
        on_time_s: 0.01,
        off_time_s: 0.01,
        ..FlashConfig::default()
    };
    let harness = build_harness(2, config, |cfg| Box::new(FlashParadigm::new(cfg)));

    harness.runner.start(false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(
        !harness.runner.is_running(),
        "an exhausted plan must end the run"
    );
    let markers = harness.drain_markers();
    assert_eq!(markers.first().map(String::as_str), Some("Trial Started"));
    assert_eq!(markers.last().map(String::as_str), Some("Trial Ends"));

    let flashes: Vec<&String> = markers.iter().filter(|m| m.starts_with("p300,s,")).collect();
    assert_eq!(flashes.len(), 2, "one flash per target per repeat");
    for flash in &flashes {
        assert!(flash.starts_with("p300,s,2,-1,"));
    }
    assert_ne!(flashes[0], flashes[1], "targets must alternate");
    assert!(harness.targets.iter().all(|t| !t.is_lit()));
}

#[tokio::test(start_paused = true)]
async fn context_aware_predictions_resolve_through_the_visible_view() {
    let mut config = base_config();
    config.flash = FlashConfig {
        plan: FlashPlan::ContextAwareSingle,
        repeats: 2,
        on_time_s: 0.05,
        off_time_s: 0.05,
        ..FlashConfig::default()
    };

    // Target 0 is off-screen; only targets 1 and 2 are visible, so marker
    // indices address the two-element filtered view.
    let registry = Arc::new(TagRegistry::new());
    let targets = vec![
        MockTarget::selectable(),
        MockTarget::selectable_at([0.1, 0.1]),
        MockTarget::selectable_at([0.9, 0.9]),
    ];
    for target in &targets {
        registry.register("BCI", &(target.clone() as Arc<dyn StimulusObject>));
    }
    let pool = Arc::new(SelectionPool::new(registry));
    let (transport, markers) = LocalTransport::new();
    let clock = Arc::new(IntervalClock::from_rate(config.target_frame_rate));
    let runner = StimulusRunner::new(
        config.clone(),
        Box::new(FlashParadigm::new(&config)),
        pool,
        transport.clone(),
        clock,
    );

    runner.start(false).await.unwrap();
    // Let the routine install the visible view, then echo a prediction.
    tokio::time::sleep(Duration::from_millis(10)).await;
    transport.deliver("1");

    let ids = runner.pool().ids();
    assert_eq!(
        runner.last_selected(),
        Some(ids[1]),
        "view index 0 must resolve to the first visible object"
    );
    assert_eq!(targets[1].selection_count(), 1);
    assert_eq!(targets[0].selection_count(), 0);

    runner.stop().await;
    drop(markers);
}

#[tokio::test(start_paused = true)]
async fn registry_keeps_one_runner_per_kind() {
    let first = epoch_harness(2, base_config());
    let second = epoch_harness(2, base_config());
    let registry = ControllerRegistry::new();

    first.runner.start(false).await.unwrap();
    registry.activate(first.runner.clone()).await;
    registry.activate(second.runner.clone()).await;

    assert!(!first.runner.is_running());
    let active = registry
        .get(paradigms::modes::ParadigmKind::WindowedEpoch)
        .unwrap();
    assert!(!active.is_running());
}
