//! Integration tests for queueing, scheduling, and processor dispatch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use gameflow_common::{
    EffectSpec, EngineConfig, GameEvent, GameState, Notification, Player, Priority,
    RegistryError, ValidationError,
};
use gameflow_engine::{
    Engine, EventProcessor, EventTypes, GameContext, ProcessorOutput, ProcessorSpec, MONEY_CHANGE,
};
use serde_json::json;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn config() -> EngineConfig {
    EngineConfig {
        retry_attempts: 3,
        retry_base_delay_ms: 10,
        timeout_ms: 1_000,
        ..Default::default()
    }
}

fn engine_with(config: EngineConfig) -> Engine {
    let state = GameState::new(vec![
        Player::new("p1", "Ada", 1000),
        Player::new("p2", "Grace", 1000),
    ])
    .into_shared();
    Engine::new(config, state)
}

fn engine() -> Engine {
    engine_with(config())
}

fn spec(id: &str, types: &[&str]) -> ProcessorSpec {
    ProcessorSpec::builder()
        .id(id)
        .event_types(EventTypes::only(types.iter().copied()))
        .build()
}

type Log = Arc<Mutex<Vec<String>>>;

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}

// ---------------------------------------------------------------------------
// Test processors
// ---------------------------------------------------------------------------

struct Succeed;

#[async_trait]
impl EventProcessor for Succeed {
    async fn process(&self, _event: &GameEvent, _ctx: &GameContext) -> Result<ProcessorOutput> {
        Ok(ProcessorOutput::ok().with_data(json!({"success": true})))
    }
}

/// Logs start and end around a yield so interleaving would be visible.
struct Recording {
    label: &'static str,
    log: Log,
}

#[async_trait]
impl EventProcessor for Recording {
    async fn process(&self, event: &GameEvent, _ctx: &GameContext) -> Result<ProcessorOutput> {
        self.log.lock().unwrap().push(format!("start:{}:{}", self.label, event.id));
        tokio::task::yield_now().await;
        self.log.lock().unwrap().push(format!("end:{}:{}", self.label, event.id));
        Ok(ProcessorOutput::ok())
    }
}

/// Fails the first `failures` calls, then succeeds.
struct Flaky {
    failures: u32,
    calls: AtomicU32,
}

impl Flaky {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl EventProcessor for Flaky {
    async fn process(&self, _event: &GameEvent, _ctx: &GameContext) -> Result<ProcessorOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            bail!("transient failure {call}");
        }
        Ok(ProcessorOutput::ok())
    }
}

/// Never settles within any sane timeout.
struct Hanging {
    finished: Arc<AtomicBool>,
}

#[async_trait]
impl EventProcessor for Hanging {
    async fn process(&self, _event: &GameEvent, _ctx: &GameContext) -> Result<ProcessorOutput> {
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(ProcessorOutput::ok())
    }
}

/// Records the (virtual) start and end instants of each event.
struct Timed {
    delay: Duration,
    spans: Arc<Mutex<HashMap<String, (Instant, Instant)>>>,
}

#[async_trait]
impl EventProcessor for Timed {
    async fn process(&self, event: &GameEvent, _ctx: &GameContext) -> Result<ProcessorOutput> {
        let start = Instant::now();
        tokio::time::sleep(self.delay).await;
        self.spans
            .lock()
            .unwrap()
            .insert(event.id.clone(), (start, Instant::now()));
        Ok(ProcessorOutput::ok())
    }
}

/// Tracks how many calls overlap.
#[derive(Default)]
struct Overlap {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl EventProcessor for Overlap {
    async fn process(&self, _event: &GameEvent, _ctx: &GameContext) -> Result<ProcessorOutput> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ProcessorOutput::ok())
    }
}

/// Hands back a follow-up event.
struct Emitter;

#[async_trait]
impl EventProcessor for Emitter {
    async fn process(&self, event: &GameEvent, _ctx: &GameContext) -> Result<ProcessorOutput> {
        let follow_up = GameEvent::new("turn_ended", json!({"after": event.id})).with_id(event.id.clone());
        Ok(ProcessorOutput::ok().emit(follow_up))
    }
}

#[derive(Default)]
struct Counter {
    calls: AtomicU32,
}

#[async_trait]
impl EventProcessor for Counter {
    async fn process(&self, _event: &GameEvent, _ctx: &GameContext) -> Result<ProcessorOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProcessorOutput::ok())
    }
}

/// Pays the current player through an effect.
struct Payday;

#[async_trait]
impl EventProcessor for Payday {
    async fn process(&self, _event: &GameEvent, _ctx: &GameContext) -> Result<ProcessorOutput> {
        Ok(ProcessorOutput::ok().request(EffectSpec::new(MONEY_CHANGE, "self", 200)))
    }
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn one_processor_one_event_one_tick() {
    let engine = engine();
    engine
        .register_processor(spec("t1-handler", &["t1"]), Arc::new(Succeed))
        .await
        .unwrap();

    let id = engine.add_event(GameEvent::new("t1", json!({}))).await.unwrap();
    let report = engine.tick().await;

    assert_eq!(report.events, 1);
    assert_eq!(report.processor_failures, 0);
    let stats = engine.processor_stats("t1-handler").await.unwrap();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.processed, 1);
    assert!(engine.event(&id).await.unwrap().processed());
    assert_eq!(engine.queued_events().await, 0);
}

#[tokio::test]
async fn event_is_processed_once_regardless_of_processor_count() {
    let engine = engine();
    for id in ["a", "b", "c"] {
        engine
            .register_processor(spec(id, &["t1"]), Arc::new(Succeed))
            .await
            .unwrap();
    }
    let mut rx = engine.subscribe();
    let id = engine.add_event(GameEvent::new("t1", json!({}))).await.unwrap();
    engine.tick().await;

    assert!(engine.event(&id).await.unwrap().processed());
    let processed: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|n| matches!(n, Notification::EventProcessed { .. }))
        .collect();
    assert_eq!(processed.len(), 1);
    assert!(matches!(
        &processed[0],
        Notification::EventProcessed { succeeded: 3, failed: 0, .. }
    ));
}

#[tokio::test]
async fn event_without_processors_is_still_marked_processed() {
    let engine = engine();
    let id = engine.add_event(GameEvent::new("orphan", json!({}))).await.unwrap();
    engine.tick().await;
    assert!(engine.event(&id).await.unwrap().processed());
}

#[tokio::test]
async fn heavier_priority_events_drain_first() {
    let engine = engine_with(EngineConfig {
        max_events_per_tick: 1,
        ..config()
    });
    let log: Log = Arc::default();
    engine
        .register_processor(
            ProcessorSpec::builder().id("rec").build(),
            Arc::new(Recording {
                label: "rec",
                log: log.clone(),
            }),
        )
        .await
        .unwrap();

    engine
        .add_event(GameEvent::new("t", json!({})).with_id("low").with_priority(Priority::Low))
        .await
        .unwrap();
    engine
        .add_event(
            GameEvent::new("t", json!({}))
                .with_id("critical")
                .with_priority(Priority::Critical),
        )
        .await
        .unwrap();

    assert_eq!(engine.tick().await.events, 1);
    assert_eq!(entries(&log), vec!["start:rec:critical", "end:rec:critical"]);
    assert_eq!(engine.queued_events().await, 1);
    engine.tick().await;
    assert_eq!(entries(&log).len(), 4);
}

#[tokio::test]
async fn higher_priority_processor_starts_first() {
    let engine = engine();
    let log: Log = Arc::default();
    let b = ProcessorSpec::builder().id("b").priority(5).build();
    let a = ProcessorSpec::builder().id("a").priority(10).build();
    engine
        .register_processor(b, Arc::new(Recording { label: "b", log: log.clone() }))
        .await
        .unwrap();
    engine
        .register_processor(a, Arc::new(Recording { label: "a", log: log.clone() }))
        .await
        .unwrap();

    let ctx = engine.context();
    let results = engine
        .process_event(GameEvent::new("t", json!({})).with_id("e"), &ctx)
        .await;

    assert_eq!(
        results.iter().map(|r| r.processor_id.as_str()).collect::<Vec<_>>(),
        vec!["a", "b"]
    );
    assert_eq!(
        entries(&log),
        vec!["start:a:e", "end:a:e", "start:b:e", "end:b:e"]
    );
}

#[tokio::test]
async fn dependency_completes_before_dependent_starts() {
    let engine = engine();
    let log: Log = Arc::default();
    let dependent = ProcessorSpec::builder()
        .id("rent")
        .priority(10)
        .dependencies(vec!["move".into()])
        .build();
    let dependency = ProcessorSpec::builder().id("move").priority(1).build();
    engine
        .register_processor(dependent, Arc::new(Recording { label: "rent", log: log.clone() }))
        .await
        .unwrap();
    engine
        .register_processor(dependency, Arc::new(Recording { label: "move", log: log.clone() }))
        .await
        .unwrap();

    let ctx = engine.context();
    engine
        .process_event(GameEvent::new("dice_rolled", json!({})).with_id("e"), &ctx)
        .await;

    assert_eq!(
        entries(&log),
        vec!["start:move:e", "end:move:e", "start:rent:e", "end:rent:e"]
    );
}

#[tokio::test]
async fn disabled_processors_are_skipped() {
    let engine = engine();
    let counter = Arc::new(Counter::default());
    engine
        .register_processor(spec("count", &["t"]), counter.clone())
        .await
        .unwrap();
    engine.set_processor_enabled("count", false).await.unwrap();

    engine.add_event(GameEvent::new("t", json!({}))).await.unwrap();
    engine.tick().await;
    assert_eq!(counter.calls.load(Ordering::SeqCst), 0);

    assert_eq!(
        engine.set_processor_enabled("ghost", true).await,
        Err(RegistryError::NotFound("ghost".into()))
    );
}

#[tokio::test]
async fn reregistering_replaces_in_place() {
    let engine = engine();
    engine.register_processor(spec("a", &["t"]), Arc::new(Succeed)).await.unwrap();
    engine.register_processor(spec("b", &["t"]), Arc::new(Succeed)).await.unwrap();
    let replacement = ProcessorSpec::builder().id("a").priority(3).build();
    engine.register_processor(replacement, Arc::new(Succeed)).await.unwrap();

    let specs = engine.processors().await;
    assert_eq!(specs.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    assert_eq!(specs[0].priority, 3);

    assert!(engine.unregister_processor("a").await);
    assert!(!engine.unregister_processor("a").await);
}

// ---------------------------------------------------------------------------
// Retry and timeout
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn retries_until_success_with_exponential_backoff() {
    let engine = engine();
    let flaky = Arc::new(Flaky::new(2));
    engine.register_processor(spec("flaky", &["t"]), flaky.clone()).await.unwrap();

    let started = Instant::now();
    let ctx = engine.context();
    let results = engine.process_event(GameEvent::new("t", json!({})), &ctx).await;

    assert!(results[0].success);
    assert_eq!(results[0].attempts, 3);
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    // 10ms then 20ms of backoff.
    assert!(started.elapsed() >= Duration::from_millis(30));

    let stats = engine.processor_stats("flaky").await.unwrap();
    assert_eq!((stats.processed, stats.succeeded, stats.failed), (3, 1, 2));
}

#[tokio::test(start_paused = true)]
async fn always_failing_processor_uses_whole_budget() {
    let engine = engine();
    let mut rx = engine.subscribe();
    engine
        .register_processor(spec("broken", &["t"]), Arc::new(Flaky::new(u32::MAX)))
        .await
        .unwrap();

    let ctx = engine.context();
    let results = engine.process_event(GameEvent::new("t", json!({})), &ctx).await;

    assert!(!results[0].success);
    assert_eq!(results[0].attempts, 4);
    assert!(results[0].error.as_ref().is_some_and(|e| !e.is_timeout()));
    assert!(drain(&mut rx).iter().any(|n| matches!(
        n,
        Notification::ProcessorError { attempts: 4, .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn per_processor_retry_override() {
    let engine = engine();
    let flaky = Arc::new(Flaky::new(u32::MAX));
    let no_retry = ProcessorSpec::builder().id("once").retry_attempts(0).build();
    engine.register_processor(no_retry, flaky.clone()).await.unwrap();

    let ctx = engine.context();
    let results = engine.process_event(GameEvent::new("t", json!({})), &ctx).await;
    assert_eq!(results[0].attempts, 1);
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_is_a_failed_attempt_and_cancels_the_work() {
    let engine = engine();
    let finished = Arc::new(AtomicBool::new(false));
    let hanging = ProcessorSpec::builder()
        .id("hang")
        .timeout(Duration::from_millis(50))
        .retry_attempts(1)
        .build();
    engine
        .register_processor(hanging, Arc::new(Hanging { finished: finished.clone() }))
        .await
        .unwrap();

    let ctx = engine.context();
    let results = engine.process_event(GameEvent::new("t", json!({})), &ctx).await;

    assert!(!results[0].success);
    assert_eq!(results[0].attempts, 2);
    assert!(results[0].error.as_ref().is_some_and(|e| e.is_timeout()));

    tokio::time::sleep(Duration::from_secs(7_200)).await;
    assert!(!finished.load(Ordering::SeqCst), "timed-out work must not keep running");
}

#[tokio::test(start_paused = true)]
async fn failing_processor_does_not_stop_the_rest() {
    let engine = engine();
    let counter = Arc::new(Counter::default());
    let first = ProcessorSpec::builder().id("broken").priority(10).retry_attempts(0).build();
    engine.register_processor(first, Arc::new(Flaky::new(u32::MAX))).await.unwrap();
    engine.register_processor(spec("after", &["t"]), counter.clone()).await.unwrap();

    let id = engine.add_event(GameEvent::new("t", json!({}))).await.unwrap();
    let report = engine.tick().await;

    assert_eq!(report.processor_failures, 1);
    assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
    assert!(engine.event(&id).await.unwrap().processed());
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn batch_runs_in_bounded_groups() {
    let engine = engine_with(EngineConfig {
        max_concurrency: 2,
        ..config()
    });
    let spans = Arc::new(Mutex::new(HashMap::new()));
    engine
        .register_processor(
            spec("timed", &["roll"]),
            Arc::new(Timed {
                delay: Duration::from_millis(100),
                spans: spans.clone(),
            }),
        )
        .await
        .unwrap();
    let mut rx = engine.subscribe();

    let events: Vec<GameEvent> = (0..5)
        .map(|i| GameEvent::new("roll", json!({"i": i})).with_id(format!("e{i}")))
        .collect();
    engine.add_event_batch(events, Priority::Normal).await.unwrap();
    let report = engine.tick().await;
    assert_eq!(report.batches, 1);

    assert!(drain(&mut rx).iter().any(|n| matches!(
        n,
        Notification::BatchProcessed { events: 5, groups: 3, .. }
    )));

    let spans = spans.lock().unwrap();
    let group_of = |i: usize| i / 2;
    for earlier in 0..5 {
        for later in 0..5 {
            if group_of(later) == group_of(earlier) + 1 {
                let (_, earlier_end) = spans[&format!("e{earlier}")];
                let (later_start, _) = spans[&format!("e{later}")];
                assert!(
                    later_start >= earlier_end,
                    "e{later} started before e{earlier} settled"
                );
            }
        }
    }
    // Members of one group overlap.
    assert_eq!(spans["e0"].0, spans["e1"].0);
    assert_eq!(spans["e2"].0, spans["e3"].0);
}

#[tokio::test(start_paused = true)]
async fn non_concurrent_processor_is_serialized_within_a_group() {
    let engine = engine_with(EngineConfig {
        max_concurrency: 4,
        ..config()
    });
    let serial = Arc::new(Overlap::default());
    let parallel = Arc::new(Overlap::default());
    let gated = ProcessorSpec::builder()
        .id("serial")
        .event_types(EventTypes::only(["t"]))
        .allow_concurrent(false)
        .build();
    engine.register_processor(gated, serial.clone()).await.unwrap();
    engine.register_processor(spec("parallel", &["u"]), parallel.clone()).await.unwrap();

    let ctx = engine.context();
    let serial_batch = (0..4).map(|_| GameEvent::new("t", json!({}))).collect();
    engine
        .process_batch(gameflow_common::EventBatch::new(serial_batch, Priority::Normal), &ctx)
        .await;
    let parallel_batch = (0..4).map(|_| GameEvent::new("u", json!({}))).collect();
    engine
        .process_batch(gameflow_common::EventBatch::new(parallel_batch, Priority::Normal), &ctx)
        .await;

    assert_eq!(serial.peak.load(Ordering::SeqCst), 1);
    assert_eq!(parallel.peak.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn chunked_submission_splits_by_batch_size() {
    let engine = engine_with(EngineConfig {
        batch_size: 2,
        ..config()
    });
    let events = (0..5).map(|_| GameEvent::new("t", json!({}))).collect();
    let ids = engine.add_events_chunked(events, Priority::High).await.unwrap();
    assert_eq!(ids.len(), 3);
    assert_eq!(engine.queued_batches().await, 3);
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_events_are_rejected_not_queued() {
    let engine = engine();
    let mut rx = engine.subscribe();

    let err = engine.add_event(GameEvent::new("", json!({})).with_id("e1")).await;
    assert_eq!(err, Err(ValidationError::MissingType { event_id: "e1".into() }));
    let err = engine.add_event(GameEvent::new("t", json!({})).with_id("")).await;
    assert_eq!(err, Err(ValidationError::MissingId));
    assert_eq!(engine.queued_events().await, 0);

    let rejected = drain(&mut rx)
        .into_iter()
        .filter(|n| matches!(n, Notification::EventRejected { .. }))
        .count();
    assert_eq!(rejected, 2);
}

#[tokio::test]
async fn batch_drops_invalid_members() {
    let engine = engine();
    let mut rx = engine.subscribe();

    let all_bad = vec![GameEvent::new("", json!({}))];
    assert_eq!(
        engine.add_event_batch(all_bad, Priority::Normal).await,
        Err(ValidationError::EmptyBatch)
    );

    let mixed = vec![GameEvent::new("t", json!({})), GameEvent::new(" ", json!({}))];
    let batch_id = engine.add_event_batch(mixed, Priority::Normal).await.unwrap();
    assert_eq!(engine.queued_batches().await, 1);
    assert!(drain(&mut rx).iter().any(|n| matches!(
        n,
        Notification::BatchQueued { batch_id: id, size: 1, rejected: 1, .. } if *id == batch_id
    )));
}

// ---------------------------------------------------------------------------
// Follow-ups and effects
// ---------------------------------------------------------------------------

#[tokio::test]
async fn follow_up_events_wait_for_the_next_tick() {
    let engine = engine();
    let ended = Arc::new(Counter::default());
    engine.register_processor(spec("emit", &["turn_started"]), Arc::new(Emitter)).await.unwrap();
    engine.register_processor(spec("end", &["turn_ended"]), ended.clone()).await.unwrap();

    let source = engine
        .add_event(GameEvent::new("turn_started", json!({})).with_id("turn-1"))
        .await
        .unwrap();

    let first = engine.tick().await;
    assert_eq!(first.deferred, 1);
    assert_eq!(ended.calls.load(Ordering::SeqCst), 0);
    assert_eq!(engine.queued_events().await, 1);

    let second = engine.tick().await;
    assert_eq!(second.events, 1);
    assert_eq!(ended.calls.load(Ordering::SeqCst), 1);

    // The follow-up got its own identity.
    assert_eq!(engine.event(&source).await.unwrap().event_type, "turn_started");
}

/// Queues a follow-up straight into the engine while it is being
/// dispatched, and notes whether the event in hand is still findable.
struct Reentrant {
    engine: Engine,
    visible: AtomicBool,
}

#[async_trait]
impl EventProcessor for Reentrant {
    async fn process(&self, event: &GameEvent, _ctx: &GameContext) -> Result<ProcessorOutput> {
        let found = self.engine.event(&event.id).await;
        self.visible.store(found.is_some(), Ordering::SeqCst);
        self.engine
            .add_event(GameEvent::new("turn_ended", json!({})).with_id("direct-1"))
            .await?;
        Ok(ProcessorOutput::ok())
    }
}

#[tokio::test]
async fn events_added_mid_dispatch_wait_for_the_next_tick() {
    let engine = engine();
    let ended = Arc::new(Counter::default());
    let reentrant = Arc::new(Reentrant {
        engine: engine.clone(),
        visible: AtomicBool::new(false),
    });
    engine.register_processor(spec("direct", &["turn_started"]), reentrant.clone()).await.unwrap();
    engine.register_processor(spec("end", &["turn_ended"]), ended.clone()).await.unwrap();
    engine.add_event(GameEvent::new("turn_started", json!({}))).await.unwrap();

    let first = engine.tick().await;
    assert_eq!(first.events, 1);
    assert_eq!(ended.calls.load(Ordering::SeqCst), 0);
    assert_eq!(engine.queued_events().await, 1);
    assert!(engine.event("direct-1").await.is_some());

    let second = engine.tick().await;
    assert_eq!(second.events, 1);
    assert_eq!(ended.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn an_event_stays_visible_while_it_is_dispatched() {
    let engine = engine();
    let reentrant = Arc::new(Reentrant {
        engine: engine.clone(),
        visible: AtomicBool::new(false),
    });
    engine.register_processor(spec("direct", &["turn_started"]), reentrant.clone()).await.unwrap();
    let id = engine.add_event(GameEvent::new("turn_started", json!({}))).await.unwrap();

    engine.tick().await;
    assert!(reentrant.visible.load(Ordering::SeqCst));
    assert!(engine.event(&id).await.is_some());
}

#[tokio::test]
async fn requested_effects_record_their_source_event() {
    let engine = engine();
    engine.register_default_handlers().await.unwrap();
    engine.register_processor(spec("payday", &["passed_go"]), Arc::new(Payday)).await.unwrap();

    let id = engine
        .add_event(GameEvent::new("passed_go", json!({})))
        .await
        .unwrap();
    engine.tick().await;

    assert_eq!(engine.state().read().await.player("p1").unwrap().money, 1200);
    let active = engine.active_effects().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].source_event.as_deref(), Some(id.as_str()));
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn background_loops_drain_the_queue_until_shutdown() {
    let engine = engine_with(EngineConfig {
        tick_interval_ms: 50,
        ..config()
    });
    let counter = Arc::new(Counter::default());
    engine.register_processor(spec("count", &["t"]), counter.clone()).await.unwrap();

    engine.start().await;
    assert!(engine.is_running().await);
    engine.add_event(GameEvent::new("t", json!({}))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(counter.calls.load(Ordering::SeqCst), 1);

    let report = engine.shutdown().await;
    assert!(!engine.is_running().await);
    assert_eq!(report.queued_events, 0);

    engine.add_event(GameEvent::new("t", json!({}))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.shutdown().await.queued_events, 1);
}

#[tokio::test]
async fn engines_do_not_share_registries() {
    let first = engine();
    let second = engine();
    first.register_processor(spec("only-here", &["t"]), Arc::new(Succeed)).await.unwrap();
    assert_eq!(first.processors().await.len(), 1);
    assert!(second.processors().await.is_empty());
}

#[tokio::test]
async fn stats_report_lists_processors_and_queue() {
    let engine = engine();
    engine.register_processor(spec("t1-handler", &["t1"]), Arc::new(Succeed)).await.unwrap();
    engine.add_event(GameEvent::new("t1", json!({}))).await.unwrap();
    engine.tick().await;
    engine.add_event(GameEvent::new("t1", json!({}))).await.unwrap();

    let report = engine.stats_report().await;
    assert_eq!(report.queued_events, 1);
    assert_eq!(report.processors[0].0, "t1-handler");
    assert!(report.to_string().contains("t1-handler"));
}
