//! The engine instance: owns registries, queue, active effects, and the
//! tick/sweep loops. Every `Engine` is independent; clones share one
//! instance.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use gameflow_common::{
    EffectApplication, EffectGroup, EffectOutcome, EffectSpec, EngineConfig, EventBatch,
    GameEvent, Notification, Priority, RegistryResult, SharedState, ValidationError,
    ValidationResult,
};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::context::GameContext;
use crate::dispatch::{DispatchedEvent, Dispatcher, ProcessingResult};
use crate::effects::{default_handlers, EffectManager, EffectResult, GroupResult, SweepReport};
use crate::notify::Notifier;
use crate::queue::EventQueue;
use crate::registry::ProcessorSpec;
use crate::stats::{EngineStats, RollingStats};
use crate::traits::{EffectHandler, EventProcessor};

/// What one scheduling tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub batches: usize,
    pub events: usize,
    pub processor_failures: usize,
    /// Follow-up events queued for a later tick.
    pub deferred: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.batches == 0 && self.events == 0
    }
}

/// Work left in the queue when the engine shut down.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub queued_events: usize,
    pub queued_batches: usize,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    state: SharedState,
    clock: Arc<dyn Clock>,
    notifier: Notifier,
    dispatcher: Dispatcher,
    effects: Arc<EffectManager>,
    queue: Mutex<EventQueue>,
    history: Mutex<VecDeque<GameEvent>>,
    /// Taken off the queue but not yet settled into history.
    in_flight: Mutex<HashMap<String, GameEvent>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(config: EngineConfig, state: SharedState) -> Self {
        Self::with_clock(config, state, Arc::new(SystemClock))
    }

    pub fn with_clock(config: EngineConfig, state: SharedState, clock: Arc<dyn Clock>) -> Self {
        let notifier = Notifier::new(config.notification_capacity);
        let effects = Arc::new(EffectManager::new(
            config.max_effect_depth,
            clock.clone(),
            notifier.clone(),
        ));
        let dispatcher = Dispatcher::new(&config, effects.clone(), notifier.clone());
        Self {
            inner: Arc::new(EngineInner {
                config,
                state,
                clock,
                notifier,
                dispatcher,
                effects,
                queue: Mutex::new(EventQueue::default()),
                history: Mutex::new(VecDeque::new()),
                in_flight: Mutex::new(HashMap::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SharedState {
        self.inner.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifier.subscribe()
    }

    /// A fresh context over the engine's game state.
    pub fn context(&self) -> GameContext {
        GameContext::new(self.inner.state.clone())
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    pub async fn register_processor(
        &self,
        spec: ProcessorSpec,
        processor: Arc<dyn EventProcessor>,
    ) -> RegistryResult<()> {
        self.inner.dispatcher.register(spec, processor).await
    }

    pub async fn unregister_processor(&self, id: &str) -> bool {
        self.inner.dispatcher.unregister(id).await
    }

    pub async fn set_processor_enabled(&self, id: &str, enabled: bool) -> RegistryResult<()> {
        self.inner.dispatcher.set_enabled(id, enabled).await
    }

    /// Registered processor specs, in registration order.
    pub async fn processors(&self) -> Vec<ProcessorSpec> {
        self.inner.dispatcher.specs().await
    }

    pub async fn register_handler(&self, handler: Arc<dyn EffectHandler>) -> RegistryResult<()> {
        self.inner.effects.register_handler(handler).await
    }

    pub async fn unregister_handler(&self, id: &str) -> bool {
        self.inner.effects.unregister_handler(id).await
    }

    /// Registered handler ids, in registration order.
    pub async fn handlers(&self) -> Vec<String> {
        self.inner.effects.handler_ids().await
    }

    /// Register the stock money/position/property/status/attribute handlers.
    pub async fn register_default_handlers(&self) -> RegistryResult<()> {
        for handler in default_handlers() {
            self.register_handler(handler).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Validate and queue one event. Returns its id. Rejected events are
    /// reported through a notification and never queued.
    pub async fn add_event(&self, event: GameEvent) -> ValidationResult<String> {
        if let Err(e) = event.validate() {
            self.reject(&event, &e);
            return Err(e);
        }
        let id = event.id.clone();
        debug!(
            event_id = id.as_str(),
            event_type = event.event_type.as_str(),
            priority = %event.priority,
            "Event queued"
        );
        self.inner.notifier.emit(Notification::EventQueued {
            event_id: id.clone(),
            event_type: event.event_type.clone(),
            priority: event.priority,
        });
        self.inner.queue.lock().await.push_event(event);
        Ok(id)
    }

    /// Queue the valid events as one batch. Invalid events are dropped and
    /// reported; a batch with nothing valid left is rejected.
    pub async fn add_event_batch(
        &self,
        events: Vec<GameEvent>,
        priority: Priority,
    ) -> ValidationResult<String> {
        let submitted = events.len();
        let mut valid = Vec::with_capacity(submitted);
        for event in events {
            match event.validate() {
                Ok(()) => valid.push(event),
                Err(e) => self.reject(&event, &e),
            }
        }
        if valid.is_empty() {
            warn!(submitted, "Batch rejected: no valid events");
            return Err(ValidationError::EmptyBatch);
        }

        let rejected = submitted - valid.len();
        let batch = EventBatch::new(valid, priority);
        let id = batch.id.clone();
        info!(
            batch_id = id.as_str(),
            size = batch.len(),
            rejected,
            priority = %priority,
            "Batch queued"
        );
        self.inner.notifier.emit(Notification::BatchQueued {
            batch_id: id.clone(),
            size: batch.len(),
            rejected,
            priority,
        });
        self.inner.queue.lock().await.push_batch(batch);
        Ok(id)
    }

    /// Split `events` into batches of the configured `batch_size`.
    pub async fn add_events_chunked(
        &self,
        events: Vec<GameEvent>,
        priority: Priority,
    ) -> ValidationResult<Vec<String>> {
        let size = self.inner.config.batch_size.max(1);
        let mut ids = Vec::new();
        let mut events = events.into_iter().peekable();
        while events.peek().is_some() {
            let chunk: Vec<GameEvent> = events.by_ref().take(size).collect();
            match self.add_event_batch(chunk, priority).await {
                Ok(id) => ids.push(id),
                Err(ValidationError::EmptyBatch) => continue,
                Err(e) => return Err(e),
            }
        }
        if ids.is_empty() {
            return Err(ValidationError::EmptyBatch);
        }
        Ok(ids)
    }

    fn reject(&self, event: &GameEvent, error: &ValidationError) {
        warn!(event_id = event.id.as_str(), error = %error, "Event rejected");
        self.inner.notifier.emit(Notification::EventRejected {
            event_id: (!event.id.trim().is_empty()).then(|| event.id.clone()),
            reason: error.to_string(),
        });
    }

    pub async fn queued_events(&self) -> usize {
        self.inner.queue.lock().await.event_count()
    }

    pub async fn queued_batches(&self) -> usize {
        self.inner.queue.lock().await.batch_count()
    }

    /// A queued, dispatching, or recently dispatched event. Queued batch
    /// members are not searched until their batch is taken for dispatch.
    pub async fn event(&self, id: &str) -> Option<GameEvent> {
        if let Some(event) = self.inner.queue.lock().await.find_event(id) {
            return Some(event.clone());
        }
        if let Some(event) = self.inner.in_flight.lock().await.get(id) {
            return Some(event.clone());
        }
        self.inner
            .history
            .lock()
            .await
            .iter()
            .rev()
            .find(|e| e.id == id)
            .cloned()
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Dispatch one event now, bypassing the queue. Follow-up events are
    /// still deferred to a later tick.
    pub async fn process_event(&self, event: GameEvent, ctx: &GameContext) -> Vec<ProcessingResult> {
        self.track(std::slice::from_ref(&event)).await;
        let dispatched = self.inner.dispatcher.dispatch_event(event, ctx).await;
        self.settle(dispatched).await.0
    }

    /// Dispatch one batch now, bypassing the queue.
    pub async fn process_batch(&self, batch: EventBatch, ctx: &GameContext) -> Vec<ProcessingResult> {
        self.track(&batch.events).await;
        let outcome = self.inner.dispatcher.dispatch_batch(batch, ctx).await;
        let mut results = Vec::new();
        for dispatched in outcome.events {
            results.extend(self.settle(dispatched).await.0);
        }
        results
    }

    /// One scheduling pass: drain batches, then single events, each by
    /// priority weight. Work queued during the pass waits for the next one.
    pub async fn tick(&self) -> TickReport {
        let config = &self.inner.config;
        let (batches, events) = {
            let mut queue = self.inner.queue.lock().await;
            (
                queue.take_batches(config.max_batches_per_tick, &config.priority_weights),
                queue.take_events(config.max_events_per_tick, &config.priority_weights),
            )
        };

        let mut report = TickReport {
            batches: batches.len(),
            events: events.len(),
            ..Default::default()
        };
        if report.is_idle() {
            return report;
        }
        for batch in &batches {
            self.track(&batch.events).await;
        }
        self.track(&events).await;

        let ctx = self.context();
        for batch in batches {
            let outcome = self.inner.dispatcher.dispatch_batch(batch, &ctx).await;
            for dispatched in outcome.events {
                self.settle_into(dispatched, &mut report).await;
            }
        }
        for event in events {
            let dispatched = self.inner.dispatcher.dispatch_event(event, &ctx).await;
            self.settle_into(dispatched, &mut report).await;
        }

        debug!(
            batches = report.batches,
            events = report.events,
            failures = report.processor_failures,
            deferred = report.deferred,
            "Tick complete"
        );
        report
    }

    async fn track(&self, events: &[GameEvent]) {
        let mut in_flight = self.inner.in_flight.lock().await;
        for event in events {
            in_flight.insert(event.id.clone(), event.clone());
        }
    }

    async fn settle_into(&self, dispatched: DispatchedEvent, report: &mut TickReport) {
        let (results, deferred) = self.settle(dispatched).await;
        report.processor_failures += results.iter().filter(|r| !r.success).count();
        report.deferred += deferred;
    }

    /// Re-queue follow-ups with fresh identities and record the event.
    async fn settle(&self, dispatched: DispatchedEvent) -> (Vec<ProcessingResult>, usize) {
        let DispatchedEvent {
            event,
            results,
            next_events,
        } = dispatched;

        let mut deferred = 0;
        for mut follow_up in next_events {
            follow_up.refresh_identity();
            if self.add_event(follow_up).await.is_ok() {
                deferred += 1;
            }
        }

        let limit = self.inner.config.history_limit;
        if limit > 0 {
            let mut history = self.inner.history.lock().await;
            history.push_back(event.clone());
            while history.len() > limit {
                history.pop_front();
            }
        }
        self.inner.in_flight.lock().await.remove(&event.id);
        (results, deferred)
    }

    // -----------------------------------------------------------------------
    // Effects
    // -----------------------------------------------------------------------

    pub async fn apply_effect(&self, effect: &EffectSpec, ctx: &GameContext) -> EffectResult {
        self.inner.effects.apply_effect(effect, ctx).await
    }

    pub async fn apply_effect_group(&self, group: &EffectGroup, ctx: &GameContext) -> GroupResult {
        self.inner.effects.apply_group(group, ctx).await
    }

    pub async fn revert_effect(
        &self,
        application_id: &str,
        ctx: &GameContext,
    ) -> EffectOutcome<EffectApplication> {
        self.inner.effects.revert_effect(application_id, ctx).await
    }

    /// Expire or update active effects as of the engine clock.
    pub async fn sweep(&self) -> SweepReport {
        let ctx = self.context();
        self.inner.effects.sweep_at(self.inner.clock.now(), &ctx).await
    }

    pub async fn active_effects(&self) -> Vec<EffectApplication> {
        self.inner.effects.active_effects().await
    }

    pub async fn active_effect(&self, application_id: &str) -> Option<EffectApplication> {
        self.inner.effects.active_effect(application_id).await
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Spawn the tick and sweep loops. Calling twice is a no-op.
    pub async fn start(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        if !tasks.is_empty() {
            warn!("Engine already started");
            return;
        }

        let tick_engine = self.clone();
        let tick_every = self.inner.config.tick_interval();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick_engine.tick().await;
            }
        }));

        let sweep_engine = self.clone();
        let sweep_every = self.inner.config.sweep_interval();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                sweep_engine.sweep().await;
            }
        }));

        info!(
            tick_ms = tick_every.as_millis() as u64,
            sweep_ms = sweep_every.as_millis() as u64,
            "Engine started"
        );
    }

    /// Stop both loops. Queued work is left in place and reported.
    pub async fn shutdown(&self) -> ShutdownReport {
        let handles: Vec<JoinHandle<()>> = self.inner.tasks.lock().await.drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            // Aborted tasks resolve to a cancellation error.
            let _ = handle.await;
        }

        let queue = self.inner.queue.lock().await;
        let report = ShutdownReport {
            queued_events: queue.event_count(),
            queued_batches: queue.batch_count(),
        };
        info!(
            queued_events = report.queued_events,
            queued_batches = report.queued_batches,
            "Engine stopped"
        );
        report
    }

    pub async fn is_running(&self) -> bool {
        !self.inner.tasks.lock().await.is_empty()
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    pub async fn processor_stats(&self, processor_id: &str) -> Option<RollingStats> {
        self.inner.dispatcher.stats(processor_id).await
    }

    pub async fn effect_stats(&self, effect_type: &str) -> Option<RollingStats> {
        self.inner.effects.effect_stats(effect_type).await
    }

    pub async fn stats_report(&self) -> EngineStats {
        let (queued_events, queued_batches) = {
            let queue = self.inner.queue.lock().await;
            (queue.event_count(), queue.batch_count())
        };
        EngineStats {
            processors: self.inner.dispatcher.all_stats().await,
            effects: self.inner.effects.all_stats().await,
            queued_events,
            queued_batches,
            active_effects: self.inner.effects.active_count().await,
        }
    }
}
