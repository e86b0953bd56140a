//! Processor dispatch: resolve, order, execute with timeout and retry.
//!
//! Processors for one event run strictly one after another. Batches fan
//! out in fixed-size groups; group N+1 starts only after every event in
//! group N has settled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use gameflow_common::{
    EngineConfig, EventBatch, GameEvent, Notification, ProcessorError, RegistryError,
    RegistryResult,
};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::context::GameContext;
use crate::effects::{EffectManager, EffectResult};
use crate::notify::Notifier;
use crate::registry::{ProcessorEntry, ProcessorRegistry, ProcessorSpec};
use crate::stats::RollingStats;
use crate::traits::{EventProcessor, ProcessorOutput};

/// Outcome of one processor for one event, after retries.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub processor_id: String,
    pub event_id: String,
    pub success: bool,
    /// Invocations made, including the first.
    pub attempts: u32,
    pub duration: Duration,
    pub data: Option<Value>,
    pub error: Option<ProcessorError>,
    /// Follow-up events handed back for a later tick.
    pub next_events: usize,
    pub effects: Vec<EffectResult>,
}

/// An event after every applicable processor has run.
#[derive(Debug)]
pub struct DispatchedEvent {
    pub event: GameEvent,
    pub results: Vec<ProcessingResult>,
    /// Follow-ups to re-queue. Not yet given fresh identities.
    pub next_events: Vec<GameEvent>,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub batch: EventBatch,
    pub events: Vec<DispatchedEvent>,
    pub groups: usize,
}

pub struct Dispatcher {
    processors: RwLock<ProcessorRegistry>,
    stats: Mutex<HashMap<String, RollingStats>>,
    effects: Arc<EffectManager>,
    notifier: Notifier,
    default_timeout: Duration,
    default_retries: u32,
    retry_base_delay: Duration,
    group_size: usize,
}

impl Dispatcher {
    pub fn new(config: &EngineConfig, effects: Arc<EffectManager>, notifier: Notifier) -> Self {
        Self {
            processors: RwLock::new(ProcessorRegistry::default()),
            stats: Mutex::new(HashMap::new()),
            effects,
            notifier,
            default_timeout: config.timeout(),
            default_retries: config.retry_attempts,
            retry_base_delay: config.retry_base_delay(),
            group_size: config.group_size(),
        }
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    pub async fn register(
        &self,
        spec: ProcessorSpec,
        processor: Arc<dyn EventProcessor>,
    ) -> RegistryResult<()> {
        spec.validate()?;
        let id = spec.id.clone();
        let priority = spec.priority;
        let replaced = self
            .processors
            .write()
            .await
            .insert(id.clone(), ProcessorEntry::new(spec, processor));
        if replaced {
            warn!(processor_id = id.as_str(), "Processor replaced");
        } else {
            info!(processor_id = id.as_str(), priority, "Processor registered");
        }
        self.notifier
            .emit(Notification::ProcessorRegistered { processor_id: id });
        Ok(())
    }

    pub async fn unregister(&self, id: &str) -> bool {
        let removed = self.processors.write().await.remove(id).is_some();
        if removed {
            info!(processor_id = id, "Processor unregistered");
            self.notifier.emit(Notification::ProcessorUnregistered {
                processor_id: id.to_string(),
            });
        }
        removed
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> RegistryResult<()> {
        let mut processors = self.processors.write().await;
        let entry = processors
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        entry.spec.enabled = enabled;
        info!(processor_id = id, enabled, "Processor toggled");
        Ok(())
    }

    pub async fn specs(&self) -> Vec<ProcessorSpec> {
        self.processors
            .read()
            .await
            .values()
            .map(|e| e.spec.clone())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    pub async fn stats(&self, processor_id: &str) -> Option<RollingStats> {
        self.stats.lock().await.get(processor_id).copied()
    }

    pub async fn all_stats(&self) -> Vec<(String, RollingStats)> {
        let mut all: Vec<(String, RollingStats)> = self
            .stats
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    async fn record(&self, processor_id: &str, elapsed: Duration, success: bool) {
        self.stats
            .lock()
            .await
            .entry(processor_id.to_string())
            .or_default()
            .record(elapsed, success);
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Run every applicable processor for `event`, then mark it processed.
    /// A failing processor never stops the ones after it.
    pub async fn dispatch_event(&self, mut event: GameEvent, ctx: &GameContext) -> DispatchedEvent {
        let chain = self.processors.read().await.resolve(&event.event_type);
        if chain.is_empty() {
            debug!(
                event_id = event.id.as_str(),
                event_type = event.event_type.as_str(),
                "No processors for event"
            );
        }

        let event_ctx = ctx.for_event(&event.id);
        let mut results = Vec::with_capacity(chain.len());
        let mut next_events = Vec::new();

        for entry in &chain {
            let (mut result, output) = self.run_processor(entry, &event, &event_ctx).await;
            if let Some(output) = output {
                let ProcessorOutput {
                    data,
                    next_events: follow_ups,
                    effects,
                } = output;
                for effect in &effects {
                    result
                        .effects
                        .push(self.effects.apply_effect(effect, &event_ctx).await);
                }
                result.data = data;
                result.next_events = follow_ups.len();
                next_events.extend(follow_ups);
            }
            results.push(result);
        }

        event.mark_processed();
        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        debug!(
            event_id = event.id.as_str(),
            event_type = event.event_type.as_str(),
            processors = results.len(),
            succeeded,
            failed,
            "Event processed"
        );
        self.notifier.emit(Notification::EventProcessed {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            succeeded,
            failed,
        });

        DispatchedEvent {
            event,
            results,
            next_events,
        }
    }

    /// Dispatch a batch in groups of `max_concurrency`.
    pub async fn dispatch_batch(&self, mut batch: EventBatch, ctx: &GameContext) -> BatchOutcome {
        let events = std::mem::take(&mut batch.events);
        let mut dispatched = Vec::with_capacity(events.len());
        let mut groups = 0;

        let mut pending = events.into_iter().peekable();
        while pending.peek().is_some() {
            let group: Vec<GameEvent> = pending.by_ref().take(self.group_size).collect();
            groups += 1;
            debug!(
                batch_id = batch.id.as_str(),
                group = groups,
                size = group.len(),
                "Dispatching batch group"
            );
            let settled = join_all(group.into_iter().map(|e| self.dispatch_event(e, ctx))).await;
            dispatched.extend(settled);
        }

        batch.events = dispatched.iter().map(|d| d.event.clone()).collect();
        batch.mark_processed();
        info!(
            batch_id = batch.id.as_str(),
            events = batch.len(),
            groups,
            "Batch processed"
        );
        self.notifier.emit(Notification::BatchProcessed {
            batch_id: batch.id.clone(),
            events: batch.len(),
            groups,
        });

        BatchOutcome {
            batch,
            events: dispatched,
            groups,
        }
    }

    /// One processor, one event: gate, then attempt up to `retries + 1`
    /// times with `2^attempt * base` backoff between attempts. A timed-out
    /// attempt's future is dropped.
    async fn run_processor(
        &self,
        entry: &ProcessorEntry,
        event: &GameEvent,
        ctx: &GameContext,
    ) -> (ProcessingResult, Option<ProcessorOutput>) {
        let processor_id = entry.spec.id.as_str();
        let timeout = entry.spec.timeout.unwrap_or(self.default_timeout);
        let retries = entry.spec.retry_attempts.unwrap_or(self.default_retries);

        let _permit = match &entry.gate {
            Some(gate) => gate.clone().acquire_owned().await.ok(),
            None => None,
        };

        let started = Instant::now();
        let mut attempt: u32 = 0;
        let error = loop {
            let attempt_started = Instant::now();
            let outcome = match tokio::time::timeout(timeout, entry.processor.process(event, ctx)).await
            {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(ProcessorError::Execution {
                    processor_id: processor_id.to_string(),
                    message: format!("{e:#}"),
                }),
                Err(_) => Err(ProcessorError::Timeout {
                    processor_id: processor_id.to_string(),
                    after: timeout,
                }),
            };
            self.record(processor_id, attempt_started.elapsed(), outcome.is_ok())
                .await;

            match outcome {
                Ok(output) => {
                    debug!(
                        processor_id,
                        event_id = event.id.as_str(),
                        attempts = attempt + 1,
                        "Processor succeeded"
                    );
                    let result = ProcessingResult {
                        processor_id: processor_id.to_string(),
                        event_id: event.id.clone(),
                        success: true,
                        attempts: attempt + 1,
                        duration: started.elapsed(),
                        data: None,
                        error: None,
                        next_events: 0,
                        effects: Vec::new(),
                    };
                    return (result, Some(output));
                }
                Err(error) if attempt < retries => {
                    let backoff = self
                        .retry_base_delay
                        .saturating_mul(2u32.saturating_pow(attempt));
                    warn!(
                        processor_id,
                        event_id = event.id.as_str(),
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "Processor attempt failed, retrying after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(error) => break error,
            }
        };

        let attempts = attempt + 1;
        error!(
            processor_id,
            event_id = event.id.as_str(),
            attempts,
            timed_out = error.is_timeout(),
            error = %error,
            "Processor failed after retries"
        );
        self.notifier.emit(Notification::ProcessorError {
            processor_id: processor_id.to_string(),
            event_id: event.id.clone(),
            attempts,
            error: error.to_string(),
        });

        let result = ProcessingResult {
            processor_id: processor_id.to_string(),
            event_id: event.id.clone(),
            success: false,
            attempts,
            duration: started.elapsed(),
            data: None,
            error: Some(error),
            next_events: 0,
            effects: Vec::new(),
        };
        (result, None)
    }
}
