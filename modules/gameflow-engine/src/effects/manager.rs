//! Effect lifecycle: apply, track, sweep, revert.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use gameflow_common::{
    all_hold, ConditionScope, EffectApplication, EffectError, EffectGroup, EffectModification,
    EffectOutcome, EffectSpec, ExecutionMode, Notification, RegistryError, RegistryResult,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::context::GameContext;
use crate::effects::targets::resolve_targets;
use crate::notify::Notifier;
use crate::registry::HandlerRegistry;
use crate::stats::RollingStats;
use crate::traits::{EffectHandler, HandlerOutcome};

/// Outcome of applying one effect (and, recursively, its side effects).
#[derive(Debug, Clone)]
pub struct EffectResult {
    pub success: bool,
    pub effect_id: String,
    pub effect_type: String,
    /// Set when an application record was created.
    pub application_id: Option<String>,
    pub targets: Vec<String>,
    pub modifications: Vec<EffectModification>,
    pub side_effects: Vec<EffectResult>,
    pub error: Option<EffectError>,
}

impl EffectResult {
    fn failed(effect: &EffectSpec, error: EffectError) -> Self {
        Self {
            success: false,
            effect_id: effect.id.clone(),
            effect_type: effect.effect_type.clone(),
            application_id: None,
            targets: Vec::new(),
            modifications: Vec::new(),
            side_effects: Vec::new(),
            error: Some(error),
        }
    }

    fn noop(effect: &EffectSpec) -> Self {
        Self {
            success: true,
            effect_id: effect.id.clone(),
            effect_type: effect.effect_type.clone(),
            application_id: None,
            targets: Vec::new(),
            modifications: Vec::new(),
            side_effects: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupResult {
    pub group_id: String,
    /// True when a precondition failed and nothing was applied.
    pub skipped: bool,
    pub results: Vec<EffectResult>,
}

impl GroupResult {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }
}

#[derive(Debug, Default)]
pub struct SweepReport {
    /// Applications that reached `completed` in this sweep.
    pub expired: Vec<EffectApplication>,
    pub updated: usize,
    pub update_failures: usize,
}

pub struct EffectManager {
    handlers: RwLock<HandlerRegistry>,
    active: Mutex<HashMap<String, EffectApplication>>,
    stats: Mutex<HashMap<String, RollingStats>>,
    clock: Arc<dyn Clock>,
    notifier: Notifier,
    max_depth: usize,
}

impl EffectManager {
    pub fn new(max_depth: usize, clock: Arc<dyn Clock>, notifier: Notifier) -> Self {
        Self {
            handlers: RwLock::new(HandlerRegistry::default()),
            active: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
            clock,
            notifier,
            max_depth,
        }
    }

    // -----------------------------------------------------------------------
    // Handler registry
    // -----------------------------------------------------------------------

    pub async fn register_handler(&self, handler: Arc<dyn EffectHandler>) -> RegistryResult<()> {
        let id = handler.id().to_string();
        if id.trim().is_empty() {
            return Err(RegistryError::EmptyId);
        }
        let replaced = self.handlers.write().await.insert(id.clone(), handler);
        if replaced {
            warn!(handler_id = id.as_str(), "Effect handler replaced");
        } else {
            info!(handler_id = id.as_str(), "Effect handler registered");
        }
        self.notifier
            .emit(Notification::HandlerRegistered { handler_id: id });
        Ok(())
    }

    pub async fn unregister_handler(&self, id: &str) -> bool {
        let removed = self.handlers.write().await.remove(id).is_some();
        if removed {
            info!(handler_id = id, "Effect handler unregistered");
            self.notifier.emit(Notification::HandlerUnregistered {
                handler_id: id.to_string(),
            });
        }
        removed
    }

    pub async fn handler_ids(&self) -> Vec<String> {
        self.handlers
            .read()
            .await
            .ids()
            .map(str::to_string)
            .collect()
    }

    /// First registered handler that accepts the effect.
    async fn select_handler(
        &self,
        effect: &EffectSpec,
        ctx: &GameContext,
    ) -> Option<Arc<dyn EffectHandler>> {
        let handlers: Vec<Arc<dyn EffectHandler>> =
            self.handlers.read().await.values().cloned().collect();
        handlers.into_iter().find(|h| h.can_handle(effect, ctx))
    }

    // -----------------------------------------------------------------------
    // Apply
    // -----------------------------------------------------------------------

    pub async fn apply_effect(&self, effect: &EffectSpec, ctx: &GameContext) -> EffectResult {
        self.apply_at_depth(effect, ctx, 0).await
    }

    fn apply_at_depth<'a>(
        &'a self,
        effect: &'a EffectSpec,
        ctx: &'a GameContext,
        depth: usize,
    ) -> BoxFuture<'a, EffectResult> {
        async move {
            if depth > self.max_depth {
                let error = EffectError::RecursionLimit {
                    max_depth: self.max_depth,
                };
                return self.fail(effect, error, Duration::ZERO).await;
            }

            let started = Instant::now();
            let Some(handler) = self.select_handler(effect, ctx).await else {
                let error = EffectError::HandlerNotFound {
                    effect_type: effect.effect_type.clone(),
                };
                return self.fail(effect, error, started.elapsed()).await;
            };

            let targets = {
                let game = ctx.state.read().await;
                let current = ctx
                    .target_player
                    .clone()
                    .or_else(|| game.current_player.clone());
                resolve_targets(&effect.target, current.as_deref(), &game)
            };
            if targets.is_empty() {
                debug!(
                    effect_type = effect.effect_type.as_str(),
                    target = %effect.target,
                    "No targets resolved, effect is a no-op"
                );
                self.record(&effect.effect_type, started.elapsed(), true)
                    .await;
                return EffectResult::noop(effect);
            }

            if let Err(error) = effect.expiry_from(self.clock.now()) {
                return self.fail(effect, error, started.elapsed()).await;
            }

            let outcome = match handler.apply(effect, &targets, ctx).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let error = EffectError::Application {
                        handler_id: handler.id().to_string(),
                        effect_type: effect.effect_type.clone(),
                        message: format!("{e:#}"),
                    };
                    return self.fail(effect, error, started.elapsed()).await;
                }
            };
            let HandlerOutcome {
                modifications,
                original_value,
                current_value,
                side_effects,
            } = outcome;

            let mut application = match EffectApplication::activate(
                Uuid::new_v4().to_string(),
                effect,
                handler.id(),
                targets.clone(),
                self.clock.now(),
            ) {
                Ok(application) => application,
                Err(error) => return self.fail(effect, error, started.elapsed()).await,
            };
            application.original_value = original_value;
            application.current_value = current_value;
            application.modifications = modifications.clone();
            application.source_event = ctx.source_event.clone();
            let application_id = application.id.clone();

            info!(
                application_id = application_id.as_str(),
                effect_type = effect.effect_type.as_str(),
                targets = ?targets,
                expires_at = ?application.expires_at,
                depth,
                "Effect applied"
            );
            self.active
                .lock()
                .await
                .insert(application_id.clone(), application);
            self.record(&effect.effect_type, started.elapsed(), true)
                .await;
            self.notifier.emit(Notification::EffectApplied {
                application_id: Some(application_id.clone()),
                effect_type: effect.effect_type.clone(),
                targets: targets.clone(),
                source_event: ctx.source_event.clone(),
            });

            let mut side_results = Vec::with_capacity(side_effects.len());
            for side in &side_effects {
                side_results.push(self.apply_at_depth(side, ctx, depth + 1).await);
            }

            EffectResult {
                success: true,
                effect_id: effect.id.clone(),
                effect_type: effect.effect_type.clone(),
                application_id: Some(application_id),
                targets,
                modifications,
                side_effects: side_results,
                error: None,
            }
        }
        .boxed()
    }

    async fn fail(&self, effect: &EffectSpec, error: EffectError, elapsed: Duration) -> EffectResult {
        self.record(&effect.effect_type, elapsed, false).await;
        warn!(
            effect_type = effect.effect_type.as_str(),
            error = %error,
            "Effect failed"
        );
        self.notifier.emit(Notification::EffectFailed {
            effect_type: effect.effect_type.clone(),
            error: error.to_string(),
        });
        EffectResult::failed(effect, error)
    }

    // -----------------------------------------------------------------------
    // Groups
    // -----------------------------------------------------------------------

    /// Apply a group. Failed preconditions skip the whole group. Earlier
    /// successes are never rolled back.
    pub async fn apply_group(&self, group: &EffectGroup, ctx: &GameContext) -> GroupResult {
        if !group.preconditions.is_empty() {
            let holds = {
                let game = ctx.state.read().await;
                let target = ctx
                    .target_player
                    .clone()
                    .or_else(|| game.current_player.clone());
                let scope = ConditionScope {
                    game: &game,
                    player: target.as_deref().and_then(|id| game.player(id)),
                    now: self.clock.now(),
                    custom: &ctx.custom,
                };
                all_hold(&group.preconditions, &scope)
            };
            if !holds {
                info!(group_id = group.id.as_str(), "Effect group preconditions failed, skipping");
                self.notifier.emit(Notification::EffectGroupSkipped {
                    group_id: group.id.clone(),
                });
                return GroupResult {
                    group_id: group.id.clone(),
                    skipped: true,
                    results: Vec::new(),
                };
            }
        }

        let results = match group.mode {
            ExecutionMode::Sequential => {
                let mut results = Vec::with_capacity(group.effects.len());
                for effect in &group.effects {
                    let result = self.apply_effect(effect, ctx).await;
                    let stop = !result.success;
                    results.push(result);
                    if stop {
                        break;
                    }
                }
                results
            }
            ExecutionMode::Parallel => {
                join_all(group.effects.iter().map(|e| self.apply_effect(e, ctx))).await
            }
            ExecutionMode::Conditional => {
                let mut results = Vec::new();
                for effect in &group.effects {
                    let result = self.apply_effect(effect, ctx).await;
                    let stop = result.success;
                    results.push(result);
                    if stop {
                        break;
                    }
                }
                results
            }
        };

        let result = GroupResult {
            group_id: group.id.clone(),
            skipped: false,
            results,
        };
        info!(
            group_id = group.id.as_str(),
            mode = ?group.mode,
            attempted = result.results.len(),
            succeeded = result.succeeded(),
            "Effect group applied"
        );
        self.notifier.emit(Notification::EffectGroupApplied {
            group_id: group.id.clone(),
            results: result.results.len(),
            succeeded: result.succeeded(),
        });
        result
    }

    // -----------------------------------------------------------------------
    // Revert
    // -----------------------------------------------------------------------

    /// Undo an active application through its handler. Fails explicitly
    /// when the handler has no revert; the application then stays active.
    ///
    /// The application leaves the active set before the handler runs, so
    /// an overlapping revert of the same id gets `ApplicationNotFound`. A
    /// failed revert puts it back.
    pub async fn revert_effect(
        &self,
        application_id: &str,
        ctx: &GameContext,
    ) -> EffectOutcome<EffectApplication> {
        let handler_id = self
            .active
            .lock()
            .await
            .get(application_id)
            .map(|a| a.handler_id.clone())
            .ok_or_else(|| EffectError::ApplicationNotFound(application_id.to_string()))?;

        let handler = self
            .handlers
            .read()
            .await
            .get(&handler_id)
            .cloned()
            .ok_or_else(|| EffectError::HandlerGone {
                handler_id: handler_id.clone(),
            })?;

        let mut application = self
            .active
            .lock()
            .await
            .remove(application_id)
            .ok_or_else(|| EffectError::ApplicationNotFound(application_id.to_string()))?;

        if !handler.can_revert() {
            warn!(
                application_id,
                effect_type = application.effect_type.as_str(),
                "Effect cannot be reverted"
            );
            let error = EffectError::RevertUnsupported {
                handler_id,
                effect_type: application.effect_type.clone(),
            };
            self.restore(application).await;
            return Err(error);
        }

        if let Err(e) = handler.revert(&application, ctx).await {
            let error = EffectError::Revert {
                application_id: application_id.to_string(),
                message: format!("{e:#}"),
            };
            self.restore(application).await;
            return Err(error);
        }

        application.cancel();
        info!(
            application_id,
            effect_type = application.effect_type.as_str(),
            "Effect reverted"
        );
        self.notifier.emit(Notification::EffectReverted {
            application_id: application_id.to_string(),
            effect_type: application.effect_type.clone(),
        });
        Ok(application)
    }

    async fn restore(&self, application: EffectApplication) {
        self.active
            .lock()
            .await
            .insert(application.id.clone(), application);
    }

    // -----------------------------------------------------------------------
    // Sweep
    // -----------------------------------------------------------------------

    pub async fn sweep(&self, ctx: &GameContext) -> SweepReport {
        self.sweep_at(self.clock.now(), ctx).await
    }

    /// Expire applications whose time is up; call `update` on the rest.
    pub async fn sweep_at(&self, now: DateTime<Utc>, ctx: &GameContext) -> SweepReport {
        let mut snapshot: Vec<EffectApplication> =
            self.active.lock().await.values().cloned().collect();
        snapshot.sort_by_key(|a| a.applied_at);

        let mut report = SweepReport::default();
        for application in snapshot {
            let handler = self
                .handlers
                .read()
                .await
                .get(&application.handler_id)
                .cloned();
            let app_ctx = GameContext {
                state: ctx.state.clone(),
                target_player: application.targets.first().cloned(),
                custom: ctx.custom.clone(),
                source_event: application.source_event.clone(),
            };

            if application.is_expired(now) {
                // Claim it first; a concurrent revert may already have.
                let Some(mut done) = self.active.lock().await.remove(&application.id) else {
                    continue;
                };
                if done.revert_on_expiry {
                    match &handler {
                        Some(h) if h.can_revert() => {
                            if let Err(e) = h.revert(&done, &app_ctx).await {
                                warn!(
                                    application_id = done.id.as_str(),
                                    error = %e,
                                    "Revert on expiry failed"
                                );
                            }
                        }
                        _ => warn!(
                            application_id = done.id.as_str(),
                            "Revert on expiry requested but handler cannot revert"
                        ),
                    }
                }

                done.complete();
                info!(
                    application_id = done.id.as_str(),
                    effect_type = done.effect_type.as_str(),
                    "Effect expired"
                );
                self.notifier.emit(Notification::EffectExpired {
                    application_id: done.id.clone(),
                    effect_type: done.effect_type.clone(),
                });
                report.expired.push(done);
                continue;
            }

            let Some(handler) = handler else {
                continue;
            };
            match handler.update(&application, &app_ctx).await {
                Ok(Some(value)) => {
                    if let Some(live) = self.active.lock().await.get_mut(&application.id) {
                        live.current_value = value;
                    }
                    report.updated += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        application_id = application.id.as_str(),
                        error = %e,
                        "Effect update failed"
                    );
                    report.update_failures += 1;
                }
            }
        }

        if !report.expired.is_empty() || report.update_failures > 0 {
            debug!(
                expired = report.expired.len(),
                updated = report.updated,
                update_failures = report.update_failures,
                "Sweep complete"
            );
        }
        report
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub async fn active_effects(&self) -> Vec<EffectApplication> {
        let mut apps: Vec<EffectApplication> =
            self.active.lock().await.values().cloned().collect();
        apps.sort_by_key(|a| a.applied_at);
        apps
    }

    pub async fn active_effect(&self, application_id: &str) -> Option<EffectApplication> {
        self.active.lock().await.get(application_id).cloned()
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    pub async fn effect_stats(&self, effect_type: &str) -> Option<RollingStats> {
        self.stats.lock().await.get(effect_type).copied()
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

    async fn record(&self, effect_type: &str, elapsed: Duration, success: bool) {
        self.stats
            .lock()
            .await
            .entry(effect_type.to_string())
            .or_default()
            .record(elapsed, success);
    }
}
