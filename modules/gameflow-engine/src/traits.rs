//! Extension seams: event processors and effect handlers.

use anyhow::Result;
use async_trait::async_trait;
use gameflow_common::{EffectApplication, EffectModification, EffectSpec, GameEvent};
use serde_json::Value;

use crate::context::GameContext;

/// Handles events of the types it is registered for.
///
/// Processors for the same event run one after another; processors for
/// different events may run concurrently. Returning `Err` counts as a
/// failed attempt and is retried per the processor's budget.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn process(&self, event: &GameEvent, ctx: &GameContext) -> Result<ProcessorOutput>;
}

/// What a processor hands back on success.
#[derive(Debug, Default)]
pub struct ProcessorOutput {
    pub data: Option<Value>,
    /// Follow-up events. Re-queued with fresh identity for a later tick.
    pub next_events: Vec<GameEvent>,
    /// Effects to apply on behalf of this event.
    pub effects: Vec<EffectSpec>,
}

impl ProcessorOutput {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn emit(mut self, event: GameEvent) -> Self {
        self.next_events.push(event);
        self
    }

    pub fn request(mut self, effect: EffectSpec) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Applies one family of effects to resolved targets.
///
/// `revert` and `update` are optional: a handler that can undo its
/// mutations overrides `can_revert` and `revert`; one that tracks live
/// state overrides `update`, which the sweep calls while the application
/// is active.
#[async_trait]
pub trait EffectHandler: Send + Sync {
    fn id(&self) -> &str;

    fn can_handle(&self, effect: &EffectSpec, ctx: &GameContext) -> bool;

    async fn apply(
        &self,
        effect: &EffectSpec,
        targets: &[String],
        ctx: &GameContext,
    ) -> Result<HandlerOutcome>;

    fn can_revert(&self) -> bool {
        false
    }

    async fn revert(&self, application: &EffectApplication, _ctx: &GameContext) -> Result<()> {
        anyhow::bail!(
            "handler {} cannot revert {}",
            self.id(),
            application.effect_type
        )
    }

    /// Refresh an active application. `Some(value)` replaces its
    /// `current_value`.
    async fn update(
        &self,
        _application: &EffectApplication,
        _ctx: &GameContext,
    ) -> Result<Option<Value>> {
        Ok(None)
    }
}

/// Result of a successful `EffectHandler::apply`.
#[derive(Debug, Default)]
pub struct HandlerOutcome {
    pub modifications: Vec<EffectModification>,
    pub original_value: Value,
    pub current_value: Value,
    /// Further effects to apply, one level deeper.
    pub side_effects: Vec<EffectSpec>,
}

impl HandlerOutcome {
    /// Build an outcome from modifications, recording per-target original
    /// and new values keyed by target id.
    pub fn from_modifications(modifications: Vec<EffectModification>) -> Self {
        let mut original = serde_json::Map::new();
        let mut current = serde_json::Map::new();
        for m in &modifications {
            original
                .entry(m.target_id.clone())
                .or_insert_with(|| m.original_value.clone());
            current.insert(m.target_id.clone(), m.new_value.clone());
        }
        Self {
            modifications,
            original_value: Value::Object(original),
            current_value: Value::Object(current),
            side_effects: Vec::new(),
        }
    }

    pub fn with_side_effect(mut self, effect: EffectSpec) -> Self {
        self.side_effects.push(effect);
        self
    }
}
