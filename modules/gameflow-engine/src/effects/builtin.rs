//! Stock effect handlers for common board-game mutations.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use gameflow_common::{
    EffectApplication, EffectModification, EffectSpec, GameState, ModificationKind, Player,
};
use serde_json::{json, Map, Value};

use crate::context::GameContext;
use crate::traits::{EffectHandler, HandlerOutcome};

pub const MONEY_CHANGE: &str = "money_change";
pub const MONEY_MULTIPLY: &str = "money_multiply";
pub const POSITION_CHANGE: &str = "position_change";
pub const PROPERTY_GRANT: &str = "property_grant";
pub const STATUS_TOGGLE: &str = "status_toggle";
pub const ATTRIBUTE_SET: &str = "attribute_set";

const ATTRIBUTE_PREFIX: &str = "attributes.";

/// Every stock handler, in registration order.
pub fn default_handlers() -> Vec<Arc<dyn EffectHandler>> {
    vec![
        Arc::new(MoneyHandler),
        Arc::new(PositionHandler),
        Arc::new(PropertyGrantHandler),
        Arc::new(StatusToggleHandler),
        Arc::new(AttributeSetHandler),
    ]
}

fn player<'a>(game: &'a GameState, id: &str) -> Result<&'a Player> {
    game.player(id)
        .ok_or_else(|| anyhow!("player {id} not found"))
}

fn player_mut<'a>(game: &'a mut GameState, id: &str) -> Result<&'a mut Player> {
    game.player_mut(id)
        .ok_or_else(|| anyhow!("player {id} not found"))
}

fn as_integer(value: &Value) -> Result<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.round() as i64))
        .with_context(|| format!("expected a number, got {value}"))
}

fn attribute_name(effect: &EffectSpec, value: &Value) -> Result<String> {
    effect
        .metadata_str("attribute")
        .or_else(|| value.as_str())
        .map(str::to_string)
        .context("no attribute named in metadata or value")
}

/// Put back an attribute's pre-effect value. `Null` means it was absent.
fn restore_attribute(player: &mut Player, name: &str, original: &Value) {
    if original.is_null() {
        player.attributes.remove(name);
    } else {
        player.attributes.insert(name.to_string(), original.clone());
    }
}

fn attribute_modifications(
    application: &EffectApplication,
) -> impl Iterator<Item = (&EffectModification, &str)> {
    application.modifications.iter().filter_map(|m| {
        m.property
            .strip_prefix(ATTRIBUTE_PREFIX)
            .map(|name| (m, name))
    })
}

/// Every recorded target must still exist before a revert touches any.
fn ensure_targets(game: &GameState, application: &EffectApplication) -> Result<()> {
    for m in &application.modifications {
        player(game, &m.target_id)?;
    }
    Ok(())
}

fn restore_attributes(game: &mut GameState, application: &EffectApplication) -> Result<()> {
    ensure_targets(game, application)?;
    for (m, name) in attribute_modifications(application) {
        restore_attribute(player_mut(game, &m.target_id)?, name, &m.original_value);
    }
    Ok(())
}

fn add_money(id: &str, balance: i64, delta: i64) -> Result<i64> {
    balance
        .checked_add(delta)
        .with_context(|| format!("balance of {id} overflows adding {delta}"))
}

fn scale_money(id: &str, balance: i64, factor: f64) -> Result<i64> {
    let scaled = (balance as f64 * factor).round();
    if !scaled.is_finite() || scaled < i64::MIN as f64 || scaled >= i64::MAX as f64 {
        bail!("balance of {id} overflows scaling by {factor}");
    }
    Ok(scaled as i64)
}

// Each handler validates and computes every target's new value before it
// writes any of them, so a bad target leaves the whole state untouched.

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// `money_change` adds the value; `money_multiply` scales by it.
pub struct MoneyHandler;

#[async_trait]
impl EffectHandler for MoneyHandler {
    fn id(&self) -> &str {
        "money"
    }

    fn can_handle(&self, effect: &EffectSpec, _ctx: &GameContext) -> bool {
        matches!(effect.effect_type.as_str(), MONEY_CHANGE | MONEY_MULTIPLY)
    }

    async fn apply(
        &self,
        effect: &EffectSpec,
        targets: &[String],
        ctx: &GameContext,
    ) -> Result<HandlerOutcome> {
        let mut game = ctx.state.write().await;
        let mut planned = Vec::with_capacity(targets.len());
        for id in targets {
            let target = player(&game, id)?;
            let value = effect.value.resolve(target, &game);
            let before = target.money;
            let (after, kind) = if effect.effect_type == MONEY_MULTIPLY {
                let factor = value
                    .as_f64()
                    .with_context(|| format!("expected a multiplier, got {value}"))?;
                (scale_money(id, before, factor)?, ModificationKind::Multiply)
            } else {
                (add_money(id, before, as_integer(&value)?)?, ModificationKind::Add)
            };
            planned.push(EffectModification::new(
                id.as_str(),
                "money",
                before,
                after,
                kind,
                Utc::now(),
            ));
        }

        for m in &planned {
            player_mut(&mut game, &m.target_id)?.money = as_integer(&m.new_value)?;
        }
        Ok(HandlerOutcome::from_modifications(planned))
    }

    fn can_revert(&self) -> bool {
        true
    }

    /// Additions are backed out by their delta so later changes survive;
    /// multiplications restore the recorded balance.
    async fn revert(&self, application: &EffectApplication, ctx: &GameContext) -> Result<()> {
        let mut game = ctx.state.write().await;
        ensure_targets(&game, application)?;
        let mut restored = Vec::with_capacity(application.modifications.len());
        for m in application.modifications.iter().rev() {
            let original = as_integer(&m.original_value)?;
            let balance = match m.modification_type {
                ModificationKind::Add => {
                    let delta = as_integer(&m.new_value)?
                        .checked_sub(original)
                        .context("recorded money change overflows")?;
                    let current = player(&game, &m.target_id)?.money;
                    current
                        .checked_sub(delta)
                        .with_context(|| format!("balance of {} overflows", m.target_id))?
                }
                _ => original,
            };
            restored.push((m.target_id.as_str(), balance));
        }

        for (id, balance) in restored {
            player_mut(&mut game, id)?.money = balance;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A number moves the target to that square; `{"delta": n}` moves it by
/// `n`. A `board_size` metadata entry wraps the result around the board.
pub struct PositionHandler;

#[async_trait]
impl EffectHandler for PositionHandler {
    fn id(&self) -> &str {
        "position"
    }

    fn can_handle(&self, effect: &EffectSpec, _ctx: &GameContext) -> bool {
        effect.effect_type == POSITION_CHANGE
    }

    async fn apply(
        &self,
        effect: &EffectSpec,
        targets: &[String],
        ctx: &GameContext,
    ) -> Result<HandlerOutcome> {
        let board_size = effect
            .metadata
            .get("board_size")
            .and_then(Value::as_i64)
            .filter(|n| *n > 0);

        let mut game = ctx.state.write().await;
        let mut planned = Vec::with_capacity(targets.len());
        for id in targets {
            let target = player(&game, id)?;
            let value = effect.value.resolve(target, &game);
            let before = target.position;
            let (mut after, kind) = match value.get("delta") {
                Some(delta) => {
                    let delta = as_integer(delta)?;
                    let after = before
                        .checked_add(delta)
                        .with_context(|| format!("position of {id} overflows moving {delta}"))?;
                    (after, ModificationKind::Add)
                }
                None => (as_integer(&value)?, ModificationKind::Set),
            };
            if let Some(size) = board_size {
                after = after.rem_euclid(size);
            }
            planned.push(EffectModification::new(
                id.as_str(),
                "position",
                before,
                after,
                kind,
                Utc::now(),
            ));
        }

        for m in &planned {
            player_mut(&mut game, &m.target_id)?.position = as_integer(&m.new_value)?;
        }
        Ok(HandlerOutcome::from_modifications(planned))
    }

    fn can_revert(&self) -> bool {
        true
    }

    async fn revert(&self, application: &EffectApplication, ctx: &GameContext) -> Result<()> {
        let mut game = ctx.state.write().await;
        ensure_targets(&game, application)?;
        let restored = application
            .modifications
            .iter()
            .rev()
            .map(|m| Ok((m.target_id.as_str(), as_integer(&m.original_value)?)))
            .collect::<Result<Vec<_>>>()?;
        for (id, position) in restored {
            player_mut(&mut game, id)?.position = position;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

/// Appends the value (a property name) to each target's holdings.
pub struct PropertyGrantHandler;

#[async_trait]
impl EffectHandler for PropertyGrantHandler {
    fn id(&self) -> &str {
        "property"
    }

    fn can_handle(&self, effect: &EffectSpec, _ctx: &GameContext) -> bool {
        effect.effect_type == PROPERTY_GRANT
    }

    async fn apply(
        &self,
        effect: &EffectSpec,
        targets: &[String],
        ctx: &GameContext,
    ) -> Result<HandlerOutcome> {
        let mut game = ctx.state.write().await;
        let mut planned = Vec::with_capacity(targets.len());
        for id in targets {
            let target = player(&game, id)?;
            let value = effect.value.resolve(target, &game);
            let name = value
                .as_str()
                .with_context(|| format!("expected a property name, got {value}"))?;
            let mut holdings = target.properties.clone();
            holdings.push(name.to_string());
            planned.push(EffectModification::new(
                id.as_str(),
                "properties",
                json!(target.properties),
                json!(holdings),
                ModificationKind::Append,
                Utc::now(),
            ));
        }

        for m in &planned {
            let holdings = serde_json::from_value(m.new_value.clone())?;
            player_mut(&mut game, &m.target_id)?.properties = holdings;
        }
        Ok(HandlerOutcome::from_modifications(planned))
    }

    fn can_revert(&self) -> bool {
        true
    }

    /// Removes the granted entry only, leaving anything acquired since.
    async fn revert(&self, application: &EffectApplication, ctx: &GameContext) -> Result<()> {
        let mut game = ctx.state.write().await;
        ensure_targets(&game, application)?;
        let granted = application
            .modifications
            .iter()
            .rev()
            .map(|m| {
                let name = m
                    .new_value
                    .as_array()
                    .and_then(|list| list.last())
                    .and_then(Value::as_str)
                    .context("modification does not record the granted property")?;
                Ok((m.target_id.as_str(), name))
            })
            .collect::<Result<Vec<_>>>()?;

        for (id, name) in granted {
            let target = player_mut(&mut game, id)?;
            if let Some(pos) = target.properties.iter().rposition(|p| p == name) {
                target.properties.remove(pos);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// Flips a boolean attribute. The attribute comes from `metadata.attribute`
/// or, failing that, from a string value. Missing attributes count as false.
pub struct StatusToggleHandler;

#[async_trait]
impl EffectHandler for StatusToggleHandler {
    fn id(&self) -> &str {
        "status"
    }

    fn can_handle(&self, effect: &EffectSpec, _ctx: &GameContext) -> bool {
        effect.effect_type == STATUS_TOGGLE
    }

    async fn apply(
        &self,
        effect: &EffectSpec,
        targets: &[String],
        ctx: &GameContext,
    ) -> Result<HandlerOutcome> {
        let mut game = ctx.state.write().await;
        let mut planned = Vec::with_capacity(targets.len());
        for id in targets {
            let target = player(&game, id)?;
            let value = effect.value.resolve(target, &game);
            let name = attribute_name(effect, &value)?;
            let before = target.attributes.get(&name).cloned().unwrap_or(Value::Null);
            let flipped = !before.as_bool().unwrap_or(false);
            planned.push((
                name.clone(),
                EffectModification::new(
                    id.as_str(),
                    format!("{ATTRIBUTE_PREFIX}{name}"),
                    before,
                    flipped,
                    ModificationKind::Toggle,
                    Utc::now(),
                ),
            ));
        }

        for (name, m) in &planned {
            player_mut(&mut game, &m.target_id)?
                .attributes
                .insert(name.clone(), m.new_value.clone());
        }
        Ok(HandlerOutcome::from_modifications(
            planned.into_iter().map(|(_, m)| m).collect(),
        ))
    }

    fn can_revert(&self) -> bool {
        true
    }

    async fn revert(&self, application: &EffectApplication, ctx: &GameContext) -> Result<()> {
        restore_attributes(&mut *ctx.state.write().await, application)
    }
}

/// Sets `metadata.attribute` to the effect value.
pub struct AttributeSetHandler;

#[async_trait]
impl EffectHandler for AttributeSetHandler {
    fn id(&self) -> &str {
        "attribute"
    }

    fn can_handle(&self, effect: &EffectSpec, _ctx: &GameContext) -> bool {
        effect.effect_type == ATTRIBUTE_SET
    }

    async fn apply(
        &self,
        effect: &EffectSpec,
        targets: &[String],
        ctx: &GameContext,
    ) -> Result<HandlerOutcome> {
        let Some(name) = effect.metadata_str("attribute").map(str::to_string) else {
            bail!("attribute_set needs an `attribute` metadata entry");
        };
        let mut game = ctx.state.write().await;
        let mut planned = Vec::with_capacity(targets.len());
        for id in targets {
            let target = player(&game, id)?;
            let value = effect.value.resolve(target, &game);
            let before = target.attributes.get(&name).cloned().unwrap_or(Value::Null);
            planned.push(EffectModification::new(
                id.as_str(),
                format!("{ATTRIBUTE_PREFIX}{name}"),
                before,
                value,
                ModificationKind::Set,
                Utc::now(),
            ));
        }

        for m in &planned {
            player_mut(&mut game, &m.target_id)?
                .attributes
                .insert(name.clone(), m.new_value.clone());
        }
        Ok(HandlerOutcome::from_modifications(planned))
    }

    fn can_revert(&self) -> bool {
        true
    }

    async fn revert(&self, application: &EffectApplication, ctx: &GameContext) -> Result<()> {
        restore_attributes(&mut *ctx.state.write().await, application)
    }

    /// Reports the live attribute value per target.
    async fn update(
        &self,
        application: &EffectApplication,
        ctx: &GameContext,
    ) -> Result<Option<Value>> {
        let game = ctx.state.read().await;
        let mut live = Map::new();
        for (m, name) in attribute_modifications(application) {
            let value = game
                .player(&m.target_id)
                .and_then(|p| p.attributes.get(name))
                .cloned()
                .unwrap_or(Value::Null);
            live.insert(m.target_id.clone(), value);
        }
        Ok(Some(Value::Object(live)))
    }
}
