//! A small property-trading ruleset expressed as processors.
//!
//! turn_started -> dice_rolled -> (move, buy | rent, close) -> turn_ended

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use gameflow_common::{EffectSpec, GameEvent, Priority, RegistryResult, TargetSelector};
use gameflow_engine::{
    Engine, EventProcessor, EventTypes, GameContext, ProcessorOutput, ProcessorSpec,
    MONEY_CHANGE, POSITION_CHANGE, PROPERTY_GRANT, STATUS_TOGGLE,
};
use rand::Rng;
use serde_json::json;
use tracing::{debug, info};

pub const BOARD_SIZE: i64 = 40;
pub const GO_SALARY: i64 = 200;

pub const TURN_STARTED: &str = "turn_started";
pub const DICE_ROLLED: &str = "dice_rolled";
pub const TURN_ENDED: &str = "turn_ended";
pub const MARKET_REPORT: &str = "market_report";

/// Squares on multiples of ten are not for sale.
pub fn square_name(square: i64) -> Option<String> {
    (square % 10 != 0).then(|| format!("sq-{square}"))
}

pub fn price(square: i64) -> i64 {
    60 + 10 * square
}

pub fn rent(square: i64) -> i64 {
    price(square) / 10
}

fn player_of(event: &GameEvent) -> Result<String> {
    event
        .payload
        .get("player")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .with_context(|| format!("{} event has no player", event.event_type))
}

fn roll_of(event: &GameEvent) -> Result<i64> {
    event
        .payload
        .get("roll")
        .and_then(|v| v.as_i64())
        .with_context(|| format!("{} event has no roll", event.event_type))
}

pub async fn register_rules(engine: &Engine) -> RegistryResult<()> {
    engine
        .register_processor(
            ProcessorSpec::builder()
                .id("dice")
                .name("Roll two dice")
                .event_types(EventTypes::only([TURN_STARTED]))
                .build(),
            Arc::new(DiceRoller),
        )
        .await?;
    engine
        .register_processor(
            ProcessorSpec::builder()
                .id("move")
                .name("Advance token")
                .event_types(EventTypes::only([DICE_ROLLED]))
                .priority(10)
                .build(),
            Arc::new(Mover),
        )
        .await?;
    engine
        .register_processor(
            ProcessorSpec::builder()
                .id("buy")
                .name("Buy unowned square")
                .event_types(EventTypes::only([DICE_ROLLED]))
                .priority(5)
                .dependencies(vec!["move".into(), "rent".into()])
                .build(),
            Arc::new(Buyer),
        )
        .await?;
    engine
        .register_processor(
            ProcessorSpec::builder()
                .id("rent")
                .name("Pay rent")
                .event_types(EventTypes::only([DICE_ROLLED]))
                .priority(5)
                .dependencies(vec!["move".into()])
                .build(),
            Arc::new(RentCollector),
        )
        .await?;
    engine
        .register_processor(
            ProcessorSpec::builder()
                .id("close")
                .name("Close turn")
                .event_types(EventTypes::only([DICE_ROLLED]))
                .priority(-5)
                .dependencies(vec!["buy".into(), "rent".into()])
                .build(),
            Arc::new(TurnCloser),
        )
        .await?;
    engine
        .register_processor(
            ProcessorSpec::builder()
                .id("advance")
                .name("Pass to next player")
                .event_types(EventTypes::only([TURN_ENDED]))
                .allow_concurrent(false)
                .build(),
            Arc::new(TurnAdvancer),
        )
        .await?;
    engine
        .register_processor(
            ProcessorSpec::builder()
                .id("appraise")
                .name("Appraise holdings")
                .event_types(EventTypes::only([MARKET_REPORT]))
                .timeout(Duration::from_millis(250))
                .build(),
            Arc::new(Appraiser),
        )
        .await?;
    engine
        .register_processor(
            ProcessorSpec::builder()
                .id("audit")
                .name("Audit trail")
                .priority(-100)
                .allow_concurrent(false)
                .build(),
            Arc::new(Audit),
        )
        .await?;
    Ok(())
}

pub struct DiceRoller;

#[async_trait]
impl EventProcessor for DiceRoller {
    async fn process(&self, event: &GameEvent, _ctx: &GameContext) -> Result<ProcessorOutput> {
        let player = player_of(event)?;
        let (a, b) = {
            let mut rng = rand::rng();
            (rng.random_range(1..=6i64), rng.random_range(1..=6i64))
        };
        debug!(player = player.as_str(), a, b, "Dice rolled");
        let rolled = GameEvent::new(
            DICE_ROLLED,
            json!({"player": player, "roll": a + b, "doubles": a == b}),
        );
        Ok(ProcessorOutput::ok()
            .with_data(json!({"roll": a + b}))
            .emit(rolled))
    }
}

/// Moves the token and pays the salary for passing go. Doubles make the
/// player lucky for a short while.
pub struct Mover;

#[async_trait]
impl EventProcessor for Mover {
    async fn process(&self, event: &GameEvent, ctx: &GameContext) -> Result<ProcessorOutput> {
        let player = player_of(event)?;
        let roll = roll_of(event)?;
        let from = {
            let game = ctx.state.read().await;
            game.player(&player)
                .with_context(|| format!("unknown player {player}"))?
                .position
        };

        let target = TargetSelector::Player(player.clone());
        let mut output = ProcessorOutput::ok().request(
            EffectSpec::new(POSITION_CHANGE, target.clone(), json!({"delta": roll}))
                .with_metadata("board_size", BOARD_SIZE),
        );
        if from + roll >= BOARD_SIZE {
            output = output.request(EffectSpec::new(MONEY_CHANGE, target.clone(), GO_SALARY));
        }
        if event.payload.get("doubles").and_then(|v| v.as_bool()) == Some(true) {
            output = output.request(
                EffectSpec::new(STATUS_TOGGLE, target, json!("lucky"))
                    .with_duration(Duration::from_secs(2))
                    .reverting_on_expiry(),
            );
        }
        Ok(output)
    }
}

pub struct RentCollector;

#[async_trait]
impl EventProcessor for RentCollector {
    async fn process(&self, event: &GameEvent, ctx: &GameContext) -> Result<ProcessorOutput> {
        let player = player_of(event)?;
        let game = ctx.state.read().await;
        let square = game
            .player(&player)
            .with_context(|| format!("unknown player {player}"))?
            .position;
        let Some(name) = square_name(square) else {
            return Ok(ProcessorOutput::ok());
        };
        let owner = game
            .players
            .iter()
            .find(|p| p.id != player && p.properties.contains(&name));
        let Some(owner) = owner else {
            return Ok(ProcessorOutput::ok());
        };

        let due = rent(square);
        info!(payer = player.as_str(), owner = owner.id.as_str(), square, due, "Rent due");
        Ok(ProcessorOutput::ok()
            .with_data(json!({"rent": due, "owner": owner.id}))
            .request(EffectSpec::new(MONEY_CHANGE, player.as_str(), -due))
            .request(EffectSpec::new(MONEY_CHANGE, owner.id.as_str(), due)))
    }
}

pub struct Buyer;

#[async_trait]
impl EventProcessor for Buyer {
    async fn process(&self, event: &GameEvent, ctx: &GameContext) -> Result<ProcessorOutput> {
        let player = player_of(event)?;
        let game = ctx.state.read().await;
        let me = game
            .player(&player)
            .with_context(|| format!("unknown player {player}"))?;
        let square = me.position;
        let Some(name) = square_name(square) else {
            return Ok(ProcessorOutput::ok());
        };
        let owned = game.players.iter().any(|p| p.properties.contains(&name));
        let cost = price(square);
        if owned || me.money < cost {
            return Ok(ProcessorOutput::ok());
        }

        info!(player = player.as_str(), square = name.as_str(), cost, "Square bought");
        Ok(ProcessorOutput::ok()
            .request(EffectSpec::new(MONEY_CHANGE, player.as_str(), -cost))
            .request(EffectSpec::new(PROPERTY_GRANT, player.as_str(), json!(name))))
    }
}

pub struct TurnCloser;

#[async_trait]
impl EventProcessor for TurnCloser {
    async fn process(&self, event: &GameEvent, _ctx: &GameContext) -> Result<ProcessorOutput> {
        let player = player_of(event)?;
        Ok(ProcessorOutput::ok().emit(
            GameEvent::new(TURN_ENDED, json!({"player": player})).with_priority(Priority::High),
        ))
    }
}

/// Hands the turn to the next player; a full lap bumps the round.
pub struct TurnAdvancer;

#[async_trait]
impl EventProcessor for TurnAdvancer {
    async fn process(&self, event: &GameEvent, ctx: &GameContext) -> Result<ProcessorOutput> {
        let player = player_of(event)?;
        let mut game = ctx.state.write().await;
        let idx = game
            .players
            .iter()
            .position(|p| p.id == player)
            .with_context(|| format!("unknown player {player}"))?;
        let next = (idx + 1) % game.players.len();
        if next == 0 {
            game.round += 1;
        }
        let next_id = game.players[next].id.clone();
        game.current_player = Some(next_id);
        game.phase = "play".to_string();
        Ok(ProcessorOutput::ok())
    }
}

/// Net worth per player: cash plus the list price of every holding.
pub struct Appraiser;

#[async_trait]
impl EventProcessor for Appraiser {
    async fn process(&self, event: &GameEvent, ctx: &GameContext) -> Result<ProcessorOutput> {
        let player = player_of(event)?;
        let game = ctx.state.read().await;
        let me = game
            .player(&player)
            .with_context(|| format!("unknown player {player}"))?;
        let holdings: i64 = me
            .properties
            .iter()
            .filter_map(|p| p.strip_prefix("sq-").and_then(|n| n.parse::<i64>().ok()))
            .map(price)
            .sum();
        Ok(ProcessorOutput::ok().with_data(json!({
            "player": player,
            "cash": me.money,
            "net_worth": me.money + holdings,
        })))
    }
}

pub struct Audit;

#[async_trait]
impl EventProcessor for Audit {
    async fn process(&self, event: &GameEvent, _ctx: &GameContext) -> Result<ProcessorOutput> {
        debug!(
            event_id = event.id.as_str(),
            event_type = event.event_type.as_str(),
            "audit"
        );
        Ok(ProcessorOutput::ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corners_are_not_for_sale() {
        assert_eq!(square_name(0), None);
        assert_eq!(square_name(20), None);
        assert_eq!(square_name(7).as_deref(), Some("sq-7"));
        assert_eq!(rent(7), 13);
    }
}
