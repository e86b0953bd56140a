use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::Parser;
use gameflow_common::{load_config, EngineConfig, GameEvent, GameState, Player, Priority};
use gameflow_engine::Engine;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod rules;

use rules::{MARKET_REPORT, TURN_STARTED};

const STARTING_CASH: i64 = 1_500;
const MAX_TICKS_PER_TURN: usize = 32;

#[derive(Parser)]
#[command(name = "gameflow-sim", about = "Headless board-game run on the gameflow engine")]
struct Cli {
    /// Path to engine config TOML. Defaults apply when omitted.
    #[arg(long, env = "GAMEFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Full rounds to play.
    #[arg(long, default_value_t = 10)]
    rounds: u32,

    /// Number of players.
    #[arg(long, default_value_t = 4)]
    players: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("gameflow=info".parse()?))
        .init();

    let cli = Cli::parse();
    anyhow::ensure!(cli.players > 0, "--players must be at least 1");

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };
    config.log_summary();

    let players = (1..=cli.players)
        .map(|i| Player::new(format!("p{i}"), format!("Player {i}"), STARTING_CASH))
        .collect();
    let engine = Engine::new(config, GameState::new(players).into_shared());
    engine.register_default_handlers().await?;
    rules::register_rules(&engine).await?;

    let counts = Arc::new(Mutex::new(BTreeMap::<&'static str, usize>::new()));
    let listener = {
        let counts = counts.clone();
        let mut rx = engine.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(n) => {
                        if let Ok(mut counts) = counts.lock() {
                            *counts.entry(n.kind()).or_default() += 1;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => warn!(missed, "Notification listener lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    info!(rounds = cli.rounds, players = cli.players, "Simulation starting");

    for _ in 0..cli.rounds * cli.players as u32 {
        let current = engine.state().read().await.current_player.clone();
        let Some(player) = current else {
            break;
        };
        engine
            .add_event(GameEvent::new(TURN_STARTED, json!({"player": player})))
            .await?;

        for _ in 0..MAX_TICKS_PER_TURN {
            if engine.tick().await.is_idle() {
                break;
            }
        }
        engine.sweep().await;
    }

    let reports = {
        let game = engine.state();
        let game = game.read().await;
        game.players
            .iter()
            .map(|p| GameEvent::new(MARKET_REPORT, json!({"player": p.id})).with_priority(Priority::Low))
            .collect::<Vec<_>>()
    };
    engine.add_events_chunked(reports, Priority::Low).await?;
    while !engine.tick().await.is_idle() {}

    let shutdown = engine.shutdown().await;
    listener.abort();

    println!("{}", engine.stats_report().await);

    println!("\n=== Standings ===");
    {
        let game = engine.state();
        let game = game.read().await;
        println!("Round {} | phase {}", game.round, game.phase);
        let mut standings: Vec<&Player> = game.players.iter().collect();
        standings.sort_by(|a, b| b.money.cmp(&a.money));
        for p in standings {
            println!(
                "  {:<10} cash={:<6} square={:<3} holdings={}",
                p.name,
                p.money,
                p.position,
                p.properties.len()
            );
        }
    }

    if let Ok(counts) = counts.lock() {
        println!("\n=== Notifications ===");
        for (kind, n) in counts.iter() {
            println!("  {kind:<24} {n}");
        }
    }

    info!(
        queued_events = shutdown.queued_events,
        queued_batches = shutdown.queued_batches,
        "Simulation finished"
    );
    Ok(())
}
