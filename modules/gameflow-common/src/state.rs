//! Host-owned game state.
//!
//! The engine never copies this state: processors and effect handlers
//! receive a `SharedState` handle and mutate the host's players in place.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

/// Shared, lockable handle to the host's game state.
pub type SharedState = Arc<RwLock<GameState>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub money: i64,
    pub position: i64,
    #[serde(default)]
    pub properties: Vec<String>,
    /// Free-form per-player flags and counters (statuses, buffs).
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Player {
    pub fn new(id: impl Into<String>, name: impl Into<String>, money: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            money,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameState {
    pub players: Vec<Player>,
    pub round: u32,
    pub phase: String,
    pub current_player: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl GameState {
    pub fn new(players: Vec<Player>) -> Self {
        let current_player = players.first().map(|p| p.id.clone());
        Self {
            players,
            round: 1,
            phase: "setup".to_string(),
            current_player,
            attributes: Map::new(),
        }
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn player_ids(&self) -> Vec<String> {
        self.players.iter().map(|p| p.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_game_starts_with_first_player() {
        let game = GameState::new(vec![
            Player::new("p1", "Ada", 1000),
            Player::new("p2", "Grace", 1000),
        ]);
        assert_eq!(game.current_player.as_deref(), Some("p1"));
        assert_eq!(game.round, 1);
        assert_eq!(game.player_ids(), vec!["p1", "p2"]);
    }

    #[test]
    fn player_mut_edits_in_place() {
        let mut game = GameState::new(vec![Player::new("p1", "Ada", 1000)]);
        game.player_mut("p1").unwrap().money += 250;
        assert_eq!(game.player("p1").unwrap().money, 1250);
        assert!(game.player("missing").is_none());
    }
}
