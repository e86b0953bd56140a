//! Per-call context handed to processors and effect handlers.

use gameflow_common::SharedState;
use serde_json::{Map, Value};

/// Borrowed view of the host's game for one call. Cloning is cheap: the
/// state itself is shared, never copied.
#[derive(Debug, Clone)]
pub struct GameContext {
    pub state: SharedState,
    /// Designated target for `self`/`others` selectors. Falls back to the
    /// game's current player when unset.
    pub target_player: Option<String>,
    /// Caller-supplied values, readable by `custom` preconditions.
    pub custom: Map<String, Value>,
    /// Event that led to this call, recorded on effect applications.
    pub source_event: Option<String>,
}

impl GameContext {
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            target_player: None,
            custom: Map::new(),
            source_event: None,
        }
    }

    pub fn with_target(mut self, player_id: impl Into<String>) -> Self {
        self.target_player = Some(player_id.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }

    pub fn for_event(&self, event_id: &str) -> Self {
        Self {
            source_event: Some(event_id.to_string()),
            ..self.clone()
        }
    }

    /// Explicit target, else the game's current player.
    pub async fn resolved_target(&self) -> Option<String> {
        if let Some(id) = &self.target_player {
            return Some(id.clone());
        }
        self.state.read().await.current_player.clone()
    }
}
