//! Events and event batches. Domain-agnostic: payloads are opaque JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ValidationError, ValidationResult};

/// Ordered priority category. Declaration order is the natural order
/// (`Low < Normal < High < Critical`); scheduling uses the numeric
/// weights from `PriorityWeights`, not this ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A discrete game event submitted by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEvent {
    pub id: String,
    pub event_type: String,
    #[serde(default)]
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    processed: bool,
}

impl GameEvent {
    /// Create an event with a fresh id and the current timestamp.
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            priority: Priority::Normal,
            timestamp: Utc::now(),
            payload,
            processed: false,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn processed(&self) -> bool {
        self.processed
    }

    /// Flip `processed` to true. Returns false if it was already set;
    /// the flag never goes back to false.
    pub fn mark_processed(&mut self) -> bool {
        if self.processed {
            return false;
        }
        self.processed = true;
        true
    }

    /// Give a follow-up event its own identity before it is re-queued.
    pub fn refresh_identity(&mut self) {
        self.id = Uuid::new_v4().to_string();
        self.timestamp = Utc::now();
        self.processed = false;
    }

    /// Reject events that cannot be routed.
    pub fn validate(&self) -> ValidationResult<()> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::MissingId);
        }
        if self.event_type.trim().is_empty() {
            return Err(ValidationError::MissingType {
                event_id: self.id.clone(),
            });
        }
        if self.processed {
            return Err(ValidationError::AlreadyProcessed {
                event_id: self.id.clone(),
            });
        }
        Ok(())
    }
}

/// A set of events submitted together and drained as bounded groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    pub id: String,
    pub events: Vec<GameEvent>,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    processed: bool,
}

impl EventBatch {
    pub fn new(events: Vec<GameEvent>, priority: Priority) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            events,
            priority,
            created_at: Utc::now(),
            processed: false,
        }
    }

    pub fn processed(&self) -> bool {
        self.processed
    }

    /// Set once every member event has been dispatched.
    pub fn mark_processed(&mut self) -> bool {
        if self.processed || self.events.iter().any(|e| !e.processed()) {
            return false;
        }
        self.processed = true;
        true
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
