//! Effect specifications, applications, and groups.
//!
//! An `EffectSpec` describes a mutation to perform. Applying it through a
//! handler yields an `EffectApplication`, the tracked runtime record whose
//! status moves `active -> completed` (expired) or `active -> cancelled`
//! (reverted). Both are terminal.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::condition::Condition;
use crate::error::{EffectError, EffectOutcome};
use crate::state::{GameState, Player};

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// Which players an effect lands on, resolved against the call's context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TargetSelector {
    /// The context's designated target player (`"self"`).
    Current,
    All,
    Others,
    Random,
    /// Any other string: a player id.
    Player(String),
}

impl From<&str> for TargetSelector {
    fn from(s: &str) -> Self {
        match s {
            "self" => TargetSelector::Current,
            "all" => TargetSelector::All,
            "others" => TargetSelector::Others,
            "random" => TargetSelector::Random,
            id => TargetSelector::Player(id.to_string()),
        }
    }
}

impl From<String> for TargetSelector {
    fn from(s: String) -> Self {
        TargetSelector::from(s.as_str())
    }
}

impl From<TargetSelector> for String {
    fn from(t: TargetSelector) -> Self {
        t.to_string()
    }
}

impl FromStr for TargetSelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TargetSelector::from(s))
    }
}

impl fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSelector::Current => f.write_str("self"),
            TargetSelector::All => f.write_str("all"),
            TargetSelector::Others => f.write_str("others"),
            TargetSelector::Random => f.write_str("random"),
            TargetSelector::Player(id) => f.write_str(id),
        }
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Computes an effect value from the resolved target and the game state.
pub type ComputeFn = Arc<dyn Fn(&Player, &GameState) -> Value + Send + Sync>;

/// Effect magnitude: a fixed literal, or a function of target and context
/// evaluated at apply time.
#[derive(Clone)]
pub enum EffectValue {
    Literal(Value),
    Computed(ComputeFn),
}

impl EffectValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        EffectValue::Literal(value.into())
    }

    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&Player, &GameState) -> Value + Send + Sync + 'static,
    {
        EffectValue::Computed(Arc::new(f))
    }

    pub fn resolve(&self, target: &Player, game: &GameState) -> Value {
        match self {
            EffectValue::Literal(v) => v.clone(),
            EffectValue::Computed(f) => f(target, game),
        }
    }
}

impl fmt::Debug for EffectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectValue::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            EffectValue::Computed(_) => f.write_str("Computed(<fn>)"),
        }
    }
}

impl From<Value> for EffectValue {
    fn from(v: Value) -> Self {
        EffectValue::Literal(v)
    }
}

impl From<i64> for EffectValue {
    fn from(v: i64) -> Self {
        EffectValue::Literal(Value::from(v))
    }
}

impl From<i32> for EffectValue {
    fn from(v: i32) -> Self {
        EffectValue::Literal(Value::from(v))
    }
}

impl From<f64> for EffectValue {
    fn from(v: f64) -> Self {
        EffectValue::Literal(Value::from(v))
    }
}

impl From<bool> for EffectValue {
    fn from(v: bool) -> Self {
        EffectValue::Literal(Value::from(v))
    }
}

// ---------------------------------------------------------------------------
// Spec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EffectSpec {
    pub id: String,
    pub effect_type: String,
    pub target: TargetSelector,
    pub value: EffectValue,
    pub duration: Option<Duration>,
    /// Ask the sweep to run the handler's revert when the effect expires.
    pub revert_on_expiry: bool,
    /// Handler-specific options (e.g. which attribute to set).
    pub metadata: Map<String, Value>,
}

impl EffectSpec {
    pub fn new(
        effect_type: impl Into<String>,
        target: impl Into<TargetSelector>,
        value: impl Into<EffectValue>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            effect_type: effect_type.into(),
            target: target.into(),
            value: value.into(),
            duration: None,
            revert_on_expiry: false,
            metadata: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn reverting_on_expiry(mut self) -> Self {
        self.revert_on_expiry = true;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// When an application made at `applied_at` runs out. A duration past
    /// the representable calendar is an error, never "no expiry".
    pub fn expiry_from(&self, applied_at: DateTime<Utc>) -> EffectOutcome<Option<DateTime<Utc>>> {
        let Some(duration) = self.duration else {
            return Ok(None);
        };
        chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| applied_at.checked_add_signed(d))
            .map(Some)
            .ok_or_else(|| EffectError::DurationOutOfRange {
                effect_type: self.effect_type.clone(),
                duration,
            })
    }
}

// ---------------------------------------------------------------------------
// Modifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModificationKind {
    Set,
    Add,
    Multiply,
    Append,
    Toggle,
}

/// One property change made by a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectModification {
    pub target_id: String,
    pub property: String,
    pub original_value: Value,
    pub new_value: Value,
    pub modification_type: ModificationKind,
    pub applied_at: DateTime<Utc>,
}

impl EffectModification {
    pub fn new(
        target_id: impl Into<String>,
        property: impl Into<String>,
        original_value: impl Into<Value>,
        new_value: impl Into<Value>,
        modification_type: ModificationKind,
        applied_at: DateTime<Utc>,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            property: property.into(),
            original_value: original_value.into(),
            new_value: new_value.into(),
            modification_type,
            applied_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Applications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectStatus {
    Active,
    Completed,
    Cancelled,
}

impl EffectStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, EffectStatus::Active)
    }
}

/// Runtime record of one applied effect instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectApplication {
    pub id: String,
    pub effect_id: String,
    pub effect_type: String,
    pub handler_id: String,
    pub targets: Vec<String>,
    status: EffectStatus,
    pub applied_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub original_value: Value,
    pub current_value: Value,
    pub modifications: Vec<EffectModification>,
    pub source_event: Option<String>,
    pub revert_on_expiry: bool,
}

impl EffectApplication {
    /// Create an active application. `expires_at` is derived from the
    /// spec's duration when one is given.
    pub fn activate(
        id: impl Into<String>,
        spec: &EffectSpec,
        handler_id: impl Into<String>,
        targets: Vec<String>,
        applied_at: DateTime<Utc>,
    ) -> EffectOutcome<Self> {
        let expires_at = spec.expiry_from(applied_at)?;
        Ok(Self {
            id: id.into(),
            effect_id: spec.id.clone(),
            effect_type: spec.effect_type.clone(),
            handler_id: handler_id.into(),
            targets,
            status: EffectStatus::Active,
            applied_at,
            expires_at,
            original_value: Value::Null,
            current_value: Value::Null,
            modifications: Vec::new(),
            source_event: None,
            revert_on_expiry: spec.revert_on_expiry,
        })
    }

    pub fn status(&self) -> EffectStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == EffectStatus::Active
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }

    /// active -> completed. Returns false from any terminal state.
    pub fn complete(&mut self) -> bool {
        self.transition(EffectStatus::Completed)
    }

    /// active -> cancelled. Returns false from any terminal state.
    pub fn cancel(&mut self) -> bool {
        self.transition(EffectStatus::Cancelled)
    }

    fn transition(&mut self, to: EffectStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = to;
        true
    }
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// In order; stop at the first failure.
    Sequential,
    /// All at once; collect every result.
    Parallel,
    /// In order; stop at the first success.
    Conditional,
}

#[derive(Debug, Clone)]
pub struct EffectGroup {
    pub id: String,
    pub mode: ExecutionMode,
    pub effects: Vec<EffectSpec>,
    pub preconditions: Vec<Condition>,
}

impl EffectGroup {
    pub fn new(mode: ExecutionMode, effects: Vec<EffectSpec>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mode,
            effects,
            preconditions: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_precondition(mut self, condition: Condition) -> Self {
        self.preconditions.push(condition);
        self
    }
}
