//! Preconditions for effect groups.
//!
//! Each condition reads one enumerated field from a source (player, game,
//! time, or the caller's custom map) and compares it to a literal.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::state::{GameState, Player};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "=" | "==" => Ok(CompareOp::Eq),
            "!=" => Ok(CompareOp::Ne),
            ">" => Ok(CompareOp::Gt),
            "<" => Ok(CompareOp::Lt),
            ">=" => Ok(CompareOp::Ge),
            "<=" => Ok(CompareOp::Le),
            other => Err(format!("unknown comparison operator: {other}")),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerField {
    Id,
    Name,
    Money,
    Position,
    PropertyCount,
    Attribute(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameField {
    Round,
    Phase,
    PlayerCount,
    CurrentPlayer,
    Attribute(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeField {
    Hour,
    Minute,
    /// Days since Monday (0-6).
    Weekday,
    UnixSeconds,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ConditionSource {
    Player { field: PlayerField },
    Game { field: GameField },
    Time { field: TimeField },
    Custom { key: String },
}

/// What a condition is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct ConditionScope<'a> {
    pub game: &'a GameState,
    pub player: Option<&'a Player>,
    pub now: DateTime<Utc>,
    pub custom: &'a Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(flatten)]
    pub source: ConditionSource,
    pub operator: CompareOp,
    pub value: Value,
}

impl Condition {
    pub fn new(source: ConditionSource, operator: CompareOp, value: impl Into<Value>) -> Self {
        Self {
            source,
            operator,
            value: value.into(),
        }
    }

    pub fn player(field: PlayerField, operator: CompareOp, value: impl Into<Value>) -> Self {
        Self::new(ConditionSource::Player { field }, operator, value)
    }

    pub fn game(field: GameField, operator: CompareOp, value: impl Into<Value>) -> Self {
        Self::new(ConditionSource::Game { field }, operator, value)
    }

    pub fn time(field: TimeField, operator: CompareOp, value: impl Into<Value>) -> Self {
        Self::new(ConditionSource::Time { field }, operator, value)
    }

    pub fn custom(key: impl Into<String>, operator: CompareOp, value: impl Into<Value>) -> Self {
        Self::new(ConditionSource::Custom { key: key.into() }, operator, value)
    }

    pub fn evaluate(&self, scope: &ConditionScope<'_>) -> bool {
        match self.read(scope) {
            Some(actual) => compare(&actual, self.operator, &self.value),
            // A missing field only satisfies "not equal".
            None => self.operator == CompareOp::Ne,
        }
    }

    fn read(&self, scope: &ConditionScope<'_>) -> Option<Value> {
        match &self.source {
            ConditionSource::Player { field } => {
                let player = scope.player?;
                match field {
                    PlayerField::Id => Some(Value::from(player.id.clone())),
                    PlayerField::Name => Some(Value::from(player.name.clone())),
                    PlayerField::Money => Some(Value::from(player.money)),
                    PlayerField::Position => Some(Value::from(player.position)),
                    PlayerField::PropertyCount => Some(Value::from(player.properties.len())),
                    PlayerField::Attribute(key) => player.attributes.get(key).cloned(),
                }
            }
            ConditionSource::Game { field } => match field {
                GameField::Round => Some(Value::from(scope.game.round)),
                GameField::Phase => Some(Value::from(scope.game.phase.clone())),
                GameField::PlayerCount => Some(Value::from(scope.game.players.len())),
                GameField::CurrentPlayer => scope.game.current_player.clone().map(Value::from),
                GameField::Attribute(key) => scope.game.attributes.get(key).cloned(),
            },
            ConditionSource::Time { field } => Some(match field {
                TimeField::Hour => Value::from(scope.now.hour()),
                TimeField::Minute => Value::from(scope.now.minute()),
                TimeField::Weekday => Value::from(scope.now.weekday().num_days_from_monday()),
                TimeField::UnixSeconds => Value::from(scope.now.timestamp()),
            }),
            ConditionSource::Custom { key } => scope.custom.get(key).cloned(),
        }
    }
}

/// True when every condition holds. An empty list holds.
pub fn all_hold(conditions: &[Condition], scope: &ConditionScope<'_>) -> bool {
    conditions.iter().all(|c| c.evaluate(scope))
}

fn compare(actual: &Value, op: CompareOp, expected: &Value) -> bool {
    let ordering = match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };

    match (op, ordering) {
        (CompareOp::Eq, Some(o)) => o == Ordering::Equal,
        (CompareOp::Ne, Some(o)) => o != Ordering::Equal,
        (CompareOp::Eq, None) => actual == expected,
        (CompareOp::Ne, None) => actual != expected,
        (CompareOp::Gt, Some(o)) => o == Ordering::Greater,
        (CompareOp::Lt, Some(o)) => o == Ordering::Less,
        (CompareOp::Ge, Some(o)) => o != Ordering::Less,
        (CompareOp::Le, Some(o)) => o != Ordering::Greater,
        // Ordering operators on incomparable values never hold.
        (_, None) => false,
    }
}
