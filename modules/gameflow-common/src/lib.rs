//! Shared data model for the gameflow engine.
//!
//! Events, effect specifications and applications, preconditions, host
//! game state, configuration, errors, and outbound notifications. No
//! scheduling logic lives here.

pub mod condition;
pub mod config;
pub mod effect;
pub mod error;
pub mod event;
pub mod notification;
pub mod state;

pub use condition::{
    all_hold, CompareOp, Condition, ConditionScope, ConditionSource, GameField, PlayerField,
    TimeField,
};
pub use config::{load_config, parse_config, EngineConfig, PriorityWeights};
pub use effect::{
    ComputeFn, EffectApplication, EffectGroup, EffectModification, EffectSpec, EffectStatus,
    EffectValue, ExecutionMode, ModificationKind, TargetSelector,
};
pub use error::{
    EffectError, EffectOutcome, ProcessorError, RegistryError, RegistryResult, ValidationError,
    ValidationResult,
};
pub use event::{EventBatch, GameEvent, Priority};
pub use notification::Notification;
pub use state::{GameState, Player, SharedState};
