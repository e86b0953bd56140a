//! In-process event dispatch and effect lifecycle engine.
//!
//! Hosts queue `GameEvent`s; each tick drains them by priority weight,
//! runs the applicable `EventProcessor`s in priority and dependency order
//! under a timeout and retry budget, and applies any requested effects
//! through registered `EffectHandler`s. A separate sweep expires or
//! updates durable effects.
//!
//! Every transition is announced on a broadcast channel (`Engine::subscribe`).

pub mod clock;
pub mod context;
pub mod dispatch;
pub mod effects;
pub mod engine;
pub mod notify;
pub mod queue;
pub mod registry;
pub mod stats;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::GameContext;
pub use dispatch::{BatchOutcome, DispatchedEvent, Dispatcher, ProcessingResult};
pub use effects::builtin::{
    AttributeSetHandler, MoneyHandler, PositionHandler, PropertyGrantHandler,
    StatusToggleHandler, ATTRIBUTE_SET, MONEY_CHANGE, MONEY_MULTIPLY, POSITION_CHANGE,
    PROPERTY_GRANT, STATUS_TOGGLE,
};
pub use effects::{EffectManager, EffectResult, GroupResult, SweepReport};
pub use engine::{Engine, ShutdownReport, TickReport};
pub use notify::Notifier;
pub use registry::{EventTypes, ProcessorSpec};
pub use stats::{EngineStats, RollingStats};
pub use traits::{EffectHandler, EventProcessor, HandlerOutcome, ProcessorOutput};
