pub mod builtin;
pub mod manager;
pub mod targets;

pub use builtin::default_handlers;
pub use manager::{EffectManager, EffectResult, GroupResult, SweepReport};
pub use targets::resolve_targets;
