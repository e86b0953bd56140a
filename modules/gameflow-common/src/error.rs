//! Typed errors for ingestion, dispatch, and effect lifecycle.

use std::time::Duration;

use thiserror::Error;

/// Malformed input rejected at ingestion. Never queued.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("event is missing an id")]
    MissingId,

    #[error("event {event_id} is missing a type")]
    MissingType { event_id: String },

    #[error("event {event_id} was already processed")]
    AlreadyProcessed { event_id: String },

    #[error("batch contains no valid events")]
    EmptyBatch,
}

/// Failure of a single processor attempt.
#[derive(Debug, Clone, Error)]
pub enum ProcessorError {
    /// The processor returned an error.
    #[error("processor {processor_id} failed: {message}")]
    Execution {
        processor_id: String,
        message: String,
    },

    /// The processor did not settle within its allotted time.
    #[error("processor {processor_id} timed out after {}ms", .after.as_millis())]
    Timeout {
        processor_id: String,
        after: Duration,
    },
}

impl ProcessorError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProcessorError::Timeout { .. })
    }
}

/// Failure to apply, revert, or update an effect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EffectError {
    #[error("no handler can apply effect type {effect_type}")]
    HandlerNotFound { effect_type: String },

    #[error("handler {handler_id} failed to apply {effect_type}: {message}")]
    Application {
        handler_id: String,
        effect_type: String,
        message: String,
    },

    #[error("duration {duration:?} of {effect_type} runs past the representable calendar")]
    DurationOutOfRange {
        effect_type: String,
        duration: Duration,
    },

    #[error("side-effect chain exceeded depth {max_depth}")]
    RecursionLimit { max_depth: usize },

    #[error("no active effect application {0}")]
    ApplicationNotFound(String),

    #[error("handler {handler_id} is no longer registered")]
    HandlerGone { handler_id: String },

    #[error("effect {effect_type} cannot be reverted: handler {handler_id} has no revert")]
    RevertUnsupported {
        handler_id: String,
        effect_type: String,
    },

    #[error("revert of application {application_id} failed: {message}")]
    Revert {
        application_id: String,
        message: String,
    },
}

/// Registration problems.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("identifier must not be empty")]
    EmptyId,

    #[error("processor {processor_id} accepts no event types")]
    NoEventTypes { processor_id: String },

    #[error("processor {processor_id} depends on itself")]
    SelfDependency { processor_id: String },

    #[error("unknown identifier {0}")]
    NotFound(String),
}

pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

pub type EffectOutcome<T> = std::result::Result<T, EffectError>;

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
