//! Notifications emitted by the engine for rendering, audio, UI, and
//! multiplayer collaborators.

use serde::{Deserialize, Serialize};

use crate::event::Priority;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    ProcessorRegistered {
        processor_id: String,
    },
    ProcessorUnregistered {
        processor_id: String,
    },
    HandlerRegistered {
        handler_id: String,
    },
    HandlerUnregistered {
        handler_id: String,
    },
    EventQueued {
        event_id: String,
        event_type: String,
        priority: Priority,
    },
    EventRejected {
        event_id: Option<String>,
        reason: String,
    },
    BatchQueued {
        batch_id: String,
        size: usize,
        rejected: usize,
        priority: Priority,
    },
    EventProcessed {
        event_id: String,
        event_type: String,
        succeeded: usize,
        failed: usize,
    },
    BatchProcessed {
        batch_id: String,
        events: usize,
        groups: usize,
    },
    ProcessorError {
        processor_id: String,
        event_id: String,
        attempts: u32,
        error: String,
    },
    EffectApplied {
        application_id: Option<String>,
        effect_type: String,
        targets: Vec<String>,
        source_event: Option<String>,
    },
    EffectFailed {
        effect_type: String,
        error: String,
    },
    EffectReverted {
        application_id: String,
        effect_type: String,
    },
    EffectExpired {
        application_id: String,
        effect_type: String,
    },
    EffectGroupApplied {
        group_id: String,
        results: usize,
        succeeded: usize,
    },
    EffectGroupSkipped {
        group_id: String,
    },
}

impl Notification {
    /// The serialized `type` tag, handy for log fields and filtering.
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::ProcessorRegistered { .. } => "processor_registered",
            Notification::ProcessorUnregistered { .. } => "processor_unregistered",
            Notification::HandlerRegistered { .. } => "handler_registered",
            Notification::HandlerUnregistered { .. } => "handler_unregistered",
            Notification::EventQueued { .. } => "event_queued",
            Notification::EventRejected { .. } => "event_rejected",
            Notification::BatchQueued { .. } => "batch_queued",
            Notification::EventProcessed { .. } => "event_processed",
            Notification::BatchProcessed { .. } => "batch_processed",
            Notification::ProcessorError { .. } => "processor_error",
            Notification::EffectApplied { .. } => "effect_applied",
            Notification::EffectFailed { .. } => "effect_failed",
            Notification::EffectReverted { .. } => "effect_reverted",
            Notification::EffectExpired { .. } => "effect_expired",
            Notification::EffectGroupApplied { .. } => "effect_group_applied",
            Notification::EffectGroupSkipped { .. } => "effect_group_skipped",
        }
    }
}
