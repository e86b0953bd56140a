//! Processor and handler registries.
//!
//! Keys are unique. Registration order is kept and used only to break
//! ties (equal processor priority, or several handlers able to apply the
//! same effect).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use gameflow_common::{RegistryError, RegistryResult};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::warn;
use typed_builder::TypedBuilder;

use crate::traits::{EffectHandler, EventProcessor};

// ---------------------------------------------------------------------------
// Ordered map
// ---------------------------------------------------------------------------

/// Insertion-ordered map keyed by id.
#[derive(Debug)]
pub struct OrderedRegistry<T> {
    entries: Vec<(String, T)>,
}

impl<T> Default for OrderedRegistry<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> OrderedRegistry<T> {
    /// Insert or replace. A replaced entry keeps its original position.
    /// Returns true when an existing entry was replaced.
    pub fn insert(&mut self, id: impl Into<String>, value: T) -> bool {
        let id = id.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == id) {
            slot.1 = value;
            return true;
        }
        self.entries.push((id, value));
        false
    }

    pub fn remove(&mut self, id: &str) -> Option<T> {
        let idx = self.entries.iter().position(|(k, _)| k == id)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.iter().find(|(k, _)| k == id).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == id)
            .map(|(_, v)| v)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Processors
// ---------------------------------------------------------------------------

/// Event types a processor accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub enum EventTypes {
    /// Wildcard.
    #[default]
    Any,
    Only(Vec<String>),
}

impl EventTypes {
    pub fn only<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EventTypes::Only(types.into_iter().map(Into::into).collect())
    }

    pub fn accepts(&self, event_type: &str) -> bool {
        match self {
            EventTypes::Any => true,
            EventTypes::Only(types) => types.iter().any(|t| t == event_type || t == "*"),
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self, EventTypes::Only(types) if types.is_empty())
    }
}

/// Static description of a processor.
#[derive(Debug, Clone, TypedBuilder, Serialize)]
pub struct ProcessorSpec {
    #[builder(setter(into))]
    pub id: String,
    #[builder(default, setter(into))]
    pub name: String,
    #[builder(default)]
    pub event_types: EventTypes,
    /// Higher runs first.
    #[builder(default)]
    pub priority: i32,
    #[builder(default = true)]
    pub enabled: bool,
    /// Processors that must finish before this one for the same event.
    #[builder(default)]
    pub dependencies: Vec<String>,
    /// When false, at most one event at a time runs through this processor.
    #[builder(default = true)]
    pub allow_concurrent: bool,
    /// Overrides the engine's default timeout.
    #[builder(default, setter(strip_option))]
    pub timeout: Option<Duration>,
    /// Overrides the engine's default retry budget.
    #[builder(default, setter(strip_option))]
    pub retry_attempts: Option<u32>,
}

impl ProcessorSpec {
    pub fn validate(&self) -> RegistryResult<()> {
        if self.id.trim().is_empty() {
            return Err(RegistryError::EmptyId);
        }
        if self.event_types.is_empty() {
            return Err(RegistryError::NoEventTypes {
                processor_id: self.id.clone(),
            });
        }
        if self.dependencies.iter().any(|d| *d == self.id) {
            return Err(RegistryError::SelfDependency {
                processor_id: self.id.clone(),
            });
        }
        Ok(())
    }
}

/// A registered processor plus the gate that serializes it when it
/// does not allow concurrent use.
#[derive(Clone)]
pub struct ProcessorEntry {
    pub spec: ProcessorSpec,
    pub processor: Arc<dyn EventProcessor>,
    pub gate: Option<Arc<Semaphore>>,
}

impl ProcessorEntry {
    pub fn new(spec: ProcessorSpec, processor: Arc<dyn EventProcessor>) -> Self {
        let gate = (!spec.allow_concurrent).then(|| Arc::new(Semaphore::new(1)));
        Self {
            spec,
            processor,
            gate,
        }
    }
}

pub type ProcessorRegistry = OrderedRegistry<ProcessorEntry>;

pub type HandlerRegistry = OrderedRegistry<Arc<dyn EffectHandler>>;

impl ProcessorRegistry {
    /// Enabled processors accepting `event_type`, in execution order.
    pub fn resolve(&self, event_type: &str) -> Vec<ProcessorEntry> {
        let candidates: Vec<ProcessorEntry> = self
            .values()
            .filter(|e| e.spec.enabled && e.spec.event_types.accepts(event_type))
            .cloned()
            .collect();
        execution_order(candidates)
    }
}

/// Order processors by priority (desc) while honoring dependencies: a
/// processor never precedes one it depends on. Ties keep registration
/// order. Dependencies outside the candidate set are ignored. On a cycle
/// the remainder falls back to plain priority order.
pub fn execution_order(candidates: Vec<ProcessorEntry>) -> Vec<ProcessorEntry> {
    let ids: HashSet<&str> = candidates.iter().map(|c| c.spec.id.as_str()).collect();
    let mut pending: Vec<usize> = candidates
        .iter()
        .map(|c| {
            c.spec
                .dependencies
                .iter()
                .map(String::as_str)
                .filter(|d| ids.contains(d))
                .collect::<HashSet<&str>>()
                .len()
        })
        .collect();

    let mut placed = vec![false; candidates.len()];
    let mut order: Vec<usize> = Vec::with_capacity(candidates.len());

    while order.len() < candidates.len() {
        let next = (0..candidates.len())
            .filter(|&i| !placed[i] && pending[i] == 0)
            .max_by(|&a, &b| {
                candidates[a]
                    .spec
                    .priority
                    .cmp(&candidates[b].spec.priority)
                    .then(b.cmp(&a))
            });

        let Some(i) = next else {
            let stuck: Vec<&str> = (0..candidates.len())
                .filter(|&i| !placed[i])
                .map(|i| candidates[i].spec.id.as_str())
                .collect();
            warn!(processors = ?stuck, "Dependency cycle among processors, falling back to priority order");
            let mut rest: Vec<usize> = (0..candidates.len()).filter(|&i| !placed[i]).collect();
            rest.sort_by(|&a, &b| {
                candidates[b]
                    .spec
                    .priority
                    .cmp(&candidates[a].spec.priority)
                    .then(a.cmp(&b))
            });
            order.extend(rest);
            break;
        };

        placed[i] = true;
        order.push(i);
        let id = candidates[i].spec.id.as_str();
        for (j, c) in candidates.iter().enumerate() {
            if !placed[j] && c.spec.dependencies.iter().any(|d| d == id) {
                pending[j] -= 1;
            }
        }
    }

    let mut slots: Vec<Option<ProcessorEntry>> = candidates.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}
