//! Pending events and batches, drained by priority weight.

use std::cmp::Reverse;
use std::collections::VecDeque;

use gameflow_common::{EventBatch, GameEvent, PriorityWeights};

#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<GameEvent>,
    batches: VecDeque<EventBatch>,
}

impl EventQueue {
    pub fn push_event(&mut self, event: GameEvent) {
        self.events.push_back(event);
    }

    pub fn push_batch(&mut self, batch: EventBatch) {
        self.batches.push_back(batch);
    }

    /// Remove up to `limit` events, heaviest priority first, FIFO within
    /// equal weight.
    pub fn take_events(&mut self, limit: usize, weights: &PriorityWeights) -> Vec<GameEvent> {
        take_by_weight(&mut self.events, limit, |e| weights.weight(e.priority))
    }

    /// Remove up to `limit` batches, heaviest priority first, FIFO within
    /// equal weight.
    pub fn take_batches(&mut self, limit: usize, weights: &PriorityWeights) -> Vec<EventBatch> {
        take_by_weight(&mut self.batches, limit, |b| weights.weight(b.priority))
    }

    pub fn find_event(&self, id: &str) -> Option<&GameEvent> {
        self.events
            .iter()
            .chain(self.batches.iter().flat_map(|b| b.events.iter()))
            .find(|e| e.id == id)
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.batches.is_empty()
    }
}

fn take_by_weight<T>(
    items: &mut VecDeque<T>,
    limit: usize,
    weight: impl Fn(&T) -> u32,
) -> Vec<T> {
    let mut all: Vec<T> = items.drain(..).collect();
    // Stable: equal weights keep arrival order.
    all.sort_by_key(|item| Reverse(weight(item)));
    let rest = all.split_off(limit.min(all.len()));
    items.extend(rest);
    all
}
