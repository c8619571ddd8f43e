//! ReplayWindow: per-entity record of applied server sequences.
//!
//! An event is admitted only if its sequence is above the high-water mark
//! and not among the recently applied ones. The high-water mark alone gives
//! monotonic application; the window keeps duplicate detection exact for
//! sequences that are re-observed through a different path (a confirmation
//! and its realtime echo).

use std::collections::VecDeque;

use crate::error::StaleEvent;
use crate::types::Sequence;

#[derive(Debug, Clone)]
pub struct ReplayWindow {
    high_water: Sequence,
    recent: VecDeque<Sequence>,
    capacity: usize,
}

impl ReplayWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            high_water: 0,
            recent: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Window seeded with an already-held sequence (e.g. a restored record).
    pub fn starting_at(sequence: Sequence, capacity: usize) -> Self {
        let mut window = Self::new(capacity);
        window.advance(sequence);
        window
    }

    pub fn high_water(&self) -> Sequence {
        self.high_water
    }

    pub fn has_seen(&self, sequence: Sequence) -> bool {
        self.recent.contains(&sequence)
    }

    /// Admit `sequence` for `entity_id`, or report why it is stale.
    pub fn admit(&mut self, entity_id: &str, sequence: Sequence) -> Result<(), StaleEvent> {
        if sequence <= self.high_water || self.has_seen(sequence) {
            return Err(StaleEvent {
                entity_id: entity_id.to_string(),
                sequence,
                held: self.high_water,
            });
        }
        self.advance(sequence);
        Ok(())
    }

    /// Record `sequence` unconditionally. The high-water mark never moves
    /// backwards.
    pub fn advance(&mut self, sequence: Sequence) {
        if sequence == 0 {
            return;
        }
        self.high_water = self.high_water.max(sequence);
        if !self.has_seen(sequence) {
            if self.recent.len() == self.capacity {
                self.recent.pop_front();
            }
            self.recent.push_back(sequence);
        }
    }
}
