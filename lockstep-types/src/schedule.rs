//! Level-parallel schedules.
//!
//! A schedule is an ordered list of levels. Every firing in a level may run
//! in parallel with the others; levels run in order. For a graph
//! `A -> {B, C}`, `B -> {D, E}`, `C -> {F, G}` the parallel schedule is
//! `((A) (B C) (D E F G))`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// One actor firing within a level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Firing {
    /// Name of the model actor to fire.
    pub actor: String,
    /// How many iterations the actor performs in this firing.
    pub iterations: u32,
}

impl Firing {
    pub fn new(actor: impl Into<String>, iterations: u32) -> Self {
        Self {
            actor: actor.into(),
            iterations,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    levels: Vec<Vec<Firing>>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schedule from explicit levels.
    pub fn from_levels(levels: Vec<Vec<Firing>>) -> Self {
        Self { levels }
    }

    /// Sequential schedule: one firing per level.
    pub fn sequential(firings: Vec<Firing>) -> Self {
        Self {
            levels: firings.into_iter().map(|f| vec![f]).collect(),
        }
    }

    /// Append a level, returning `self` for chaining.
    pub fn with_level(mut self, level: Vec<Firing>) -> Self {
        self.levels.push(level);
        self
    }

    pub fn push_level(&mut self, level: Vec<Firing>) {
        self.levels.push(level);
    }

    pub fn levels(&self) -> &[Vec<Firing>] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&[Firing]> {
        self.levels.get(index).map(Vec::as_slice)
    }

    /// Number of levels.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Distinct actor names in first-appearance order.
    pub fn actors(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.levels
            .iter()
            .flatten()
            .map(|f| f.actor.as_str())
            .filter(|name| seen.insert(*name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actors_are_deduplicated_in_order() {
        let schedule = Schedule::new()
            .with_level(vec![Firing::new("A", 1)])
            .with_level(vec![Firing::new("B", 1), Firing::new("C", 2)])
            .with_level(vec![Firing::new("A", 1)]);
        assert_eq!(schedule.actors(), vec!["A", "B", "C"]);
        assert_eq!(schedule.len(), 3);
    }

    #[test]
    fn sequential_puts_one_firing_per_level() {
        let schedule = Schedule::sequential(vec![Firing::new("A", 1), Firing::new("B", 3)]);
        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule.level(1), Some(&[Firing::new("B", 3)][..]));
        assert_eq!(schedule.level(2), None);
    }
}
