//! Schedule dispatch: level-parallel and pipelined firing over the coordinator.
//!
//! In parallel mode each level becomes one round. In pipelined mode several
//! consecutive levels are active in the same round, each working on a
//! different director iteration: the pipeline fills level by level
//! (buffering), runs full while every level has work, then drains. Every
//! level executes exactly `n` times for a bounded count `n`.

use std::collections::BTreeSet;

use log::{debug, info};

use lockstep_types::{Command, CommandBatch, Firing, Schedule};

use crate::coordinator::{Coordinator, CoordinatorError, RoundSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Buffering(usize),
    Steady(u32),
    Done,
}

/// Generator of pipelined rounds for one schedule.
///
/// Yields the firings of every active level, in level order. Rounds that
/// would be empty are never yielded.
#[derive(Debug, Clone)]
pub struct Pipeline<'a> {
    schedule: &'a Schedule,
    iterations: Option<u32>,
    active: BTreeSet<usize>,
    phase: Phase,
}

impl<'a> Pipeline<'a> {
    /// `iterations` of `None` keeps the pipeline full forever.
    pub fn new(schedule: &'a Schedule, iterations: Option<u32>) -> Self {
        let phase = if schedule.is_empty() || iterations == Some(0) {
            Phase::Done
        } else {
            Phase::Buffering(0)
        };
        Self {
            schedule,
            iterations,
            active: BTreeSet::new(),
            phase,
        }
    }

    /// Rounds issued before the pipeline is full.
    pub fn buffering_rounds(&self) -> usize {
        self.schedule.len().saturating_sub(1)
    }

    /// Total rounds for a bounded pipeline.
    pub fn total_rounds(&self) -> Option<usize> {
        let n = self.iterations? as usize;
        if n == 0 || self.schedule.is_empty() {
            return Some(0);
        }
        Some(self.buffering_rounds() + n)
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    fn active_firings(&self) -> Vec<Firing> {
        self.active
            .iter()
            .filter_map(|&l| self.schedule.level(l))
            .flat_map(|level| level.iter().cloned())
            .collect()
    }

    fn step(&mut self) -> Option<Vec<Firing>> {
        let levels = self.schedule.len();
        loop {
            match self.phase {
                Phase::Done => return None,
                Phase::Buffering(l) => {
                    self.active.insert(l);
                    if let Some(n) = self.iterations {
                        let n = n as usize;
                        if l >= n {
                            self.active.remove(&(l - n));
                        }
                    }
                    if l + 1 < levels {
                        self.phase = Phase::Buffering(l + 1);
                        return Some(self.active_firings());
                    }
                    self.phase = Phase::Steady(0);
                }
                Phase::Steady(k) => {
                    match self.iterations {
                        Some(n) if k >= n => {
                            self.phase = Phase::Done;
                            return None;
                        }
                        Some(n) => {
                            let remaining = (n - k) as usize;
                            if remaining < levels {
                                self.active.remove(&(levels - remaining - 1));
                            }
                            self.phase = Phase::Steady(k + 1);
                        }
                        None => self.phase = Phase::Steady(k.saturating_add(1)),
                    }
                    return Some(self.active_firings());
                }
            }
        }
    }

    /// Next non-empty round, or `None` once the pipeline has drained.
    pub fn next_round(&mut self) -> Option<Vec<Firing>> {
        loop {
            let round = self.step()?;
            if !round.is_empty() {
                return Some(round);
            }
        }
    }
}

impl Iterator for Pipeline<'_> {
    type Item = Vec<Firing>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_round()
    }
}

impl Coordinator {
    fn batch_for(&self, firings: &[Firing]) -> Result<CommandBatch, CoordinatorError> {
        let mut batch = CommandBatch::new();
        for firing in firings {
            let key = self.resolve(&firing.actor)?;
            batch.insert(key, Command::Iterate(firing.iterations));
        }
        Ok(batch)
    }

    /// One round per level, in order. Returns a summary per non-empty level.
    pub fn parallel_fire(&mut self, schedule: &Schedule) -> Result<Vec<RoundSummary>, CoordinatorError> {
        let mut summaries = Vec::with_capacity(schedule.len());
        for (i, level) in schedule.levels().iter().enumerate() {
            let batch = self.batch_for(level)?;
            if batch.is_empty() {
                debug!(target: "coordinator", "level {} is empty, skipped", i);
                continue;
            }
            debug!(target: "coordinator", "firing level {} ({} actor(s))", i, batch.len());
            summaries.push(self.run_batch(batch)?);
        }
        Ok(summaries)
    }

    /// Run `iterations` director iterations of `schedule` as a pipeline.
    pub fn run_pipelined(
        &mut self,
        schedule: &Schedule,
        iterations: u32,
    ) -> Result<Vec<RoundSummary>, CoordinatorError> {
        let pipeline = Pipeline::new(schedule, Some(iterations));
        info!(
            target: "coordinator",
            "pipelining {} level(s) over {} iteration(s)",
            schedule.len(),
            iterations
        );
        let mut summaries = Vec::new();
        for round in pipeline {
            summaries.push(self.pipelined_step(&round)?);
        }
        Ok(summaries)
    }

    /// Issue one pipelined round. Useful with an unbounded `Pipeline`.
    pub fn pipelined_step(&mut self, firings: &[Firing]) -> Result<RoundSummary, CoordinatorError> {
        let batch = self.batch_for(firings)?;
        self.run_batch(batch)
    }
}
