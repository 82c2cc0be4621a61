//! Weighted task selection.
//!
//! After classification filtering, the session may offer more tasks than the client should
//! run. A [`TaskSelector`] picks at most `max_tasks` of them. How weights bias the pick is a
//! [`SelectionPolicy`], and the randomness source is injected so selection is reproducible
//! under test.
//!
//! Every policy returns all candidates (in some order) when they fit under the cap.

use rand::{Rng, RngCore, SeedableRng, rngs::StdRng, seq::SliceRandom};
use std::sync::Mutex;

use crate::config::TaskDefinition;

pub trait SelectionPolicy: Send + Sync {
    /// Choose at most `max_tasks` of `candidates`. Output order is not significant.
    fn choose(
        &self,
        candidates: Vec<TaskDefinition>,
        max_tasks: usize,
        rng: &mut dyn RngCore,
    ) -> Vec<TaskDefinition>;
}

/// Weighted sampling without replacement.
///
/// Each candidate draws `u` uniformly from `(0, 1]` and gets the key `u^(1/weight)`; the
/// candidates with the largest keys win. A candidate's chance of being picked first is
/// proportional to its weight. Zero, negative or non-finite weights get key 0 and are picked
/// only when nothing else is left.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedShuffle;

impl SelectionPolicy for WeightedShuffle {
    fn choose(
        &self,
        candidates: Vec<TaskDefinition>,
        max_tasks: usize,
        rng: &mut dyn RngCore,
    ) -> Vec<TaskDefinition> {
        let mut keyed: Vec<(f64, TaskDefinition)> = candidates
            .into_iter()
            .map(|task| (weighted_key(task.weight, &mut *rng), task))
            .collect();
        keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
        keyed
            .into_iter()
            .take(max_tasks)
            .map(|(_, task)| task)
            .collect()
    }
}

fn weighted_key(weight: f64, rng: &mut dyn RngCore) -> f64 {
    let u = 1.0 - rng.random::<f64>();
    if weight.is_finite() && weight > 0.0 {
        u.powf(1.0 / weight)
    } else {
        0.0
    }
}

/// Ignores weights: a uniform shuffle truncated to the cap.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformShuffle;

impl SelectionPolicy for UniformShuffle {
    fn choose(
        &self,
        mut candidates: Vec<TaskDefinition>,
        max_tasks: usize,
        rng: &mut dyn RngCore,
    ) -> Vec<TaskDefinition> {
        candidates.shuffle(rng);
        candidates.truncate(max_tasks);
        candidates
    }
}

pub struct TaskSelector {
    policy: Box<dyn SelectionPolicy>,
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl Default for TaskSelector {
    fn default() -> Self {
        Self::new(WeightedShuffle)
    }
}

impl TaskSelector {
    /// A selector drawing from an OS-seeded generator.
    pub fn new(policy: impl SelectionPolicy + 'static) -> Self {
        Self::with_rng(policy, StdRng::from_os_rng())
    }

    /// A reproducible selector.
    pub fn seeded(policy: impl SelectionPolicy + 'static, seed: u64) -> Self {
        Self::with_rng(policy, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(
        policy: impl SelectionPolicy + 'static,
        rng: impl RngCore + Send + 'static,
    ) -> Self {
        Self {
            policy: Box::new(policy),
            rng: Mutex::new(Box::new(rng)),
        }
    }

    pub fn choose(&self, candidates: Vec<TaskDefinition>, max_tasks: usize) -> Vec<TaskDefinition> {
        let offered = candidates.len();
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let mut selected = self.policy.choose(candidates, max_tasks, &mut **rng);
        selected.truncate(max_tasks);
        tracing::debug!(offered, max_tasks, selected = selected.len(), "Selected tasks");
        selected
    }
}
