//! Shared bandit counters.
//!
//! Every learner session reads and updates the same per-resource counters. Each
//! resource gets its own mutex so concurrent updates on one resource serialize
//! without blocking updates on others; the outer map lock is only taken for
//! writing when a resource is seen for the first time.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::engine::mastery::BetaPosterior;
use crate::engine::types::ResourceId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardCounts {
    pub successes: u64,
    pub failures: u64,
}

impl RewardCounts {
    pub fn pulls(&self) -> u64 {
        self.successes + self.failures
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmStats {
    pub successes: u64,
    pub failures: u64,
    pub alpha: f64,
    pub beta: f64,
    pub mean: f64,
    pub credible_interval: (f64, f64),
}

#[derive(Debug)]
pub struct RewardStore {
    prior_alpha: f64,
    prior_beta: f64,
    arms: RwLock<HashMap<ResourceId, Arc<Mutex<RewardCounts>>>>,
}

impl Default for RewardStore {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

impl RewardStore {
    pub fn new(prior_alpha: f64, prior_beta: f64) -> Self {
        Self {
            prior_alpha,
            prior_beta,
            arms: RwLock::new(HashMap::new()),
        }
    }

    fn arm(&self, resource_id: &str) -> Arc<Mutex<RewardCounts>> {
        if let Some(arm) = self.arms.read().get(resource_id) {
            return Arc::clone(arm);
        }
        let mut guard = self.arms.write();
        Arc::clone(guard.entry(resource_id.to_string()).or_default())
    }

    /// Atomic read-modify-write of one resource's counters. Returns the counts after the update.
    pub fn update_reward(&self, resource_id: &str, success: bool) -> RewardCounts {
        let arm = self.arm(resource_id);
        let mut counts = arm.lock();
        if success {
            counts.successes += 1;
        } else {
            counts.failures += 1;
        }
        *counts
    }

    /// Adds historical counts, e.g. lifetime records imported from a catalog.
    pub fn seed(&self, resource_id: &str, successes: u64, failures: u64) {
        let arm = self.arm(resource_id);
        let mut counts = arm.lock();
        counts.successes += successes;
        counts.failures += failures;
    }

    pub fn counts(&self, resource_id: &str) -> RewardCounts {
        self.arms
            .read()
            .get(resource_id)
            .map(|arm| *arm.lock())
            .unwrap_or_default()
    }

    pub fn posterior(&self, resource_id: &str) -> BetaPosterior {
        let counts = self.counts(resource_id);
        BetaPosterior::new(
            self.prior_alpha + counts.successes as f64,
            self.prior_beta + counts.failures as f64,
        )
    }

    pub fn stats(&self, resource_id: &str) -> ArmStats {
        let counts = self.counts(resource_id);
        let posterior = self.posterior(resource_id);
        ArmStats {
            successes: counts.successes,
            failures: counts.failures,
            alpha: posterior.alpha,
            beta: posterior.beta,
            mean: posterior.mean(),
            credible_interval: posterior.credible_interval_95(),
        }
    }

    pub fn len(&self) -> usize {
        self.arms.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> HashMap<ResourceId, RewardCounts> {
        self.arms
            .read()
            .iter()
            .map(|(id, arm)| (id.clone(), *arm.lock()))
            .collect()
    }

    /// Replaces the counters of every resource in `snapshot`; others are untouched.
    pub fn restore(&self, snapshot: HashMap<ResourceId, RewardCounts>) {
        for (id, counts) in snapshot {
            let arm = self.arm(&id);
            *arm.lock() = counts;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn update_reward_increments_one_side() {
        let store = RewardStore::default();
        store.update_reward("r1", true);
        store.update_reward("r1", false);
        let counts = store.update_reward("r1", true);
        assert_eq!(counts, RewardCounts { successes: 2, failures: 1 });
        assert!((store.posterior("r1").mean() - 3.0 / 5.0).abs() < 1e-12);
    }

    #[test]
    fn unknown_resource_reads_as_prior() {
        let store = RewardStore::default();
        let stats = store.stats("missing");
        assert_eq!(stats.successes, 0);
        assert!((stats.mean - 0.5).abs() < 1e-12);
        assert!(store.is_empty());
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let store = Arc::new(RewardStore::default());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..500 {
                        store.update_reward("shared", (i + t) % 2 == 0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.counts("shared").pulls(), 4000);
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let store = RewardStore::default();
        store.seed("a", 9, 1);
        store.seed("b", 2, 8);
        let snap = store.snapshot();

        let other = RewardStore::default();
        other.restore(snap);
        assert_eq!(other.counts("a"), RewardCounts { successes: 9, failures: 1 });
        assert_eq!(other.counts("b").pulls(), 10);
    }
}
