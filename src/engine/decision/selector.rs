//! Contextual resource bandit.
//!
//! The raw bandit score comes from the configured strategy over the shared
//! counters in [`RewardStore`]; it is then blended with a context score
//! describing how well the resource suits the learner right now.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use super::sampling::sample_beta;
use super::store::RewardStore;
use crate::engine::config::{BanditConfig, SelectionStrategy};
use crate::engine::types::{LearningStyle, RankedResource, Resource, ResourceRole};
use crate::error::{EngineError, EngineResult};

/// Resource difficulty that maximizes the difficulty match is mastery plus this offset.
const PROXIMAL_OFFSET: f64 = 0.1;

const W_DIFFICULTY: f64 = 0.4;
const W_STYLE: f64 = 0.2;
const W_TIME: f64 = 0.1;
const W_ENGAGEMENT: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionContext {
    pub mastery: f64,
    pub style: LearningStyle,
    pub available_minutes: f64,
}

impl SelectionContext {
    pub fn new(mastery: f64, style: LearningStyle, available_minutes: f64) -> Self {
        Self {
            mastery,
            style,
            available_minutes,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SelectionRequest<'a> {
    pub concept_id: &'a str,
    pub candidates: &'a [Resource],
    pub context: SelectionContext,
}

#[derive(Debug)]
pub struct ResourceSelector {
    config: BanditConfig,
    store: Arc<RewardStore>,
    draws: AtomicU64,
}

impl ResourceSelector {
    pub fn new(config: BanditConfig, store: Arc<RewardStore>) -> Self {
        Self {
            config,
            store,
            draws: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &BanditConfig {
        &self.config
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.config.strategy
    }

    pub fn store(&self) -> &Arc<RewardStore> {
        &self.store
    }

    pub fn update_reward(&self, resource_id: &str, success: bool) {
        self.store.update_reward(resource_id, success);
    }

    /// Raw strategy scores, one per candidate.
    pub fn bandit_scores(&self, concept_id: &str, candidates: &[Resource]) -> Vec<f64> {
        match self.config.strategy {
            SelectionStrategy::ThompsonSampling => {
                let mut rng = self.rng_for(concept_id);
                candidates
                    .iter()
                    .map(|r| {
                        let posterior = self.store.posterior(&r.id);
                        sample_beta(&mut rng, posterior.alpha, posterior.beta)
                    })
                    .collect()
            }
            SelectionStrategy::UpperConfidenceBound { exploration } => {
                let pulls: Vec<u64> = candidates
                    .iter()
                    .map(|r| self.store.counts(&r.id).pulls())
                    .collect();
                let total = pulls.iter().sum::<u64>().max(1) as f64;
                candidates
                    .iter()
                    .zip(&pulls)
                    .map(|(r, &n)| {
                        if n == 0 {
                            // no pulled arm can score above this at the current total
                            1.0 + exploration * total.ln().max(1.0).sqrt()
                        } else {
                            let mean = self.store.posterior(&r.id).mean();
                            mean + exploration * (total.ln() / n as f64).sqrt()
                        }
                    })
                    .collect()
            }
        }
    }

    pub fn context_score(&self, resource: &Resource, context: &SelectionContext) -> f64 {
        let optimal = (context.mastery + PROXIMAL_OFFSET).min(1.0);
        let difficulty_match = (1.0 - (resource.difficulty - optimal).abs()).max(0.0);
        let style_match = context.style.affinity(resource.kind);
        let time_feasibility = if resource.estimated_minutes <= context.available_minutes {
            1.0
        } else {
            0.5
        };
        W_DIFFICULTY * difficulty_match
            + W_STYLE * style_match
            + W_TIME * time_feasibility
            + W_ENGAGEMENT * resource.engagement_score
    }

    /// Ranks candidates for one concept, best first, truncated to
    /// `max_resources_per_step`.
    pub fn rank(
        &self,
        concept_id: &str,
        candidates: &[Resource],
        context: &SelectionContext,
    ) -> EngineResult<Vec<RankedResource>> {
        if candidates.is_empty() {
            return Err(EngineError::ResourceUnavailable {
                concept_id: concept_id.to_string(),
            });
        }

        let bandit = self.bandit_scores(concept_id, candidates);
        let mut ranked: Vec<RankedResource> = candidates
            .iter()
            .zip(bandit)
            .map(|(resource, bandit_score)| {
                let context_score = self.context_score(resource, context);
                RankedResource {
                    resource: resource.clone(),
                    bandit_score,
                    context_score,
                    score: self.config.bandit_weight * bandit_score
                        + self.config.context_weight * context_score,
                    role: ResourceRole::Core,
                }
            })
            .collect();

        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(self.config.max_resources_per_step.max(1));
        Ok(ranked)
    }

    pub fn select(
        &self,
        concept_id: &str,
        candidates: &[Resource],
        context: &SelectionContext,
    ) -> EngineResult<RankedResource> {
        let mut ranked = self.rank(concept_id, candidates, context)?;
        Ok(ranked.swap_remove(0))
    }

    /// Ranks several concepts in parallel. Results keep the request order.
    pub fn rank_many(
        &self,
        requests: &[SelectionRequest<'_>],
    ) -> Vec<EngineResult<Vec<RankedResource>>> {
        requests
            .par_iter()
            .map(|req| self.rank(req.concept_id, req.candidates, &req.context))
            .collect()
    }

    /// Low-difficulty stand-in used when a concept has no candidates.
    pub fn fallback(&self, concept_id: &str) -> RankedResource {
        let resource = Resource::fallback(
            concept_id,
            self.config.fallback_difficulty,
            self.config.fallback_minutes,
        );
        RankedResource {
            resource,
            bandit_score: 0.0,
            context_score: 0.0,
            score: 0.0,
            role: ResourceRole::Substitute,
        }
    }

    fn rng_for(&self, concept_id: &str) -> ChaCha8Rng {
        let draw = self.draws.fetch_add(1, Ordering::Relaxed);
        match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(
                seed ^ fnv1a(concept_id) ^ draw.wrapping_mul(0x9E37_79B9_7F4A_7C15),
            ),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        }
    }
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in s.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
