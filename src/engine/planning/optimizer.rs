//! Budgeted concept selection and ordering.
//!
//! Selection is a knapsack over candidate concepts. The knapsack ignores
//! dependencies, so the selected subset is re-ordered by prerequisite depth;
//! concepts at the same depth are ordered greedily by a refinement score that
//! rewards gain per minute, modality changes and small difficulty jumps.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::knapsack::{self, KnapsackItem};
use crate::engine::config::OptimizerConfig;
use crate::engine::graph::KnowledgeGraph;
use crate::engine::types::{
    ConceptNode, PathQuality, PathStep, RankedResource, ResourceKind, StepKind, StepWarning,
};
use crate::error::{EngineError, EngineResult};

/// Minutes at which one full unit of normalized gain is considered efficient.
const REFERENCE_MINUTES: f64 = 15.0;
/// Keeps zero-importance concepts eligible for spare budget.
const MIN_VALUE: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct PathCandidate {
    pub concept: ConceptNode,
    pub resources: Vec<RankedResource>,
    pub warnings: Vec<StepWarning>,
}

impl PathCandidate {
    pub fn minutes(&self) -> f64 {
        self.resources
            .first()
            .map(|r| r.resource.estimated_minutes)
            .unwrap_or(0.0)
    }

    pub fn value(&self) -> f64 {
        ((1.0 - self.concept.mastery) * self.concept.importance).max(MIN_VALUE)
    }

    fn primary_kind(&self) -> Option<ResourceKind> {
        self.resources.first().map(|r| r.resource.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathPlan {
    pub steps: Vec<PathStep>,
    pub total_minutes: f64,
    pub estimated_mastery_gain: f64,
    pub quality: PathQuality,
}

#[derive(Debug, Clone)]
pub struct PathOptimizer {
    config: OptimizerConfig,
}

impl PathOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn threshold(&self) -> f64 {
        self.config.mastery_threshold
    }

    /// `candidates` must already be in prerequisite order.
    pub fn optimize(
        &self,
        graph: &KnowledgeGraph,
        candidates: Vec<PathCandidate>,
        budget_minutes: f64,
    ) -> EngineResult<PathPlan> {
        if candidates.is_empty() {
            return Ok(self.summarize(Vec::new(), budget_minutes));
        }
        let threshold = self.threshold();

        // Highest-priority concept that could be studied right now.
        let ready = candidates
            .iter()
            .filter(|c| {
                graph
                    .prerequisites(&c.concept.id)
                    .iter()
                    .all(|p| graph.mastery(p).unwrap_or(0.0) >= threshold)
            })
            .fold(None::<&PathCandidate>, |best, c| match best {
                Some(b) if b.value() >= c.value() => Some(b),
                _ => Some(c),
            });
        if let Some(first) = ready {
            if first.minutes() > budget_minutes {
                return Err(EngineError::NoFeasiblePath {
                    budget_minutes,
                    required_minutes: first.minutes(),
                    concept_id: first.concept.id.clone(),
                });
            }
        }

        let items: Vec<KnapsackItem> = candidates
            .iter()
            .map(|c| KnapsackItem::new(c.minutes(), c.value()))
            .collect();
        let selected = knapsack::solve(&items, knapsack::budget_capacity(budget_minutes));

        if selected.is_empty() {
            let cheapest = candidates
                .iter()
                .min_by(|a, b| a.minutes().total_cmp(&b.minutes()));
            return Err(EngineError::NoFeasiblePath {
                budget_minutes,
                required_minutes: cheapest.map(|c| c.minutes()).unwrap_or(0.0),
                concept_id: cheapest.map(|c| c.concept.id.clone()).unwrap_or_default(),
            });
        }

        let levels = depth_levels(graph, &candidates);
        let ordered = self.order(&candidates, &selected, &levels);

        let mut scheduled: HashSet<&str> = HashSet::new();
        let mut steps = Vec::with_capacity(ordered.len());
        let mut prev: Option<&PathCandidate> = None;
        for idx in ordered {
            let candidate = &candidates[idx];
            let prerequisites_met = graph.prerequisites(&candidate.concept.id).iter().all(|p| {
                scheduled.contains(p) || graph.mastery(p).unwrap_or(0.0) >= threshold
            });
            let mut warnings = candidate.warnings.clone();
            if !prerequisites_met {
                warnings.push(StepWarning::PrerequisiteNotScheduled);
            }

            steps.push(PathStep {
                concept_id: candidate.concept.id.clone(),
                concept_name: candidate.concept.name.clone(),
                kind: StepKind::Core,
                current_mastery: candidate.concept.mastery,
                target_mastery: threshold.max(candidate.concept.mastery),
                difficulty: candidate.concept.difficulty,
                resources: candidate.resources.clone(),
                estimated_minutes: candidate.minutes(),
                priority_score: self.refinement_score(candidate, prev),
                prerequisites_met,
                segment: None,
                warnings,
            });
            scheduled.insert(candidate.concept.id.as_str());
            prev = Some(candidate);
        }

        Ok(self.summarize(steps, budget_minutes))
    }

    /// Depth first, then greedy refinement within each depth.
    fn order(
        &self,
        candidates: &[PathCandidate],
        selected: &[usize],
        levels: &[usize],
    ) -> Vec<usize> {
        let mut by_level: Vec<(usize, Vec<usize>)> = Vec::new();
        for &idx in selected {
            match by_level.iter_mut().find(|(lvl, _)| *lvl == levels[idx]) {
                Some((_, group)) => group.push(idx),
                None => by_level.push((levels[idx], vec![idx])),
            }
        }
        by_level.sort_by_key(|(lvl, _)| *lvl);

        let mut ordered = Vec::with_capacity(selected.len());
        let mut prev: Option<&PathCandidate> = None;
        for (_, mut group) in by_level {
            while !group.is_empty() {
                let mut best = 0;
                let mut best_score = f64::NEG_INFINITY;
                for (pos, &idx) in group.iter().enumerate() {
                    let score = self.refinement_score(&candidates[idx], prev);
                    if score > best_score {
                        best = pos;
                        best_score = score;
                    }
                }
                let idx = group.remove(best);
                prev = Some(&candidates[idx]);
                ordered.push(idx);
            }
        }
        ordered
    }

    pub fn refinement_score(&self, candidate: &PathCandidate, prev: Option<&PathCandidate>) -> f64 {
        let threshold = self.threshold().max(f64::EPSILON);
        let gain = (threshold - candidate.concept.mastery).max(0.0);
        let mastery_term = (gain / threshold).min(1.0);
        let minutes = candidate.minutes().max(1.0);
        let time_term = (mastery_term * REFERENCE_MINUTES / minutes).min(1.0);

        let (diversity_term, smoothness_term) = match prev {
            None => (1.0, 1.0),
            Some(p) => (
                if p.primary_kind() != candidate.primary_kind() {
                    1.0
                } else {
                    0.0
                },
                1.0 - (candidate.concept.difficulty - p.concept.difficulty).abs(),
            ),
        };

        self.config.w_mastery * mastery_term
            + self.config.w_time * time_term
            + self.config.w_diversity * diversity_term
            + self.config.w_smoothness * smoothness_term
    }

    /// Totals and quality for an arbitrary step list.
    pub fn summarize(&self, steps: Vec<PathStep>, budget_minutes: f64) -> PathPlan {
        let total_minutes: f64 = steps.iter().map(|s| s.estimated_minutes).sum();

        let mut gains: HashMap<&str, f64> = HashMap::new();
        for step in &steps {
            let gain = gains.entry(step.concept_id.as_str()).or_insert(0.0);
            *gain = gain.max(step.expected_gain());
        }
        let estimated_mastery_gain = gains.values().sum();
        let quality = self.quality(&steps, total_minutes, budget_minutes);

        PathPlan {
            steps,
            total_minutes,
            estimated_mastery_gain,
            quality,
        }
    }

    pub fn quality(&self, steps: &[PathStep], total_minutes: f64, budget_minutes: f64) -> PathQuality {
        if steps.is_empty() {
            return PathQuality::default();
        }
        let threshold = self.threshold().max(f64::EPSILON);
        let n = steps.len() as f64;

        let mastery_score = steps
            .iter()
            .map(|s| (s.expected_gain() / threshold).min(1.0))
            .sum::<f64>()
            / n;

        let time_efficiency = if budget_minutes.is_finite() && budget_minutes > 0.0 {
            (total_minutes / budget_minutes).min(1.0)
        } else {
            0.0
        };

        let kinds: HashSet<ResourceKind> = steps
            .iter()
            .filter_map(|s| s.primary_resource().map(|r| r.kind))
            .collect();
        let diversity = kinds.len() as f64 / steps.len().min(ResourceKind::COUNT) as f64;

        let difficulty_smoothness = if steps.len() < 2 {
            1.0
        } else {
            let jumps: f64 = steps
                .windows(2)
                .map(|w| (w[1].difficulty - w[0].difficulty).abs())
                .sum();
            1.0 - jumps / (steps.len() - 1) as f64
        };

        let overall = self.config.w_mastery * mastery_score
            + self.config.w_time * time_efficiency
            + self.config.w_diversity * diversity
            + self.config.w_smoothness * difficulty_smoothness;

        PathQuality {
            overall,
            mastery_score,
            time_efficiency,
            diversity,
            difficulty_smoothness,
        }
    }
}

/// Longest chain of candidate prerequisites above each candidate.
fn depth_levels(graph: &KnowledgeGraph, candidates: &[PathCandidate]) -> Vec<usize> {
    let position: HashMap<&str, usize> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (c.concept.id.as_str(), i))
        .collect();
    let mut levels = vec![0usize; candidates.len()];
    for (i, candidate) in candidates.iter().enumerate() {
        levels[i] = graph
            .prerequisites(&candidate.concept.id)
            .iter()
            .filter_map(|p| position.get(p).copied())
            .filter(|&j| j < i)
            .map(|j| levels[j] + 1)
            .max()
            .unwrap_or(0);
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{EdgeSignals, Resource, ResourceRole};

    fn ranked(concept: &str, kind: ResourceKind, minutes: f64) -> RankedResource {
        RankedResource {
            resource: Resource::new(format!("{concept}-r"), concept, kind, 0.3, minutes),
            bandit_score: 0.5,
            context_score: 0.5,
            score: 0.5,
            role: ResourceRole::Core,
        }
    }

    fn setup() -> (KnowledgeGraph, Vec<PathCandidate>) {
        let mut graph = KnowledgeGraph::default();
        for (id, d) in [("a", 0.2), ("b", 0.3), ("c", 0.4), ("goal", 0.6)] {
            graph.add_concept(ConceptNode::new(id, id, d)).unwrap();
        }
        graph.add_edge("a", "goal", EdgeSignals::new(0.9, 0.5, 0.5)).unwrap();
        graph.add_edge("b", "goal", EdgeSignals::new(0.9, 0.5, 0.5)).unwrap();
        graph.add_edge("c", "goal", EdgeSignals::new(0.9, 0.5, 0.5)).unwrap();

        let kinds = [
            ResourceKind::Video,
            ResourceKind::Video,
            ResourceKind::Quiz,
            ResourceKind::Article,
        ];
        let seq = graph.get_optimal_learning_sequence(&["goal"], 0.7).unwrap();
        let candidates = seq
            .iter()
            .zip(kinds)
            .map(|(id, kind)| PathCandidate {
                concept: graph.get(id).unwrap().clone(),
                resources: vec![ranked(id, kind, 20.0)],
                warnings: Vec::new(),
            })
            .collect();
        (graph, candidates)
    }

    #[test]
    fn respects_budget_and_prerequisite_depth() {
        let (graph, candidates) = setup();
        let optimizer = PathOptimizer::new(OptimizerConfig::default());
        let plan = optimizer.optimize(&graph, candidates, 80.0).unwrap();
        assert_eq!(plan.steps.len(), 4);
        assert_eq!(plan.steps.last().unwrap().concept_id, "goal");
        assert!(plan.total_minutes <= 80.0);
        assert!(plan.steps.iter().all(|s| s.prerequisites_met));
    }

    #[test]
    fn prefers_modality_change_within_a_level() {
        let (graph, candidates) = setup();
        let optimizer = PathOptimizer::new(OptimizerConfig::default());
        let plan = optimizer.optimize(&graph, candidates, 80.0).unwrap();
        let kinds: Vec<ResourceKind> = plan
            .steps
            .iter()
            .filter_map(|s| s.primary_resource().map(|r| r.kind))
            .collect();
        assert_ne!(kinds[0], kinds[1]);
    }

    #[test]
    fn partial_selection_stays_within_budget() {
        let (graph, candidates) = setup();
        let optimizer = PathOptimizer::new(OptimizerConfig::default());
        let plan = optimizer.optimize(&graph, candidates, 45.0).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert!(plan.total_minutes <= 45.0);
    }

    #[test]
    fn budget_below_first_ready_concept_is_infeasible() {
        let (graph, candidates) = setup();
        let optimizer = PathOptimizer::new(OptimizerConfig::default());
        let err = optimizer.optimize(&graph, candidates, 10.0).unwrap_err();
        match err {
            EngineError::NoFeasiblePath {
                required_minutes, ..
            } => assert_eq!(required_minutes, 20.0),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn quality_is_bounded() {
        let (graph, candidates) = setup();
        let optimizer = PathOptimizer::new(OptimizerConfig::default());
        let plan = optimizer.optimize(&graph, candidates, 100.0).unwrap();
        let q = plan.quality;
        for v in [q.overall, q.mastery_score, q.time_efficiency, q.diversity, q.difficulty_smoothness] {
            assert!((0.0..=1.0).contains(&v), "{q:?}");
        }
        assert!((q.time_efficiency - 0.8).abs() < 1e-12);
        assert!((plan.estimated_mastery_gain - 2.8).abs() < 1e-9);
    }
}
