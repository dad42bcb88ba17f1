//! ON_TRACK / STRUGGLING / EXCELLING state machine and the path transforms
//! applied in each state.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::engine::config::AdaptationConfig;
use crate::engine::decision::ResourceCatalog;
use crate::engine::graph::KnowledgeGraph;
use crate::engine::types::{
    AdaptationState, ConceptId, PathStep, RankedResource, Resource, ResourceRole, StepKind,
    StepSegment, StepWarning,
};

/// Resources at or above this difficulty are dropped when simplifying.
const EASY_CUTOFF: f64 = 0.6;
const MAX_SCAFFOLD_RESOURCES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub mastery_gained: f64,
    pub completed: bool,
}

/// Rolling window over the most recent completed steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceWindow {
    capacity: usize,
    entries: VecDeque<StepOutcome>,
}

impl PerformanceWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, outcome: StepOutcome) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(outcome);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn avg_mastery_gain(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        self.entries.iter().map(|e| e.mastery_gained).sum::<f64>() / self.entries.len() as f64
    }

    pub fn completion_rate(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        self.entries.iter().filter(|e| e.completed).count() as f64 / self.entries.len() as f64
    }
}

/// Inputs the transforms need besides the steps themselves.
pub struct AdaptContext<'a> {
    pub graph: &'a KnowledgeGraph,
    pub catalog: &'a ResourceCatalog,
    pub targets: &'a [ConceptId],
    pub struggling: &'a [ConceptId],
    pub threshold: f64,
    pub budget_minutes: f64,
    pub fallback_difficulty: f64,
    pub fallback_minutes: f64,
}

#[derive(Debug, Clone)]
pub struct PathAdapter {
    config: AdaptationConfig,
}

impl PathAdapter {
    pub fn new(config: AdaptationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AdaptationConfig {
        &self.config
    }

    pub fn evaluate(&self, window: &PerformanceWindow) -> AdaptationState {
        if window.is_empty() {
            return AdaptationState::OnTrack;
        }
        let gain = window.avg_mastery_gain();
        let completion = window.completion_rate();
        if gain < self.config.struggle_gain || completion < self.config.struggle_completion {
            AdaptationState::Struggling
        } else if gain > self.config.excel_gain && completion > self.config.excel_completion {
            AdaptationState::Excelling
        } else {
            AdaptationState::OnTrack
        }
    }

    pub fn apply(
        &self,
        state: AdaptationState,
        steps: Vec<PathStep>,
        ctx: &AdaptContext<'_>,
    ) -> Vec<PathStep> {
        match state {
            AdaptationState::OnTrack => steps,
            AdaptationState::Struggling => self.simplify(steps, ctx),
            AdaptationState::Excelling => self.accelerate(steps, ctx),
        }
    }

    /// Easier resources, scaffolding, a remediation step before every
    /// struggled concept, then large steps split into segments.
    pub fn simplify(&self, steps: Vec<PathStep>, ctx: &AdaptContext<'_>) -> Vec<PathStep> {
        let mut out: Vec<PathStep> = Vec::with_capacity(steps.len() + ctx.struggling.len());

        for mut step in steps {
            ease_resources(&mut step, ctx.catalog);

            if step.kind == StepKind::Core && ctx.struggling.contains(&step.concept_id) {
                let remediation = remediation_step(&step, ctx);
                let already = out.last().is_some_and(|prev| {
                    prev.kind == StepKind::Remediation && prev.concept_id == remediation.concept_id
                });
                if !already {
                    out.push(remediation);
                }
            }
            out.push(step);
        }

        let out = trim_to_budget(out, ctx);
        self.split_large_steps(out)
    }

    /// Skips near-mastered non-target steps, promotes harder resources that
    /// still fit the budget and appends a stretch resource where the catalog
    /// has one.
    pub fn accelerate(&self, steps: Vec<PathStep>, ctx: &AdaptContext<'_>) -> Vec<PathStep> {
        let near = ctx.threshold - self.config.near_mastery_margin;
        let is_skippable = |s: &PathStep| {
            s.kind == StepKind::Core
                && s.current_mastery >= near
                && !ctx.targets.contains(&s.concept_id)
        };

        let mut kept: Vec<PathStep> = if steps.iter().all(|s| is_skippable(s)) {
            steps
        } else {
            steps.into_iter().filter(|s| !is_skippable(s)).collect()
        };

        let mut total: f64 = kept.iter().map(|s| s.estimated_minutes).sum();
        for step in kept.iter_mut() {
            let others = total - step.estimated_minutes;
            harden_resources(step, ctx.catalog, ctx.budget_minutes - others);
            total = others + step.estimated_minutes;
        }
        trim_to_budget(kept, ctx)
    }

    pub fn split_large_steps(&self, steps: Vec<PathStep>) -> Vec<PathStep> {
        let limit = self.config.split_threshold_minutes;
        if limit <= 0.0 {
            return steps;
        }
        let mut out = Vec::with_capacity(steps.len());
        for step in steps {
            if step.estimated_minutes <= limit || step.segment.is_some() {
                out.push(step);
                continue;
            }
            let total = (step.estimated_minutes / limit).ceil() as usize;
            let minutes = step.estimated_minutes / total as f64;
            for index in 0..total {
                out.push(PathStep {
                    estimated_minutes: minutes,
                    segment: Some(StepSegment { index, total }),
                    ..step.clone()
                });
            }
        }
        out
    }
}

fn ease_resources(step: &mut PathStep, catalog: &ResourceCatalog) {
    step.resources
        .sort_by(|a, b| a.resource.difficulty.total_cmp(&b.resource.difficulty));
    if step
        .resources
        .iter()
        .any(|r| r.resource.difficulty < EASY_CUTOFF)
    {
        step.resources.retain(|r| r.resource.difficulty < EASY_CUTOFF);
    } else {
        step.resources.truncate(1);
    }

    let primary_difficulty = step
        .primary_resource()
        .map(|r| r.difficulty)
        .unwrap_or(0.0);
    let scaffold = catalog
        .candidates(&step.concept_id)
        .iter()
        .filter(|r| r.difficulty < primary_difficulty)
        .filter(|r| !step.resources.iter().any(|s| s.resource.id == r.id))
        .min_by(|a, b| a.difficulty.total_cmp(&b.difficulty))
        .cloned();
    if let Some(resource) = scaffold {
        step.resources.insert(0, as_role(resource, ResourceRole::Scaffold));
    }
    refresh_minutes(step);
}

/// The hardest resource that fits in `allowance` minutes leads the step;
/// when none fits, the ranked primary keeps its place.
fn harden_resources(step: &mut PathStep, catalog: &ResourceCatalog, allowance: f64) {
    let ranked_primary = step.primary_resource().map(|r| r.id.clone());
    step.resources
        .sort_by(|a, b| b.resource.difficulty.total_cmp(&a.resource.difficulty));
    let lead = step
        .resources
        .iter()
        .position(|r| r.resource.estimated_minutes <= allowance)
        .or_else(|| {
            let id = ranked_primary?;
            step.resources.iter().position(|r| r.resource.id == id)
        });
    if let Some(index) = lead {
        let primary = step.resources.remove(index);
        step.resources.insert(0, primary);
    }

    let primary_difficulty = step
        .primary_resource()
        .map(|r| r.difficulty)
        .unwrap_or(1.0);
    let stretch = catalog
        .candidates(&step.concept_id)
        .iter()
        .filter(|r| r.difficulty > primary_difficulty)
        .filter(|r| !step.resources.iter().any(|s| s.resource.id == r.id))
        .max_by(|a, b| a.difficulty.total_cmp(&b.difficulty))
        .cloned();
    if let Some(resource) = stretch {
        step.resources.push(as_role(resource, ResourceRole::Stretch));
    }
    refresh_minutes(step);
}

/// Reviews the weakest prerequisite of `step`, or the concept itself when it has none.
fn remediation_step(step: &PathStep, ctx: &AdaptContext<'_>) -> PathStep {
    let concept_id = ctx
        .graph
        .prerequisites(&step.concept_id)
        .into_iter()
        .fold(None::<(&str, f64)>, |weakest, p| {
            let m = ctx.graph.mastery(p).unwrap_or(0.0);
            match weakest {
                Some((_, w)) if w <= m => weakest,
                _ => Some((p, m)),
            }
        })
        .map(|(p, _)| p.to_string())
        .unwrap_or_else(|| step.concept_id.clone());

    let node = ctx.graph.get(&concept_id);
    let current = node.map(|n| n.mastery).unwrap_or(step.current_mastery);

    let mut easiest: Vec<&Resource> = ctx.catalog.candidates(&concept_id).iter().collect();
    easiest.sort_by(|a, b| a.difficulty.total_cmp(&b.difficulty));
    let mut warnings = Vec::new();
    let resources: Vec<RankedResource> = if easiest.is_empty() {
        warnings.push(StepWarning::SubstitutedResource);
        vec![as_role(
            Resource::fallback(&concept_id, ctx.fallback_difficulty, ctx.fallback_minutes),
            ResourceRole::Substitute,
        )]
    } else {
        easiest
            .into_iter()
            .take(MAX_SCAFFOLD_RESOURCES)
            .cloned()
            .map(|r| as_role(r, ResourceRole::Scaffold))
            .collect()
    };

    let mut remediation = PathStep {
        concept_name: node
            .map(|n| n.name.clone())
            .unwrap_or_else(|| concept_id.clone()),
        kind: StepKind::Remediation,
        current_mastery: current,
        target_mastery: ctx.threshold.max(current),
        difficulty: node.map(|n| n.difficulty).unwrap_or(step.difficulty),
        resources,
        estimated_minutes: 0.0,
        priority_score: step.priority_score,
        prerequisites_met: true,
        segment: None,
        warnings,
        concept_id,
    };
    refresh_minutes(&mut remediation);
    remediation
}

/// Drops steps from the end until the path fits: non-target concepts first,
/// then remediation, then struggled non-target concepts. Target steps are
/// never dropped, so the result can still exceed the budget.
fn trim_to_budget(mut steps: Vec<PathStep>, ctx: &AdaptContext<'_>) -> Vec<PathStep> {
    let total = |steps: &[PathStep]| steps.iter().map(|s| s.estimated_minutes).sum::<f64>();
    let is_target = |s: &PathStep| ctx.targets.contains(&s.concept_id);
    while total(&steps) > ctx.budget_minutes {
        let victim = steps
            .iter()
            .rposition(|s| {
                s.kind == StepKind::Core && !is_target(s) && !ctx.struggling.contains(&s.concept_id)
            })
            .or_else(|| steps.iter().rposition(|s| s.kind == StepKind::Remediation))
            .or_else(|| steps.iter().rposition(|s| s.kind == StepKind::Core && !is_target(s)));
        let Some(victim) = victim else {
            break;
        };
        steps.remove(victim);
    }
    steps
}

fn refresh_minutes(step: &mut PathStep) {
    if let Some(primary) = step.primary_resource() {
        step.estimated_minutes = primary.estimated_minutes;
    }
}

fn as_role(resource: Resource, role: ResourceRole) -> RankedResource {
    RankedResource {
        resource,
        bandit_score: 0.0,
        context_score: 0.0,
        score: 0.0,
        role,
    }
}
