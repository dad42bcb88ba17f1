//! Recommend/adapt entry points.
//!
//! Per-user state (graph copy, mastery traces, performance window) lives in a
//! session behind its own mutex, so sessions never contend with each other.
//! The bandit counters are the only state shared across users and are owned
//! by the [`RewardStore`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::engine::config::EngineConfig;
use crate::engine::decision::{
    ResourceCatalog, ResourceSelector, RewardStore, SelectionContext, SelectionRequest,
};
use crate::engine::graph::KnowledgeGraph;
use crate::engine::mastery::{IngestReport, KnowledgeTracer, MasteryEstimate};
use crate::engine::metrics::{self, AlgorithmId, AlgorithmStatus};
use crate::engine::persistence::{CatalogDocument, UserSnapshot};
use crate::engine::planning::{
    AdaptContext, PathAdapter, PathCandidate, PathOptimizer, PathPlan, PerformanceWindow,
    StepOutcome,
};
use crate::engine::telemetry::{TelemetryEvent, TelemetrySink, TracingTelemetry};
use crate::engine::types::{
    AdaptationState, Attempt, ConceptId, LearningPath, LearningStyle, PathStatus, StepWarning,
};
use crate::error::{ConfigurationError, DataError, EngineError, EngineResult};
use crate::track_algorithm;

struct UserSession {
    graph: KnowledgeGraph,
    tracer: KnowledgeTracer,
    window: PerformanceWindow,
    state: AdaptationState,
    struggling: Vec<ConceptId>,
    style: LearningStyle,
    active: Option<LearningPath>,
}

pub struct LearningPathEngine {
    config: EngineConfig,
    template: KnowledgeGraph,
    catalog: ResourceCatalog,
    selector: ResourceSelector,
    optimizer: PathOptimizer,
    adapter: PathAdapter,
    sessions: RwLock<HashMap<String, Arc<Mutex<UserSession>>>>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl LearningPathEngine {
    pub fn new(
        config: EngineConfig,
        graph: KnowledgeGraph,
        catalog: ResourceCatalog,
    ) -> EngineResult<Self> {
        let store = Arc::new(RewardStore::new(
            config.bandit.prior_alpha,
            config.bandit.prior_beta,
        ));
        Self::with_store(config, graph, catalog, store)
    }

    /// Builds an engine that shares bandit counters with other engines.
    pub fn with_store(
        config: EngineConfig,
        graph: KnowledgeGraph,
        catalog: ResourceCatalog,
        store: Arc<RewardStore>,
    ) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            selector: ResourceSelector::new(config.bandit.clone(), store),
            optimizer: PathOptimizer::new(config.optimizer.clone()),
            adapter: PathAdapter::new(config.adaptation.clone()),
            template: graph,
            catalog,
            sessions: RwLock::new(HashMap::new()),
            telemetry: Arc::new(TracingTelemetry),
            config,
        })
    }

    pub fn from_catalog(config: EngineConfig, doc: &CatalogDocument) -> EngineResult<Self> {
        let (graph, catalog) = doc.build()?;
        let engine = Self::new(config, graph, catalog)?;
        engine.selector.store().restore(doc.rewards.clone());
        Ok(engine)
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = sink;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> &KnowledgeGraph {
        &self.template
    }

    pub fn catalog(&self) -> &ResourceCatalog {
        &self.catalog
    }

    pub fn reward_store(&self) -> &Arc<RewardStore> {
        self.selector.store()
    }

    /// Ingests `attempts`, then plans a path to `target_concepts` within `max_minutes`.
    pub fn generate_recommendation<S: AsRef<str>>(
        &self,
        user_id: &str,
        attempts: &[Attempt],
        target_concepts: &[S],
        max_minutes: f64,
    ) -> EngineResult<LearningPath> {
        let start = Instant::now();
        if max_minutes.is_nan() || max_minutes < 0.0 {
            return Err(ConfigurationError::InvalidValue {
                field: "max_minutes",
                value: max_minutes,
            }
            .into());
        }
        let targets = self.resolve_targets(target_concepts)?;

        let session = self.session(user_id);
        let mut guard = session.lock();
        let s = &mut *guard;

        let report = track_algorithm!(
            AlgorithmId::KnowledgeTracing,
            s.tracer.ingest(&s.graph, attempts)
        );
        self.sync_mastery(s, user_id, &report);
        s.style = s.tracer.preferred_style(|id| self.catalog.kind_of(id));

        let path = self.plan(s, user_id, targets, max_minutes)?;
        s.active = Some(path.clone());
        drop(guard);

        let latency_ms = self.check_latency(start, user_id, "generate_recommendation");
        self.telemetry.emit(TelemetryEvent::PathGenerated {
            user_id: user_id.to_string(),
            path_id: path.id.to_string(),
            steps: path.steps.len(),
            total_minutes: path.total_minutes,
            status: path.status,
            degraded: path.degraded,
            latency_ms,
            timestamp: Utc::now().timestamp_millis(),
        });
        Ok(path)
    }

    /// Records the outcome of step `step_completed` of the active path and
    /// returns a regenerated, adapted path.
    pub fn adapt_path_realtime(
        &self,
        user_id: &str,
        step_completed: usize,
        mastery_gained: f64,
        completed_successfully: bool,
    ) -> EngineResult<LearningPath> {
        let start = Instant::now();
        if !mastery_gained.is_finite() {
            return Err(DataError::InvalidField {
                field: "mastery_gained",
                value: mastery_gained,
            }
            .into());
        }
        let no_active = || EngineError::NoActivePath {
            user_id: user_id.to_string(),
        };

        let session = self.existing_session(user_id).ok_or_else(no_active)?;
        let mut guard = session.lock();
        let s = &mut *guard;
        let active = s.active.clone().ok_or_else(no_active)?;
        let step = active
            .steps
            .get(step_completed)
            .cloned()
            .ok_or(DataError::StepOutOfRange {
                index: step_completed,
                len: active.steps.len(),
            })?;

        s.window.push(StepOutcome {
            mastery_gained,
            completed: completed_successfully,
        });

        if let Some(resource) = step.primary_resource().filter(|r| !r.is_fallback()) {
            self.record_resource_feedback(&resource.id, completed_successfully);
        }

        let now = Utc::now().timestamp_millis();
        let current = s.graph.mastery(&step.concept_id).unwrap_or(step.current_mastery);
        let observed = (current + mastery_gained).clamp(0.0, 1.0);
        let estimate = track_algorithm!(
            AlgorithmId::KnowledgeTracing,
            s.tracer
                .apply_feedback(&step.concept_id, step.difficulty, observed, now)
        )?;
        s.graph.update_mastery(&step.concept_id, observed)?;
        self.telemetry.emit(TelemetryEvent::MasteryUpdated {
            user_id: user_id.to_string(),
            concept_id: step.concept_id.clone(),
            mastery: observed,
            attempts: estimate.attempts,
            timestamp: now,
        });

        let previous = s.state;
        let next = track_algorithm!(AlgorithmId::Adaptation, self.adapter.evaluate(&s.window));
        match next {
            AdaptationState::Struggling => {
                let weak = !completed_successfully
                    || mastery_gained < self.config.adaptation.struggle_gain;
                if weak && !s.struggling.contains(&step.concept_id) {
                    s.struggling.push(step.concept_id.clone());
                }
            }
            _ => s.struggling.clear(),
        }
        s.state = next;
        if next != previous {
            tracing::info!(
                user_id = %user_id,
                from = previous.as_str(),
                to = next.as_str(),
                avg_gain = s.window.avg_mastery_gain(),
                completion_rate = s.window.completion_rate(),
                "adaptation state changed"
            );
        }

        let path = self.plan(
            s,
            user_id,
            active.target_concepts.clone(),
            active.budget_minutes,
        )?;
        s.active = Some(path.clone());
        drop(guard);

        let latency_ms = self.check_latency(start, user_id, "adapt_path_realtime");
        self.telemetry.emit(TelemetryEvent::PathAdapted {
            user_id: user_id.to_string(),
            path_id: path.id.to_string(),
            from: previous,
            to: next,
            steps: path.steps.len(),
            latency_ms,
            timestamp: now,
        });
        Ok(path)
    }

    /// Global reward update, independent of any learner session.
    pub fn record_resource_feedback(&self, resource_id: &str, success: bool) {
        self.selector.update_reward(resource_id, success);
        self.telemetry.emit(TelemetryEvent::RewardRecorded {
            resource_id: resource_id.to_string(),
            success,
            timestamp: Utc::now().timestamp_millis(),
        });
    }

    pub fn active_path(&self, user_id: &str) -> Option<LearningPath> {
        self.existing_session(user_id)?.lock().active.clone()
    }

    pub fn adaptation_state(&self, user_id: &str) -> Option<AdaptationState> {
        self.existing_session(user_id).map(|s| s.lock().state)
    }

    pub fn concept_mastery(&self, user_id: &str, concept_id: &str) -> Option<f64> {
        self.existing_session(user_id)?
            .lock()
            .graph
            .mastery(concept_id)
    }

    pub fn mastery_snapshot(&self, user_id: &str) -> Vec<MasteryEstimate> {
        self.existing_session(user_id)
            .map(|s| s.lock().tracer.estimates())
            .unwrap_or_default()
    }

    /// Forgets a learner's history for one concept and restores its initial mastery.
    pub fn reset_mastery(&self, user_id: &str, concept_id: &str) -> EngineResult<()> {
        let initial = self
            .template
            .get(concept_id)
            .map(|n| (n.mastery, n.difficulty))
            .ok_or_else(|| ConfigurationError::UnknownConcept(concept_id.to_string()))?;
        let Some(session) = self.existing_session(user_id) else {
            return Ok(());
        };
        let mut s = session.lock();
        s.tracer.reset(concept_id);
        if initial.0 > 0.0 {
            s.tracer.seed_prior(concept_id, initial.1, initial.0);
        }
        s.graph.update_mastery(concept_id, initial.0)?;
        s.struggling.retain(|c| c != concept_id);
        tracing::info!(user_id = %user_id, concept_id = %concept_id, "mastery reset");
        Ok(())
    }

    pub fn export_user(&self, user_id: &str) -> Option<UserSnapshot> {
        let session = self.existing_session(user_id)?;
        let s = session.lock();
        Some(UserSnapshot {
            user_id: user_id.to_string(),
            estimates: s.tracer.estimates(),
            ability: s.tracer.ability(),
            adaptation: s.state,
            exported_at: Utc::now(),
        })
    }

    pub fn end_session(&self, user_id: &str) -> bool {
        self.sessions.write().remove(user_id).is_some()
    }

    pub fn metrics(&self) -> Vec<AlgorithmStatus> {
        metrics::registry().snapshot()
    }

    fn resolve_targets<S: AsRef<str>>(&self, targets: &[S]) -> EngineResult<Vec<ConceptId>> {
        let mut resolved: Vec<ConceptId> = Vec::with_capacity(targets.len());
        for target in targets {
            let id = target.as_ref();
            if !self.template.contains(id) {
                return Err(EngineError::UnknownTarget(id.to_string()));
            }
            if !resolved.iter().any(|t| t == id) {
                resolved.push(id.to_string());
            }
        }
        Ok(resolved)
    }

    fn session(&self, user_id: &str) -> Arc<Mutex<UserSession>> {
        if let Some(session) = self.existing_session(user_id) {
            return session;
        }
        let mut sessions = self.sessions.write();
        let session = sessions
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(self.new_session())));
        Arc::clone(session)
    }

    fn existing_session(&self, user_id: &str) -> Option<Arc<Mutex<UserSession>>> {
        self.sessions.read().get(user_id).map(Arc::clone)
    }

    fn new_session(&self) -> UserSession {
        let mut tracer = KnowledgeTracer::new(self.config.mastery.clone());
        for node in self.template.concepts().filter(|n| n.mastery > 0.0) {
            tracer.seed_prior(&node.id, node.difficulty, node.mastery);
        }
        UserSession {
            graph: self.template.clone(),
            tracer,
            window: PerformanceWindow::new(self.config.adaptation.window_size),
            state: AdaptationState::OnTrack,
            struggling: Vec::new(),
            style: LearningStyle::default(),
            active: None,
        }
    }

    fn sync_mastery(&self, s: &mut UserSession, user_id: &str, report: &IngestReport) {
        let now = Utc::now().timestamp_millis();
        for rejected in &report.rejected {
            self.telemetry.emit(TelemetryEvent::AttemptRejected {
                user_id: user_id.to_string(),
                concept_id: rejected.attempt.concept_id.clone(),
                reason: rejected.error.to_string(),
                timestamp: now,
            });
        }
        for concept_id in &report.updated {
            let Some(estimate) = s.tracer.estimate(concept_id) else {
                continue;
            };
            if let Err(err) = s.graph.update_mastery(concept_id, estimate.mastery) {
                tracing::warn!(user_id = %user_id, error = %err, "mastery sync failed");
                continue;
            }
            self.telemetry.emit(TelemetryEvent::MasteryUpdated {
                user_id: user_id.to_string(),
                concept_id: concept_id.clone(),
                mastery: estimate.mastery,
                attempts: estimate.attempts,
                timestamp: estimate.last_updated,
            });
        }
    }

    fn plan(
        &self,
        s: &mut UserSession,
        user_id: &str,
        targets: Vec<ConceptId>,
        budget_minutes: f64,
    ) -> EngineResult<LearningPath> {
        let threshold = self.optimizer.threshold();
        let complete = targets
            .iter()
            .all(|t| s.graph.mastery(t).unwrap_or(0.0) >= threshold);
        if complete {
            let plan = self.optimizer.summarize(Vec::new(), budget_minutes);
            return Ok(self.assemble(s, user_id, targets, plan, budget_minutes, PathStatus::Complete));
        }

        let sequence = track_algorithm!(AlgorithmId::KnowledgeGraph, {
            let ready = s.graph.get_ready_concepts(threshold);
            let gaps = s.graph.get_gap_concepts(threshold);
            tracing::debug!(
                user_id = %user_id,
                ready = ready.len(),
                gaps = gaps.len(),
                blocked = gaps.iter().filter(|g| g.unmet_prerequisites > 0).count(),
                "graph state"
            );
            s.graph.get_optimal_learning_sequence(targets.as_slice(), threshold)
        })?;

        let available = self
            .config
            .bandit
            .available_minutes_per_resource
            .min(budget_minutes);
        let nodes: Vec<_> = sequence
            .iter()
            .filter_map(|id| s.graph.get(id).cloned())
            .collect();
        let requests: Vec<SelectionRequest<'_>> = nodes
            .iter()
            .map(|node| SelectionRequest {
                concept_id: &node.id,
                candidates: self.catalog.candidates(&node.id),
                context: SelectionContext::new(node.mastery, s.style, available),
            })
            .collect();
        let ranked = track_algorithm!(
            AlgorithmId::ResourceBandit,
            self.selector.rank_many(&requests)
        );

        let mut candidates = Vec::with_capacity(nodes.len());
        for (node, result) in nodes.iter().zip(ranked) {
            let candidate = match result {
                Ok(resources) => PathCandidate {
                    concept: node.clone(),
                    resources,
                    warnings: Vec::new(),
                },
                Err(EngineError::ResourceUnavailable { concept_id }) => {
                    tracing::warn!(
                        user_id = %user_id,
                        concept_id = %concept_id,
                        "no resources for concept, substituting default"
                    );
                    PathCandidate {
                        concept: node.clone(),
                        resources: vec![self.selector.fallback(&concept_id)],
                        warnings: vec![StepWarning::SubstitutedResource],
                    }
                }
                Err(other) => return Err(other),
            };
            candidates.push(candidate);
        }

        let plan = track_algorithm!(
            AlgorithmId::PathOptimizer,
            self.optimizer.optimize(&s.graph, candidates, budget_minutes)
        )
        .inspect_err(|err| {
            metrics::registry().record_error(AlgorithmId::PathOptimizer);
            tracing::warn!(user_id = %user_id, error = %err, "path optimization failed");
        })?;

        let plan = if s.state == AdaptationState::OnTrack {
            plan
        } else {
            let ctx = AdaptContext {
                graph: &s.graph,
                catalog: &self.catalog,
                targets: &targets,
                struggling: &s.struggling,
                threshold,
                budget_minutes,
                fallback_difficulty: self.config.bandit.fallback_difficulty,
                fallback_minutes: self.config.bandit.fallback_minutes,
            };
            let steps = track_algorithm!(
                AlgorithmId::Adaptation,
                self.adapter.apply(s.state, plan.steps.clone(), &ctx)
            );
            let adapted = self.optimizer.summarize(steps, budget_minutes);
            if adapted.steps.is_empty() || adapted.total_minutes > budget_minutes {
                tracing::warn!(
                    user_id = %user_id,
                    state = s.state.as_str(),
                    adapted_minutes = adapted.total_minutes,
                    budget_minutes,
                    "adapted path does not fit the budget, keeping the optimized plan"
                );
                plan
            } else {
                adapted
            }
        };

        tracing::debug!(
            user_id = %user_id,
            steps = plan.steps.len(),
            total_minutes = plan.total_minutes,
            state = s.state.as_str(),
            "path regenerated"
        );
        Ok(self.assemble(s, user_id, targets, plan, budget_minutes, PathStatus::InProgress))
    }

    fn assemble(
        &self,
        s: &UserSession,
        user_id: &str,
        targets: Vec<ConceptId>,
        plan: PathPlan,
        budget_minutes: f64,
        status: PathStatus,
    ) -> LearningPath {
        LearningPath {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            target_concepts: targets,
            degraded: plan.steps.iter().any(|step| step.is_degraded()),
            steps: plan.steps,
            total_minutes: plan.total_minutes,
            budget_minutes,
            estimated_mastery_gain: plan.estimated_mastery_gain,
            status,
            adaptation: s.state,
            quality: plan.quality,
            generated_at: Utc::now(),
        }
    }

    fn check_latency(&self, start: Instant, user_id: &str, operation: &'static str) -> u64 {
        let latency_ms = start.elapsed().as_millis() as u64;
        if latency_ms > self.config.latency_budget_ms {
            tracing::warn!(
                user_id = %user_id,
                operation,
                latency_ms,
                budget_ms = self.config.latency_budget_ms,
                "latency budget exceeded"
            );
        }
        latency_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::SelectionStrategy;
    use crate::engine::telemetry::MemoryTelemetry;
    use crate::engine::types::{ConceptNode, EdgeSignals, Resource, ResourceKind};

    fn engine() -> (LearningPathEngine, Arc<MemoryTelemetry>) {
        let mut graph = KnowledgeGraph::default();
        graph
            .add_concept(ConceptNode::new("variables", "Variables", 0.1))
            .unwrap();
        graph
            .add_concept(ConceptNode::new("loops", "Loops", 0.4))
            .unwrap();
        graph
            .add_edge("variables", "loops", EdgeSignals::new(0.9, 0.6, 0.8))
            .unwrap();
        let catalog = ResourceCatalog::from_resources([
            Resource::new("var-video", "variables", ResourceKind::Video, 0.1, 10.0),
            Resource::new("loop-quiz", "loops", ResourceKind::Quiz, 0.5, 15.0),
        ]);
        let mut config = EngineConfig::default();
        config.bandit.strategy = SelectionStrategy::UpperConfidenceBound { exploration: 2.0 };
        let sink = Arc::new(MemoryTelemetry::new());
        let engine = LearningPathEngine::new(config, graph, catalog)
            .unwrap()
            .with_telemetry(sink.clone());
        (engine, sink)
    }

    #[test]
    fn recommendation_emits_telemetry() {
        let (engine, sink) = engine();
        let path = engine
            .generate_recommendation("u1", &[Attempt::new("loops", true, 1)], &["loops"], 60.0)
            .unwrap();
        assert_eq!(path.concept_sequence(), vec!["variables", "loops"]);
        assert_eq!(sink.count("path_generated"), 1);
        assert_eq!(sink.count("mastery_updated"), 1);
    }

    #[test]
    fn rejected_attempts_do_not_abort_the_batch() {
        let (engine, sink) = engine();
        let path = engine
            .generate_recommendation(
                "u1",
                &[Attempt::new("ghost", true, 1), Attempt::new("loops", false, 2)],
                &["loops"],
                60.0,
            )
            .unwrap();
        assert_eq!(path.steps.len(), 2);
        assert_eq!(sink.count("attempt_rejected"), 1);
    }

    #[test]
    fn unknown_target_and_bad_budget_are_errors() {
        let (engine, _) = engine();
        let err = engine
            .generate_recommendation("u1", &[], &["ghost"], 60.0)
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownTarget(_)));
        let err = engine
            .generate_recommendation("u1", &[], &["loops"], f64::NAN)
            .unwrap_err();
        assert!(err.is_hard_failure());
    }

    #[test]
    fn adapt_requires_an_active_path() {
        let (engine, _) = engine();
        assert!(matches!(
            engine.adapt_path_realtime("nobody", 0, 0.5, true),
            Err(EngineError::NoActivePath { .. })
        ));
        engine
            .generate_recommendation::<&str>("u1", &[], &["loops"], 60.0)
            .unwrap();
        assert!(matches!(
            engine.adapt_path_realtime("u1", 9, 0.5, true),
            Err(EngineError::Data(DataError::StepOutOfRange { index: 9, len: 2 }))
        ));
    }

    #[test]
    fn adapt_propagates_mastery_and_rewards() {
        let (engine, sink) = engine();
        engine
            .generate_recommendation::<&str>("u1", &[], &["loops"], 60.0)
            .unwrap();
        engine.adapt_path_realtime("u1", 0, 0.8, true).unwrap();

        assert_eq!(engine.concept_mastery("u1", "variables"), Some(0.8));
        assert_eq!(engine.reward_store().counts("var-video").successes, 1);
        assert_eq!(sink.count("reward_recorded"), 1);
        assert_eq!(sink.count("path_adapted"), 1);

        let path = engine.active_path("u1").unwrap();
        assert_eq!(path.concept_sequence(), vec!["loops"]);
    }

    #[test]
    fn reset_restores_initial_mastery() {
        let (engine, _) = engine();
        engine
            .generate_recommendation(
                "u1",
                &[Attempt::new("variables", true, 1), Attempt::new("variables", true, 2)],
                &["loops"],
                60.0,
            )
            .unwrap();
        assert!(engine.concept_mastery("u1", "variables").unwrap() > 0.5);
        engine.reset_mastery("u1", "variables").unwrap();
        assert_eq!(engine.concept_mastery("u1", "variables"), Some(0.0));
        assert!(engine.mastery_snapshot("u1").is_empty());
        assert!(engine.reset_mastery("u1", "ghost").is_err());
    }

    #[test]
    fn sessions_are_isolated() {
        let (engine, _) = engine();
        engine
            .generate_recommendation("a", &[Attempt::new("variables", true, 1)], &["loops"], 60.0)
            .unwrap();
        engine
            .generate_recommendation::<&str>("b", &[], &["loops"], 60.0)
            .unwrap();
        assert!(engine.concept_mastery("a", "variables").unwrap() > 0.0);
        assert_eq!(engine.concept_mastery("b", "variables"), Some(0.0));
        assert!(engine.end_session("a"));
        assert!(engine.export_user("a").is_none());
        assert!(engine.export_user("b").is_some());
    }
}
