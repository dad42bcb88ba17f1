use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use serde::Serialize;

static REGISTRY: OnceLock<Arc<AlgorithmRegistry>> = OnceLock::new();

pub fn registry() -> &'static Arc<AlgorithmRegistry> {
    REGISTRY.get_or_init(|| Arc::new(AlgorithmRegistry::new()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgorithmId {
    KnowledgeGraph,
    KnowledgeTracing,
    ResourceBandit,
    PathOptimizer,
    Adaptation,
}

impl AlgorithmId {
    pub fn all() -> &'static [AlgorithmId] {
        &[
            AlgorithmId::KnowledgeGraph,
            AlgorithmId::KnowledgeTracing,
            AlgorithmId::ResourceBandit,
            AlgorithmId::PathOptimizer,
            AlgorithmId::Adaptation,
        ]
    }

    pub fn id(&self) -> &'static str {
        match self {
            AlgorithmId::KnowledgeGraph => "graph_traversal",
            AlgorithmId::KnowledgeTracing => "mastery_beta_kt",
            AlgorithmId::ResourceBandit => "decision_bandit",
            AlgorithmId::PathOptimizer => "planning_knapsack",
            AlgorithmId::Adaptation => "planning_adaptation",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AlgorithmId::KnowledgeGraph => "Knowledge Graph Traversal",
            AlgorithmId::KnowledgeTracing => "Beta-Bernoulli Knowledge Tracing",
            AlgorithmId::ResourceBandit => "Contextual Resource Bandit",
            AlgorithmId::PathOptimizer => "Knapsack Path Optimizer",
            AlgorithmId::Adaptation => "Real-time Path Adaptation",
        }
    }

    pub fn layer(&self) -> &'static str {
        match self {
            AlgorithmId::KnowledgeGraph => "graph",
            AlgorithmId::KnowledgeTracing => "mastery",
            AlgorithmId::ResourceBandit => "decision",
            AlgorithmId::PathOptimizer | AlgorithmId::Adaptation => "planning",
        }
    }
}

impl FromStr for AlgorithmId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "graph_traversal" | "graph" => Ok(AlgorithmId::KnowledgeGraph),
            "mastery_beta_kt" | "mastery" => Ok(AlgorithmId::KnowledgeTracing),
            "decision_bandit" | "bandit" => Ok(AlgorithmId::ResourceBandit),
            "planning_knapsack" | "optimizer" => Ok(AlgorithmId::PathOptimizer),
            "planning_adaptation" | "adaptation" => Ok(AlgorithmId::Adaptation),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct AlgorithmMetrics {
    call_count: AtomicU64,
    total_latency_us: AtomicU64,
    error_count: AtomicU64,
    last_called_at: AtomicU64,
}

impl AlgorithmMetrics {
    pub fn record_call(&self, latency_us: u64) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add(latency_us, Ordering::Relaxed);
        self.last_called_at.store(now_ms(), Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let calls = self.call_count();
        if calls == 0 {
            return 0.0;
        }
        let total_us = self.total_latency_us.load(Ordering::Relaxed);
        let avg = (total_us as f64 / calls as f64) / 1000.0;
        (avg * 10000.0).round() / 10000.0
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn last_called_at(&self) -> Option<u64> {
        match self.last_called_at.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        }
    }
}

pub struct AlgorithmRegistry {
    metrics: HashMap<AlgorithmId, AlgorithmMetrics>,
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        let metrics = AlgorithmId::all()
            .iter()
            .map(|id| (*id, AlgorithmMetrics::default()))
            .collect();
        Self { metrics }
    }

    pub fn record(&self, id: AlgorithmId, latency_us: u64) {
        if let Some(m) = self.metrics.get(&id) {
            m.record_call(latency_us);
        }
    }

    pub fn record_error(&self, id: AlgorithmId) {
        if let Some(m) = self.metrics.get(&id) {
            m.record_error();
        }
    }

    pub fn get(&self, id: AlgorithmId) -> Option<&AlgorithmMetrics> {
        self.metrics.get(&id)
    }

    pub fn snapshot(&self) -> Vec<AlgorithmStatus> {
        AlgorithmId::all()
            .iter()
            .filter_map(|id| {
                let m = self.metrics.get(id)?;
                let calls = m.call_count();
                Some(AlgorithmStatus {
                    id: id.id().to_string(),
                    name: id.name().to_string(),
                    layer: id.layer().to_string(),
                    call_count: calls,
                    avg_latency_ms: m.avg_latency_ms(),
                    error_count: m.error_count(),
                    last_called_at: m.last_called_at(),
                    status: if calls == 0 { "idle" } else { "healthy" }.to_string(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmStatus {
    pub id: String,
    pub name: String,
    pub layer: String,
    pub call_count: u64,
    pub avg_latency_ms: f64,
    pub error_count: u64,
    pub last_called_at: Option<u64>,
    pub status: String,
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Times `$body` and records the call against `$id` in the global registry.
#[macro_export]
macro_rules! track_algorithm {
    ($id:expr, $body:expr) => {{
        let start = std::time::Instant::now();
        let result = $body;
        let latency_us = start.elapsed().as_micros() as u64;
        $crate::engine::metrics::registry().record($id, latency_us);
        result
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_from_str() {
        for id in AlgorithmId::all() {
            assert_eq!(id.id().parse::<AlgorithmId>(), Ok(*id));
        }
    }

    #[test]
    fn registry_records_calls_and_errors() {
        let registry = AlgorithmRegistry::new();
        registry.record(AlgorithmId::PathOptimizer, 1500);
        registry.record(AlgorithmId::PathOptimizer, 500);
        registry.record_error(AlgorithmId::PathOptimizer);

        let m = registry.get(AlgorithmId::PathOptimizer).unwrap();
        assert_eq!(m.call_count(), 2);
        assert_eq!(m.error_count(), 1);
        assert!((m.avg_latency_ms() - 1.0).abs() < 1e-9);

        let snapshot = registry.snapshot();
        let status = snapshot.iter().find(|s| s.id == "planning_knapsack").unwrap();
        assert_eq!(status.status, "healthy");
        assert!(snapshot.iter().any(|s| s.status == "idle"));
    }

    #[test]
    fn macro_returns_body_value() {
        let value = crate::track_algorithm!(AlgorithmId::KnowledgeGraph, 40 + 2);
        assert_eq!(value, 42);
    }
}
