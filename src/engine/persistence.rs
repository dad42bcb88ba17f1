//! JSON documents for graphs, catalogs and per-learner exports.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::config::GraphConfig;
use crate::engine::decision::{ResourceCatalog, RewardCounts};
use crate::engine::graph::KnowledgeGraph;
use crate::engine::mastery::MasteryEstimate;
use crate::engine::types::{
    AdaptationState, ConceptId, ConceptNode, EdgeSignals, Resource, ResourceId, ResourceKind,
};
use crate::error::{ConfigurationError, EngineResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDocument {
    pub source: ConceptId,
    pub target: ConceptId,
    #[serde(flatten)]
    pub signals: EdgeSignals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDocument {
    #[serde(default)]
    pub weights: GraphConfig,
    pub nodes: Vec<ConceptNode>,
    #[serde(default)]
    pub edges: Vec<EdgeDocument>,
}

impl KnowledgeGraph {
    pub fn to_document(&self) -> GraphDocument {
        GraphDocument {
            weights: self.weights().clone(),
            nodes: self.concepts().cloned().collect(),
            edges: self
                .edges()
                .map(|(source, target, signals, _)| EdgeDocument {
                    source: source.to_string(),
                    target: target.to_string(),
                    signals,
                })
                .collect(),
        }
    }

    /// Rebuilds a graph, re-running every insert-time check.
    pub fn from_document(doc: &GraphDocument) -> Result<Self, ConfigurationError> {
        let mut graph = KnowledgeGraph::new(doc.weights.clone())?;
        for node in &doc.nodes {
            graph.add_concept(node.clone())?;
        }
        for edge in &doc.edges {
            graph.add_edge(&edge.source, &edge.target, edge.signals)?;
        }
        Ok(graph)
    }
}

/// Graph plus content catalog, optionally with lifetime bandit records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogDocument {
    pub graph: GraphDocument,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub rewards: HashMap<ResourceId, RewardCounts>,
}

impl CatalogDocument {
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), raw)?;
        Ok(())
    }

    pub fn build(&self) -> Result<(KnowledgeGraph, ResourceCatalog), ConfigurationError> {
        let graph = KnowledgeGraph::from_document(&self.graph)?;
        let catalog = ResourceCatalog::from_resources(self.resources.iter().cloned());
        Ok((graph, catalog))
    }

    /// Small introductory programming curriculum.
    pub fn sample() -> Self {
        let nodes = vec![
            ConceptNode::new("variables", "Variables", 0.1)
                .with_importance(1.0)
                .with_category("basics"),
            ConceptNode::new("data_types", "Data Types", 0.2)
                .with_importance(0.9)
                .with_category("basics"),
            ConceptNode::new("operators", "Operators", 0.2)
                .with_importance(0.8)
                .with_category("basics"),
            ConceptNode::new("conditionals", "Conditionals", 0.3)
                .with_importance(0.9)
                .with_category("control_flow"),
            ConceptNode::new("loops", "Loops", 0.4)
                .with_importance(1.0)
                .with_category("control_flow"),
            ConceptNode::new("functions", "Functions", 0.5)
                .with_importance(1.0)
                .with_category("abstraction"),
            ConceptNode::new("arrays", "Arrays", 0.4)
                .with_importance(0.8)
                .with_category("data_structures"),
            ConceptNode::new("recursion", "Recursion", 0.7)
                .with_importance(0.7)
                .with_category("abstraction"),
            ConceptNode::new("classes", "Classes", 0.7)
                .with_importance(0.8)
                .with_category("oop"),
        ];

        let edge = |source: &str, target: &str, p: f64, s: f64, t: f64| EdgeDocument {
            source: source.to_string(),
            target: target.to_string(),
            signals: EdgeSignals::new(p, s, t),
        };
        let edges = vec![
            edge("variables", "data_types", 0.9, 0.8, 0.9),
            edge("variables", "operators", 0.9, 0.6, 0.8),
            edge("data_types", "operators", 0.7, 0.7, 0.7),
            edge("operators", "conditionals", 0.8, 0.5, 0.8),
            edge("conditionals", "loops", 0.9, 0.7, 0.9),
            edge("loops", "arrays", 0.7, 0.6, 0.7),
            edge("loops", "functions", 0.6, 0.4, 0.7),
            edge("functions", "recursion", 0.9, 0.8, 0.8),
            edge("functions", "classes", 0.8, 0.5, 0.6),
            edge("arrays", "classes", 0.5, 0.3, 0.5),
        ];

        let mut resources = Vec::new();
        for node in &nodes {
            let d = node.difficulty;
            let id = node.id.as_str();
            resources.push(
                Resource::new(format!("{id}-video"), id, ResourceKind::Video, d, 12.0)
                    .with_title(format!("{} explained", node.name))
                    .with_engagement(0.7),
            );
            resources.push(
                Resource::new(format!("{id}-article"), id, ResourceKind::Article, (d + 0.1).min(1.0), 15.0)
                    .with_title(format!("{} in depth", node.name))
                    .with_engagement(0.5),
            );
            resources.push(
                Resource::new(format!("{id}-exercise"), id, ResourceKind::Interactive, (d + 0.2).min(1.0), 25.0)
                    .with_title(format!("{} workshop", node.name))
                    .with_engagement(0.8),
            );
        }

        Self {
            graph: GraphDocument {
                weights: GraphConfig::default(),
                nodes,
                edges,
            },
            resources,
            rewards: HashMap::new(),
        }
    }
}

/// Export of one learner's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    pub user_id: String,
    pub estimates: Vec<MasteryEstimate>,
    pub ability: f64,
    pub adaptation: AdaptationState,
    pub exported_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_document_round_trip_preserves_structure() {
        let doc = CatalogDocument::sample();
        let (graph, catalog) = doc.build().unwrap();
        assert_eq!(graph.len(), 9);
        assert_eq!(catalog.len(), 27);

        let again = KnowledgeGraph::from_document(&graph.to_document()).unwrap();
        assert_eq!(again.len(), graph.len());
        assert_eq!(again.edges().count(), 10);
        assert_eq!(
            again.edge("loops", "arrays").map(|(_, w)| w),
            graph.edge("loops", "arrays").map(|(_, w)| w)
        );
    }

    #[test]
    fn cyclic_document_is_rejected() {
        let mut doc = CatalogDocument::sample().graph;
        doc.edges.push(EdgeDocument {
            source: "classes".into(),
            target: "variables".into(),
            signals: EdgeSignals::default(),
        });
        assert!(matches!(
            KnowledgeGraph::from_document(&doc),
            Err(ConfigurationError::CycleDetected { .. })
        ));
    }

    #[test]
    fn catalog_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let mut doc = CatalogDocument::sample();
        doc.rewards.insert(
            "loops-video".into(),
            RewardCounts {
                successes: 9,
                failures: 1,
            },
        );
        doc.save(&path).unwrap();
        let loaded = CatalogDocument::load(&path).unwrap();
        assert_eq!(loaded, doc);
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = CatalogDocument::load(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, crate::error::EngineError::Io(_)));
    }
}
