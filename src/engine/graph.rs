//! Concept prerequisite graph.
//!
//! Nodes live in an arena indexed by `usize`; adjacency is kept in both
//! directions. Every edge insertion runs a reachability check from the target
//! back to the source, so the graph is acyclic by construction and traversal
//! code never has to handle cycles.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::engine::config::GraphConfig;
use crate::engine::types::{ConceptId, ConceptNode, EdgeSignals};
use crate::error::ConfigurationError;

#[derive(Debug, Clone)]
struct EdgeEntry {
    node: usize,
    signals: EdgeSignals,
    weight: f64,
}

/// A concept below threshold, annotated with how many prerequisites are still unmet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapConcept {
    pub concept_id: ConceptId,
    pub mastery: f64,
    pub unmet_prerequisites: usize,
    pub importance: f64,
}

#[derive(Debug, Clone)]
pub struct KnowledgeGraph {
    weights: GraphConfig,
    nodes: Vec<ConceptNode>,
    index: HashMap<ConceptId, usize>,
    outgoing: Vec<Vec<EdgeEntry>>,
    incoming: Vec<Vec<EdgeEntry>>,
}

impl Default for KnowledgeGraph {
    fn default() -> Self {
        Self {
            weights: GraphConfig::default(),
            nodes: Vec::new(),
            index: HashMap::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
        }
    }
}

impl KnowledgeGraph {
    pub fn new(weights: GraphConfig) -> Result<Self, ConfigurationError> {
        weights.validate()?;
        Ok(Self {
            weights,
            ..Self::default()
        })
    }

    pub fn weights(&self) -> &GraphConfig {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&ConceptNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn mastery(&self, id: &str) -> Option<f64> {
        self.get(id).map(|n| n.mastery)
    }

    /// Concepts in insertion order.
    pub fn concepts(&self) -> impl Iterator<Item = &ConceptNode> {
        self.nodes.iter()
    }

    /// All edges as (source, target, signals, composite weight).
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str, EdgeSignals, f64)> + '_ {
        self.outgoing.iter().enumerate().flat_map(move |(from, edges)| {
            edges.iter().map(move |e| {
                (
                    self.nodes[from].id.as_str(),
                    self.nodes[e.node].id.as_str(),
                    e.signals,
                    e.weight,
                )
            })
        })
    }

    pub fn add_concept(&mut self, concept: ConceptNode) -> Result<usize, ConfigurationError> {
        if self.index.contains_key(&concept.id) {
            return Err(ConfigurationError::DuplicateConcept(concept.id));
        }
        if !concept.difficulty.is_finite() || !(0.0..=1.0).contains(&concept.difficulty) {
            return Err(ConfigurationError::InvalidValue {
                field: "difficulty",
                value: concept.difficulty,
            });
        }
        if !concept.importance.is_finite() || concept.importance < 0.0 {
            return Err(ConfigurationError::InvalidValue {
                field: "importance",
                value: concept.importance,
            });
        }

        let idx = self.nodes.len();
        self.index.insert(concept.id.clone(), idx);
        self.nodes.push(ConceptNode {
            mastery: concept.mastery.clamp(0.0, 1.0),
            ..concept
        });
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        Ok(idx)
    }

    pub fn composite_weight(&self, signals: &EdgeSignals) -> f64 {
        self.weights.prerequisite_weight * signals.prerequisite_strength
            + self.weights.similarity_weight * signals.semantic_similarity
            + self.weights.temporal_weight * signals.temporal_correlation
    }

    /// Adds `source -> target` ("source is a prerequisite of target") and returns
    /// the composite weight. Re-adding an existing edge replaces its signals.
    pub fn add_edge(
        &mut self,
        source: &str,
        target: &str,
        signals: EdgeSignals,
    ) -> Result<f64, ConfigurationError> {
        for (field, value) in [
            ("prerequisite_strength", signals.prerequisite_strength),
            ("semantic_similarity", signals.semantic_similarity),
            ("temporal_correlation", signals.temporal_correlation),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigurationError::InvalidSignal { field, value });
            }
        }

        let from = self.index_of(source)?;
        let to = self.index_of(target)?;
        if from == to || self.reaches(to, from) {
            return Err(ConfigurationError::CycleDetected {
                from: source.to_string(),
                to: target.to_string(),
            });
        }

        let weight = self.composite_weight(&signals);
        if let Some(existing) = self.outgoing[from].iter_mut().find(|e| e.node == to) {
            existing.signals = signals;
            existing.weight = weight;
            if let Some(back) = self.incoming[to].iter_mut().find(|e| e.node == from) {
                back.signals = signals;
                back.weight = weight;
            }
            return Ok(weight);
        }

        self.outgoing[from].push(EdgeEntry {
            node: to,
            signals,
            weight,
        });
        self.incoming[to].push(EdgeEntry {
            node: from,
            signals,
            weight,
        });
        Ok(weight)
    }

    pub fn edge(&self, source: &str, target: &str) -> Option<(EdgeSignals, f64)> {
        let from = *self.index.get(source)?;
        let to = *self.index.get(target)?;
        self.outgoing[from]
            .iter()
            .find(|e| e.node == to)
            .map(|e| (e.signals, e.weight))
    }

    pub fn update_mastery(&mut self, id: &str, value: f64) -> Result<(), ConfigurationError> {
        let idx = self.index_of(id)?;
        self.nodes[idx].mastery = if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Ok(())
    }

    pub fn prerequisites(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| {
                self.incoming[i]
                    .iter()
                    .map(|e| self.nodes[e.node].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| {
                self.outgoing[i]
                    .iter()
                    .map(|e| self.nodes[e.node].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Concepts below `threshold` whose every prerequisite is at or above it.
    pub fn get_ready_concepts(&self, threshold: f64) -> Vec<ConceptId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(i, node)| {
                node.mastery < threshold
                    && self.incoming[*i]
                        .iter()
                        .all(|e| self.nodes[e.node].mastery >= threshold)
            })
            .map(|(_, node)| node.id.clone())
            .collect()
    }

    /// Concepts below `threshold`, most blocked first, then lowest mastery,
    /// then highest importance.
    pub fn get_gap_concepts(&self, threshold: f64) -> Vec<GapConcept> {
        let mut gaps: Vec<GapConcept> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.mastery < threshold)
            .map(|(i, node)| GapConcept {
                concept_id: node.id.clone(),
                mastery: node.mastery,
                unmet_prerequisites: self.incoming[i]
                    .iter()
                    .filter(|e| self.nodes[e.node].mastery < threshold)
                    .count(),
                importance: node.importance,
            })
            .collect();

        gaps.sort_by(|a, b| {
            b.unmet_prerequisites
                .cmp(&a.unmet_prerequisites)
                .then(a.mastery.total_cmp(&b.mastery))
                .then(b.importance.total_cmp(&a.importance))
        });
        gaps
    }

    /// Prerequisite closure of `targets`, minus concepts already at `threshold`,
    /// in topological order (Kahn). Among concurrently available concepts the
    /// one with the heaviest outgoing edges inside the closure goes first, then
    /// the more important one, then insertion order.
    pub fn get_optimal_learning_sequence<S: AsRef<str>>(
        &self,
        targets: &[S],
        threshold: f64,
    ) -> Result<Vec<ConceptId>, ConfigurationError> {
        let n = self.nodes.len();
        let mut in_closure = vec![false; n];
        let mut stack = Vec::with_capacity(targets.len());
        for target in targets {
            stack.push(self.index_of(target.as_ref())?);
        }
        while let Some(i) = stack.pop() {
            if in_closure[i] {
                continue;
            }
            in_closure[i] = true;
            stack.extend(self.incoming[i].iter().map(|e| e.node));
        }

        let kept: Vec<bool> = (0..n)
            .map(|i| in_closure[i] && self.nodes[i].mastery < threshold)
            .collect();

        let mut in_degree = vec![0usize; n];
        let mut release_weight = vec![0.0f64; n];
        for i in (0..n).filter(|&i| kept[i]) {
            in_degree[i] = self.incoming[i].iter().filter(|e| kept[e.node]).count();
            release_weight[i] = self.outgoing[i]
                .iter()
                .filter(|e| kept[e.node])
                .map(|e| e.weight)
                .sum();
        }

        let mut available: Vec<usize> = (0..n).filter(|&i| kept[i] && in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(available.len());

        while !available.is_empty() {
            let mut best = 0;
            for pos in 1..available.len() {
                let (a, b) = (available[pos], available[best]);
                let better = release_weight[a]
                    .total_cmp(&release_weight[b])
                    .then(self.nodes[a].importance.total_cmp(&self.nodes[b].importance))
                    .then(b.cmp(&a))
                    .is_gt();
                if better {
                    best = pos;
                }
            }
            let node = available.swap_remove(best);
            order.push(self.nodes[node].id.clone());

            for e in &self.outgoing[node] {
                if kept[e.node] {
                    in_degree[e.node] -= 1;
                    if in_degree[e.node] == 0 {
                        available.push(e.node);
                    }
                }
            }
        }

        Ok(order)
    }

    /// (1 - mastery) * importance, boosted by how much of the graph depends on the concept.
    pub fn learning_gain_potential(&self, id: &str) -> f64 {
        let Some(&idx) = self.index.get(id) else {
            return 0.0;
        };
        let node = &self.nodes[idx];
        let descendants = self.descendant_count(idx);
        (1.0 - node.mastery) * node.importance * (1.0 + 0.1 * descendants as f64)
    }

    fn descendant_count(&self, start: usize) -> usize {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack: Vec<usize> = self.outgoing[start].iter().map(|e| e.node).collect();
        let mut count = 0;
        while let Some(i) = stack.pop() {
            if seen[i] {
                continue;
            }
            seen[i] = true;
            count += 1;
            stack.extend(self.outgoing[i].iter().map(|e| e.node));
        }
        count
    }

    fn reaches(&self, from: usize, to: usize) -> bool {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![from];
        while let Some(i) = stack.pop() {
            if i == to {
                return true;
            }
            if seen[i] {
                continue;
            }
            seen[i] = true;
            stack.extend(self.outgoing[i].iter().map(|e| e.node));
        }
        false
    }

    fn index_of(&self, id: &str) -> Result<usize, ConfigurationError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| ConfigurationError::UnknownConcept(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_graph() -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::default();
        for (id, difficulty, importance) in [
            ("variables", 0.2, 2.0),
            ("operators", 0.2, 1.5),
            ("conditionals", 0.3, 1.8),
            ("loops", 0.4, 2.0),
        ] {
            graph
                .add_concept(ConceptNode::new(id, id, difficulty).with_importance(importance))
                .unwrap();
        }
        graph
            .add_edge("variables", "operators", EdgeSignals::new(0.9, 0.8, 0.9))
            .unwrap();
        graph
            .add_edge("variables", "conditionals", EdgeSignals::new(0.8, 0.6, 0.8))
            .unwrap();
        graph
            .add_edge("operators", "conditionals", EdgeSignals::new(0.7, 0.7, 0.7))
            .unwrap();
        graph
            .add_edge("conditionals", "loops", EdgeSignals::new(0.9, 0.8, 0.9))
            .unwrap();
        graph
    }

    #[test]
    fn composite_weight_uses_configured_coefficients() {
        let graph = chain_graph();
        let (_, weight) = graph.edge("variables", "operators").unwrap();
        let expected = 0.5 * 0.9 + 0.3 * 0.8 + 0.2 * 0.9;
        assert!((weight - expected).abs() < 1e-12);
    }

    #[test]
    fn rejects_edges_that_close_a_cycle() {
        let mut graph = chain_graph();
        let err = graph
            .add_edge("loops", "variables", EdgeSignals::default())
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::CycleDetected { .. }));
        assert!(graph.edge("loops", "variables").is_none());

        let err = graph
            .add_edge("loops", "loops", EdgeSignals::default())
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::CycleDetected { .. }));
    }

    #[test]
    fn rejects_out_of_range_signals_and_unknown_nodes() {
        let mut graph = chain_graph();
        assert!(matches!(
            graph.add_edge("variables", "loops", EdgeSignals::new(1.2, 0.0, 0.0)),
            Err(ConfigurationError::InvalidSignal { .. })
        ));
        assert!(matches!(
            graph.add_edge("variables", "nope", EdgeSignals::default()),
            Err(ConfigurationError::UnknownConcept(_))
        ));
        assert!(matches!(
            graph.add_concept(ConceptNode::new("loops", "dup", 0.1)),
            Err(ConfigurationError::DuplicateConcept(_))
        ));
    }

    #[test]
    fn ready_concepts_require_all_prerequisites() {
        let mut graph = chain_graph();
        assert_eq!(graph.get_ready_concepts(0.7), vec!["variables".to_string()]);

        graph.update_mastery("variables", 0.9).unwrap();
        assert_eq!(graph.get_ready_concepts(0.7), vec!["operators".to_string()]);

        graph.update_mastery("operators", 0.8).unwrap();
        let ready = graph.get_ready_concepts(0.7);
        assert_eq!(ready, vec!["conditionals".to_string()]);
    }

    #[test]
    fn gap_concepts_are_sorted_by_blockage() {
        let mut graph = chain_graph();
        graph.update_mastery("variables", 0.9).unwrap();
        let gaps = graph.get_gap_concepts(0.7);
        assert_eq!(gaps.len(), 3);
        assert_eq!(gaps[0].concept_id, "conditionals");
        assert_eq!(gaps[0].unmet_prerequisites, 1);
        assert_eq!(gaps.last().unwrap().unmet_prerequisites, 0);
    }

    #[test]
    fn sequence_respects_prerequisites_and_skips_mastered() {
        let mut graph = chain_graph();
        let seq = graph.get_optimal_learning_sequence(&["loops"], 0.7).unwrap();
        assert_eq!(seq, vec!["variables", "operators", "conditionals", "loops"]);

        graph.update_mastery("variables", 0.95).unwrap();
        let seq = graph.get_optimal_learning_sequence(&["loops"], 0.7).unwrap();
        assert_eq!(seq, vec!["operators", "conditionals", "loops"]);
    }

    #[test]
    fn sequence_breaks_ties_by_release_weight_then_importance() {
        let mut graph = KnowledgeGraph::default();
        graph.add_concept(ConceptNode::new("a", "a", 0.1)).unwrap();
        graph
            .add_concept(ConceptNode::new("b", "b", 0.1).with_importance(3.0))
            .unwrap();
        graph.add_concept(ConceptNode::new("c", "c", 0.1)).unwrap();
        graph.add_concept(ConceptNode::new("goal", "goal", 0.5)).unwrap();
        graph.add_edge("a", "goal", EdgeSignals::new(1.0, 1.0, 1.0)).unwrap();
        graph.add_edge("b", "goal", EdgeSignals::new(0.2, 0.0, 0.0)).unwrap();
        graph.add_edge("c", "goal", EdgeSignals::new(0.2, 0.0, 0.0)).unwrap();

        let seq = graph.get_optimal_learning_sequence(&["goal"], 0.7).unwrap();
        assert_eq!(seq, vec!["a", "b", "c", "goal"]);
    }

    #[test]
    fn unknown_target_is_rejected() {
        let graph = chain_graph();
        assert!(graph.get_optimal_learning_sequence(&["missing"], 0.7).is_err());
    }

    #[test]
    fn gain_potential_counts_descendants() {
        let graph = chain_graph();
        let root = graph.learning_gain_potential("variables");
        // 3 descendants: (1 - 0) * 2.0 * 1.3
        assert!((root - 2.6).abs() < 1e-12);
        assert_eq!(graph.learning_gain_potential("unknown"), 0.0);
    }
}
