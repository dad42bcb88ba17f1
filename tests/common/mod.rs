#![allow(dead_code)]

use learning_path_engine::engine::{
    ConceptNode, EdgeSignals, EngineConfig, KnowledgeGraph, LearningPathEngine, Resource,
    ResourceCatalog, ResourceKind, SelectionStrategy,
};

pub const USER: &str = "learner-1";

/// variables -> loops -> {functions, arrays}. `arrays` has no catalog entries.
pub fn graph() -> KnowledgeGraph {
    let mut graph = KnowledgeGraph::default();
    for node in [
        ConceptNode::new("variables", "Variables", 0.1),
        ConceptNode::new("loops", "Loops", 0.4),
        ConceptNode::new("functions", "Functions", 0.5).with_importance(0.9),
        ConceptNode::new("arrays", "Arrays", 0.4).with_importance(0.8),
    ] {
        graph.add_concept(node).unwrap();
    }
    graph
        .add_edge("variables", "loops", EdgeSignals::new(0.9, 0.6, 0.8))
        .unwrap();
    graph
        .add_edge("loops", "functions", EdgeSignals::new(0.7, 0.4, 0.6))
        .unwrap();
    graph
        .add_edge("loops", "arrays", EdgeSignals::new(0.6, 0.5, 0.5))
        .unwrap();
    graph
}

pub fn catalog() -> ResourceCatalog {
    ResourceCatalog::from_resources([
        Resource::new("variables-video", "variables", ResourceKind::Video, 0.1, 10.0),
        Resource::new("variables-article", "variables", ResourceKind::Article, 0.2, 15.0),
        Resource::new("loops-video", "loops", ResourceKind::Video, 0.3, 12.0),
        Resource::new("loops-quiz", "loops", ResourceKind::Quiz, 0.5, 15.0),
        Resource::new("functions-video", "functions", ResourceKind::Video, 0.5, 20.0),
    ])
}

pub fn ucb_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.bandit.strategy = SelectionStrategy::UpperConfidenceBound { exploration: 2.0 };
    config
}

pub fn engine() -> LearningPathEngine {
    LearningPathEngine::new(ucb_config(), graph(), catalog()).unwrap()
}
