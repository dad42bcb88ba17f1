pub mod config;
pub mod decision;
pub mod graph;
pub mod mastery;
pub mod metrics;
pub mod orchestrator;
pub mod persistence;
pub mod planning;
pub mod telemetry;
pub mod types;

pub use config::{EngineConfig, SelectionStrategy};
pub use decision::{ResourceCatalog, RewardStore};
pub use graph::{GapConcept, KnowledgeGraph};
pub use mastery::{KnowledgeTracer, MasteryEstimate};
pub use orchestrator::LearningPathEngine;
pub use persistence::{CatalogDocument, GraphDocument, UserSnapshot};
pub use telemetry::{MemoryTelemetry, TelemetryEvent, TelemetrySink, TracingTelemetry};
pub use types::{
    AdaptationState, Attempt, ConceptNode, EdgeSignals, LearningPath, PathStatus, PathStep,
    Resource, ResourceKind,
};
