use thiserror::Error;

/// Rejected at insert/configuration time. Fatal for the offending operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("edge {from} -> {to} would create a cycle")]
    CycleDetected { from: String, to: String },
    #[error("unknown concept: {0}")]
    UnknownConcept(String),
    #[error("duplicate concept: {0}")]
    DuplicateConcept(String),
    #[error("edge signal {field} out of range [0, 1]: {value}")]
    InvalidSignal { field: &'static str, value: f64 },
    #[error("edge weights must sum to 1, got {sum}")]
    InvalidWeights { sum: f64 },
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: f64 },
}

/// Malformed input. Recovered locally: the offending item is skipped and logged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("attempt references unknown concept: {concept_id}")]
    UnknownConcept { concept_id: String },
    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: f64 },
    #[error("step index {index} out of range (path has {len} steps)")]
    StepOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("data error: {0}")]
    Data(#[from] DataError),
    #[error(
        "no feasible path: {concept_id} needs {required_minutes:.1} min, budget is {budget_minutes:.1} min"
    )]
    NoFeasiblePath {
        budget_minutes: f64,
        required_minutes: f64,
        concept_id: String,
    },
    #[error("no resource candidates for concept {concept_id}")]
    ResourceUnavailable { concept_id: String },
    #[error("unknown target concept: {0}")]
    UnknownTarget(String),
    #[error("no active path for user {user_id}")]
    NoActivePath { user_id: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Hard failures need different caller treatment than degraded paths.
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            EngineError::Configuration(_) | EngineError::NoFeasiblePath { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
