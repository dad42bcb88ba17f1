pub mod config;
pub mod engine;
pub mod error;
pub mod logging;

pub use engine::{EngineConfig, LearningPathEngine};
pub use error::{ConfigurationError, DataError, EngineError, EngineResult};
