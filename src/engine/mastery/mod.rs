pub mod beta;
pub mod model;

pub use beta::BetaPosterior;
pub use model::{
    IngestReport, KnowledgeTracer, MasteryEstimate, Observation, ObservationSource,
    RejectedAttempt,
};
