pub mod adaptation;
pub mod knapsack;
pub mod optimizer;

pub use adaptation::{AdaptContext, PathAdapter, PerformanceWindow, StepOutcome};
pub use optimizer::{PathCandidate, PathOptimizer, PathPlan};
