pub mod catalog;
pub mod sampling;
pub mod selector;
pub mod store;

pub use catalog::ResourceCatalog;
pub use selector::{ResourceSelector, SelectionContext, SelectionRequest};
pub use store::{ArmStats, RewardCounts, RewardStore};
