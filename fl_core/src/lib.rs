mod config;
mod history;
mod partition;
mod snapshot;

pub use config::SimulationConfig;
pub use history::{ClientLosses, ProgressRecord, RoundRecord, TrainMetadata};
pub use partition::{ClientPartition, PartitionError};
pub use snapshot::{SnapshotError, Tensor, WeightSnapshot};
