use std::fmt;

use fl_core::SnapshotError;
use storage::StoreError;

/// All fatal conditions that abort a simulated run.
///
/// Skip conditions (untrainable clients, empty validation sets, failed
/// local fits) never appear here; they surface as `NaN` losses and
/// omitted contributions instead.
#[derive(Debug)]
pub enum SimulationError {
    /// The run was started with zero client partitions.
    NoPartitions,
    /// No supplied partition has any training samples; with fixed masks
    /// the run could never contribute anything.
    NoTrainableClients,
    /// The aggregator was invoked with an empty snapshot list.
    EmptyAggregation,
    /// Snapshots passed to the aggregator disagree in layers or shapes,
    /// which is a configuration defect rather than a recoverable
    /// runtime condition.
    Aggregation(SnapshotError),
    /// Committing run artifacts failed.
    Persistence(StoreError),
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationError::NoPartitions => write!(f, "no client partitions supplied"),
            SimulationError::NoTrainableClients => {
                write!(f, "no client partition has any training samples")
            }
            SimulationError::EmptyAggregation => {
                write!(f, "aggregation requires at least one weight snapshot")
            }
            SimulationError::Aggregation(e) => write!(f, "aggregation failed: {e}"),
            SimulationError::Persistence(e) => write!(f, "persistence failed: {e}"),
        }
    }
}

impl std::error::Error for SimulationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimulationError::Aggregation(e) => Some(e),
            SimulationError::Persistence(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SnapshotError> for SimulationError {
    fn from(e: SnapshotError) -> Self {
        SimulationError::Aggregation(e)
    }
}

impl From<StoreError> for SimulationError {
    fn from(e: StoreError) -> Self {
        SimulationError::Persistence(e)
    }
}
