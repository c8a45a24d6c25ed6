use std::fmt;

use fl_core::SnapshotError;

/// Errors produced by a local training fit.
#[derive(Debug)]
pub enum TrainError {
    /// The incoming weight snapshot does not describe this model.
    Snapshot(SnapshotError),

    /// A partition field is unusable for semantic reasons.
    InvalidInput(&'static str),

    /// The partition's dimensions disagree with the trainer's.
    DimensionMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
}

impl fmt::Display for TrainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainError::Snapshot(e) => write!(f, "bad weight snapshot: {e}"),
            TrainError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            TrainError::DimensionMismatch { what, got, expected } => {
                write!(f, "dimension mismatch for {what}: got {got}, expected {expected}")
            }
        }
    }
}

impl std::error::Error for TrainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrainError::Snapshot(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SnapshotError> for TrainError {
    fn from(e: SnapshotError) -> Self {
        TrainError::Snapshot(e)
    }
}
