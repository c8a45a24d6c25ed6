use fl_core::{SnapshotError, Tensor, WeightSnapshot};

use crate::SimulationError;

/// Federated averaging: the unweighted elementwise mean of the snapshots.
///
/// Every client contributes equally regardless of partition size; the
/// layer set and shapes are taken from the first snapshot and every other
/// snapshot must match them exactly.
///
/// # Errors
/// `SimulationError::EmptyAggregation` for an empty list and
/// `SimulationError::Aggregation` when a later snapshot is missing a
/// layer or disagrees in shape.
pub fn aggregate(snapshots: &[WeightSnapshot]) -> Result<WeightSnapshot, SimulationError> {
    let first = snapshots.first().ok_or(SimulationError::EmptyAggregation)?;
    let count = snapshots.len() as f32;

    let mut averaged = WeightSnapshot::new();
    for (name, tensor) in first.iter() {
        let mut acc: Vec<f32> = tensor.data().to_vec();

        for other in &snapshots[1..] {
            let layer = other.require(name)?;
            if layer.shape() != tensor.shape() {
                return Err(SimulationError::Aggregation(SnapshotError::ShapeMismatch {
                    what: name.to_string(),
                    got: layer.shape().to_vec(),
                    expected: tensor.shape().to_vec(),
                }));
            }
            acc.iter_mut()
                .zip(layer.data())
                .for_each(|(a, &b)| *a += b);
        }

        acc.iter_mut().for_each(|v| *v /= count);
        averaged.insert(name, Tensor::new(tensor.shape().to_vec(), acc)?)?;
    }

    Ok(averaged)
}
