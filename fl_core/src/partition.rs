use std::fmt;

use ndarray::Array2;

/// Errors produced while assembling a client partition.
#[derive(Debug)]
pub enum PartitionError {
    /// A per-node vector does not cover the feature matrix rows.
    LengthMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },

    /// `train_mask` and `val_mask` both select the same node.
    OverlappingMasks { index: usize },

    /// An adjacency edge references a node outside the index space.
    EdgeOutOfBounds { edge: (usize, usize), nodes: usize },

    /// A label does not fit the declared class count.
    LabelOutOfRange { index: usize, label: usize, classes: usize },

    /// The per-class weight vector is empty or shorter than the class count.
    InvalidClassWeights { got: usize, expected: usize },
}

impl fmt::Display for PartitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionError::LengthMismatch { what, got, expected } => {
                write!(f, "length mismatch for {what}: got {got}, expected {expected}")
            }
            PartitionError::OverlappingMasks { index } => {
                write!(f, "node {index} is in both the train and validation masks")
            }
            PartitionError::EdgeOutOfBounds { edge, nodes } => {
                write!(f, "edge {edge:?} references a node outside 0..{nodes}")
            }
            PartitionError::LabelOutOfRange { index, label, classes } => {
                write!(f, "label {label} at node {index} exceeds class count {classes}")
            }
            PartitionError::InvalidClassWeights { got, expected } => {
                write!(f, "class weight vector has {got} entries, expected {expected}")
            }
        }
    }
}

impl std::error::Error for PartitionError {}

/// One client's fixed slice of the dataset for the whole simulation.
///
/// The engine only ever reads a partition; all fields are validated once
/// at construction and never change afterwards. A partition whose train
/// mask is all false is *untrainable* and is skipped by the round loop,
/// never treated as an error.
#[derive(Debug, Clone)]
pub struct ClientPartition {
    features: Array2<f32>,
    labels: Vec<usize>,
    adjacency: Option<Vec<(usize, usize)>>,
    train_mask: Vec<bool>,
    val_mask: Vec<bool>,
    class_weights: Vec<f32>,
}

impl ClientPartition {
    /// Builds a partition, enforcing the index-space invariants.
    ///
    /// # Arguments
    /// * `features` - Node feature matrix, one row per node.
    /// * `labels` - Class index per node.
    /// * `adjacency` - Optional directed edge list `(src, dst)`.
    /// * `train_mask` / `val_mask` - Disjoint boolean masks over the nodes.
    /// * `class_weights` - Per-class loss weights, one per class.
    ///
    /// # Errors
    /// Returns a `PartitionError` describing the first violated invariant.
    pub fn new(
        features: Array2<f32>,
        labels: Vec<usize>,
        adjacency: Option<Vec<(usize, usize)>>,
        train_mask: Vec<bool>,
        val_mask: Vec<bool>,
        class_weights: Vec<f32>,
    ) -> Result<Self, PartitionError> {
        let nodes = features.nrows();
        let classes = class_weights.len();

        for (what, len) in [
            ("labels", labels.len()),
            ("train_mask", train_mask.len()),
            ("val_mask", val_mask.len()),
        ] {
            if len != nodes {
                return Err(PartitionError::LengthMismatch {
                    what,
                    got: len,
                    expected: nodes,
                });
            }
        }

        if let Some(index) = train_mask
            .iter()
            .zip(&val_mask)
            .position(|(&t, &v)| t && v)
        {
            return Err(PartitionError::OverlappingMasks { index });
        }

        if classes == 0 {
            return Err(PartitionError::InvalidClassWeights { got: 0, expected: 1 });
        }

        if let Some((index, &label)) = labels
            .iter()
            .enumerate()
            .find(|(_, &label)| label >= classes)
        {
            return Err(PartitionError::LabelOutOfRange { index, label, classes });
        }

        if let Some(edges) = &adjacency {
            if let Some(&edge) = edges.iter().find(|(s, d)| *s >= nodes || *d >= nodes) {
                return Err(PartitionError::EdgeOutOfBounds { edge, nodes });
            }
        }

        Ok(Self {
            features,
            labels,
            adjacency,
            train_mask,
            val_mask,
            class_weights,
        })
    }

    /// True when at least one node is selected for training.
    pub fn is_trainable(&self) -> bool {
        self.train_mask.iter().any(|&m| m)
    }

    /// True when at least one node is selected for validation.
    pub fn has_validation(&self) -> bool {
        self.val_mask.iter().any(|&m| m)
    }

    pub fn num_nodes(&self) -> usize {
        self.features.nrows()
    }

    pub fn num_features(&self) -> usize {
        self.features.ncols()
    }

    pub fn num_classes(&self) -> usize {
        self.class_weights.len()
    }

    pub fn features(&self) -> &Array2<f32> {
        &self.features
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn adjacency(&self) -> Option<&[(usize, usize)]> {
        self.adjacency.as_deref()
    }

    pub fn train_mask(&self) -> &[bool] {
        &self.train_mask
    }

    pub fn val_mask(&self) -> &[bool] {
        &self.val_mask
    }

    pub fn class_weights(&self) -> &[f32] {
        &self.class_weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(rows: usize) -> Array2<f32> {
        Array2::zeros((rows, 4))
    }

    #[test]
    fn test_rejects_overlapping_masks() {
        let err = ClientPartition::new(
            features(3),
            vec![0, 1, 0],
            None,
            vec![true, true, false],
            vec![false, true, false],
            vec![1.0, 1.0],
        )
        .unwrap_err();
        assert!(matches!(err, PartitionError::OverlappingMasks { index: 1 }));
    }

    #[test]
    fn test_rejects_out_of_range_label() {
        let err = ClientPartition::new(
            features(2),
            vec![0, 2],
            None,
            vec![true, false],
            vec![false, false],
            vec![1.0, 1.0],
        )
        .unwrap_err();
        assert!(matches!(err, PartitionError::LabelOutOfRange { label: 2, .. }));
    }

    #[test]
    fn test_rejects_edge_outside_index_space() {
        let err = ClientPartition::new(
            features(2),
            vec![0, 1],
            Some(vec![(0, 5)]),
            vec![true, false],
            vec![false, true],
            vec![1.0, 1.0],
        )
        .unwrap_err();
        assert!(matches!(err, PartitionError::EdgeOutOfBounds { .. }));
    }

    #[test]
    fn test_all_false_train_mask_is_untrainable_not_error() {
        let p = ClientPartition::new(
            features(2),
            vec![0, 1],
            None,
            vec![false, false],
            vec![false, true],
            vec![1.0, 1.0],
        )
        .unwrap();
        assert!(!p.is_trainable());
        assert!(p.has_validation());
    }
}
