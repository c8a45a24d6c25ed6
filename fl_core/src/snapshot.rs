use std::fmt;

use ndarray::{Array1, Array2};

/// Errors produced while building or combining weight snapshots.
#[derive(Debug)]
pub enum SnapshotError {
    /// The flat data buffer does not match the declared shape.
    LengthMismatch {
        /// Layer or context name for the offending tensor.
        what: String,
        got: usize,
        expected: usize,
    },

    /// Two tensors that must agree in shape do not.
    ShapeMismatch {
        what: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },

    /// A layer name was inserted twice into the same snapshot.
    DuplicateLayer(String),

    /// A layer expected to be present is missing.
    MissingLayer(String),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::LengthMismatch { what, got, expected } => {
                write!(f, "length mismatch for {what}: got {got}, expected {expected}")
            }
            SnapshotError::ShapeMismatch { what, got, expected } => {
                write!(f, "shape mismatch for {what}: got {got:?}, expected {expected:?}")
            }
            SnapshotError::DuplicateLayer(name) => write!(f, "duplicate layer name: {name}"),
            SnapshotError::MissingLayer(name) => write!(f, "missing layer: {name}"),
        }
    }
}

impl std::error::Error for SnapshotError {}

/// A named multi-dimensional `f32` buffer with an explicit shape.
///
/// `shape == []` denotes a 0-rank scalar. The flat `data` buffer is stored
/// in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Creates a tensor, validating that `data.len()` matches the shape.
    ///
    /// # Errors
    /// Returns `SnapshotError::LengthMismatch` when the buffer does not
    /// contain exactly `shape.iter().product()` elements.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, SnapshotError> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(SnapshotError::LengthMismatch {
                what: format!("tensor with shape {shape:?}"),
                got: data.len(),
                expected,
            });
        }
        Ok(Self { shape, data })
    }

    /// Creates a 0-rank scalar tensor.
    pub fn scalar(value: f32) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    /// Creates a zero-filled tensor with the given shape.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    pub fn from_array1(a: &Array1<f32>) -> Self {
        Self {
            shape: vec![a.len()],
            data: a.to_vec(),
        }
    }

    pub fn from_array2(a: &Array2<f32>) -> Self {
        let (r, c) = a.dim();
        Self {
            shape: vec![r, c],
            data: a.iter().copied().collect(),
        }
    }

    /// Reinterprets the buffer as a 1-d array.
    ///
    /// # Errors
    /// Returns `SnapshotError::ShapeMismatch` unless the tensor is 1-rank.
    pub fn to_array1(&self) -> Result<Array1<f32>, SnapshotError> {
        match self.shape.as_slice() {
            [_] => Ok(Array1::from_vec(self.data.clone())),
            _ => Err(SnapshotError::ShapeMismatch {
                what: "1-d tensor".to_string(),
                got: self.shape.clone(),
                expected: vec![self.data.len()],
            }),
        }
    }

    /// Reinterprets the buffer as a 2-d array.
    ///
    /// # Errors
    /// Returns `SnapshotError::ShapeMismatch` unless the tensor is 2-rank.
    pub fn to_array2(&self) -> Result<Array2<f32>, SnapshotError> {
        match self.shape.as_slice() {
            &[r, c] => Array2::from_shape_vec((r, c), self.data.clone()).map_err(|_| {
                SnapshotError::LengthMismatch {
                    what: "2-d tensor".to_string(),
                    got: self.data.len(),
                    expected: r * c,
                }
            }),
            _ => Err(SnapshotError::ShapeMismatch {
                what: "2-d tensor".to_string(),
                got: self.shape.clone(),
                expected: Vec::new(),
            }),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The flat row-major buffer.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// True for 0-rank tensors.
    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// An insertion-ordered mapping from layer name to [`Tensor`].
///
/// Snapshots are the exchange currency between the local trainer, the
/// aggregator, and the divergence tracker. A snapshot is never mutated
/// once the round that produced it hands it on; combining snapshots
/// always allocates a fresh one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightSnapshot {
    entries: Vec<(String, Tensor)>,
}

impl WeightSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a named tensor, preserving insertion order.
    ///
    /// # Errors
    /// Returns `SnapshotError::DuplicateLayer` when the name is taken.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Result<(), SnapshotError> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(SnapshotError::DuplicateLayer(name));
        }
        self.entries.push((name, tensor));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    /// Looks a layer up, failing with `MissingLayer` when absent.
    ///
    /// # Errors
    /// Returns `SnapshotError::MissingLayer`.
    pub fn require(&self, name: &str) -> Result<&Tensor, SnapshotError> {
        self.get(name)
            .ok_or_else(|| SnapshotError::MissingLayer(name.to_string()))
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
