use fl_core::{Tensor, WeightSnapshot};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};

use crate::StoreError;

/// Encodes a snapshot as safetensors bytes (f32 tensors with shapes).
///
/// # Errors
/// Returns `StoreError::Weights` when the container rejects a tensor.
pub fn encode_snapshot(snapshot: &WeightSnapshot) -> Result<Vec<u8>, StoreError> {
    let mut views = Vec::with_capacity(snapshot.len());
    for (name, tensor) in snapshot.iter() {
        let bytes: &[u8] = bytemuck::cast_slice(tensor.data());
        let view = TensorView::new(Dtype::F32, tensor.shape().to_vec(), bytes)
            .map_err(|e| StoreError::Weights(format!("layer {name}: {e:?}")))?;
        views.push((name.to_string(), view));
    }
    safetensors::serialize(views, &None).map_err(|e| StoreError::Weights(format!("{e:?}")))
}

/// Decodes safetensors bytes back into a snapshot.
///
/// Layer ordering follows the container; only `f32` tensors are accepted.
///
/// # Errors
/// Returns `StoreError::Weights` for container-level failures and
/// `StoreError::Snapshot` when the decoded tensors are inconsistent.
pub fn decode_snapshot(bytes: &[u8]) -> Result<WeightSnapshot, StoreError> {
    let parsed = SafeTensors::deserialize(bytes)
        .map_err(|e| StoreError::Weights(format!("{e:?}")))?;

    let mut snapshot = WeightSnapshot::new();
    for (name, view) in parsed.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(StoreError::Weights(format!(
                "layer {name} has dtype {:?}, expected F32",
                view.dtype()
            )));
        }
        let data: Vec<f32> = view
            .data()
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let tensor = Tensor::new(view.shape().to_vec(), data)?;
        snapshot.insert(name, tensor)?;
    }
    Ok(snapshot)
}
