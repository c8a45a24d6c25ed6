use std::collections::BTreeMap;

use fl_core::WeightSnapshot;

/// Per-layer dissimilarity between a client's local weights and the
/// freshly aggregated global weights.
///
/// Each layer scores `1 − cosine_similarity` of the flattened tensors,
/// giving values in roughly `[0, 2]` (0 = same direction, 1 = orthogonal,
/// 2 = opposite). A layer is skipped when it is absent from the global
/// snapshot, when either side is a 0-rank scalar, or when shapes differ.
/// A zero-norm vector on either side scores exactly `1.0` rather than an
/// undefined cosine.
pub fn model_divergence(
    client: &WeightSnapshot,
    global: &WeightSnapshot,
) -> BTreeMap<String, f32> {
    let mut scores = BTreeMap::new();

    for (name, local) in client.iter() {
        let Some(counterpart) = global.get(name) else {
            log::debug!("layer {name} not present in the global weights, skipping divergence");
            continue;
        };
        if local.is_scalar() || counterpart.is_scalar() || local.shape() != counterpart.shape() {
            log::debug!("skipping divergence for layer {name}: scalar or shape mismatch");
            continue;
        }

        let dot: f32 = local
            .data()
            .iter()
            .zip(counterpart.data())
            .map(|(a, b)| a * b)
            .sum();
        let norm_local = local.data().iter().map(|v| v * v).sum::<f32>().sqrt();
        let norm_global = counterpart.data().iter().map(|v| v * v).sum::<f32>().sqrt();

        let score = if norm_local == 0.0 || norm_global == 0.0 {
            1.0
        } else {
            1.0 - dot / (norm_local * norm_global)
        };
        scores.insert(name.to_string(), score);
    }

    scores
}
