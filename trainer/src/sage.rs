use fl_core::{ClientPartition, Tensor, WeightSnapshot};
use ndarray::{Array1, Array2, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::TrainError;

pub(crate) const LIN_SELF: &str = "conv1.lin_l.weight";
pub(crate) const LIN_NEIGH: &str = "conv1.lin_r.weight";
pub(crate) const BIAS1: &str = "conv1.bias";
pub(crate) const OUT_W: &str = "out.weight";
pub(crate) const OUT_B: &str = "out.bias";

/// A single mean-neighbor SAGE layer with a linear classification head.
///
/// When a partition carries no adjacency the neighbor term is zero and
/// only the self path contributes, mirroring how the hosted model falls
/// back to its `lin_l` path on edge-free client graphs.
#[derive(Debug, Clone)]
pub(crate) struct SageNet {
    pub(crate) lin_self: Array2<f32>,
    pub(crate) lin_neigh: Array2<f32>,
    pub(crate) bias1: Array1<f32>,
    pub(crate) out_w: Array2<f32>,
    pub(crate) out_b: Array1<f32>,
}

/// Gradients matching the network's parameter tensors.
pub(crate) struct SageGrads {
    pub(crate) lin_self: Array2<f32>,
    pub(crate) lin_neigh: Array2<f32>,
    pub(crate) bias1: Array1<f32>,
    pub(crate) out_w: Array2<f32>,
    pub(crate) out_b: Array1<f32>,
}

/// Cached activations from a forward pass, reused by the backward pass.
pub(crate) struct Activations {
    pre_act: Array2<f32>,
    hidden: Array2<f32>,
    pub(crate) logits: Array2<f32>,
}

fn xavier(rng: &mut StdRng, rows: usize, cols: usize) -> Array2<f32> {
    let bound = (6.0 / (rows + cols) as f32).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.random_range(-bound..bound))
}

impl SageNet {
    /// Creates a freshly initialized network.
    pub(crate) fn init(num_features: usize, hidden_dim: usize, num_classes: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self {
            lin_self: xavier(&mut rng, num_features, hidden_dim),
            lin_neigh: xavier(&mut rng, num_features, hidden_dim),
            bias1: Array1::zeros(hidden_dim),
            out_w: xavier(&mut rng, hidden_dim, num_classes),
            out_b: Array1::zeros(num_classes),
        }
    }

    /// Loads the network from a weight snapshot.
    ///
    /// # Errors
    /// Returns `TrainError` when a layer is missing or its shape does not
    /// match the expected dimensions.
    pub(crate) fn from_snapshot(
        snapshot: &WeightSnapshot,
        num_features: usize,
        hidden_dim: usize,
        num_classes: usize,
    ) -> Result<Self, TrainError> {
        let lin_self = snapshot.require(LIN_SELF)?.to_array2()?;
        let lin_neigh = snapshot.require(LIN_NEIGH)?.to_array2()?;
        let bias1 = snapshot.require(BIAS1)?.to_array1()?;
        let out_w = snapshot.require(OUT_W)?.to_array2()?;
        let out_b = snapshot.require(OUT_B)?.to_array1()?;

        for (what, got, expected) in [
            ("conv input width", lin_self.nrows(), num_features),
            ("conv hidden width", lin_self.ncols(), hidden_dim),
            ("neighbor input width", lin_neigh.nrows(), num_features),
            ("neighbor hidden width", lin_neigh.ncols(), hidden_dim),
            ("hidden bias", bias1.len(), hidden_dim),
            ("head input width", out_w.nrows(), hidden_dim),
            ("head output width", out_w.ncols(), num_classes),
            ("head bias", out_b.len(), num_classes),
        ] {
            if got != expected {
                return Err(TrainError::DimensionMismatch { what, got, expected });
            }
        }

        Ok(Self {
            lin_self,
            lin_neigh,
            bias1,
            out_w,
            out_b,
        })
    }

    /// Exports the parameters as an ordered snapshot.
    pub(crate) fn to_snapshot(&self) -> WeightSnapshot {
        let mut snap = WeightSnapshot::new();
        // Names are unique constants, inserts cannot collide.
        let _ = snap.insert(LIN_SELF, Tensor::from_array2(&self.lin_self));
        let _ = snap.insert(LIN_NEIGH, Tensor::from_array2(&self.lin_neigh));
        let _ = snap.insert(BIAS1, Tensor::from_array1(&self.bias1));
        let _ = snap.insert(OUT_W, Tensor::from_array2(&self.out_w));
        let _ = snap.insert(OUT_B, Tensor::from_array1(&self.out_b));
        snap
    }

    /// Per-node mean of in-neighbor features; zero rows for isolated nodes.
    pub(crate) fn neighbor_means(partition: &ClientPartition) -> Array2<f32> {
        let x = partition.features();
        let mut sums = Array2::<f32>::zeros(x.raw_dim());
        let mut counts = vec![0usize; x.nrows()];

        if let Some(edges) = partition.adjacency() {
            for &(src, dst) in edges {
                let row = x.row(src).to_owned();
                sums.row_mut(dst).zip_mut_with(&row, |a, b| *a += b);
                counts[dst] += 1;
            }
        }

        for (mut row, &count) in sums.axis_iter_mut(Axis(0)).zip(&counts) {
            if count > 0 {
                row.mapv_inplace(|v| v / count as f32);
            }
        }

        sums
    }

    /// Full-batch forward pass.
    pub(crate) fn forward(&self, x: &Array2<f32>, neigh: &Array2<f32>) -> Activations {
        let pre_act = x.dot(&self.lin_self) + neigh.dot(&self.lin_neigh) + &self.bias1;
        let hidden = pre_act.mapv(|v| v.max(0.0));
        let logits = hidden.dot(&self.out_w) + &self.out_b;
        Activations {
            pre_act,
            hidden,
            logits,
        }
    }

    /// Backward pass from a logit gradient; returns parameter gradients.
    pub(crate) fn backward(
        &self,
        x: &Array2<f32>,
        neigh: &Array2<f32>,
        acts: &Activations,
        d_logits: &Array2<f32>,
    ) -> SageGrads {
        let d_out_w = acts.hidden.t().dot(d_logits);
        let d_out_b = d_logits.sum_axis(Axis(0));

        let mut d_pre = d_logits.dot(&self.out_w.t());
        d_pre.zip_mut_with(&acts.pre_act, |g, &z| {
            if z <= 0.0 {
                *g = 0.0;
            }
        });

        SageGrads {
            lin_self: x.t().dot(&d_pre),
            lin_neigh: neigh.t().dot(&d_pre),
            bias1: d_pre.sum_axis(Axis(0)),
            out_w: d_out_w,
            out_b: d_out_b,
        }
    }
}

/// Class-weighted softmax cross-entropy over the masked rows.
///
/// Uses the weighted-mean reduction: the loss is the weight-scaled sum of
/// per-node log losses divided by the sum of the selected nodes' class
/// weights. Returns the loss together with the logit gradient (zero on
/// unmasked rows).
pub(crate) fn weighted_cross_entropy(
    logits: &Array2<f32>,
    labels: &[usize],
    mask: &[bool],
    class_weights: &[f32],
) -> (f32, Array2<f32>) {
    let mut d_logits = Array2::<f32>::zeros(logits.raw_dim());
    let mut weight_sum = 0.0_f32;

    for (i, &selected) in mask.iter().enumerate() {
        if selected {
            weight_sum += class_weights[labels[i]];
        }
    }
    if weight_sum == 0.0 {
        return (f32::NAN, d_logits);
    }

    let mut loss = 0.0_f32;
    for (i, &selected) in mask.iter().enumerate() {
        if !selected {
            continue;
        }
        let row = logits.row(i);
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exp: Vec<f32> = row.iter().map(|&v| (v - max).exp()).collect();
        let denom: f32 = exp.iter().sum();

        let label = labels[i];
        let w = class_weights[label];
        let p_label = exp[label] / denom;
        loss += w * -p_label.ln();

        let mut grad_row = d_logits.row_mut(i);
        for (c, g) in grad_row.iter_mut().enumerate() {
            let p = exp[c] / denom;
            let indicator = if c == label { 1.0 } else { 0.0 };
            *g = w / weight_sum * (p - indicator);
        }
    }

    (loss / weight_sum, d_logits)
}
