use fl_core::{ClientPartition, SimulationConfig, WeightSnapshot};
use ndarray::{Array, Dimension};

use crate::adam::Adam;
use crate::sage::{weighted_cross_entropy, SageNet};
use crate::TrainError;

/// The result of one local fit: new weights plus the losses observed.
///
/// Both losses are `NaN` when the client contributed nothing.
#[derive(Debug, Clone)]
pub struct LocalFit {
    pub weights: WeightSnapshot,
    pub train_loss: f32,
    pub val_loss: f32,
}

/// The training-policy boundary between the round loop and the model.
///
/// The orchestrator treats implementations as a black box that maps a
/// global weight snapshot and a partition to a locally fitted snapshot.
/// Everything model-specific (architecture, loss, optimizer) lives
/// behind this trait.
pub trait LocalTrainer {
    /// Mints the initial global weights for round one.
    fn initial_weights(&self) -> WeightSnapshot;

    /// Runs one client's local fit starting from `weights`.
    ///
    /// A partition with no training samples is a skip, not an error: the
    /// input weights come back unchanged with `NaN` losses.
    ///
    /// # Errors
    /// Returns `TrainError` when the snapshot or partition is structurally
    /// incompatible with the trainer.
    fn train(
        &self,
        weights: &WeightSnapshot,
        partition: &ClientPartition,
    ) -> Result<LocalFit, TrainError>;
}

/// The built-in GraphSAGE-lite trainer.
///
/// Performs `local_epochs` full-batch Adam steps under a class-weighted
/// softmax cross-entropy, then a single gradient-free evaluation on the
/// validation mask. The recorded train loss is the final epoch's, not an
/// average.
#[derive(Debug, Clone)]
pub struct SageTrainer {
    num_features: usize,
    num_classes: usize,
    config: SimulationConfig,
}

fn grad_slice<D: Dimension>(tensor: &Array<f32, D>) -> Result<&[f32], TrainError> {
    tensor
        .as_slice()
        .ok_or(TrainError::InvalidInput("gradient tensor is not contiguous"))
}

fn param_slice_mut<D: Dimension>(tensor: &mut Array<f32, D>) -> Result<&mut [f32], TrainError> {
    tensor
        .as_slice_mut()
        .ok_or(TrainError::InvalidInput("parameter tensor is not contiguous"))
}

impl SageTrainer {
    pub fn new(num_features: usize, num_classes: usize, config: SimulationConfig) -> Self {
        Self {
            num_features,
            num_classes,
            config,
        }
    }

    fn check_dims(&self, partition: &ClientPartition) -> Result<(), TrainError> {
        if partition.num_features() != self.num_features {
            return Err(TrainError::DimensionMismatch {
                what: "partition feature width",
                got: partition.num_features(),
                expected: self.num_features,
            });
        }
        if partition.num_classes() != self.num_classes {
            return Err(TrainError::DimensionMismatch {
                what: "partition class count",
                got: partition.num_classes(),
                expected: self.num_classes,
            });
        }
        Ok(())
    }
}

impl LocalTrainer for SageTrainer {
    fn initial_weights(&self) -> WeightSnapshot {
        SageNet::init(
            self.num_features,
            self.config.hidden_dim,
            self.num_classes,
            self.config.seed,
        )
        .to_snapshot()
    }

    fn train(
        &self,
        weights: &WeightSnapshot,
        partition: &ClientPartition,
    ) -> Result<LocalFit, TrainError> {
        self.check_dims(partition)?;

        if !partition.is_trainable() {
            log::warn!("skipping training for a client with no training samples");
            return Ok(LocalFit {
                weights: weights.clone(),
                train_loss: f32::NAN,
                val_loss: f32::NAN,
            });
        }

        let mut net = SageNet::from_snapshot(
            weights,
            self.num_features,
            self.config.hidden_dim,
            self.num_classes,
        )?;

        let x = partition.features();
        let neigh = SageNet::neighbor_means(partition);

        let mut opt_lin_self = Adam::new(
            net.lin_self.len(),
            self.config.learning_rate,
            self.config.weight_decay,
        );
        let mut opt_lin_neigh = Adam::new(
            net.lin_neigh.len(),
            self.config.learning_rate,
            self.config.weight_decay,
        );
        let mut opt_bias1 = Adam::new(
            net.bias1.len(),
            self.config.learning_rate,
            self.config.weight_decay,
        );
        let mut opt_out_w = Adam::new(
            net.out_w.len(),
            self.config.learning_rate,
            self.config.weight_decay,
        );
        let mut opt_out_b = Adam::new(
            net.out_b.len(),
            self.config.learning_rate,
            self.config.weight_decay,
        );

        let mut train_loss = f32::NAN;
        for _ in 0..self.config.local_epochs {
            let acts = net.forward(x, &neigh);
            let (loss, d_logits) = weighted_cross_entropy(
                &acts.logits,
                partition.labels(),
                partition.train_mask(),
                partition.class_weights(),
            );
            train_loss = loss;

            let grads = net.backward(x, &neigh, &acts, &d_logits);
            opt_lin_self.step(
                grad_slice(&grads.lin_self)?,
                param_slice_mut(&mut net.lin_self)?,
            );
            opt_lin_neigh.step(
                grad_slice(&grads.lin_neigh)?,
                param_slice_mut(&mut net.lin_neigh)?,
            );
            opt_bias1.step(grad_slice(&grads.bias1)?, param_slice_mut(&mut net.bias1)?);
            opt_out_w.step(grad_slice(&grads.out_w)?, param_slice_mut(&mut net.out_w)?);
            opt_out_b.step(grad_slice(&grads.out_b)?, param_slice_mut(&mut net.out_b)?);
        }

        let val_loss = if partition.has_validation() {
            let acts = net.forward(x, &neigh);
            let (loss, _) = weighted_cross_entropy(
                &acts.logits,
                partition.labels(),
                partition.val_mask(),
                partition.class_weights(),
            );
            loss
        } else {
            log::warn!("skipping validation for a client with no validation samples");
            f32::NAN
        };

        Ok(LocalFit {
            weights: net.to_snapshot(),
            train_loss,
            val_loss,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn separable_partition() -> ClientPartition {
        // Two linearly separable clusters, half train / half validation.
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..8 {
            let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
            rows.extend_from_slice(&[sign * 2.0, sign * -1.0]);
            labels.push(if i % 2 == 0 { 0 } else { 1 });
        }
        let features = Array2::from_shape_vec((8, 2), rows).unwrap();
        let train_mask: Vec<bool> = (0..8).map(|i| i < 6).collect();
        let val_mask: Vec<bool> = (0..8).map(|i| i >= 6).collect();
        ClientPartition::new(features, labels, None, train_mask, val_mask, vec![1.0, 1.0])
            .unwrap()
    }

    fn trainer(local_epochs: usize) -> SageTrainer {
        let config = SimulationConfig {
            hidden_dim: 8,
            learning_rate: 0.05,
            weight_decay: 0.0,
            local_epochs,
            num_rounds: 1,
            seed: 11,
        };
        SageTrainer::new(2, 2, config)
    }

    #[test]
    fn test_untrainable_partition_returns_input_weights_and_nan() {
        let partition = ClientPartition::new(
            Array2::zeros((3, 2)),
            vec![0, 1, 0],
            None,
            vec![false, false, false],
            vec![false, true, false],
            vec![1.0, 1.0],
        )
        .unwrap();

        let trainer = trainer(4);
        let start = trainer.initial_weights();
        let fit = trainer.train(&start, &partition).unwrap();

        assert_eq!(fit.weights, start);
        assert!(fit.train_loss.is_nan());
        assert!(fit.val_loss.is_nan());
    }

    #[test]
    fn test_training_reduces_loss_on_separable_data() {
        let partition = separable_partition();
        let trainer_short = trainer(1);
        let trainer_long = trainer(200);
        let start = trainer_short.initial_weights();

        let first = trainer_short.train(&start, &partition).unwrap();
        let fitted = trainer_long.train(&start, &partition).unwrap();

        assert!(fitted.train_loss < first.train_loss);
        assert!(fitted.val_loss.is_finite());
        assert_ne!(fitted.weights, start);
    }

    #[test]
    fn test_missing_validation_samples_yield_nan_val_loss() {
        let partition = ClientPartition::new(
            Array2::from_shape_vec((2, 2), vec![1.0, 0.0, 0.0, 1.0]).unwrap(),
            vec![0, 1],
            None,
            vec![true, true],
            vec![false, false],
            vec![1.0, 1.0],
        )
        .unwrap();

        let trainer = trainer(2);
        let fit = trainer.train(&trainer.initial_weights(), &partition).unwrap();
        assert!(fit.train_loss.is_finite());
        assert!(fit.val_loss.is_nan());
    }

    #[test]
    fn test_non_contiguous_tensors_are_an_error_not_a_panic() {
        let transposed = Array2::<f32>::zeros((2, 3)).reversed_axes();
        assert!(matches!(
            grad_slice(&transposed),
            Err(TrainError::InvalidInput(_))
        ));

        let mut transposed = Array2::<f32>::zeros((2, 3)).reversed_axes();
        assert!(matches!(
            param_slice_mut(&mut transposed),
            Err(TrainError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_feature_width_mismatch_is_an_error() {
        let partition = separable_partition();
        let trainer = SageTrainer::new(5, 2, SimulationConfig::default());
        let err = trainer
            .train(&trainer.initial_weights(), &partition)
            .unwrap_err();
        assert!(matches!(err, TrainError::DimensionMismatch { .. }));
    }
}
