use std::collections::BTreeMap;

use fl_core::{
    ClientLosses, ClientPartition, ProgressRecord, RoundRecord, SimulationConfig, WeightSnapshot,
};
use storage::RunStore;
use trainer::LocalTrainer;

use crate::{divergence, fedavg, SimulationError};

/// Everything a completed run produced in memory.
#[derive(Debug)]
pub struct RunResult {
    pub run_id: Option<String>,
    pub global_weights: WeightSnapshot,
    pub history: Vec<RoundRecord>,
    /// Per client, per round; `NaN` marks rounds without a contribution.
    pub client_train_losses: Vec<Vec<f32>>,
    pub client_val_losses: Vec<Vec<f32>>,
}

fn nan_mean<I: Iterator<Item = f32>>(values: I) -> f32 {
    let mut sum = 0.0_f32;
    let mut count = 0usize;
    for v in values {
        if v.is_finite() {
            sum += v;
            count += 1;
        }
    }
    if count == 0 {
        f32::NAN
    } else {
        sum / count as f32
    }
}

/// The round state machine: `Initialized → Round(1) … Round(N)`.
///
/// Owns all run state (global weights, loss history, divergence
/// history) exclusively, so no synchronization is needed; clients within a
/// round and rounds themselves run strictly sequentially.
#[derive(Debug)]
pub struct Simulation<T: LocalTrainer> {
    trainer: T,
    partitions: Vec<ClientPartition>,
    config: SimulationConfig,
    global_weights: WeightSnapshot,
    history: Vec<RoundRecord>,
    client_train_losses: Vec<Vec<f32>>,
    client_val_losses: Vec<Vec<f32>>,
    client_models: Vec<Option<WeightSnapshot>>,
    completed_rounds: usize,
}

impl<T: LocalTrainer> Simulation<T> {
    /// Validates the run's structural preconditions and mints the initial
    /// global weights.
    ///
    /// # Errors
    /// `SimulationError::NoPartitions` for an empty partition list;
    /// `SimulationError::NoTrainableClients` when no partition has any
    /// training samples (masks are fixed for the run, so nothing could
    /// ever contribute).
    pub fn new(
        partitions: Vec<ClientPartition>,
        trainer: T,
        config: SimulationConfig,
    ) -> Result<Self, SimulationError> {
        if partitions.is_empty() {
            return Err(SimulationError::NoPartitions);
        }
        if !partitions.iter().any(ClientPartition::is_trainable) {
            return Err(SimulationError::NoTrainableClients);
        }

        let clients = partitions.len();
        let global_weights = trainer.initial_weights();
        Ok(Self {
            trainer,
            partitions,
            config,
            global_weights,
            history: Vec::with_capacity(config.num_rounds),
            client_train_losses: vec![Vec::new(); clients],
            client_val_losses: vec![Vec::new(); clients],
            client_models: vec![None; clients],
            completed_rounds: 0,
        })
    }

    pub fn num_clients(&self) -> usize {
        self.partitions.len()
    }

    pub fn global_weights(&self) -> &WeightSnapshot {
        &self.global_weights
    }

    pub fn history(&self) -> &[RoundRecord] {
        &self.history
    }

    fn is_done(&self) -> bool {
        self.completed_rounds >= self.config.num_rounds
    }

    /// Executes one round: local fits, aggregation, divergence scoring,
    /// history append.
    fn run_round(&mut self) -> Result<(), SimulationError> {
        let round = self.completed_rounds + 1;
        let final_round = round == self.config.num_rounds;
        log::info!("federated round {round}/{}", self.config.num_rounds);

        let mut local_states: Vec<WeightSnapshot> = Vec::new();
        let mut trained_clients: Vec<usize> = Vec::new();

        for (idx, partition) in self.partitions.iter().enumerate() {
            let client_id = idx + 1;
            if !partition.is_trainable() {
                log::warn!("client {client_id} has no training data, skipping this round");
                self.client_train_losses[idx].push(f32::NAN);
                self.client_val_losses[idx].push(f32::NAN);
                continue;
            }

            match self.trainer.train(&self.global_weights, partition) {
                Ok(fit) => {
                    self.client_train_losses[idx].push(fit.train_loss);
                    self.client_val_losses[idx].push(fit.val_loss);
                    if final_round {
                        self.client_models[idx] = Some(fit.weights.clone());
                    }
                    local_states.push(fit.weights);
                    trained_clients.push(idx);
                }
                Err(e) => {
                    // One failing client must not abort the round.
                    log::warn!("client {client_id} failed its local fit, excluding it: {e}");
                    self.client_train_losses[idx].push(f32::NAN);
                    self.client_val_losses[idx].push(f32::NAN);
                }
            }
        }

        if local_states.is_empty() {
            log::warn!("no clients participated in this round, global model state not updated");
        } else {
            self.global_weights = fedavg::aggregate(&local_states)?;
        }

        // Running snapshot: every client's latest validation loss so far.
        let global_loss = nan_mean(
            self.client_val_losses
                .iter()
                .filter_map(|losses| losses.last().copied()),
        );

        let mut client_divergence = BTreeMap::new();
        for (&idx, local) in trained_clients.iter().zip(&local_states) {
            client_divergence.insert(
                format!("client_{}", idx + 1),
                divergence::model_divergence(local, &self.global_weights),
            );
        }

        let mut client_losses = BTreeMap::new();
        for idx in 0..self.partitions.len() {
            client_losses.insert(
                format!("client_{}", idx + 1),
                ClientLosses {
                    train_loss: self.client_train_losses[idx][round - 1],
                    val_loss: self.client_val_losses[idx][round - 1],
                },
            );
        }

        self.history.push(RoundRecord {
            round,
            global_loss,
            client_divergence,
            client_losses,
        });
        self.completed_rounds = round;
        Ok(())
    }

    fn progress(&self, run_id: Option<&str>) -> ProgressRecord {
        let round = self.completed_rounds;
        let latest = |per_client: &[Vec<f32>]| {
            per_client
                .iter()
                .enumerate()
                .map(|(idx, losses)| {
                    let last = losses.last().copied().unwrap_or(f32::NAN);
                    ((idx + 1).to_string(), last)
                })
                .collect::<BTreeMap<_, _>>()
        };

        ProgressRecord {
            round,
            global_loss: self.history[round - 1].global_loss,
            client_val: latest(&self.client_val_losses),
            client_train: latest(&self.client_train_losses),
            run_id: run_id.map(str::to_string),
        }
    }

    fn commit(&self, store: &RunStore, run_id: Option<&str>) -> Result<(), SimulationError> {
        store.commit(
            run_id,
            &self.global_weights,
            &self.client_models,
            self.config.num_rounds,
            &self.history,
        )?;
        Ok(())
    }

    fn into_result(self, run_id: Option<String>) -> RunResult {
        RunResult {
            run_id,
            global_weights: self.global_weights,
            history: self.history,
            client_train_losses: self.client_train_losses,
            client_val_losses: self.client_val_losses,
        }
    }

    /// Runs every round to completion and commits the artifacts.
    ///
    /// A commit failure is logged and does not discard the completed
    /// in-memory result; callers can retry persistence via the store.
    ///
    /// # Errors
    /// Returns the first structural failure encountered by a round.
    pub fn run(
        mut self,
        store: &RunStore,
        run_id: Option<&str>,
    ) -> Result<RunResult, SimulationError> {
        while !self.is_done() {
            self.run_round()?;
        }
        if let Err(e) = self.commit(store, run_id) {
            log::error!("failed to persist run artifacts: {e}");
        }
        Ok(self.into_result(run_id.map(str::to_string)))
    }

    /// Turns the simulation into a pull-driven stream of round progress.
    ///
    /// The final commit happens on the pull *after* the last round; a
    /// consumer that stops pulling abandons the run and nothing is
    /// persisted.
    pub fn stream(self, store: RunStore, run_id: Option<String>) -> RoundStream<T> {
        RoundStream {
            simulation: self,
            store,
            run_id,
            committed: false,
            failed: false,
        }
    }
}

/// Cooperative streaming over a running simulation: one
/// [`ProgressRecord`] per completed round, pulled by the consumer.
///
/// Dropping the stream before exhaustion leaves the run unpersisted by
/// design; there is no other cancellation primitive.
pub struct RoundStream<T: LocalTrainer> {
    simulation: Simulation<T>,
    store: RunStore,
    run_id: Option<String>,
    committed: bool,
    failed: bool,
}

impl<T: LocalTrainer> RoundStream<T> {
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }
}

impl<T: LocalTrainer> Iterator for RoundStream<T> {
    type Item = Result<ProgressRecord, SimulationError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.committed {
            return None;
        }

        if !self.simulation.is_done() {
            return match self.simulation.run_round() {
                Ok(()) => Some(Ok(self.simulation.progress(self.run_id.as_deref()))),
                Err(e) => {
                    self.failed = true;
                    Some(Err(e))
                }
            };
        }

        self.committed = true;
        match self.simulation.commit(&self.store, self.run_id.as_deref()) {
            Ok(()) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use fl_core::Tensor;
    use ndarray::Array2;
    use storage::MemoryBlobStore;
    use trainer::{LocalFit, SageTrainer, TrainError};

    use super::*;

    static DIR_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn temp_store(tag: &str) -> (RunStore, PathBuf) {
        let n = DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "fl_sim_{tag}_{}_{n}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&root);
        (RunStore::new(root.clone()), root)
    }

    fn partition(trainable: bool, bias: f32) -> ClientPartition {
        let features = Array2::from_shape_fn((6, 2), |(i, j)| {
            let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
            sign * (j as f32 + 1.0) + bias
        });
        let labels: Vec<usize> = (0..6).map(|i| i % 2).collect();
        let train_mask: Vec<bool> = (0..6).map(|i| trainable && i < 4).collect();
        let val_mask: Vec<bool> = (0..6).map(|i| i >= 4).collect();
        ClientPartition::new(features, labels, None, train_mask, val_mask, vec![1.0, 1.0])
            .unwrap()
    }

    fn sage_trainer(rounds: usize) -> (SageTrainer, SimulationConfig) {
        let config = SimulationConfig {
            hidden_dim: 4,
            learning_rate: 0.05,
            weight_decay: 0.0,
            local_epochs: 2,
            num_rounds: rounds,
            seed: 3,
        };
        (SageTrainer::new(2, 2, config), config)
    }

    /// A trainer whose behavior per fit is scripted, for exercising the
    /// orchestrator without real gradient math.
    #[derive(Debug)]
    struct ScriptedTrainer {
        fail_all: bool,
    }

    impl LocalTrainer for ScriptedTrainer {
        fn initial_weights(&self) -> WeightSnapshot {
            let mut snap = WeightSnapshot::new();
            snap.insert("w", Tensor::new(vec![2], vec![1.0, -1.0]).unwrap())
                .unwrap();
            snap
        }

        fn train(
            &self,
            weights: &WeightSnapshot,
            _partition: &ClientPartition,
        ) -> Result<LocalFit, TrainError> {
            if self.fail_all {
                return Err(TrainError::InvalidInput("scripted failure"));
            }
            let mut shifted = WeightSnapshot::new();
            let layer = weights.get("w").unwrap();
            let data: Vec<f32> = layer.data().iter().map(|v| v + 1.0).collect();
            shifted
                .insert("w", Tensor::new(vec![2], data).unwrap())
                .unwrap();
            Ok(LocalFit {
                weights: shifted,
                train_loss: 0.5,
                val_loss: 0.4,
            })
        }
    }

    #[test]
    fn test_empty_partition_list_is_fatal() {
        let (trainer, config) = sage_trainer(1);
        let err = Simulation::new(Vec::new(), trainer, config).unwrap_err();
        assert!(matches!(err, SimulationError::NoPartitions));
    }

    #[test]
    fn test_all_untrainable_is_fatal() {
        let (trainer, config) = sage_trainer(1);
        let partitions = vec![partition(false, 0.0), partition(false, 1.0)];
        let err = Simulation::new(partitions, trainer, config).unwrap_err();
        assert!(matches!(err, SimulationError::NoTrainableClients));
    }

    #[test]
    fn test_run_without_validation_commits_a_readable_divergence_file() {
        // Trainable clients with empty validation masks pass setup, so a
        // committed run can carry NaN global losses. The persisted
        // document must still load.
        let (trainer, config) = sage_trainer(1);
        let (store, _) = temp_store("no_val");
        let features = Array2::from_shape_vec((2, 2), vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        let partitions = vec![ClientPartition::new(
            features,
            vec![0, 1],
            None,
            vec![true, true],
            vec![false, false],
            vec![1.0, 1.0],
        )
        .unwrap()];

        let result = Simulation::new(partitions, trainer, config)
            .unwrap()
            .run(&store, Some("run_no_val"))
            .unwrap();
        assert!(result.history[0].global_loss.is_nan());

        let loaded = store.load_divergence(Some("run_no_val")).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].global_loss.is_nan());
        assert!(loaded[0].client_divergence.contains_key("client_1"));
    }

    #[test]
    fn test_history_rounds_are_monotonic() {
        let (trainer, config) = sage_trainer(3);
        let (store, _) = temp_store("monotonic");
        let partitions = vec![partition(true, 0.0), partition(true, 0.5)];

        let result = Simulation::new(partitions, trainer, config)
            .unwrap()
            .run(&store, None)
            .unwrap();

        assert_eq!(result.history.len(), 3);
        let rounds: Vec<usize> = result.history.iter().map(|r| r.round).collect();
        assert_eq!(rounds, vec![1, 2, 3]);
    }

    #[test]
    fn test_failed_round_keeps_global_weights_bit_identical() {
        let config = SimulationConfig {
            num_rounds: 1,
            ..SimulationConfig::default()
        };
        let (store, _) = temp_store("frozen");
        let trainer = ScriptedTrainer { fail_all: true };
        let initial = trainer.initial_weights();

        let result = Simulation::new(vec![partition(true, 0.0)], trainer, config)
            .unwrap()
            .run(&store, None)
            .unwrap();

        assert_eq!(result.global_weights, initial);
        assert_eq!(result.history.len(), 1);
        assert!(result.history[0].client_divergence.is_empty());
        assert!(result.client_train_losses[0][0].is_nan());
        assert!(result.client_val_losses[0][0].is_nan());
    }

    #[test]
    fn test_scripted_aggregation_and_divergence_keying() {
        let config = SimulationConfig {
            num_rounds: 1,
            ..SimulationConfig::default()
        };
        let (store, _) = temp_store("keying");
        // Client 2 is untrainable: divergence must be keyed client_1 and
        // client_3, never renumbered around the gap.
        let partitions = vec![partition(true, 0.0), partition(false, 0.0), partition(true, 0.0)];

        let result = Simulation::new(partitions, ScriptedTrainer { fail_all: false }, config)
            .unwrap()
            .run(&store, None)
            .unwrap();

        let record = &result.history[0];
        let keys: Vec<&str> = record
            .client_divergence
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, ["client_1", "client_3"]);
        // Both clients shift identically, so their average equals each
        // local state and divergence is 0 for the only layer.
        assert!(record.client_divergence["client_1"]["w"].abs() < 1e-6);
        assert_eq!(
            result.global_weights.get("w").unwrap().data(),
            &[2.0, 0.0]
        );
    }

    #[test]
    fn test_streaming_end_to_end_with_one_empty_client() {
        let (trainer, config) = sage_trainer(2);
        let (_, root) = temp_store("e2e");
        let remote = Arc::new(MemoryBlobStore::new());
        let store = RunStore::with_remote(root.clone(), remote.clone());

        let partitions = vec![partition(true, 0.0), partition(true, 0.3), partition(false, 0.0)];
        let stream = Simulation::new(partitions, trainer, config)
            .unwrap()
            .stream(store, Some("run_e2e".to_string()));

        let records: Vec<ProgressRecord> = stream.map(|item| item.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].round, 1);
        assert_eq!(records[1].round, 2);

        for record in &records {
            // Two contributing clients, one NaN entry for the empty one.
            assert!(record.client_train["1"].is_finite());
            assert!(record.client_train["2"].is_finite());
            assert!(record.client_train["3"].is_nan());
            assert!(record.client_val["3"].is_nan());
            assert!(record.global_loss.is_finite());
            assert_eq!(record.run_id.as_deref(), Some("run_e2e"));
        }

        // Exhausting the stream committed the run.
        let verify = RunStore::with_remote(root, remote.clone());
        assert!(verify.is_ready("run_e2e"));
        let metadata = verify.load_metadata(Some("run_e2e")).unwrap();
        assert_eq!(metadata.num_clients, 3);
        assert_eq!(metadata.num_rounds, 2);

        let history = verify.load_divergence(Some("run_e2e")).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].client_divergence.len(), 2);
        assert!(!history[0].client_divergence.contains_key("client_3"));

        // The final round retained only the clients that trained.
        assert!(remote.contains("saved_models/run_e2e/client_1_model.pt"));
        assert!(remote.contains("saved_models/run_e2e/client_2_model.pt"));
        assert!(!remote.contains("saved_models/run_e2e/client_3_model.pt"));
    }

    #[test]
    fn test_abandoned_stream_commits_nothing() {
        let (trainer, config) = sage_trainer(3);
        let (store, root) = temp_store("abandoned");

        let partitions = vec![partition(true, 0.0)];
        let mut stream = Simulation::new(partitions, trainer, config)
            .unwrap()
            .stream(store, Some("run_dropped".to_string()));

        // Consumer pulls one round, then walks away.
        assert!(stream.next().unwrap().is_ok());
        drop(stream);

        let verify = RunStore::new(root);
        assert!(!verify.is_ready("run_dropped"));
    }

    #[test]
    fn test_global_loss_uses_latest_known_val_losses() {
        let config = SimulationConfig {
            num_rounds: 2,
            ..SimulationConfig::default()
        };
        let (store, _) = temp_store("nanmean");
        let partitions = vec![partition(true, 0.0), partition(false, 0.0)];

        let result = Simulation::new(partitions, ScriptedTrainer { fail_all: false }, config)
            .unwrap()
            .run(&store, None)
            .unwrap();

        // The untrainable client contributes NaN and is ignored by the
        // running mean, leaving exactly the scripted val loss.
        for record in &result.history {
            assert!((record.global_loss - 0.4).abs() < 1e-6);
        }
    }
}
