pub mod divergence;
mod error;
pub mod fedavg;
mod simulation;

use fl_core::{ClientPartition, SimulationConfig};
use storage::RunStore;
use trainer::SageTrainer;

pub use error::SimulationError;
pub use simulation::{RoundStream, RunResult, Simulation};

/// Runs a full federated simulation with the built-in trainer and
/// returns the completed result after committing its artifacts.
///
/// # Arguments
/// * `partitions` - One fixed data slice per client.
/// * `num_features` / `num_classes` - Model dimensions shared by all clients.
/// * `config` - Hyperparameters, including the round count.
/// * `store` - Artifact destination for the final commit.
/// * `run_id` - Optional run identifier scoping the artifacts.
///
/// # Errors
/// Returns a `SimulationError` for structural failures: no partitions, no
/// trainable partitions, or an aggregation shape mismatch.
pub fn simulate(
    partitions: Vec<ClientPartition>,
    num_features: usize,
    num_classes: usize,
    config: SimulationConfig,
    store: &RunStore,
    run_id: Option<&str>,
) -> Result<RunResult, SimulationError> {
    log::info!(
        "starting simulation: {} client(s), {} round(s)",
        partitions.len(),
        config.num_rounds
    );
    let trainer = SageTrainer::new(num_features, num_classes, config);
    Simulation::new(partitions, trainer, config)?.run(store, run_id)
}

/// Like [`simulate`], but returns a pull-driven stream yielding one
/// progress record per round. The final commit runs when the consumer
/// exhausts the stream; dropping it early abandons the run unpersisted.
///
/// # Errors
/// Fails upfront for the same structural reasons as [`simulate`].
pub fn simulate_streaming(
    partitions: Vec<ClientPartition>,
    num_features: usize,
    num_classes: usize,
    config: SimulationConfig,
    store: RunStore,
    run_id: Option<String>,
) -> Result<RoundStream<SageTrainer>, SimulationError> {
    log::info!(
        "starting streamed simulation: {} client(s), {} round(s)",
        partitions.len(),
        config.num_rounds
    );
    let trainer = SageTrainer::new(num_features, num_classes, config);
    Ok(Simulation::new(partitions, trainer, config)?.stream(store, run_id))
}
