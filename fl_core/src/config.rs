/// Hyperparameters for one simulated federated run.
///
/// Passed explicitly into the orchestrator at construction so that
/// concurrent runs with different settings stay isolated; there is no
/// process-wide configuration.
#[derive(Debug, Clone, Copy)]
pub struct SimulationConfig {
    /// Width of the hidden SAGE layer.
    pub hidden_dim: usize,
    /// Adam learning rate.
    pub learning_rate: f32,
    /// Additive L2 penalty applied to every parameter gradient.
    pub weight_decay: f32,
    /// Full-batch gradient steps each client takes per round.
    pub local_epochs: usize,
    /// Total federated rounds; fixed at run start.
    pub num_rounds: usize,
    /// Seed for parameter initialization.
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 32,
            learning_rate: 1e-3,
            weight_decay: 1e-3,
            local_epochs: 4,
            num_rounds: 8,
            seed: 30,
        }
    }
}
