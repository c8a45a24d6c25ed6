use fl_core::{ClientPartition, SimulationConfig};
use ndarray::Array2;
use orchestrator::simulate_streaming;
use rand::{rngs::StdRng, Rng, SeedableRng};
use storage::{mint_run_id, HttpBlobStore, RunStore};

/// Builds a small synthetic two-class partition with a noisy linear
/// decision boundary; demo stand-in for real client data.
fn synthetic_partition(rng: &mut StdRng, nodes: usize, trainable: bool) -> ClientPartition {
    let features = Array2::from_shape_fn((nodes, 4), |(i, _)| {
        let center = if i % 2 == 0 { 1.5 } else { -1.5 };
        center + rng.random_range(-0.5..0.5)
    });
    let labels: Vec<usize> = (0..nodes).map(|i| i % 2).collect();
    let split = nodes * 3 / 4;
    let train_mask: Vec<bool> = (0..nodes).map(|i| trainable && i < split).collect();
    let val_mask: Vec<bool> = (0..nodes).map(|i| i >= split).collect();

    // Ring adjacency so the SAGE layer has neighbors to average.
    let edges: Vec<(usize, usize)> = (0..nodes).map(|i| (i, (i + 1) % nodes)).collect();

    ClientPartition::new(features, labels, Some(edges), train_mask, val_mask, vec![1.0, 1.0])
        .expect("synthetic partition is well-formed")
}

fn main() {
    env_logger::init();

    let mut rng = StdRng::seed_from_u64(42);
    let partitions = vec![
        synthetic_partition(&mut rng, 24, true),
        synthetic_partition(&mut rng, 16, true),
        synthetic_partition(&mut rng, 12, false),
    ];

    let config = SimulationConfig {
        num_rounds: 4,
        ..SimulationConfig::default()
    };

    let store = match HttpBlobStore::from_env() {
        Some(remote) => RunStore::with_remote("saved_models", std::sync::Arc::new(remote)),
        None => RunStore::new("saved_models"),
    };

    let run_id = mint_run_id();
    let stream = simulate_streaming(partitions, 4, 2, config, store, Some(run_id.clone()))
        .expect("simulation setup");

    for item in stream {
        match item {
            Ok(progress) => {
                let line = serde_json::to_string(&progress).expect("progress serializes");
                println!("{line}");
            }
            Err(e) => {
                eprintln!("run {run_id} aborted: {e}");
                std::process::exit(1);
            }
        }
    }
    println!("run {run_id} committed");
}
