mod adam;
mod error;
mod local;
mod sage;

pub use error::TrainError;
pub use local::{LocalFit, LocalTrainer, SageTrainer};
