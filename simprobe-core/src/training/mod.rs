//! Training infrastructure: mini-batches, early stopping and the epoch loop.

pub mod batches;
pub mod early_stopping;
pub mod metrics;
pub mod trainer;

pub use batches::TripletBatches;
pub use early_stopping::{CheckOutcome, EarlyStopping};
pub use metrics::{StopReason, TrainingMetrics};
pub use trainer::{ProbeTrainer, TrainerSettings, TrainerState};
