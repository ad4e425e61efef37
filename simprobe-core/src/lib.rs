//! # simprobe-core: triplet odd-one-out probing of embeddings
//!
//! Measures how well an embedding of a fixed set of objects predicts human
//! odd-one-out judgments, and learns a linear transform of the embedding to
//! improve that fit under object-disjoint cross-validation.
//!
//! ## Pipeline
//!
//! 1. **Choice model** ([`choice`]): three pairwise similarities → softmax over
//!    which pair is most similar → loss, prediction, entropy
//! 2. **Linear probe** ([`probe`]): `X W`, optionally row-normalized, with an
//!    L2 penalty on `W`
//! 3. **Partitioner** ([`partition`]): K-fold over objects; triplets are kept
//!    only when all three objects fall on one side
//! 4. **Cross-validation** ([`cv`]): one fresh probe and optimizer per fold
//! 5. **Evaluation** ([`eval`]): zero-shot accuracy/entropy and RSA

// Foundation
pub mod config;
pub mod error;
pub mod matrix;

// Data
pub mod data;
pub mod triplets;

// Model
pub mod choice;
pub mod probe;

// Training and cross-validation
pub mod cv;
pub mod partition;
pub mod training;

// Evaluation and bookkeeping
pub mod eval;
pub mod registry;
pub mod results;

// Re-exports
pub use choice::{Choice, ChoiceModel, ChoiceSummary};
pub use config::{SimprobeConfig, load_config};
pub use cv::{CrossValidationResult, CrossValidator, FoldResult, FoldStatus};
pub use error::{ProbeError, ProbeResult};
pub use matrix::Matrix;
pub use partition::{Fold, KFold, TripletPartition, partition_triplets};
pub use probe::LinearProbe;
pub use registry::{ModelFamily, ModelRegistry};
pub use triplets::{Triplet, TripletSet};
