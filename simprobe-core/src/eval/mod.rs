//! Scoring fixed embeddings against human data, without partitioning.
//!
//! - [`zero_shot`]: odd-one-out choice accuracy and entropy of raw similarities
//! - [`rsa`]: representational similarity analysis against a human RDM

pub mod rsa;
pub mod zero_shot;

pub use rsa::{Correlation, Rdm, RsaScores, center_features, compute_rdm, correlate_rdms, correlation_matrix, rsa};
pub use zero_shot::{ZeroShotEvaluation, evaluate_embedding, similarity_matrix};
