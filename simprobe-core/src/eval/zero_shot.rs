//! Zero-shot odd-one-out evaluation of a fixed embedding.

use crate::choice::{ChoiceModel, Similarities, dot};
use crate::config::Distance;
use crate::error::{ProbeError, ProbeResult};
use crate::matrix::Matrix;
use crate::triplets::{ODD_ONE_OUT_POSITION, Triplet, TripletSet};
use serde::{Deserialize, Serialize};

/// Choice statistics of an untrained embedding over a full triplet set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZeroShotEvaluation {
    pub temperature: f64,
    pub distance: Distance,
    /// Predicted odd-one-out position per triplet, `-1` on ties.
    pub choices: Vec<i64>,
    pub probabilities: Vec<Similarities>,
    pub accuracy: f64,
    pub entropies: Vec<f64>,
    pub mean_entropy: f64,
    /// Triplets whose predicted odd-one-out differs from the human one.
    pub failures: Vec<Triplet>,
}

impl ZeroShotEvaluation {
    pub fn n_failures(&self) -> usize {
        self.failures.len()
    }
}

/// Pairwise similarity of every object pair: cosine similarity, or negative
/// Euclidean distance.
pub fn similarity_matrix(features: &Matrix, distance: Distance) -> Matrix {
    let scorer = PairScorer::new(features, distance);
    let n = features.rows();
    let mut out = Matrix::zeros(n, n);
    for i in 0..n {
        for j in i..n {
            let s = scorer.score(i, j);
            out.set(i, j, s);
            out.set(j, i, s);
        }
    }
    out
}

/// Predict the odd-one-out of every triplet from the raw similarities of
/// `features` and compare against the human answer.
pub fn evaluate_embedding(
    features: &Matrix,
    triplets: &TripletSet,
    temperature: f64,
    distance: Distance,
) -> ProbeResult<ZeroShotEvaluation> {
    if features.rows() != triplets.n_objects() {
        return Err(ProbeError::shape(format!(
            "{} feature rows for a universe of {} objects",
            features.rows(),
            triplets.n_objects()
        )));
    }
    if !features.is_finite() {
        return Err(ProbeError::invalid_input("features contain non-finite values"));
    }
    let model = ChoiceModel::new(temperature)?;
    let scorer = PairScorer::new(features, distance);

    let sims: Vec<Similarities> = triplets
        .iter()
        .map(|t| [scorer.score(t.i, t.j), scorer.score(t.i, t.k), scorer.score(t.j, t.k)])
        .collect();
    let summary = model.summarize(&sims);
    let choices = summary.odd_one_out_choices();
    let failures = triplets
        .iter()
        .zip(&choices)
        .filter(|(_, c)| **c != ODD_ONE_OUT_POSITION as i64)
        .map(|(t, _)| *t)
        .collect::<Vec<_>>();

    tracing::info!(
        triplets = triplets.len(),
        accuracy = summary.accuracy,
        mean_entropy = summary.mean_entropy,
        failures = failures.len(),
        "zero-shot evaluation complete"
    );
    Ok(ZeroShotEvaluation {
        temperature,
        distance,
        choices,
        probabilities: summary.probabilities,
        accuracy: summary.accuracy,
        entropies: summary.entropies,
        mean_entropy: summary.mean_entropy,
        failures,
    })
}

struct PairScorer<'a> {
    features: &'a Matrix,
    distance: Distance,
    norms: Vec<f64>,
}

impl<'a> PairScorer<'a> {
    fn new(features: &'a Matrix, distance: Distance) -> Self {
        let norms = match distance {
            Distance::Cosine => (0..features.rows())
                .map(|i| dot(features.row(i), features.row(i)).sqrt())
                .collect(),
            Distance::Euclidean => Vec::new(),
        };
        Self {
            features,
            distance,
            norms,
        }
    }

    fn score(&self, a: usize, b: usize) -> f64 {
        let (x, y) = (self.features.row(a), self.features.row(b));
        match self.distance {
            Distance::Cosine => {
                let denom = self.norms[a] * self.norms[b];
                // Zero vectors are dissimilar to everything.
                if denom == 0.0 { 0.0 } else { dot(x, y) / denom }
            }
            Distance::Euclidean => -x
                .iter()
                .zip(y)
                .map(|(p, q)| (p - q).powi(2))
                .sum::<f64>()
                .sqrt(),
        }
    }
}
