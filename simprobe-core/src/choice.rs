//! Triplet choice model.
//!
//! Turns the three pairwise similarities of a triplet into a categorical
//! distribution over which pair is the most similar, a cross-entropy loss and a
//! predicted choice. Slot 0 is always the human answer: it holds the similarity
//! of the pair judged most similar, so the third object is the odd-one-out.
//!
//! Entropies are in nats.

use crate::error::{ProbeError, ProbeResult};
use crate::triplets::ODD_ONE_OUT_POSITION;
use serde::{Deserialize, Serialize};

/// Sentinel emitted instead of an odd-one-out position when probabilities tie.
pub const TIE_SENTINEL: i64 = -1;

/// Similarity slot holding the human answer.
pub const CORRECT_SLOT: usize = 0;

/// Similarities of the three object pairs `(i, j)`, `(i, k)`, `(j, k)`.
pub type Similarities = [f64; 3];

/// Inner products of the three pairs of a triplet.
pub fn triplet_similarities(anchor: &[f64], positive: &[f64], negative: &[f64]) -> Similarities {
    [
        dot(anchor, positive),
        dot(anchor, negative),
        dot(positive, negative),
    ]
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Predicted most-similar pair, or a tie that cannot be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Choice {
    Pair(usize),
    Tie,
}

impl Choice {
    /// Position of the predicted odd-one-out inside the triplet, or
    /// [`TIE_SENTINEL`]. The pair `(i, j)` leaves `k` out, `(i, k)` leaves `j`,
    /// `(j, k)` leaves `i`.
    pub fn odd_one_out(&self) -> i64 {
        match self {
            Self::Pair(slot) => (ODD_ONE_OUT_POSITION - slot) as i64,
            Self::Tie => TIE_SENTINEL,
        }
    }

    pub fn is_correct(&self) -> bool {
        matches!(self, Self::Pair(CORRECT_SLOT))
    }
}

/// Temperature-scaled softmax choice model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChoiceModel {
    temperature: f64,
}

impl Default for ChoiceModel {
    fn default() -> Self {
        Self { temperature: 1.0 }
    }
}

impl ChoiceModel {
    pub fn new(temperature: f64) -> ProbeResult<Self> {
        if !(temperature > 0.0 && temperature.is_finite()) {
            return Err(ProbeError::config(format!(
                "temperature must be positive and finite (got {temperature})"
            )));
        }
        Ok(Self { temperature })
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    fn scaled(&self, sims: Similarities) -> Similarities {
        sims.map(|s| s / self.temperature)
    }

    /// `log(sum(exp(s / T)))`, computed after subtracting the maximum.
    pub fn logsumexp(&self, sims: Similarities) -> f64 {
        let scaled = self.scaled(sims);
        let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if max.is_infinite() {
            return max;
        }
        max + scaled.iter().map(|s| (s - max).exp()).sum::<f64>().ln()
    }

    pub fn log_softmax(&self, sims: Similarities) -> Similarities {
        let lse = self.logsumexp(sims);
        self.scaled(sims).map(|s| s - lse)
    }

    pub fn softmax(&self, sims: Similarities) -> Similarities {
        self.log_softmax(sims).map(f64::exp)
    }

    /// Negative log-likelihood of the human answer for one triplet.
    pub fn nll(&self, sims: Similarities) -> f64 {
        -self.log_softmax(sims)[CORRECT_SLOT]
    }

    /// Mean negative log-likelihood over a batch. NaN for an empty batch.
    pub fn loss(&self, batch: &[Similarities]) -> f64 {
        if batch.is_empty() {
            return f64::NAN;
        }
        batch.iter().map(|s| self.nll(*s)).sum::<f64>() / batch.len() as f64
    }

    /// Negative log-likelihood and its gradient with respect to the raw
    /// (unscaled) similarities: `(softmax - onehot) / T`.
    pub fn nll_with_grad(&self, sims: Similarities) -> (f64, Similarities) {
        let log_probs = self.log_softmax(sims);
        let mut grad = log_probs.map(f64::exp);
        grad[CORRECT_SLOT] -= 1.0;
        (-log_probs[CORRECT_SLOT], grad.map(|g| g / self.temperature))
    }

    /// Ties are decided on the scaled similarities: probabilities of distinct
    /// similarities can underflow to the same value.
    pub fn predict(&self, sims: Similarities) -> Choice {
        predict(self.scaled(sims))
    }

    /// Loss, accuracy, entropy and choices for a set of triplet similarities.
    pub fn summarize(&self, batch: &[Similarities]) -> ChoiceSummary {
        let probabilities: Vec<Similarities> = batch.iter().map(|s| self.softmax(*s)).collect();
        let choices: Vec<Choice> = batch.iter().map(|s| self.predict(*s)).collect();
        let entropies: Vec<f64> = probabilities.iter().map(|p| entropy(*p)).collect();
        ChoiceSummary {
            loss: self.loss(batch),
            accuracy: accuracy(&choices),
            mean_entropy: mean(&entropies),
            choices,
            entropies,
            probabilities,
        }
    }
}

/// Argmax over three scores ordered like the choice probabilities (the
/// probabilities themselves, or the similarities they come from), unless any
/// two are exactly equal.
pub fn predict(scores: Similarities) -> Choice {
    let [a, b, c] = scores;
    let distinct = 1 + usize::from(b != a) + usize::from(c != a && c != b);
    if distinct < 3 {
        return Choice::Tie;
    }
    let mut best = 0;
    for slot in 1..3 {
        if scores[slot] > scores[best] {
            best = slot;
        }
    }
    Choice::Pair(best)
}

/// Fraction of choices that pick the human answer. Ties count as wrong.
/// NaN when there are no choices.
pub fn accuracy(choices: &[Choice]) -> f64 {
    if choices.is_empty() {
        return f64::NAN;
    }
    choices.iter().filter(|c| c.is_correct()).count() as f64 / choices.len() as f64
}

/// Shannon entropy of a three-way distribution, in nats.
pub fn entropy(probabilities: Similarities) -> f64 {
    -probabilities
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|p| p * p.ln())
        .sum::<f64>()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Aggregate output of [`ChoiceModel::summarize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceSummary {
    pub loss: f64,
    pub accuracy: f64,
    pub mean_entropy: f64,
    pub choices: Vec<Choice>,
    pub entropies: Vec<f64>,
    pub probabilities: Vec<Similarities>,
}

impl ChoiceSummary {
    /// Predicted odd-one-out positions, with [`TIE_SENTINEL`] for ties.
    pub fn odd_one_out_choices(&self) -> Vec<i64> {
        self.choices.iter().map(Choice::odd_one_out).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_logsumexp(sims: Similarities, t: f64) -> f64 {
        sims.iter().map(|s| (s / t).exp()).sum::<f64>().ln()
    }

    #[test]
    fn test_softmax_closed_form() {
        let model = ChoiceModel::default();
        let probs = model.softmax([2.0, 1.0, 0.5]);
        let z = 2.0f64.exp() + 1.0f64.exp() + 0.5f64.exp();
        assert!((probs[0] - 2.0f64.exp() / z).abs() < 1e-12);
        assert!((probs[1] - 1.0f64.exp() / z).abs() < 1e-12);
        assert!((probs[2] - 0.5f64.exp() / z).abs() < 1e-12);
        assert!((probs[0] - 0.6285).abs() < 1e-3);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(model.predict([2.0, 1.0, 0.5]), Choice::Pair(0));
        assert!(model.predict([2.0, 1.0, 0.5]).is_correct());
    }

    #[test]
    fn test_logsumexp_matches_naive() {
        let model = ChoiceModel::new(0.5).unwrap();
        let sims = [0.3, -1.2, 2.4];
        assert!((model.logsumexp(sims) - naive_logsumexp(sims, 0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_large_similarities_do_not_overflow() {
        let model = ChoiceModel::default();
        let sims = [1e4, 1e4 - 1.0, -1e4];
        assert!(naive_logsumexp(sims, 1.0).is_infinite());
        let lse = model.logsumexp(sims);
        assert!(lse.is_finite());
        assert!((lse - (1e4 + (1.0 + (-1.0f64).exp()).ln())).abs() < 1e-9);
        let probs = model.softmax(sims);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_tie_yields_sentinel() {
        let model = ChoiceModel::default();
        let choice = model.predict([0.7, 0.7, 0.7]);
        assert_eq!(choice, Choice::Tie);
        assert_eq!(choice.odd_one_out(), TIE_SENTINEL);
        assert!(!choice.is_correct());
        assert_eq!(predict([0.4, 0.4, 0.2]), Choice::Tie);
        assert_eq!(predict([0.2, 0.4, 0.4]), Choice::Tie);
        assert_eq!(predict([0.4, 0.2, 0.4]), Choice::Tie);
    }

    #[test]
    fn test_underflowing_probabilities_are_not_a_tie() {
        let model = ChoiceModel::default();
        let sims = [800.0, 10.0, 5.0];
        let probs = model.softmax(sims);
        assert_eq!(probs[1], probs[2]);
        assert_eq!(model.predict(sims), Choice::Pair(0));
        let summary = model.summarize(&[sims, [10.0, 800.0, 5.0]]);
        assert_eq!(summary.odd_one_out_choices(), vec![2, 1]);
        assert_eq!(summary.accuracy, 0.5);
    }

    #[test]
    fn test_odd_one_out_mapping() {
        assert_eq!(Choice::Pair(0).odd_one_out(), 2);
        assert_eq!(Choice::Pair(1).odd_one_out(), 1);
        assert_eq!(Choice::Pair(2).odd_one_out(), 0);
    }

    #[test]
    fn test_accuracy_counts_ties_as_wrong() {
        let choices = [Choice::Pair(0), Choice::Tie, Choice::Pair(2), Choice::Pair(0)];
        assert_eq!(accuracy(&choices), 0.5);
        assert!(accuracy(&[]).is_nan());
    }

    #[test]
    fn test_entropy_bounds() {
        assert!((entropy([1.0 / 3.0; 3]) - 3.0f64.ln()).abs() < 1e-12);
        assert_eq!(entropy([1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_loss_is_mean_nll() {
        let model = ChoiceModel::default();
        let batch = [[2.0, 1.0, 0.5], [0.0, 0.0, 0.0]];
        let expected = (model.nll(batch[0]) + 3.0f64.ln()) / 2.0;
        assert!((model.loss(&batch) - expected).abs() < 1e-12);
        assert!(model.loss(&[]).is_nan());
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let model = ChoiceModel::new(0.7).unwrap();
        let sims = [0.4, 1.1, -0.3];
        let (_, grad) = model.nll_with_grad(sims);
        let eps = 1e-6;
        for slot in 0..3 {
            let mut up = sims;
            let mut down = sims;
            up[slot] += eps;
            down[slot] -= eps;
            let numeric = (model.nll(up) - model.nll(down)) / (2.0 * eps);
            assert!((numeric - grad[slot]).abs() < 1e-6, "slot {slot}");
        }
    }

    #[test]
    fn test_summarize() {
        let model = ChoiceModel::default();
        let summary = model.summarize(&[[2.0, 1.0, 0.5], [0.0, 3.0, 1.0], [1.0, 1.0, 1.0]]);
        assert!((summary.accuracy - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(summary.odd_one_out_choices(), vec![2, 1, -1]);
        assert_eq!(summary.entropies.len(), 3);
    }

    #[test]
    fn test_rejects_non_positive_temperature() {
        assert!(ChoiceModel::new(0.0).is_err());
        assert!(ChoiceModel::new(-1.0).is_err());
        assert!(ChoiceModel::new(f64::NAN).is_err());
    }
}
