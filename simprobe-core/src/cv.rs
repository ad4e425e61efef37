//! Object-disjoint K-fold cross-validation of a linear probe.
//!
//! Every fold gets a fresh probe and a fresh optimizer; the only state shared
//! between folds is the standardized feature matrix, which is read-only. All
//! K trained transforms are kept, so each reported fold score can be traced
//! back to the transform that produced it.

use crate::choice::ChoiceModel;
use crate::config::ProbingConfig;
use crate::error::{ProbeError, ProbeResult};
use crate::matrix::Matrix;
use crate::partition::{Fold, KFold, TripletPartition};
use crate::probe::{LinearProbe, ProbeObjective, build_optimizer};
use crate::training::{ProbeTrainer, TrainerSettings, TrainingMetrics};
use crate::triplets::TripletSet;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Whether a fold could be trained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldStatus {
    Trained,
    /// No training or no validation triplets survived partitioning.
    Empty,
}

/// Outcome of one fold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldResult {
    pub fold: usize,
    pub status: FoldStatus,
    pub n_train_objects: usize,
    pub n_val_objects: usize,
    pub n_train_triplets: usize,
    pub n_val_triplets: usize,
    pub n_dropped_triplets: usize,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub val_entropy: f64,
    /// Predicted odd-one-out position for each validation triplet, `-1` on ties.
    pub choices: Vec<i64>,
    pub training: Option<TrainingMetrics>,
    #[serde(skip)]
    pub transform: Option<Matrix>,
}

impl FoldResult {
    fn empty(fold: &Fold, partition: &TripletPartition) -> Self {
        Self {
            fold: fold.index,
            status: FoldStatus::Empty,
            n_train_objects: fold.train_objects.len(),
            n_val_objects: fold.val_objects.len(),
            n_train_triplets: partition.train.len(),
            n_val_triplets: partition.val.len(),
            n_dropped_triplets: partition.dropped.len(),
            val_loss: f64::NAN,
            val_accuracy: f64::NAN,
            val_entropy: f64::NAN,
            choices: Vec::new(),
            training: None,
            transform: None,
        }
    }
}

/// Aggregated cross-validation outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValidationResult {
    pub folds: Vec<FoldResult>,
    /// Mean validation accuracy over the folds that were trained; NaN if none.
    pub mean_accuracy: f64,
    pub mean_loss: f64,
    /// Softmax temperature the choice model used.
    pub temperature: f64,
}

impl CrossValidationResult {
    /// Held-out odd-one-out choices of every fold, concatenated in fold order.
    pub fn choices(&self) -> Vec<i64> {
        self.folds.iter().flat_map(|f| f.choices.iter().copied()).collect()
    }

    /// `(fold, transform)` for every trained fold.
    pub fn transforms(&self) -> impl Iterator<Item = (usize, &Matrix)> {
        self.folds
            .iter()
            .filter_map(|f| f.transform.as_ref().map(|t| (f.fold, t)))
    }

    pub fn trained_folds(&self) -> usize {
        self.folds
            .iter()
            .filter(|f| f.status == FoldStatus::Trained)
            .count()
    }
}

/// Runs K independent probe trainings over object-disjoint folds.
pub struct CrossValidator {
    config: ProbingConfig,
    model_temperature: Option<f64>,
}

impl CrossValidator {
    pub fn new(config: ProbingConfig) -> ProbeResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            model_temperature: None,
        })
    }

    /// Temperature of the evaluated model, used when embeddings are normalized.
    pub fn with_model_temperature(mut self, temperature: f64) -> Self {
        self.model_temperature = Some(temperature);
        self
    }

    pub fn config(&self) -> &ProbingConfig {
        &self.config
    }

    /// The softmax temperature for this run. Fixed for every fold.
    pub fn effective_temperature(&self) -> f64 {
        if !self.config.apply_normalization {
            return self.config.temperature;
        }
        self.model_temperature.unwrap_or_else(|| {
            tracing::warn!("no model temperature given for normalized probing; using 1.0");
            1.0
        })
    }

    /// Standardize `features` once, split objects into folds, and train one
    /// probe per fold.
    pub fn run(&self, features: &Matrix, triplets: &TripletSet) -> ProbeResult<CrossValidationResult> {
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

        let mut standardized = features.clone();
        let (mean, std) = standardized.standardize_global();
        tracing::debug!(mean, std, "standardized features");
        let features = Arc::new(standardized);

        let temperature = self.effective_temperature();
        let objective = ProbeObjective {
            choice: ChoiceModel::new(temperature)?,
            normalize_embeddings: self.config.apply_normalization,
            lambda: self.config.lambda,
        };

        let folds = KFold::new(self.config.n_folds, self.config.seed).split(triplets.n_objects())?;
        let mut results = Vec::with_capacity(folds.len());
        for fold in &folds {
            let span = tracing::info_span!("fold", fold = fold.index);
            let _enter = span.enter();
            results.push(self.run_fold(fold, &features, triplets, objective)?);
        }

        let mean_accuracy = finite_mean(results.iter().map(|r| r.val_accuracy));
        let mean_loss = finite_mean(results.iter().map(|r| r.val_loss));
        tracing::info!(
            folds = results.len(),
            mean_accuracy,
            mean_loss,
            "cross-validation complete"
        );
        Ok(CrossValidationResult {
            folds: results,
            mean_accuracy,
            mean_loss,
            temperature,
        })
    }

    fn run_fold(
        &self,
        fold: &Fold,
        features: &Arc<Matrix>,
        triplets: &TripletSet,
        objective: ProbeObjective,
    ) -> ProbeResult<FoldResult> {
        let partition = fold.partition(triplets.as_slice());
        tracing::info!(
            train = partition.train.len(),
            val = partition.val.len(),
            dropped = partition.dropped.len(),
            "partitioned triplets"
        );
        if partition.is_degenerate() {
            tracing::warn!(
                train = partition.train.len(),
                val = partition.val.len(),
                "fold has no training or no validation triplets; skipping"
            );
            return Ok(FoldResult::empty(fold, &partition));
        }

        let seed = fold_seed(self.config.seed, fold.index);
        let mut rng = StdRng::seed_from_u64(seed);
        let transform_dim = self.config.transform_dim.unwrap_or(features.cols());
        let mut probe = LinearProbe::new(
            Arc::clone(features),
            transform_dim,
            self.config.init_std,
            objective,
            &mut rng,
        )?;
        let mut optimizer = build_optimizer(
            self.config.optimizer,
            self.config.learning_rate,
            features.cols() * transform_dim,
        );
        let trainer = ProbeTrainer::new(TrainerSettings::from(&self.config));
        let metrics = trainer.fit(
            &mut probe,
            optimizer.as_mut(),
            &partition.train,
            &partition.val,
            seed.wrapping_add(1),
        )?;

        let summary = probe.evaluate(&partition.val)?;
        tracing::info!(
            val_loss = summary.loss,
            val_acc = summary.accuracy,
            epochs = metrics.epochs_completed,
            "fold complete"
        );
        Ok(FoldResult {
            fold: fold.index,
            status: FoldStatus::Trained,
            n_train_objects: fold.train_objects.len(),
            n_val_objects: fold.val_objects.len(),
            n_train_triplets: partition.train.len(),
            n_val_triplets: partition.val.len(),
            n_dropped_triplets: partition.dropped.len(),
            val_loss: summary.loss,
            val_accuracy: summary.accuracy,
            val_entropy: summary.mean_entropy,
            choices: summary.odd_one_out_choices(),
            training: Some(metrics),
            transform: Some(probe.into_transform()),
        })
    }
}

/// Per-fold seed for initialization and shuffling.
fn fold_seed(seed: u64, fold: usize) -> u64 {
    seed.wrapping_add((fold as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

fn finite_mean(values: impl Iterator<Item = f64>) -> f64 {
    let finite: Vec<f64> = values.filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    finite.iter().sum::<f64>() / finite.len() as f64
}
