//! Explicit training loop for a linear probe.
//!
//! The loop is a small state machine: each epoch trains over shuffled
//! mini-batches, then validates, then decides whether to continue. Training
//! always runs at least `min_epochs` and at most `max_epochs`; in between it
//! stops once the validation loss has not improved by more than `min_delta`
//! for `patience` consecutive checks.

use crate::config::ProbingConfig;
use crate::error::ProbeResult;
use crate::probe::{LinearProbe, Optimizer, clip_grad_norm};
use crate::training::batches::TripletBatches;
use crate::training::early_stopping::{CheckOutcome, EarlyStopping};
use crate::training::metrics::{StopReason, TrainingMetrics};
use crate::triplets::Triplet;

/// Loop control settings, taken from [`ProbingConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainerSettings {
    pub batch_size: usize,
    pub min_epochs: usize,
    pub max_epochs: usize,
    pub patience: usize,
    pub min_delta: f64,
    pub gradient_clip_norm: Option<f64>,
}

impl From<&ProbingConfig> for TrainerSettings {
    fn from(config: &ProbingConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            min_epochs: config.min_epochs,
            max_epochs: config.max_epochs,
            patience: config.patience,
            min_delta: config.min_delta,
            gradient_clip_norm: config.gradient_clip_norm,
        }
    }
}

/// Where the loop is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrainerState {
    Training { epoch: usize },
    Validating { epoch: usize, train_loss: f64 },
    Stopped(StopReason),
}

/// Drives one probe to convergence on one fold.
pub struct ProbeTrainer {
    settings: TrainerSettings,
}

impl ProbeTrainer {
    pub fn new(settings: TrainerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TrainerSettings {
        &self.settings
    }

    /// Train `probe` on `train` and monitor `val`. Returns the per-epoch history.
    pub fn fit(
        &self,
        probe: &mut LinearProbe,
        optimizer: &mut dyn Optimizer,
        train: &[Triplet],
        val: &[Triplet],
        shuffle_seed: u64,
    ) -> ProbeResult<TrainingMetrics> {
        let mut batches = TripletBatches::shuffled(train, self.settings.batch_size, shuffle_seed);
        let mut early_stopping = EarlyStopping::new(self.settings.patience, self.settings.min_delta);
        let mut metrics = TrainingMetrics::default();
        let mut state = TrainerState::Training { epoch: 1 };

        let reason = loop {
            state = match state {
                TrainerState::Training { epoch } => {
                    let train_loss = self.train_epoch(probe, optimizer, &mut batches)?;
                    TrainerState::Validating { epoch, train_loss }
                }
                TrainerState::Validating { epoch, train_loss } => {
                    let summary = probe.evaluate(val)?;
                    metrics.record_epoch(train_loss, summary.loss, summary.accuracy);
                    tracing::debug!(
                        epoch,
                        train_loss,
                        val_loss = summary.loss,
                        val_acc = summary.accuracy,
                        "epoch complete"
                    );
                    self.next_state(epoch, summary.loss, &mut early_stopping)
                }
                TrainerState::Stopped(reason) => break reason,
            };
        };

        metrics.stop_reason = Some(reason);
        tracing::debug!(
            epochs = metrics.epochs_completed,
            ?reason,
            best_epoch = ?metrics.best_epoch,
            "training stopped"
        );
        Ok(metrics)
    }

    fn next_state(
        &self,
        epoch: usize,
        val_loss: f64,
        early_stopping: &mut EarlyStopping,
    ) -> TrainerState {
        if !val_loss.is_finite() {
            return TrainerState::Stopped(StopReason::NonFiniteLoss);
        }
        let outcome = early_stopping.check(val_loss);
        if epoch >= self.settings.max_epochs {
            TrainerState::Stopped(StopReason::MaxEpochs)
        } else if epoch >= self.settings.min_epochs
            && early_stopping.checks_without_improvement() >= self.settings.patience
        {
            TrainerState::Stopped(StopReason::EarlyStopping)
        } else {
            if outcome == CheckOutcome::Exhausted {
                tracing::trace!(epoch, "patience exhausted before min_epochs");
            }
            TrainerState::Training { epoch: epoch + 1 }
        }
    }

    /// One pass over the training batches. Returns the size-weighted mean loss.
    fn train_epoch(
        &self,
        probe: &mut LinearProbe,
        optimizer: &mut dyn Optimizer,
        batches: &mut TripletBatches<'_>,
    ) -> ProbeResult<f64> {
        batches.start_epoch();
        let mut total = 0.0;
        let mut seen = 0usize;
        while let Some(batch) = batches.next_batch() {
            let (loss, mut grad) = probe.loss_and_gradient(&batch)?;
            if let Some(max_norm) = self.settings.gradient_clip_norm {
                let norm = clip_grad_norm(grad.as_mut_slice(), max_norm);
                tracing::trace!(batch = batch.len(), loss, grad_norm = norm, "step");
            }
            optimizer.step(probe.transform_mut().as_mut_slice(), grad.as_slice());
            total += loss * batch.len() as f64;
            seen += batch.len();
        }
        Ok(if seen == 0 { f64::NAN } else { total / seen as f64 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::ChoiceModel;
    use crate::config::OptimizerKind;
    use crate::matrix::Matrix;
    use crate::probe::{ProbeObjective, build_optimizer};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::Arc;

    fn settings(min_epochs: usize, max_epochs: usize, patience: usize) -> TrainerSettings {
        TrainerSettings {
            batch_size: 2,
            min_epochs,
            max_epochs,
            patience,
            min_delta: 1e-4,
            gradient_clip_norm: Some(1.0),
        }
    }

    fn setup() -> (LinearProbe, Vec<Triplet>) {
        let features = Arc::new(
            Matrix::from_rows(vec![
                vec![1.0, 0.1, 0.0],
                vec![0.9, 0.0, 0.1],
                vec![-0.2, 1.0, 0.3],
                vec![0.0, 0.9, 0.2],
                vec![0.1, -0.1, 1.0],
                vec![0.0, 0.2, 0.9],
            ])
            .unwrap(),
        );
        let objective = ProbeObjective {
            choice: ChoiceModel::default(),
            normalize_embeddings: false,
            lambda: 0.0,
        };
        let mut rng = StdRng::seed_from_u64(1);
        let probe = LinearProbe::new(features, 3, 0.1, objective, &mut rng).unwrap();
        let triplets = vec![
            Triplet::new(0, 1, 2),
            Triplet::new(2, 3, 4),
            Triplet::new(4, 5, 0),
            Triplet::new(1, 0, 5),
            Triplet::new(3, 2, 1),
            Triplet::new(5, 4, 3),
        ];
        (probe, triplets)
    }

    #[test]
    fn test_training_reduces_loss() {
        let (mut probe, triplets) = setup();
        let before = probe.evaluate(&triplets).unwrap().loss;
        let mut optimizer = build_optimizer(OptimizerKind::Adam, 0.05, 9);
        let trainer = ProbeTrainer::new(settings(30, 30, 100));
        let metrics = trainer
            .fit(&mut probe, optimizer.as_mut(), &triplets, &triplets, 5)
            .unwrap();
        let after = probe.evaluate(&triplets).unwrap().loss;
        assert!(after < before, "loss {before} -> {after}");
        assert_eq!(metrics.epochs_completed, 30);
        assert_eq!(metrics.stop_reason, Some(StopReason::MaxEpochs));
    }

    #[test]
    fn test_early_stopping_respects_min_epochs() {
        let (mut probe, triplets) = setup();
        // A zero learning rate never improves the validation loss.
        let mut optimizer = build_optimizer(OptimizerKind::Sgd, 0.0, 9);
        let trainer = ProbeTrainer::new(settings(5, 50, 2));
        let metrics = trainer
            .fit(&mut probe, optimizer.as_mut(), &triplets, &triplets, 5)
            .unwrap();
        assert_eq!(metrics.stop_reason, Some(StopReason::EarlyStopping));
        assert_eq!(metrics.epochs_completed, 5);
    }

    #[test]
    fn test_early_stopping_after_min_epochs() {
        let (mut probe, triplets) = setup();
        let mut optimizer = build_optimizer(OptimizerKind::Sgd, 0.0, 9);
        let trainer = ProbeTrainer::new(settings(1, 50, 3));
        let metrics = trainer
            .fit(&mut probe, optimizer.as_mut(), &triplets, &triplets, 5)
            .unwrap();
        assert_eq!(metrics.stop_reason, Some(StopReason::EarlyStopping));
        assert_eq!(metrics.epochs_completed, 4);
        assert_eq!(metrics.best_epoch, Some(1));
    }

    #[test]
    fn test_empty_validation_stops_immediately() {
        let (mut probe, triplets) = setup();
        let mut optimizer = build_optimizer(OptimizerKind::Adam, 0.01, 9);
        let trainer = ProbeTrainer::new(settings(5, 50, 3));
        let metrics = trainer
            .fit(&mut probe, optimizer.as_mut(), &triplets, &[], 5)
            .unwrap();
        assert_eq!(metrics.stop_reason, Some(StopReason::NonFiniteLoss));
        assert_eq!(metrics.epochs_completed, 1);
    }
}
