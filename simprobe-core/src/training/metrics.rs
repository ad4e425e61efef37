//! Per-epoch training history.

use serde::{Deserialize, Serialize};

/// Why a training run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxEpochs,
    EarlyStopping,
    /// The validation loss became NaN or infinite.
    NonFiniteLoss,
}

/// Training metrics for one fold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub epochs_completed: usize,
    pub train_loss_history: Vec<f64>,
    pub val_loss_history: Vec<f64>,
    pub val_accuracy_history: Vec<f64>,
    pub best_epoch: Option<usize>,
    pub best_val_loss: Option<f64>,
    pub stop_reason: Option<StopReason>,
}

impl TrainingMetrics {
    pub fn record_epoch(&mut self, train_loss: f64, val_loss: f64, val_accuracy: f64) {
        self.train_loss_history.push(train_loss);
        self.val_loss_history.push(val_loss);
        self.val_accuracy_history.push(val_accuracy);
        self.epochs_completed += 1;

        if val_loss.is_finite() && self.best_val_loss.is_none_or(|best| val_loss < best) {
            self.best_val_loss = Some(val_loss);
            self.best_epoch = Some(self.epochs_completed);
        }
    }

    pub fn last_val_loss(&self) -> Option<f64> {
        self.val_loss_history.last().copied()
    }
}
