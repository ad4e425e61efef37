//! Patience-based early stopping on the validation loss.

use serde::{Deserialize, Serialize};

/// Outcome of one validation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Improved,
    NoImprovement,
    /// `patience` consecutive checks without improvement.
    Exhausted,
}

/// Tracks the best validation loss and how many checks have passed without
/// beating it by more than `min_delta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStopping {
    pub patience: usize,
    pub min_delta: f64,
    #[serde(skip)]
    counter: usize,
    #[serde(skip)]
    best_loss: Option<f64>,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            min_delta,
            counter: 0,
            best_loss: None,
        }
    }

    pub fn best_loss(&self) -> Option<f64> {
        self.best_loss
    }

    pub fn checks_without_improvement(&self) -> usize {
        self.counter
    }

    pub fn check(&mut self, loss: f64) -> CheckOutcome {
        match self.best_loss {
            None => {
                self.best_loss = Some(loss);
                CheckOutcome::Improved
            }
            Some(best) if loss < best - self.min_delta => {
                self.best_loss = Some(loss);
                self.counter = 0;
                CheckOutcome::Improved
            }
            Some(_) => {
                self.counter += 1;
                if self.counter >= self.patience {
                    CheckOutcome::Exhausted
                } else {
                    CheckOutcome::NoImprovement
                }
            }
        }
    }
}
