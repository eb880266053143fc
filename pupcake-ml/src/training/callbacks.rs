//! Early stopping on validation loss.

use serde::{Deserialize, Serialize};

/// Action the training loop takes after an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    /// Continue, and remember the current weights as the best so far.
    Improved,
    Stop,
}

/// Stops training once the monitored loss has not improved for `patience`
/// epochs. The training loop restores the best weights when it stops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStopping {
    pub patience: usize,
    pub min_delta: f64,
    #[serde(skip)]
    wait: usize,
    #[serde(skip)]
    best_loss: Option<f64>,
    #[serde(skip)]
    best_epoch: Option<usize>,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            min_delta: 0.0,
            wait: 0,
            best_loss: None,
            best_epoch: None,
        }
    }

    pub fn on_epoch_end(&mut self, epoch: usize, loss: f64) -> CallbackAction {
        let improved = match self.best_loss {
            None => loss.is_finite(),
            Some(best) => loss < best - self.min_delta,
        };
        if improved {
            self.best_loss = Some(loss);
            self.best_epoch = Some(epoch);
            self.wait = 0;
            return CallbackAction::Improved;
        }
        self.wait += 1;
        if self.wait >= self.patience {
            CallbackAction::Stop
        } else {
            CallbackAction::Continue
        }
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn best_loss(&self) -> Option<f64> {
        self.best_loss
    }
}
