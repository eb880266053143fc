//! Per-epoch training history and binary classification metrics.

use serde::{Deserialize, Serialize};

/// Clamp applied to probabilities before taking logs.
pub const EPSILON: f64 = 1e-7;

/// Metrics recorded at the end of every epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub loss: Vec<f64>,
    pub accuracy: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub val_accuracy: Vec<f64>,
    /// Epoch (0-based) whose weights were restored by early stopping.
    pub restored_epoch: Option<usize>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_epoch(&mut self, loss: f64, accuracy: f64, val: Option<(f64, f64)>) {
        self.loss.push(loss);
        self.accuracy.push(accuracy);
        if let Some((val_loss, val_accuracy)) = val {
            self.val_loss.push(val_loss);
            self.val_accuracy.push(val_accuracy);
        }
    }

    pub fn epochs(&self) -> usize {
        self.loss.len()
    }

    pub fn best_val_accuracy(&self) -> Option<f64> {
        self.val_accuracy.iter().copied().fold(None, |best, v| match best {
            Some(b) if b >= v => Some(b),
            _ => Some(v),
        })
    }

    /// Append another history, e.g. a promoted trial continuing training.
    pub fn extend(&mut self, other: &History) {
        self.loss.extend_from_slice(&other.loss);
        self.accuracy.extend_from_slice(&other.accuracy);
        self.val_loss.extend_from_slice(&other.val_loss);
        self.val_accuracy.extend_from_slice(&other.val_accuracy);
    }
}

/// Mean binary cross-entropy with probabilities clamped to `[EPSILON, 1 - EPSILON]`.
pub fn binary_cross_entropy(labels: &[f32], probs: &[f32]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let total: f64 = labels
        .iter()
        .zip(probs)
        .map(|(&y, &p)| {
            let p = (p as f64).clamp(EPSILON, 1.0 - EPSILON);
            let y = y as f64;
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    total / labels.len() as f64
}

/// Class predicted for probability `p` by accuracy metrics.
pub fn predicted_class(p: f32) -> f32 {
    if p > 0.5 { 1.0 } else { 0.0 }
}

/// Fraction of examples whose thresholded prediction matches the label.
pub fn binary_accuracy(labels: &[f32], probs: &[f32]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = labels
        .iter()
        .zip(probs)
        .filter(|&(&y, &p)| predicted_class(p) == y)
        .count();
    correct as f64 / labels.len() as f64
}

/// Misclassification rate with predictions rounded as `trunc(p + 0.5)`.
pub fn zero_one_loss(labels: &[f32], probs: &[f32]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let wrong = labels
        .iter()
        .zip(probs)
        .filter(|&(&y, &p)| (p + 0.5).trunc() != y)
        .count();
    wrong as f64 / labels.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_one_loss_example() {
        let y_true = [0.0, 1.0, 1.0, 0.0];
        let y_pred = [0.2, 0.8, 0.3, 0.49];
        assert!((zero_one_loss(&y_true, &y_pred) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_zero_one_loss_rounds_half_up() {
        // trunc(0.5 + 0.5) = 1 while accuracy's strict threshold says 0
        assert_eq!(zero_one_loss(&[1.0], &[0.5]), 0.0);
        assert_eq!(binary_accuracy(&[1.0], &[0.5]), 0.0);
    }

    #[test]
    fn test_binary_accuracy() {
        let y_true = [0.0, 1.0, 1.0, 0.0];
        let y_pred = [0.2, 0.8, 0.3, 0.49];
        assert!((binary_accuracy(&y_true, &y_pred) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_bce_is_finite_at_saturation() {
        let loss = binary_cross_entropy(&[1.0, 0.0], &[0.0, 1.0]);
        assert!(loss.is_finite());
        assert!((loss - -(EPSILON.ln())).abs() < 1e-6);
        assert!(binary_cross_entropy(&[1.0], &[1.0]) < 1e-6);
    }

    #[test]
    fn test_history_best_val_accuracy() {
        let mut history = History::new();
        assert_eq!(history.best_val_accuracy(), None);
        history.record_epoch(0.7, 0.5, Some((0.6, 0.5)));
        history.record_epoch(0.6, 0.6, Some((0.65, 0.75)));
        history.record_epoch(0.5, 0.7, Some((0.7, 0.5)));
        assert_eq!(history.best_val_accuracy(), Some(0.75));
        assert_eq!(history.epochs(), 3);
    }
}
