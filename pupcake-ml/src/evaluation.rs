//! Test-set evaluation: loss/accuracy, classification report and plots.

use crate::dataset::ImageSet;
use crate::error::MlError;
use crate::models::{BinaryClassifier, ModelKind};
use crate::report::{plots, tables};
use crate::training::metrics::predicted_class;
use crate::training::runner::{EvalMetrics, TrainingRunner};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// One row of the cross-model summary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub model: String,
    pub loss: f64,
    /// Fraction in `[0, 1]`; rendered as a percentage.
    pub accuracy: f64,
}

/// A row of a [`ClassificationReport`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub label: String,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1_score: f64,
    pub support: usize,
}

/// Per-class precision, recall, F1 and support, followed by `accuracy`,
/// `macro avg` and `weighted avg` rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub rows: Vec<ReportRow>,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

impl ClassificationReport {
    pub fn new(matrix: &[[usize; 2]; 2], class_list: &[String]) -> Self {
        let total: usize = matrix.iter().flatten().sum();
        let mut rows = Vec::with_capacity(5);
        let mut per_class = Vec::with_capacity(2);

        for c in 0..2 {
            let tp = matrix[c][c];
            let predicted: usize = (0..2).map(|t| matrix[t][c]).sum();
            let support: usize = matrix[c].iter().sum();
            let precision = ratio(tp, predicted);
            let recall = ratio(tp, support);
            let f1 = if precision + recall == 0.0 {
                0.0
            } else {
                2.0 * precision * recall / (precision + recall)
            };
            per_class.push((precision, recall, f1, support));
            rows.push(ReportRow {
                label: class_list.get(c).cloned().unwrap_or_else(|| c.to_string()),
                precision: Some(precision),
                recall: Some(recall),
                f1_score: f1,
                support,
            });
        }

        let correct = matrix[0][0] + matrix[1][1];
        rows.push(ReportRow {
            label: "accuracy".into(),
            precision: None,
            recall: None,
            f1_score: ratio(correct, total),
            support: total,
        });

        let mean = |f: fn(&(f64, f64, f64, usize)) -> f64| per_class.iter().map(f).sum::<f64>() / 2.0;
        rows.push(ReportRow {
            label: "macro avg".into(),
            precision: Some(mean(|r| r.0)),
            recall: Some(mean(|r| r.1)),
            f1_score: mean(|r| r.2),
            support: total,
        });

        let weighted = |f: fn(&(f64, f64, f64, usize)) -> f64| {
            if total == 0 {
                0.0
            } else {
                per_class.iter().map(|r| f(r) * r.3 as f64).sum::<f64>() / total as f64
            }
        };
        rows.push(ReportRow {
            label: "weighted avg".into(),
            precision: Some(weighted(|r| r.0)),
            recall: Some(weighted(|r| r.1)),
            f1_score: weighted(|r| r.2),
            support: total,
        });

        Self { rows }
    }

    pub fn row(&self, label: &str) -> Option<&ReportRow> {
        self.rows.iter().find(|r| r.label == label)
    }
}

/// Counts indexed `[true class][predicted class]`.
pub fn confusion_matrix(labels: &[f32], probs: &[f32]) -> [[usize; 2]; 2] {
    let mut matrix = [[0usize; 2]; 2];
    for (&y, &p) in labels.iter().zip(probs) {
        let t = usize::from(y == 1.0);
        let pred = usize::from(predicted_class(p) == 1.0);
        matrix[t][pred] += 1;
    }
    matrix
}

/// Evaluates trained models on the test set and writes the side artifacts.
#[derive(Debug, Clone)]
pub struct Evaluator {
    output_dir: PathBuf,
    plot_dir: PathBuf,
    class_list: Vec<String>,
    sample_predictions: usize,
}

impl Evaluator {
    pub fn new(
        output_dir: PathBuf,
        plot_dir: PathBuf,
        class_list: Vec<String>,
        sample_predictions: usize,
    ) -> Self {
        Self {
            output_dir,
            plot_dir,
            class_list,
            sample_predictions,
        }
    }

    pub fn evaluate<B, M>(
        &self,
        runner: &TrainingRunner<B>,
        model: &M,
        kind: ModelKind,
        test: &ImageSet,
    ) -> Result<EvaluationRecord, MlError>
    where
        B: AutodiffBackend,
        M: BinaryClassifier<B::InnerBackend>,
    {
        info!(model = %kind, images = test.len(), "Evaluating on test set");
        let probs = runner.predict(model, test)?;
        let metrics = EvalMetrics::from_predictions(test.labels(), &probs);
        info!(
            model = %kind,
            loss = %format!("{:.4}", metrics.loss),
            accuracy = %format!("{:.4} %", metrics.accuracy * 100.0),
            "Test metrics"
        );

        let matrix = confusion_matrix(test.labels(), &probs);
        let report = ClassificationReport::new(&matrix, &self.class_list);
        tables::write_classification_report(
            &tables::classification_report_path(&self.output_dir, kind),
            &report,
        )?;

        if let Err(e) = self.write_plots(kind, test, &probs, &matrix) {
            warn!(model = %kind, error = %e, "Failed to write evaluation plots");
        }

        Ok(EvaluationRecord {
            model: kind.name().to_string(),
            loss: metrics.loss,
            accuracy: metrics.accuracy,
        })
    }

    fn write_plots(
        &self,
        kind: ModelKind,
        test: &ImageSet,
        probs: &[f32],
        matrix: &[[usize; 2]; 2],
    ) -> Result<(), MlError> {
        plots::write_svg(
            &plots::confusion_matrix_path(&self.plot_dir, kind),
            &plots::render_confusion_matrix(kind, matrix, &self.class_list),
        )?;
        plots::write_svg(
            &plots::prediction_distribution_path(&self.plot_dir, kind),
            &plots::render_prediction_distribution(kind, test.labels(), probs, &self.class_list),
        )?;
        let samples = plots::render_sample_predictions(
            kind,
            test,
            probs,
            &self.class_list,
            self.sample_predictions,
        )?;
        plots::write_svg(&plots::sample_predictions_path(&self.plot_dir, kind), &samples)
    }
}
