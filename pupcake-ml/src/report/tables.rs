//! CSV reports.

use crate::error::MlError;
use crate::evaluation::{ClassificationReport, EvaluationRecord};
use crate::kfold::FoldSummary;
use crate::models::ModelKind;
use crate::tuning::TrialRecord;
use pupcake_core::persistence::atomic_write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the cross-model summary table.
pub const PERFORMANCE_FILE: &str = "Models_Performances_on_Test_Set.csv";

pub fn trials_path(output_dir: &Path, model: ModelKind) -> PathBuf {
    output_dir.join(format!("{model}_hyperparameter_tuning_data.csv"))
}

pub fn best_hyperparameters_path(output_dir: &Path, model: ModelKind) -> PathBuf {
    output_dir.join(format!("{model}_best_hyperparameters.csv"))
}

pub fn fold_path(output_dir: &Path, model: ModelKind) -> PathBuf {
    output_dir.join(format!("{model}_fold_data.csv"))
}

pub fn classification_report_path(output_dir: &Path, model: ModelKind) -> PathBuf {
    output_dir.join(format!("{model}_classification_report.csv"))
}

pub fn performance_path(output_dir: &Path) -> PathBuf {
    output_dir.join(PERFORMANCE_FILE)
}

fn write_csv(path: &Path, header: &[&str], rows: &[Vec<String>]) -> Result<(), MlError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| MlError::Io(e.into_error()))?;
    atomic_write(path, &bytes)?;
    debug!(path = %path.display(), rows = rows.len(), "CSV written");
    Ok(())
}

/// Completed trials, sorted by trial number (1-based in the file).
pub fn write_trials(path: &Path, trials: &[TrialRecord]) -> Result<(), MlError> {
    let mut sorted: Vec<&TrialRecord> = trials.iter().filter(|t| t.score.is_some()).collect();
    sorted.sort_by_key(|t| t.trial_id);
    let rows: Vec<Vec<String>> = sorted
        .iter()
        .map(|t| {
            vec![
                (t.trial_id + 1).to_string(),
                t.params.units.to_string(),
                format!("{:.4}", t.params.dropout_rate),
                format!("{:.4}", t.params.learning_rate.value()),
                format!("{:.4}", t.score.unwrap_or_default()),
            ]
        })
        .collect();
    write_csv(
        path,
        &["Trial", "Units", "Dropout Rate", "Learning Rate", "Validation Accuracy"],
        &rows,
    )
}

pub fn write_best_hyperparameters(
    path: &Path,
    model: ModelKind,
    best: &TrialRecord,
) -> Result<(), MlError> {
    write_csv(
        path,
        &["Model", "Units", "Dropout Rate", "Learning Rate"],
        &[vec![
            model.to_string(),
            best.params.units.to_string(),
            format!("{:.4}", best.params.dropout_rate),
            format!("{:.4}", best.params.learning_rate.value()),
        ]],
    )
}

/// One row per fold plus the trailing `Average` row.
pub fn write_folds(path: &Path, summary: &FoldSummary) -> Result<(), MlError> {
    let row = |label: String, loss: f64, accuracy: f64, zero_one: f64| {
        vec![
            label,
            format!("{loss:.3}"),
            format!("{:.3}", accuracy * 100.0),
            format!("{zero_one:.3}"),
        ]
    };
    let mut rows: Vec<Vec<String>> = summary
        .folds
        .iter()
        .map(|f| {
            row(
                f.fold.to_string(),
                f.metrics.loss,
                f.metrics.accuracy,
                f.metrics.zero_one_loss,
            )
        })
        .collect();
    let avg = summary.average;
    rows.push(row(
        "Average".to_string(),
        avg.loss,
        avg.accuracy,
        avg.zero_one_loss,
    ));
    write_csv(path, &["Fold", "Loss", "Accuracy (%)", "0-1 Loss"], &rows)
}

pub fn write_classification_report(
    path: &Path,
    report: &ClassificationReport,
) -> Result<(), MlError> {
    let opt = |v: Option<f64>| v.map(|v| format!("{v:.3}")).unwrap_or_default();
    let rows: Vec<Vec<String>> = report
        .rows
        .iter()
        .map(|r| {
            vec![
                r.label.clone(),
                opt(r.precision),
                opt(r.recall),
                format!("{:.3}", r.f1_score),
                r.support.to_string(),
            ]
        })
        .collect();
    write_csv(
        path,
        &["index", "precision", "recall", "f1-score", "support"],
        &rows,
    )
}

/// The cross-model table; overwrites any previous run's file.
pub fn write_performances(path: &Path, records: &[EvaluationRecord]) -> Result<(), MlError> {
    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            vec![
                r.model.clone(),
                format!("{:.3}", r.loss),
                format!("{:.3}", r.accuracy * 100.0),
            ]
        })
        .collect();
    write_csv(path, &["Model", "Loss", "Accuracy (%)"], &rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperparams::HeadParams;
    use crate::kfold::FoldRecord;
    use crate::training::runner::EvalMetrics;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn metrics(loss: f64, accuracy: f64, zero_one_loss: f64) -> EvalMetrics {
        EvalMetrics {
            loss,
            accuracy,
            zero_one_loss,
        }
    }

    #[test]
    fn test_fold_csv_layout() {
        let dir = TempDir::new().unwrap();
        let path = fold_path(dir.path(), ModelKind::Dense);
        let summary = FoldSummary::new(vec![
            FoldRecord {
                fold: 1,
                metrics: metrics(0.5, 0.75, 0.25),
            },
            FoldRecord {
                fold: 2,
                metrics: metrics(0.7, 0.5, 0.5),
            },
        ]);
        write_folds(&path, &summary).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "Fold,Loss,Accuracy (%),0-1 Loss\n\
             1,0.500,75.000,0.250\n\
             2,0.700,50.000,0.500\n\
             Average,0.600,62.500,0.375\n"
        );
    }

    #[test]
    fn test_trials_sorted_and_one_based() {
        let dir = TempDir::new().unwrap();
        let path = trials_path(dir.path(), ModelKind::Convolutional);
        let params = HeadParams::new(64, 0.3, 1e-3).unwrap();
        let trials = vec![
            TrialRecord::completed(2, params, 0.5),
            TrialRecord::completed(0, params, 0.625),
            TrialRecord::pending(1, params),
        ];
        write_trials(&path, &trials).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "1,64,0.3000,0.0010,0.6250");
        assert_eq!(lines[2], "3,64,0.3000,0.0010,0.5000");
    }

    #[test]
    fn test_performance_csv() {
        let dir = TempDir::new().unwrap();
        let path = performance_path(dir.path());
        write_performances(
            &path,
            &[EvaluationRecord {
                model: "MLP".into(),
                loss: 0.6931,
                accuracy: 0.5,
            }],
        )
        .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Model,Loss,Accuracy (%)\nMLP,0.693,50.000\n");
    }
}
