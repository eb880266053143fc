//! K-fold cross-validation of tuned models.
//!
//! The fold-trained checkpoint is the cache: when it exists the stored model is
//! returned without any training. Otherwise the tuned model is retrained fold
//! by fold over the pooled train + validation images. Weights carry over from
//! one fold to the next; only the optimizer is reset. The checkpoint therefore
//! holds the model as it stands after the last fold, while the reported metrics
//! average every fold.

use crate::dataset::ImageSet;
use crate::error::MlError;
use crate::models::{ArchitectureSpec, BinaryClassifier, ModelKind};
use crate::report::{plots, tables};
use crate::store::{ArtifactStore, Stage};
use crate::training::metrics::History;
use crate::training::runner::{EvalMetrics, FitOptions, TrainingRunner};
use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use rand::Rng;
use rand::seq::SliceRandom;
use std::path::PathBuf;
use tracing::{info, warn};

/// Learning rate of the fresh optimizer used for every fold.
pub const FOLD_LEARNING_RATE: f64 = 1e-3;

/// Train/validation indices of one fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldIndices {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// K-fold partitioner with scikit-learn's fold sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KFold {
    pub n_splits: usize,
    pub shuffle: bool,
}

impl KFold {
    pub fn new(n_splits: usize) -> Self {
        Self {
            n_splits,
            shuffle: true,
        }
    }

    /// Partition `0..n`. The first `n % k` folds get one extra example and
    /// both index lists of a fold are ascending.
    pub fn split<R: Rng>(&self, n: usize, rng: &mut R) -> Result<Vec<FoldIndices>, MlError> {
        let k = self.n_splits;
        if k < 2 {
            return Err(MlError::dataset(format!(
                "k-fold needs at least 2 splits, got {k}"
            )));
        }
        if n < k {
            return Err(MlError::dataset(format!(
                "cannot split {n} examples into {k} folds"
            )));
        }

        let mut order: Vec<usize> = (0..n).collect();
        if self.shuffle {
            order.shuffle(rng);
        }

        let mut folds = Vec::with_capacity(k);
        let mut start = 0;
        for fold in 0..k {
            let size = n / k + usize::from(fold < n % k);
            let mut validation = order[start..start + size].to_vec();
            validation.sort_unstable();
            let mut in_validation = vec![false; n];
            for &i in &validation {
                in_validation[i] = true;
            }
            let train = (0..n).filter(|&i| !in_validation[i]).collect();
            folds.push(FoldIndices { train, validation });
            start += size;
        }
        Ok(folds)
    }
}

/// Validation metrics of one fold (1-based).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FoldRecord {
    pub fold: usize,
    pub metrics: EvalMetrics,
}

/// Every fold plus their arithmetic mean.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldSummary {
    pub folds: Vec<FoldRecord>,
    pub average: EvalMetrics,
}

impl FoldSummary {
    pub fn new(folds: Vec<FoldRecord>) -> Self {
        let n = folds.len().max(1) as f64;
        let sum = |f: fn(&EvalMetrics) -> f64| folds.iter().map(|r| f(&r.metrics)).sum::<f64>() / n;
        let average = EvalMetrics {
            loss: sum(|m| m.loss),
            accuracy: sum(|m| m.accuracy),
            zero_one_loss: sum(|m| m.zero_one_loss),
        };
        Self { folds, average }
    }
}

/// Outcome of [`CrossValidator::cross_validate`].
#[derive(Debug)]
pub struct CrossValidation<M> {
    pub model: M,
    /// `None` when the cached checkpoint was returned.
    pub summary: Option<FoldSummary>,
}

impl<M> CrossValidation<M> {
    pub fn ran(&self) -> bool {
        self.summary.is_some()
    }
}

/// Retrains tuned models across k folds.
#[derive(Debug, Clone)]
pub struct CrossValidator {
    store: ArtifactStore,
    output_dir: PathBuf,
    plot_dir: PathBuf,
    k: usize,
    epochs: usize,
}

impl CrossValidator {
    pub fn new(
        store: ArtifactStore,
        output_dir: PathBuf,
        plot_dir: PathBuf,
        k: usize,
        epochs: usize,
    ) -> Self {
        Self {
            store,
            output_dir,
            plot_dir,
            k,
            epochs,
        }
    }

    /// Cross-validate `kind`, starting from `tuned` when the caller still
    /// holds the tuned model in memory and from the stored artifact otherwise.
    pub fn cross_validate<B, M, R>(
        &self,
        runner: &TrainingRunner<B>,
        kind: ModelKind,
        tuned: Option<(M, ArchitectureSpec)>,
        train: &ImageSet,
        val: &ImageSet,
        rng: &mut R,
    ) -> Result<CrossValidation<M>, MlError>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + BinaryClassifier<B>,
        M::InnerModule: BinaryClassifier<B::InnerBackend>,
        R: Rng,
    {
        if self.store.has(Stage::FoldTrained, kind) {
            info!(model = %kind, "Fold-trained checkpoint found, skipping cross-validation");
            let (model, _) = self
                .store
                .load::<B, M>(Stage::FoldTrained, kind, runner.device())?;
            return Ok(CrossValidation {
                model,
                summary: None,
            });
        }

        let (mut model, spec) = match tuned {
            Some(tuned) => tuned,
            None => {
                let loaded = self
                    .store
                    .load::<B, M>(Stage::Tuned, kind, runner.device())?;
                info!(model = %kind, "Tuned weights loaded for cross-validation");
                loaded
            }
        };

        let pool = train.concat(val)?;
        let folds = KFold::new(self.k).split(pool.len(), rng)?;
        let options = FitOptions {
            epochs: self.epochs,
            learning_rate: FOLD_LEARNING_RATE,
            patience: None,
        };

        let mut records = Vec::with_capacity(folds.len());
        let mut histories: Vec<History> = Vec::with_capacity(folds.len());
        for (i, fold) in folds.iter().enumerate() {
            info!(model = %kind, fold = i + 1, folds = self.k, "Training fold");
            let fold_train = pool.subset(&fold.train);
            let fold_val = pool.subset(&fold.validation);

            let (trained, history) =
                runner.fit(model, &fold_train, Some(&fold_val), &options, rng)?;
            model = trained;

            let metrics = runner.evaluate(&model.valid(), &fold_val)?;
            info!(
                model = %kind,
                fold = i + 1,
                loss = metrics.loss,
                accuracy = metrics.accuracy,
                zero_one_loss = metrics.zero_one_loss,
                "Fold complete"
            );
            records.push(FoldRecord {
                fold: i + 1,
                metrics,
            });
            histories.push(history);
        }

        let summary = FoldSummary::new(records);
        info!(
            model = %kind,
            loss = summary.average.loss,
            accuracy = summary.average.accuracy,
            zero_one_loss = summary.average.zero_one_loss,
            "Cross-validation average"
        );
        tables::write_folds(&tables::fold_path(&self.output_dir, kind), &summary)?;

        let svg = plots::render_fold_history(kind, &histories);
        if let Err(e) = plots::write_svg(&plots::fold_history_path(&self.plot_dir, kind), &svg) {
            warn!(model = %kind, error = %e, "Failed to write fold history plot");
        }

        if let Err(e) = self.store.save::<B, M>(Stage::FoldTrained, &spec, &model) {
            warn!(model = %kind, error = %e, "Failed to save fold-trained checkpoint");
        }

        Ok(CrossValidation {
            model,
            summary: Some(summary),
        })
    }
}
