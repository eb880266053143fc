//! Workflow coordinator: tune, cross-validate and evaluate each model in turn.
//!
//! Every stage is gated by the artifact store. Tuning runs only when no tuned
//! weights exist and cross-validation only when no fold-trained checkpoint
//! exists, so a rerun over a populated cache goes straight to evaluation.
//! Any error aborts the whole run.

use crate::backend::{self, TrainingBackend};
use crate::dataset::ImageSet;
use crate::error::MlError;
use crate::evaluation::{EvaluationRecord, Evaluator};
use crate::kfold::CrossValidator;
use crate::models::{BinaryClassifier, Cnn, Mlp, MobileNet, ModelFactory, ModelKind};
use crate::report::tables;
use crate::store::{ArtifactStore, Stage};
use crate::training::{SeedManager, TrainingRunner};
use crate::tuning::Tuner;
use burn::module::AutodiffModule;
use pupcake_core::ExperimentConfig;
use std::path::PathBuf;
use tracing::info;

/// What happened to one model during [`Workflow::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutcome {
    pub record: EvaluationRecord,
    pub tuning_ran: bool,
    pub cross_validation_ran: bool,
}

/// Cache state of one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelStatus {
    pub model: ModelKind,
    pub tuned: bool,
    pub fold_trained: bool,
}

pub struct Workflow {
    store: ArtifactStore,
    tuner: Tuner,
    cross_validator: CrossValidator,
    evaluator: Evaluator,
    runner: TrainingRunner<TrainingBackend>,
    seeds: SeedManager,
    output_dir: PathBuf,
}

impl Workflow {
    /// Wire every component from a validated configuration.
    pub fn from_config(config: &ExperimentConfig) -> Result<Self, MlError> {
        config.validate()?;
        let paths = &config.paths;
        let store = ArtifactStore::new(paths.models_dir.clone());
        let factory = ModelFactory::new(
            config.dataset.input_shape,
            paths.pretrained_weights.clone(),
            paths.plot_dir.clone(),
        );

        Ok(Self {
            tuner: Tuner::new(
                factory,
                store.clone(),
                config.tuning.clone(),
                paths.search_dir.clone(),
                paths.output_dir.clone(),
                paths.plot_dir.clone(),
            ),
            cross_validator: CrossValidator::new(
                store.clone(),
                paths.output_dir.clone(),
                paths.plot_dir.clone(),
                config.dataset.kfold_count,
                config.cross_validation.epochs,
            ),
            evaluator: Evaluator::new(
                paths.output_dir.clone(),
                paths.plot_dir.clone(),
                config.dataset.class_list.clone(),
                config.evaluation.sample_predictions,
            ),
            runner: TrainingRunner::new(backend::default_device(), config.dataset.batch_size),
            seeds: SeedManager::new(config.dataset.seed),
            output_dir: paths.output_dir.clone(),
            store,
        })
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn seeds(&self) -> &SeedManager {
        &self.seeds
    }

    pub fn status(&self, models: &[ModelKind]) -> Vec<ModelStatus> {
        models
            .iter()
            .map(|&model| ModelStatus {
                model,
                tuned: self.store.has(Stage::Tuned, model),
                fold_trained: self.store.has(Stage::FoldTrained, model),
            })
            .collect()
    }

    /// Process `models` in order and write the cross-model performance table.
    pub fn run(
        &self,
        models: &[ModelKind],
        train: &ImageSet,
        val: &ImageSet,
        test: &ImageSet,
    ) -> Result<Vec<ModelOutcome>, MlError> {
        info!(
            models = ?models.iter().map(|m| m.name()).collect::<Vec<_>>(),
            backend = backend::backend_name(),
            "Starting workflow"
        );
        let mut outcomes = Vec::with_capacity(models.len());
        for &kind in models {
            let outcome = match kind {
                ModelKind::Dense => self.run_model::<Mlp<TrainingBackend>>(kind, train, val, test)?,
                ModelKind::Convolutional => {
                    self.run_model::<Cnn<TrainingBackend>>(kind, train, val, test)?
                }
                ModelKind::TransferLearning => {
                    self.run_model::<MobileNet<TrainingBackend>>(kind, train, val, test)?
                }
            };
            outcomes.push(outcome);
        }

        let records: Vec<EvaluationRecord> = outcomes.iter().map(|o| o.record.clone()).collect();
        let path = tables::performance_path(&self.output_dir);
        tables::write_performances(&path, &records)?;
        info!(path = %path.display(), models = records.len(), "Performance table written");
        Ok(outcomes)
    }

    fn run_model<M>(
        &self,
        kind: ModelKind,
        train: &ImageSet,
        val: &ImageSet,
        test: &ImageSet,
    ) -> Result<ModelOutcome, MlError>
    where
        M: AutodiffModule<TrainingBackend> + BinaryClassifier<TrainingBackend>,
        M::InnerModule: BinaryClassifier<backend::InferenceBackend>,
    {
        info!(model = %kind, "Processing model");

        let tuned = if self.store.has(Stage::Tuned, kind) {
            info!(model = %kind, "Tuned weights found, skipping tuning");
            None
        } else {
            let mut rng = self.seeds.rng(&format!("{kind}/tuning"));
            let outcome = self
                .tuner
                .tune::<TrainingBackend, M, _>(&self.runner, kind, train, val, &mut rng)?;
            Some((outcome.model, outcome.spec))
        };
        let tuning_ran = tuned.is_some();

        let mut rng = self.seeds.rng(&format!("{kind}/kfold"));
        let cv = self.cross_validator.cross_validate::<TrainingBackend, M, _>(
            &self.runner,
            kind,
            tuned,
            train,
            val,
            &mut rng,
        )?;
        let cross_validation_ran = cv.ran();

        let record = self
            .evaluator
            .evaluate::<TrainingBackend, _>(&self.runner, &cv.model.valid(), kind, test)?;
        info!(
            model = %kind,
            loss = record.loss,
            accuracy = record.accuracy,
            tuning_ran,
            cross_validation_ran,
            "Model complete"
        );

        Ok(ModelOutcome {
            record,
            tuning_ran,
            cross_validation_ran,
        })
    }
}
