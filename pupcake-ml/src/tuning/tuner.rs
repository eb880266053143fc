//! Hyperband search followed by a final retrain of the best configuration.

use super::oracle::{Oracle, TrialRecord};
use crate::backend;
use crate::dataset::ImageSet;
use crate::error::MlError;
use crate::hyperparams::{Proposal, SearchSpace};
use crate::models::{ArchitectureSpec, BinaryClassifier, ModelFactory, ModelKind, WeightInit};
use crate::report::{plots, tables};
use crate::store::{ArtifactStore, Stage};
use crate::training::metrics::History;
use crate::training::runner::{FitOptions, TrainingRunner};
use burn::module::{AutodiffModule, Module};
use burn::tensor::backend::AutodiffBackend;
use pupcake_core::TuningConfig;
use pupcake_core::persistence::ensure_dir;
use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of a trial's weight checkpoint inside its trial directory.
pub const TRIAL_CHECKPOINT: &str = "checkpoint.mpk";

/// Result of [`Tuner::tune`].
#[derive(Debug)]
pub struct TuneOutcome<M> {
    pub model: M,
    pub spec: ArchitectureSpec,
    pub best: TrialRecord,
    pub history: History,
    /// Whether the tuned artifact reached the store.
    pub saved: bool,
}

#[derive(Debug, Clone)]
pub struct Tuner {
    factory: ModelFactory,
    store: ArtifactStore,
    config: TuningConfig,
    search_dir: PathBuf,
    output_dir: PathBuf,
    plot_dir: PathBuf,
    space: SearchSpace,
}

impl Tuner {
    pub fn new(
        factory: ModelFactory,
        store: ArtifactStore,
        config: TuningConfig,
        search_dir: PathBuf,
        output_dir: PathBuf,
        plot_dir: PathBuf,
    ) -> Self {
        Self {
            factory,
            store,
            config,
            search_dir,
            output_dir,
            plot_dir,
            space: SearchSpace::default(),
        }
    }

    /// Run (or resume) the search for `kind`, then retrain and persist the
    /// best configuration.
    pub fn tune<B, M, R>(
        &self,
        runner: &TrainingRunner<B>,
        kind: ModelKind,
        train: &ImageSet,
        val: &ImageSet,
        rng: &mut R,
    ) -> Result<TuneOutcome<M>, MlError>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + BinaryClassifier<B>,
        M::InnerModule: BinaryClassifier<B::InnerBackend>,
        R: Rng,
    {
        let mut oracle = Oracle::open(
            &self.search_dir,
            kind,
            self.config.max_epochs,
            self.config.factor,
            self.config.hyperband_iterations,
            self.space.clone(),
            self.config.max_retries_per_proposal,
        )?;
        info!(model = %kind, dir = %oracle.dir().display(), "Starting hyperparameter search");

        while let Some(trial) = oracle.next_trial(rng)? {
            let score = self.run_trial::<B, M, R>(runner, &oracle, kind, &trial, train, val, rng)?;
            oracle.complete(trial.trial_id, score)?;
        }

        let best = oracle
            .best_trial()
            .cloned()
            .ok_or_else(|| MlError::training(format!("search for {kind} completed no trials")))?;

        tables::write_trials(&tables::trials_path(&self.output_dir, kind), oracle.trials())?;
        tables::write_best_hyperparameters(
            &tables::best_hyperparameters_path(&self.output_dir, kind),
            kind,
            &best,
        )?;
        self.log_summary(kind, &oracle);

        info!(
            model = %kind,
            trial = best.trial_id + 1,
            params = %best.params,
            score = best.score,
            epochs = self.config.final_epochs,
            "Retraining best configuration"
        );
        let proposal = Proposal::new(kind, best.params);
        let spec = self.factory.spec(proposal);
        let model: M = self.factory.build::<B, M>(proposal, runner.device())?;
        let options = FitOptions {
            epochs: self.config.final_epochs,
            learning_rate: best.params.learning_rate.value(),
            patience: Some(self.config.patience),
        };
        let (model, history) = runner.fit(model, train, Some(val), &options, rng)?;

        let saved = match self.store.save::<B, M>(Stage::Tuned, &spec, &model) {
            Ok(_) => true,
            Err(e) => {
                warn!(model = %kind, error = %e, "Failed to save tuned weights, continuing with in-memory model");
                false
            }
        };

        let svg = plots::render_history(kind, &history);
        if let Err(e) = plots::write_svg(&plots::history_path(&self.plot_dir, kind), &svg) {
            warn!(model = %kind, error = %e, "Failed to write training history plot");
        }

        Ok(TuneOutcome {
            model,
            spec,
            best,
            history,
            saved,
        })
    }

    /// Train one trial and return its score (best validation accuracy).
    ///
    /// Promoted trials resume from their parent's checkpoint and train only
    /// the epochs their round adds.
    #[allow(clippy::too_many_arguments)]
    fn run_trial<B, M, R>(
        &self,
        runner: &TrainingRunner<B>,
        oracle: &Oracle,
        kind: ModelKind,
        trial: &TrialRecord,
        train: &ImageSet,
        val: &ImageSet,
        rng: &mut R,
    ) -> Result<f64, MlError>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + BinaryClassifier<B>,
        M::InnerModule: BinaryClassifier<B::InnerBackend>,
        R: Rng,
    {
        let proposal = Proposal::new(kind, trial.params);
        let spec = self.factory.spec(proposal);
        let budget = trial.epochs.min(self.config.search_epochs).max(1);

        let (model, epochs): (M, usize) = match trial.parent.and_then(|id| oracle.trial(id)) {
            Some(parent) => {
                let path = oracle.trial_dir(parent.trial_id).join(TRIAL_CHECKPOINT);
                let model = load_checkpoint::<B, M>(&spec, &path, runner.device())?;
                let done = parent.epochs.min(self.config.search_epochs);
                (model, budget.saturating_sub(done).max(1))
            }
            None => (self.factory.build::<B, M>(proposal, runner.device())?, budget),
        };

        info!(
            model = %kind,
            trial = trial.trial_id + 1,
            bracket = trial.bracket,
            round = trial.round,
            epochs,
            params = %trial.params,
            "Running trial"
        );
        let options = FitOptions {
            epochs,
            learning_rate: trial.params.learning_rate.value(),
            patience: Some(self.config.patience),
        };
        let (model, history) = runner.fit(model, train, Some(val), &options, rng)?;
        let score = history.best_val_accuracy().unwrap_or(0.0);

        let dir = oracle.trial_dir(trial.trial_id);
        ensure_dir(&dir)?;
        model.save_file(dir.join(TRIAL_CHECKPOINT), &backend::recorder())?;
        debug!(model = %kind, trial = trial.trial_id + 1, score, "Trial complete");
        Ok(score)
    }

    fn log_summary(&self, kind: ModelKind, oracle: &Oracle) {
        let mut ranked: Vec<&TrialRecord> = oracle.trials().iter().filter(|t| t.is_completed()).collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.trial_id.cmp(&b.trial_id))
        });
        info!(model = %kind, trials = ranked.len(), "Search summary");
        for trial in ranked.iter().take(10) {
            info!(
                model = %kind,
                trial = trial.trial_id + 1,
                params = %trial.params,
                score = trial.score,
                "Trial result"
            );
        }
    }
}

/// Rebuild `spec` and load a trial checkpoint into it.
fn load_checkpoint<B, M>(
    spec: &ArchitectureSpec,
    path: &Path,
    device: &B::Device,
) -> Result<M, MlError>
where
    B: AutodiffBackend,
    M: BinaryClassifier<B>,
{
    if !path.is_file() {
        return Err(MlError::missing_input(path));
    }
    Ok(M::init(spec, WeightInit::Random, device)?
        .load_file(path.to_path_buf(), &backend::recorder(), device)?
        .after_load())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TrainingBackend;
    use crate::models::Mlp;
    use pupcake_core::InputShape;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tempfile::TempDir;

    fn tiny_set(n: usize) -> ImageSet {
        let shape = InputShape::new(1, 2, 2);
        let mut pixels = Vec::new();
        let mut labels = Vec::new();
        for i in 0..n {
            let label = (i % 2) as f32;
            pixels.extend(std::iter::repeat_n(label * 0.8 + 0.1, shape.numel()));
            labels.push(label);
        }
        ImageSet::new(shape, pixels, labels).unwrap()
    }

    fn tuner(dir: &Path) -> Tuner {
        let config = TuningConfig {
            max_epochs: 2,
            factor: 2,
            hyperband_iterations: 1,
            search_epochs: 10,
            final_epochs: 2,
            patience: 3,
            max_retries_per_proposal: 100,
        };
        Tuner::new(
            ModelFactory::new(
                InputShape::new(1, 2, 2),
                dir.join("missing.mpk"),
                dir.join("plots"),
            ),
            ArtifactStore::new(dir.join("models")),
            config,
            dir.join("search"),
            dir.join("output"),
            dir.join("plots"),
        )
    }

    #[test]
    fn test_tune_persists_artifacts_and_reports() {
        let dir = TempDir::new().unwrap();
        let tuner = tuner(dir.path());
        let runner = TrainingRunner::<TrainingBackend>::new(Default::default(), 4);
        let mut rng = StdRng::seed_from_u64(3);

        let outcome = tuner
            .tune::<TrainingBackend, Mlp<TrainingBackend>, _>(
                &runner,
                ModelKind::Dense,
                &tiny_set(8),
                &tiny_set(4),
                &mut rng,
            )
            .unwrap();

        assert!(outcome.saved);
        assert!(outcome.best.score.is_some());
        assert!(tuner.store.has(Stage::Tuned, ModelKind::Dense));
        assert!(dir.path().join("output/MLP_hyperparameter_tuning_data.csv").is_file());
        assert!(dir.path().join("output/MLP_best_hyperparameters.csv").is_file());
        assert!(dir.path().join("search/MLP/oracle.json").is_file());
        assert!(dir.path().join("search/MLP/trial_0000").join(TRIAL_CHECKPOINT).is_file());
        assert!(dir.path().join("plots/MLP/MLP_history.svg").is_file());
    }

    #[test]
    fn test_failed_save_keeps_model_in_memory() {
        let dir = TempDir::new().unwrap();
        let tuner = tuner(dir.path());
        std::fs::create_dir_all(tuner.store.manifest_path(Stage::Tuned, ModelKind::Dense)).unwrap();
        let runner = TrainingRunner::<TrainingBackend>::new(Default::default(), 4);
        let mut rng = StdRng::seed_from_u64(3);

        let outcome = tuner
            .tune::<TrainingBackend, Mlp<TrainingBackend>, _>(
                &runner,
                ModelKind::Dense,
                &tiny_set(8),
                &tiny_set(4),
                &mut rng,
            )
            .unwrap();

        assert!(!outcome.saved);
        assert!(!tuner.store.has(Stage::Tuned, ModelKind::Dense));
        assert_eq!(outcome.spec.kind, ModelKind::Dense);
        assert!(outcome.history.epochs() > 0);
    }

    #[test]
    fn test_finished_search_is_not_rerun() {
        let dir = TempDir::new().unwrap();
        let tuner = tuner(dir.path());
        let runner = TrainingRunner::<TrainingBackend>::new(Default::default(), 4);
        let mut rng = StdRng::seed_from_u64(3);
        let (train, val) = (tiny_set(8), tiny_set(4));

        let first = tuner
            .tune::<TrainingBackend, Mlp<TrainingBackend>, _>(&runner, ModelKind::Dense, &train, &val, &mut rng)
            .unwrap();
        let state = std::fs::read_to_string(dir.path().join("search/MLP/oracle.json")).unwrap();
        let second = tuner
            .tune::<TrainingBackend, Mlp<TrainingBackend>, _>(&runner, ModelKind::Dense, &train, &val, &mut rng)
            .unwrap();

        assert_eq!(first.best, second.best);
        let trials = |s: &str| serde_json::from_str::<serde_json::Value>(s).unwrap()["trials"].clone();
        let after = std::fs::read_to_string(dir.path().join("search/MLP/oracle.json")).unwrap();
        assert_eq!(trials(&state), trials(&after));
    }
}
