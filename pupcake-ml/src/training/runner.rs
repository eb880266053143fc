//! Training runner: mini-batch Adam on binary cross-entropy.

use crate::dataset::ImageSet;
use crate::error::MlError;
use crate::models::BinaryClassifier;
use crate::training::callbacks::{CallbackAction, EarlyStopping};
use crate::training::metrics::{self, EPSILON, History};
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Epsilon of the Adam optimizer.
pub const ADAM_EPSILON: f32 = 1e-7;

/// Options for one call to [`TrainingRunner::fit`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub epochs: usize,
    pub learning_rate: f64,
    /// Early-stopping patience on validation loss; `None` trains every epoch.
    pub patience: Option<usize>,
}

/// Loss, accuracy and misclassification rate over a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub zero_one_loss: f64,
}

impl EvalMetrics {
    pub fn from_predictions(labels: &[f32], probs: &[f32]) -> Self {
        Self {
            loss: metrics::binary_cross_entropy(labels, probs),
            accuracy: metrics::binary_accuracy(labels, probs),
            zero_one_loss: metrics::zero_one_loss(labels, probs),
        }
    }
}

/// Mean binary cross-entropy of `[n, 1]` probabilities.
pub fn bce_loss<B: Backend>(probs: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let probs = probs.clamp(EPSILON, 1.0 - EPSILON);
    let positive = targets.clone() * probs.clone().log();
    let negative = targets.neg().add_scalar(1.0) * probs.neg().add_scalar(1.0).log();
    (positive + negative).mean().neg()
}

fn to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>, MlError> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| MlError::framework(format!("tensor readback: {e:?}")))
}

/// Trains and evaluates classifiers on a fixed device and batch size.
#[derive(Debug, Clone)]
pub struct TrainingRunner<B: AutodiffBackend> {
    device: B::Device,
    batch_size: usize,
}

impl<B: AutodiffBackend> TrainingRunner<B> {
    pub fn new(device: B::Device, batch_size: usize) -> Self {
        Self {
            device,
            batch_size: batch_size.max(1),
        }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Train `model` with a fresh Adam optimizer.
    ///
    /// With a validation set, metrics are recorded per epoch and early stopping
    /// (when configured) restores the best weights once it triggers.
    pub fn fit<M, R>(
        &self,
        model: M,
        train: &ImageSet,
        val: Option<&ImageSet>,
        options: &FitOptions,
        rng: &mut R,
    ) -> Result<(M, History), MlError>
    where
        M: AutodiffModule<B> + BinaryClassifier<B>,
        M::InnerModule: BinaryClassifier<B::InnerBackend>,
        R: Rng,
    {
        if train.is_empty() {
            return Err(MlError::training("training set is empty"));
        }

        let mut optimizer = AdamConfig::new().with_epsilon(ADAM_EPSILON).init::<B, M>();
        let mut model = model;
        let mut history = History::new();
        let mut early_stopping = match (options.patience, val) {
            (Some(patience), Some(_)) => Some(EarlyStopping::new(patience)),
            _ => None,
        };
        let mut best: Option<M> = None;
        let mut order: Vec<usize> = (0..train.len()).collect();

        for epoch in 0..options.epochs {
            order.shuffle(rng);
            let mut loss_sum = 0.0;
            let mut correct = 0usize;

            for chunk in order.chunks(self.batch_size) {
                let (images, targets) = train.batch::<B>(chunk, &self.device);
                let probs = model.forward(images);
                let batch_probs = to_vec(probs.clone())?;
                let loss = bce_loss(probs, targets);
                let loss_value: f64 = loss.clone().into_scalar().elem();

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(options.learning_rate, model, grads);

                loss_sum += loss_value * chunk.len() as f64;
                correct += chunk
                    .iter()
                    .zip(&batch_probs)
                    .filter(|&(&i, &p)| metrics::predicted_class(p) == train.labels()[i])
                    .count();
            }

            let loss = loss_sum / train.len() as f64;
            let accuracy = correct as f64 / train.len() as f64;
            let val_metrics = match val {
                Some(val) => Some(self.evaluate(&model.valid(), val)?),
                None => None,
            };
            history.record_epoch(loss, accuracy, val_metrics.map(|m| (m.loss, m.accuracy)));
            debug!(
                epoch = epoch + 1,
                loss,
                accuracy,
                val_loss = val_metrics.map(|m| m.loss),
                val_accuracy = val_metrics.map(|m| m.accuracy),
                "Epoch complete"
            );

            if let (Some(es), Some(vm)) = (early_stopping.as_mut(), val_metrics) {
                match es.on_epoch_end(epoch, vm.loss) {
                    CallbackAction::Improved => best = Some(model.clone()),
                    CallbackAction::Continue => {}
                    CallbackAction::Stop => {
                        if let Some(best) = best.take() {
                            model = best;
                            history.restored_epoch = es.best_epoch();
                        }
                        info!(
                            epoch = epoch + 1,
                            best_epoch = es.best_epoch().map(|e| e + 1),
                            "Early stopping"
                        );
                        break;
                    }
                }
            }
        }

        Ok((model, history))
    }

    /// Sigmoid probabilities for every image in `set`, in order.
    pub fn predict<M>(&self, model: &M, set: &ImageSet) -> Result<Vec<f32>, MlError>
    where
        M: BinaryClassifier<B::InnerBackend>,
    {
        let indices: Vec<usize> = (0..set.len()).collect();
        let mut probs = Vec::with_capacity(set.len());
        for chunk in indices.chunks(self.batch_size) {
            let (images, _) = set.batch::<B::InnerBackend>(chunk, &self.device);
            probs.extend(to_vec(model.forward(images))?);
        }
        Ok(probs)
    }

    pub fn evaluate<M>(&self, model: &M, set: &ImageSet) -> Result<EvalMetrics, MlError>
    where
        M: BinaryClassifier<B::InnerBackend>,
    {
        let probs = self.predict(model, set)?;
        Ok(EvalMetrics::from_predictions(set.labels(), &probs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TrainingBackend;
    use crate::hyperparams::{HeadParams, Proposal};
    use crate::models::{ArchitectureSpec, Mlp, WeightInit};
    use burn::backend::NdArray;
    use burn::tensor::TensorData;
    use pupcake_core::InputShape;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn separable_set(n: usize) -> ImageSet {
        let shape = InputShape::new(1, 2, 2);
        let mut pixels = Vec::new();
        let mut labels = Vec::new();
        for i in 0..n {
            let label = (i % 2) as f32;
            pixels.extend([label; 4]);
            labels.push(label);
        }
        ImageSet::new(shape, pixels, labels).unwrap()
    }

    fn mlp() -> Mlp<TrainingBackend> {
        let spec = ArchitectureSpec::new(
            Proposal::Mlp(HeadParams::new(32, 0.2, 1e-2).unwrap()),
            InputShape::new(1, 2, 2),
        );
        Mlp::init(&spec, WeightInit::Random, &Default::default()).unwrap()
    }

    #[test]
    fn test_bce_loss_matches_host_metric() {
        type B = NdArray<f32>;
        let device = Default::default();
        let probs = Tensor::<B, 2>::from_data(TensorData::new(vec![0.9f32, 0.2], [2, 1]), &device);
        let targets = Tensor::<B, 2>::from_data(TensorData::new(vec![1.0f32, 0.0], [2, 1]), &device);
        let loss: f64 = bce_loss(probs, targets).into_scalar().elem();
        let expected = metrics::binary_cross_entropy(&[1.0, 0.0], &[0.9, 0.2]);
        assert!((loss - expected).abs() < 1e-5);
    }

    #[test]
    fn test_fit_records_history() {
        let runner = TrainingRunner::<TrainingBackend>::new(Default::default(), 4);
        let train = separable_set(8);
        let val = separable_set(4);
        let mut rng = StdRng::seed_from_u64(3);
        let options = FitOptions {
            epochs: 3,
            learning_rate: 1e-2,
            patience: None,
        };
        let (model, history) = runner
            .fit(mlp(), &train, Some(&val), &options, &mut rng)
            .unwrap();
        assert_eq!(history.epochs(), 3);
        assert_eq!(history.val_loss.len(), 3);
        assert!(history.loss.iter().all(|l| l.is_finite()));

        let probs = runner.predict(&model.valid(), &val).unwrap();
        assert_eq!(probs.len(), 4);
    }

    #[test]
    fn test_fit_rejects_empty_training_set() {
        let runner = TrainingRunner::<TrainingBackend>::new(Default::default(), 4);
        let empty = ImageSet::empty(InputShape::new(1, 2, 2));
        let mut rng = StdRng::seed_from_u64(3);
        let options = FitOptions {
            epochs: 1,
            learning_rate: 1e-3,
            patience: Some(3),
        };
        assert!(runner.fit(mlp(), &empty, None, &options, &mut rng).is_err());
    }

    #[test]
    fn test_eval_metrics_from_predictions() {
        let m = EvalMetrics::from_predictions(&[0.0, 1.0, 1.0, 0.0], &[0.2, 0.8, 0.3, 0.49]);
        assert!((m.accuracy - 0.75).abs() < 1e-12);
        assert!((m.zero_one_loss - 0.25).abs() < 1e-12);
    }
}
