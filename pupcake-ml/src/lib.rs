//! # pupcake-ml: tuning, cross-validation and evaluation of image classifiers
//!
//! Three binary classifiers (a dense network, a convolutional network and a
//! MobileNet transfer-learning network) built on `burn`, driven through one
//! pipeline per model:
//!
//! 1. **Tuning**: Hyperband search over the head's width, dropout and learning
//!    rate, then a retrain of the best configuration.
//! 2. **Cross-validation**: k-fold retraining of the tuned model over the pooled
//!    train and validation images.
//! 3. **Evaluation**: test-set metrics, a classification report and plots.
//!
//! Each stage persists its result through the [`store::ArtifactStore`]; an
//! existing artifact skips the stage on the next run.

pub mod backend;
pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod hyperparams;
pub mod kfold;
pub mod models;
pub mod report;
pub mod store;
pub mod training;
pub mod tuning;
pub mod workflow;

// Re-exports
pub use dataset::{DatasetSplits, ImageSet, check_dataset, load_splits};
pub use error::MlError;
pub use evaluation::{ClassificationReport, EvaluationRecord, Evaluator};
pub use hyperparams::{HeadParams, LearningRate, Proposal, SearchSpace};
pub use kfold::{CrossValidator, FoldSummary, KFold};
pub use models::{ArchitectureSpec, BinaryClassifier, ModelFactory, ModelKind};
pub use store::{ArtifactStore, Stage};
pub use tuning::{TrialRecord, Tuner};
pub use workflow::{ModelOutcome, ModelStatus, Workflow};
