//! Error types for the pupcake-ml crate.

use crate::store::Stage;
use pupcake_core::{ConfigError, PersistError};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the training pipeline.
///
/// Every variant is fatal for the coordinator run that raised it, except
/// [`MlError::Persistence`] of tuned weights, which the tuner logs and swallows.
#[derive(Debug, Error)]
pub enum MlError {
    #[error("Missing input: {}", .path.display())]
    MissingInput { path: PathBuf },

    #[error("No {stage} artifact for model '{model}'")]
    MissingArtifact { stage: Stage, model: String },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistError),

    #[error("Framework error: {0}")]
    Framework(String),

    #[error("Pretrained weights unavailable at {}: {reason}", .path.display())]
    PretrainedWeights { path: PathBuf, reason: String },

    #[error("Malformed architecture description {}: {reason}", .path.display())]
    MalformedArchitecture { path: PathBuf, reason: String },

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Invalid hyperparameter: {0}")]
    InvalidHyperparameter(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl MlError {
    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn framework(msg: impl Into<String>) -> Self {
        Self::Framework(msg.into())
    }

    pub fn invalid_hyperparameter(msg: impl Into<String>) -> Self {
        Self::InvalidHyperparameter(msg.into())
    }

    pub fn missing_input(path: impl Into<PathBuf>) -> Self {
        Self::MissingInput { path: path.into() }
    }
}

impl From<burn::record::RecorderError> for MlError {
    fn from(err: burn::record::RecorderError) -> Self {
        Self::Framework(format!("recorder: {err:?}"))
    }
}
