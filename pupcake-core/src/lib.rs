//! # pupcake-core: configuration, errors and persistence
//!
//! Shared plumbing for the pupcake workspace: the layered experiment
//! configuration that replaces global constants, the error types for that
//! configuration, and the atomic file helpers every cached artifact is
//! written through.

pub mod config;
pub mod error;
pub mod persistence;

pub use config::{
    CrossValidationConfig, DatasetConfig, EvaluationConfig, ExperimentConfig, InputShape,
    PathsConfig, TuningConfig, WORKSPACE_CONFIG_FILE, load_config,
};
pub use error::{ConfigError, PersistError};
