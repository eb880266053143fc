//! Training infrastructure: the fit loop, metrics, callbacks and seeding.

pub mod callbacks;
pub mod metrics;
pub mod reproducibility;
pub mod runner;

pub use callbacks::{CallbackAction, EarlyStopping};
pub use metrics::History;
pub use reproducibility::SeedManager;
pub use runner::{EvalMetrics, FitOptions, TrainingRunner};
