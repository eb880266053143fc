//! Configuration system for pupcake.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace `pupcake.toml` -> environment (`PUPCAKE_*`). CLI flags are applied
//! by the caller on the extracted value.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the workspace-level configuration.
pub const WORKSPACE_CONFIG_FILE: &str = "pupcake.toml";

/// Top-level configuration handed to every pipeline component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub tuning: TuningConfig,
    #[serde(default)]
    pub cross_validation: CrossValidationConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

impl ExperimentConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ds = &self.dataset;
        if ds.kfold_count < 2 {
            return Err(ConfigError::invalid(format!(
                "kfold_count must be at least 2, got {}",
                ds.kfold_count
            )));
        }
        if ds.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size must be positive"));
        }
        if ds.class_list.len() != 2 {
            return Err(ConfigError::invalid(format!(
                "class_list must name exactly two classes, got {:?}",
                ds.class_list
            )));
        }
        if ds.class_list[0] == ds.class_list[1] {
            return Err(ConfigError::invalid("class_list entries must differ"));
        }
        if ds.val_dir.is_none() && !(ds.validation_split > 0.0 && ds.validation_split < 1.0) {
            return Err(ConfigError::invalid(format!(
                "validation_split must lie in (0, 1), got {}",
                ds.validation_split
            )));
        }
        if ds.input_shape.numel() == 0 {
            return Err(ConfigError::invalid("input_shape dimensions must be positive"));
        }

        let t = &self.tuning;
        if t.max_epochs == 0 || t.final_epochs == 0 || t.search_epochs == 0 {
            return Err(ConfigError::invalid("tuning epoch budgets must be positive"));
        }
        if t.factor < 2 {
            return Err(ConfigError::invalid("tuning factor must be at least 2"));
        }
        if t.hyperband_iterations == 0 {
            return Err(ConfigError::invalid("hyperband_iterations must be positive"));
        }
        if self.cross_validation.epochs == 0 {
            return Err(ConfigError::invalid("cross_validation.epochs must be positive"));
        }
        Ok(())
    }

    /// Re-root every relative dataset and output path under `root`.
    pub fn rooted_at(&self, root: &Path) -> Self {
        Self {
            dataset: self.dataset.rooted_at(root),
            paths: self.paths.rooted_at(root),
            ..self.clone()
        }
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Image shape in channels-first order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[usize; 3]", into = "[usize; 3]")]
pub struct InputShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl InputShape {
    pub const fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// Number of values in one image.
    pub fn numel(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }
}

impl Default for InputShape {
    fn default() -> Self {
        Self::new(3, 224, 224)
    }
}

impl From<[usize; 3]> for InputShape {
    fn from([channels, height, width]: [usize; 3]) -> Self {
        Self::new(channels, height, width)
    }
}

impl From<InputShape> for [usize; 3] {
    fn from(shape: InputShape) -> Self {
        shape.dims()
    }
}

impl std::fmt::Display for InputShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.channels, self.height, self.width)
    }
}

/// Dataset location and shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Root directory of the labeled images.
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    /// Training images, one sub-directory per class.
    #[serde(default = "default_train_dir")]
    pub train_dir: PathBuf,
    /// Test images, one sub-directory per class.
    #[serde(default = "default_test_dir")]
    pub test_dir: PathBuf,
    /// Optional validation images; when absent the training set is split.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_dir: Option<PathBuf>,
    #[serde(default = "default_validation_split")]
    pub validation_split: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub input_shape: InputShape,
    /// Class names in label order: index 0 is the negative class.
    #[serde(default = "default_class_list")]
    pub class_list: Vec<String>,
    #[serde(default = "default_kfold_count")]
    pub kfold_count: usize,
    /// Fixed seed for shuffling and splitting. `None` draws from entropy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            train_dir: default_train_dir(),
            test_dir: default_test_dir(),
            val_dir: None,
            validation_split: default_validation_split(),
            batch_size: default_batch_size(),
            input_shape: InputShape::default(),
            class_list: default_class_list(),
            kfold_count: default_kfold_count(),
            seed: None,
        }
    }
}

impl DatasetConfig {
    pub fn rooted_at(&self, root: &Path) -> Self {
        Self {
            data_path: root_path(root, &self.data_path),
            train_dir: root_path(root, &self.train_dir),
            test_dir: root_path(root, &self.test_dir),
            val_dir: self.val_dir.as_ref().map(|p| root_path(root, p)),
            ..self.clone()
        }
    }

    /// Point at a different dataset root holding `train/`, `test/` and,
    /// when a validation directory is configured, `val/`.
    pub fn with_data_root(&self, data_path: &Path) -> Self {
        Self {
            data_path: data_path.to_path_buf(),
            train_dir: data_path.join("train"),
            test_dir: data_path.join("test"),
            val_dir: self.val_dir.as_ref().map(|_| data_path.join("val")),
            ..self.clone()
        }
    }
}

fn root_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn default_data_path() -> PathBuf {
    PathBuf::from("dataset")
}

fn default_train_dir() -> PathBuf {
    PathBuf::from("dataset/train")
}

fn default_test_dir() -> PathBuf {
    PathBuf::from("dataset/test")
}

fn default_validation_split() -> f64 {
    0.2
}

fn default_batch_size() -> usize {
    32
}

fn default_class_list() -> Vec<String> {
    vec!["chihuahua".to_string(), "muffin".to_string()]
}

fn default_kfold_count() -> usize {
    5
}

/// Output locations for cached artifacts and reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Tuned artifacts (`<model>/best_model/`) and fold-trained checkpoints (`KFold/`).
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
    /// Incremental hyperparameter-search state, one sub-directory per model.
    #[serde(default = "default_models_dir")]
    pub search_dir: PathBuf,
    /// CSV reports.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// SVG diagnostics.
    #[serde(default = "default_plot_dir")]
    pub plot_dir: PathBuf,
    /// Pretrained backbone record for the transfer-learning model.
    #[serde(default = "default_pretrained_weights")]
    pub pretrained_weights: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            search_dir: default_models_dir(),
            output_dir: default_output_dir(),
            plot_dir: default_plot_dir(),
            pretrained_weights: default_pretrained_weights(),
        }
    }
}

impl PathsConfig {
    /// Re-root every relative path under `root`.
    pub fn rooted_at(&self, root: &Path) -> Self {
        let join = |p: &PathBuf| root_path(root, p);
        Self {
            models_dir: join(&self.models_dir),
            search_dir: join(&self.search_dir),
            output_dir: join(&self.output_dir),
            plot_dir: join(&self.plot_dir),
            pretrained_weights: join(&self.pretrained_weights),
        }
    }
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_plot_dir() -> PathBuf {
    PathBuf::from("plot")
}

fn default_pretrained_weights() -> PathBuf {
    PathBuf::from("weights/mobilenet_v1_imagenet.mpk")
}

/// Hyperband search budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Largest epoch budget a single trial may reach.
    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,
    /// Reduction factor between successive-halving rounds.
    #[serde(default = "default_factor")]
    pub factor: usize,
    #[serde(default = "default_hyperband_iterations")]
    pub hyperband_iterations: usize,
    /// Upper bound on epochs passed to every search trial.
    #[serde(default = "default_ten_epochs")]
    pub search_epochs: usize,
    /// Epochs used to retrain the best proposal.
    #[serde(default = "default_ten_epochs")]
    pub final_epochs: usize,
    /// Early-stopping patience on validation loss.
    #[serde(default = "default_patience")]
    pub patience: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries_per_proposal: usize,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            max_epochs: default_max_epochs(),
            factor: default_factor(),
            hyperband_iterations: default_hyperband_iterations(),
            search_epochs: default_ten_epochs(),
            final_epochs: default_ten_epochs(),
            patience: default_patience(),
            max_retries_per_proposal: default_max_retries(),
        }
    }
}

fn default_max_epochs() -> usize {
    5
}

fn default_factor() -> usize {
    2
}

fn default_hyperband_iterations() -> usize {
    1
}

fn default_ten_epochs() -> usize {
    10
}

fn default_patience() -> usize {
    3
}

fn default_max_retries() -> usize {
    100
}

/// K-fold retraining budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidationConfig {
    #[serde(default = "default_ten_epochs")]
    pub epochs: usize,
}

impl Default for CrossValidationConfig {
    fn default() -> Self {
        Self {
            epochs: default_ten_epochs(),
        }
    }
}

/// Test-set reporting options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Number of test images rendered in the sample-prediction plot.
    #[serde(default = "default_sample_predictions")]
    pub sample_predictions: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            sample_predictions: default_sample_predictions(),
        }
    }
}

fn default_sample_predictions() -> usize {
    16
}

/// Load configuration with layered merging.
///
/// `explicit` replaces the workspace file when given and must exist.
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<ExperimentConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(ExperimentConfig::default()));

    // User-level config
    if let Some(dirs) = directories::ProjectDirs::from("dev", "pupcake", "pupcake") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    } else if let Some(ws) = workspace {
        let ws_config = ws.join(WORKSPACE_CONFIG_FILE);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // PUPCAKE_DATASET__BATCH_SIZE, PUPCAKE_TUNING__MAX_EPOCHS, ...
    figment = figment.merge(Env::prefixed("PUPCAKE_").split("__"));

    let config: ExperimentConfig = figment.extract().map_err(Box::new)?;
    tracing::debug!(kfold = config.dataset.kfold_count, "Configuration loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ExperimentConfig::default();
        assert_eq!(config.dataset.batch_size, 32);
        assert_eq!(config.dataset.kfold_count, 5);
        assert_eq!(config.dataset.input_shape, InputShape::new(3, 224, 224));
        assert_eq!(config.dataset.class_list, vec!["chihuahua", "muffin"]);
        assert_eq!(config.tuning.max_epochs, 5);
        assert_eq!(config.tuning.factor, 2);
        assert_eq!(config.tuning.patience, 3);
        assert_eq!(config.tuning.final_epochs, 10);
        assert_eq!(config.cross_validation.epochs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = ExperimentConfig::default();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("[dataset]"));
        let parsed: ExperimentConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validate_rejects_single_fold() {
        let mut config = ExperimentConfig::default();
        config.dataset.kfold_count = 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("kfold_count"));
    }

    #[test]
    fn test_validate_rejects_non_binary_classes() {
        let mut config = ExperimentConfig::default();
        config.dataset.class_list.push("croissant".into());
        assert!(config.validate().is_err());

        config.dataset.class_list = vec!["muffin".into(), "muffin".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_split_ignored_with_val_dir() {
        let mut config = ExperimentConfig::default();
        config.dataset.validation_split = 0.0;
        assert!(config.validate().is_err());

        config.dataset.val_dir = Some(PathBuf::from("dataset/validation"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.dataset.kfold_count, 5);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(WORKSPACE_CONFIG_FILE),
            r#"
[dataset]
batch_size = 8
input_shape = [3, 32, 32]
kfold_count = 2

[tuning]
max_epochs = 3
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.dataset.batch_size, 8);
        assert_eq!(config.dataset.input_shape, InputShape::new(3, 32, 32));
        assert_eq!(config.dataset.kfold_count, 2);
        assert_eq!(config.tuning.max_epochs, 3);
        // untouched sections keep their defaults
        assert_eq!(config.tuning.factor, 2);
        assert_eq!(config.cross_validation.epochs, 10);
    }

    #[test]
    fn test_load_config_missing_explicit_file() {
        let err = load_config(None, Some(Path::new("/nonexistent/pupcake.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_paths_rooted_at() {
        let paths = PathsConfig {
            output_dir: PathBuf::from("/abs/data"),
            ..PathsConfig::default()
        };
        let rooted = paths.rooted_at(Path::new("/work"));
        assert_eq!(rooted.models_dir, PathBuf::from("/work/models"));
        assert_eq!(rooted.output_dir, PathBuf::from("/abs/data"));
    }

    #[test]
    fn test_dataset_rooted_and_rebased() {
        let config = ExperimentConfig::default().rooted_at(Path::new("/work"));
        assert_eq!(config.dataset.train_dir, PathBuf::from("/work/dataset/train"));
        assert_eq!(config.paths.plot_dir, PathBuf::from("/work/plot"));

        let mut dataset = DatasetConfig::default();
        dataset.val_dir = Some(PathBuf::from("elsewhere"));
        let rebased = dataset.with_data_root(Path::new("/images"));
        assert_eq!(rebased.test_dir, PathBuf::from("/images/test"));
        assert_eq!(rebased.val_dir, Some(PathBuf::from("/images/val")));
    }
}
