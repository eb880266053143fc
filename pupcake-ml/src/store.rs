//! Stage-keyed artifact store for tuned and fold-trained models.
//!
//! Each artifact is a weight record plus a JSON manifest holding the
//! architecture description. The weight file is the cache key: `has` is true
//! exactly when it exists.

use crate::backend;
use crate::error::MlError;
use crate::models::{ArchitectureSpec, BinaryClassifier, ModelKind, WeightInit};
use burn::module::Module;
use burn::tensor::backend::Backend;
use chrono::{DateTime, Utc};
use pupcake_core::PersistError;
use pupcake_core::persistence::{atomic_write_json, ensure_dir, load_json};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Directory under the models root holding fold-trained checkpoints.
pub const KFOLD_DIR: &str = "KFold";

/// Lifecycle stage of a persisted model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Tuned,
    FoldTrained,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tuned => f.write_str("tuned"),
            Self::FoldTrained => f.write_str("fold-trained"),
        }
    }
}

/// Manifest written next to every weight record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub id: String,
    pub stage: Stage,
    pub architecture: ArchitectureSpec,
    pub weights_file: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Model artifacts on disk under one models directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    models_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn weights_path(&self, stage: Stage, model: ModelKind) -> PathBuf {
        let name = model.name();
        match stage {
            Stage::Tuned => self
                .models_dir
                .join(name)
                .join("best_model")
                .join(format!("best_model.weights.{}", backend::WEIGHT_EXTENSION)),
            Stage::FoldTrained => self
                .models_dir
                .join(KFOLD_DIR)
                .join(format!("{name}_kfold_model.{}", backend::WEIGHT_EXTENSION)),
        }
    }

    pub fn manifest_path(&self, stage: Stage, model: ModelKind) -> PathBuf {
        let name = model.name();
        match stage {
            Stage::Tuned => self
                .models_dir
                .join(name)
                .join("best_model")
                .join("best_model.json"),
            Stage::FoldTrained => self
                .models_dir
                .join(KFOLD_DIR)
                .join(format!("{name}_kfold_model.json")),
        }
    }

    pub fn has(&self, stage: Stage, model: ModelKind) -> bool {
        self.weights_path(stage, model).is_file()
    }

    /// Persist `module` and its manifest for `stage`.
    ///
    /// Weights are recorded under a partial name, the manifest is written, and
    /// only then are the weights renamed into place. On failure no weight file
    /// is left at the final path, so `has` stays false and the stage reruns.
    pub fn save<B, M>(
        &self,
        stage: Stage,
        spec: &ArchitectureSpec,
        module: &M,
    ) -> Result<ArtifactManifest, MlError>
    where
        B: Backend,
        M: Module<B>,
    {
        let weights = self.weights_path(stage, spec.kind);
        let partial = partial_weights_path(&weights);
        let result = self.write_artifact::<B, M>(stage, spec, module, &weights, &partial);
        if result.is_err() {
            for path in [&partial, &weights] {
                if path.is_file() {
                    if let Err(e) = std::fs::remove_file(path) {
                        warn!(path = %path.display(), error = %e, "Failed to remove weights after failed save");
                    }
                }
            }
        }
        result
    }

    fn write_artifact<B, M>(
        &self,
        stage: Stage,
        spec: &ArchitectureSpec,
        module: &M,
        weights: &Path,
        partial: &Path,
    ) -> Result<ArtifactManifest, MlError>
    where
        B: Backend,
        M: Module<B>,
    {
        if let Some(parent) = weights.parent() {
            ensure_dir(parent)?;
        }
        module
            .clone()
            .save_file(partial.to_path_buf(), &backend::recorder())?;

        let (sha256, size_bytes) = hash_file(partial)?;
        let manifest = ArtifactManifest {
            id: uuid::Uuid::new_v4().to_string(),
            stage,
            architecture: *spec,
            weights_file: weights
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            sha256,
            size_bytes,
            created_at: Utc::now(),
        };
        atomic_write_json(&self.manifest_path(stage, spec.kind), &manifest)?;
        std::fs::rename(partial, weights).map_err(|e| PersistError::Io {
            path: weights.to_path_buf(),
            source: e,
        })?;
        info!(model = %spec.kind, %stage, path = %weights.display(), size_bytes, "Artifact saved");
        Ok(manifest)
    }

    /// Read the manifest for `stage`, failing when it is absent or unreadable.
    pub fn manifest(&self, stage: Stage, model: ModelKind) -> Result<ArtifactManifest, MlError> {
        let path = self.manifest_path(stage, model);
        let manifest: ArtifactManifest = match load_json(&path) {
            Ok(Some(manifest)) => manifest,
            Ok(None) => {
                return Err(MlError::MalformedArchitecture {
                    path,
                    reason: "manifest missing next to weights".into(),
                });
            }
            Err(PersistError::Decode { source, .. }) => {
                return Err(MlError::MalformedArchitecture {
                    path,
                    reason: source.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        if manifest.architecture.kind != model {
            return Err(MlError::MalformedArchitecture {
                path,
                reason: format!(
                    "describes {} but was stored for {model}",
                    manifest.architecture.kind
                ),
            });
        }
        Ok(manifest)
    }

    /// Rebuild the model stored for `stage` and load its weights.
    pub fn load<B, M>(
        &self,
        stage: Stage,
        model: ModelKind,
        device: &B::Device,
    ) -> Result<(M, ArchitectureSpec), MlError>
    where
        B: Backend,
        M: BinaryClassifier<B>,
    {
        if !self.has(stage, model) {
            return Err(MlError::MissingArtifact {
                stage,
                model: model.name().to_string(),
            });
        }
        let manifest = self.manifest(stage, model)?;
        let weights = self.weights_path(stage, model);

        let (sha256, _) = hash_file(&weights)?;
        if sha256 != manifest.sha256 {
            warn!(
                model = %model,
                %stage,
                expected = %manifest.sha256,
                actual = %sha256,
                "Weight file hash differs from manifest"
            );
        }

        let spec = manifest.architecture;
        let module = M::init(&spec, WeightInit::Random, device)?
            .load_file(weights, &backend::recorder(), device)?
            .after_load();
        info!(model = %model, %stage, "Artifact loaded");
        Ok((module, spec))
    }
}

/// `best_model.weights.mpk` -> `best_model.weights.partial.mpk`. The recorder
/// forces its own extension, so the marker goes before it.
fn partial_weights_path(weights: &Path) -> PathBuf {
    weights.with_extension(format!("partial.{}", backend::WEIGHT_EXTENSION))
}

fn hash_file(path: &Path) -> Result<(String, u64), MlError> {
    let bytes = std::fs::read(path).map_err(|e| PersistError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let digest = Sha256::digest(&bytes);
    Ok((format!("{digest:x}"), bytes.len() as u64))
}
