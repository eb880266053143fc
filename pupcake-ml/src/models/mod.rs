//! The model factory and the three classifier architectures.
//!
//! Every architecture is a burn [`Module`] implementing [`BinaryClassifier`]:
//! it maps an image batch `[n, c, h, w]` to sigmoid probabilities `[n, 1]`.
//! The [`ArchitectureSpec`] is the serializable structure description that is
//! persisted next to the weights and rebuilds the module on load.

pub mod cnn;
pub mod mlp;
pub mod mobilenet;
pub mod summary;

pub use cnn::Cnn;
pub use mlp::Mlp;
pub use mobilenet::MobileNet;
pub use summary::LayerSummary;

use crate::error::MlError;
use crate::hyperparams::{HeadParams, Proposal};
use burn::module::Module;
use burn::tensor::{Tensor, backend::Backend};
use pupcake_core::InputShape;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// The closed set of architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    #[serde(rename = "MLP")]
    Dense,
    #[serde(rename = "CNN")]
    Convolutional,
    #[serde(rename = "MobileNet")]
    TransferLearning,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [Self::Dense, Self::Convolutional, Self::TransferLearning];

    /// Name used for directories, file prefixes and report rows.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dense => "MLP",
            Self::Convolutional => "CNN",
            Self::TransferLearning => "MobileNet",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = MlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mlp" | "dense" => Ok(Self::Dense),
            "cnn" | "convolutional" => Ok(Self::Convolutional),
            "mobilenet" | "transfer" | "transfer-learning" => Ok(Self::TransferLearning),
            other => Err(MlError::invalid_hyperparameter(format!(
                "unknown model '{other}', expected one of MLP, CNN, MobileNet"
            ))),
        }
    }
}

/// Structure description persisted alongside the weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureSpec {
    pub kind: ModelKind,
    pub input_shape: InputShape,
    pub head: HeadParams,
}

impl ArchitectureSpec {
    pub fn new(proposal: Proposal, input_shape: InputShape) -> Self {
        Self {
            kind: proposal.kind(),
            input_shape,
            head: *proposal.head(),
        }
    }

    pub fn proposal(&self) -> Proposal {
        Proposal::new(self.kind, self.head)
    }

    /// Check the input shape is one this architecture can be built for.
    pub fn check(&self) -> Result<(), MlError> {
        match self.kind {
            ModelKind::Dense => Ok(()),
            ModelKind::Convolutional => cnn::check_input(self.input_shape),
            ModelKind::TransferLearning => mobilenet::check_input(self.input_shape),
        }
    }

    /// Layer table with output shapes and trainable parameter counts.
    pub fn layers(&self) -> Vec<LayerSummary> {
        match self.kind {
            ModelKind::Dense => mlp::layers(self),
            ModelKind::Convolutional => cnn::layers(self),
            ModelKind::TransferLearning => mobilenet::layers(self),
        }
    }
}

/// Where the initial weights of a freshly built model come from.
#[derive(Debug, Clone, Copy)]
pub enum WeightInit<'a> {
    /// Random initialization everywhere. Used before a stored record is loaded.
    Random,
    /// Backbone weights read from a pretrained record.
    Pretrained(&'a Path),
}

/// A binary image classifier producing sigmoid probabilities.
pub trait BinaryClassifier<B: Backend>: Module<B> + Sized {
    fn init(spec: &ArchitectureSpec, init: WeightInit<'_>, device: &B::Device)
    -> Result<Self, MlError>;

    /// `[n, c, h, w]` images to `[n, 1]` probabilities.
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    /// Re-apply anything a loaded record resets, such as frozen parameters.
    fn after_load(self) -> Self {
        self
    }
}

/// Builds models from proposals and writes their summaries.
#[derive(Debug, Clone)]
pub struct ModelFactory {
    input_shape: InputShape,
    pretrained_weights: PathBuf,
    plot_dir: PathBuf,
}

impl ModelFactory {
    pub fn new(input_shape: InputShape, pretrained_weights: PathBuf, plot_dir: PathBuf) -> Self {
        Self {
            input_shape,
            pretrained_weights,
            plot_dir,
        }
    }

    pub fn input_shape(&self) -> InputShape {
        self.input_shape
    }

    pub fn spec(&self, proposal: Proposal) -> ArchitectureSpec {
        ArchitectureSpec::new(proposal, self.input_shape)
    }

    /// Build a freshly initialized model for `proposal`.
    pub fn build<B, M>(&self, proposal: Proposal, device: &B::Device) -> Result<M, MlError>
    where
        B: Backend,
        M: BinaryClassifier<B>,
    {
        let spec = self.spec(proposal);
        spec.check()?;
        let init = match spec.kind {
            ModelKind::TransferLearning => WeightInit::Pretrained(&self.pretrained_weights),
            _ => WeightInit::Random,
        };
        let model = M::init(&spec, init, device)?;
        debug!(model = %spec.kind, params = %spec.head, "Model built");

        if let Err(e) = summary::write_summary(&self.plot_dir, &spec) {
            warn!(model = %spec.kind, error = %e, "Failed to write model summary");
        }
        Ok(model)
    }
}
