//! Backend aliases for the numerical stack.
//!
//! Training runs on the ndarray CPU backend wrapped in burn's autodiff
//! decorator; evaluation strips autodiff through `AutodiffModule::valid`.

use burn::backend::{Autodiff, NdArray};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};

/// Backend used for inference and evaluation.
pub type InferenceBackend = NdArray<f32>;

/// Backend used for training.
pub type TrainingBackend = Autodiff<InferenceBackend>;

/// Device of [`InferenceBackend`] (shared by [`TrainingBackend`]).
pub type Device = <InferenceBackend as burn::tensor::backend::Backend>::Device;

/// Recorder for every persisted weight file (`.mpk`, full precision).
pub type WeightRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// File extension appended by [`WeightRecorder`].
pub const WEIGHT_EXTENSION: &str = "mpk";

/// The default CPU device.
pub fn default_device() -> Device {
    Device::default()
}

pub fn recorder() -> WeightRecorder {
    WeightRecorder::new()
}

/// Human-readable name of the active backend.
pub fn backend_name() -> &'static str {
    "ndarray (CPU)"
}
