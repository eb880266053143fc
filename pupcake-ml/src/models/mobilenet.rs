//! Transfer learning on a frozen MobileNet v1 backbone.
//!
//! The backbone is the depthwise-separable stack of MobileNet v1 (width
//! multiplier 1.0, no top). Its weights come from a pretrained record produced
//! with the same recorder the rest of the crate uses; a missing or unreadable
//! record is fatal. Only the dense head is trained; the backbone's batch norms
//! always normalize with their stored statistics.

use super::{ArchitectureSpec, BinaryClassifier, LayerSummary, WeightInit};
use crate::backend;
use crate::error::MlError;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
};
use burn::tensor::activation::{relu, sigmoid};
use burn::tensor::{Tensor, backend::Backend};
use pupcake_core::InputShape;
use tracing::info;

const STEM_FILTERS: usize = 32;

/// (output filters, stride) of the thirteen depthwise-separable blocks.
pub const SEPARABLE_BLOCKS: [(usize, usize); 13] = [
    (64, 1),
    (128, 2),
    (128, 1),
    (256, 2),
    (256, 1),
    (512, 2),
    (512, 1),
    (512, 1),
    (512, 1),
    (512, 1),
    (512, 1),
    (1024, 2),
    (1024, 1),
];

/// Smallest input the backbone accepts.
pub const MIN_INPUT_SIZE: usize = 32;

fn relu6<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clamp(0.0, 6.0)
}

/// Batch norm with the stored statistics, whatever the backend.
///
/// `BatchNorm::forward` switches to batch statistics on an autodiff backend and
/// updates its running state, which would drift the pretrained statistics of a
/// frozen backbone during head training.
fn frozen_norm<B: Backend>(norm: &BatchNorm<B, 2>, x: Tensor<B, 4>) -> Tensor<B, 4> {
    let device = x.device();
    let channels = x.dims()[1];
    let shape = [1, channels, 1, 1];
    let mean = norm.running_mean.value().to_device(&device).reshape(shape);
    let std = norm
        .running_var
        .value()
        .to_device(&device)
        .add_scalar(norm.epsilon)
        .sqrt()
        .reshape(shape);
    x.sub(mean)
        .div(std)
        .mul(norm.gamma.val().reshape(shape))
        .add(norm.beta.val().reshape(shape))
}

/// Depthwise 3x3 -> BN -> ReLU6 -> pointwise 1x1 -> BN -> ReLU6.
#[derive(Module, Debug)]
pub struct SeparableBlock<B: Backend> {
    depthwise: Conv2d<B>,
    depthwise_norm: BatchNorm<B, 2>,
    pointwise: Conv2d<B>,
    pointwise_norm: BatchNorm<B, 2>,
}

impl<B: Backend> SeparableBlock<B> {
    fn new(in_channels: usize, filters: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            depthwise: Conv2dConfig::new([in_channels, in_channels], [3, 3])
                .with_groups(in_channels)
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            depthwise_norm: BatchNormConfig::new(in_channels).init(device),
            pointwise: Conv2dConfig::new([in_channels, filters], [1, 1])
                .with_bias(false)
                .init(device),
            pointwise_norm: BatchNormConfig::new(filters).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu6(frozen_norm(&self.depthwise_norm, self.depthwise.forward(x)));
        relu6(frozen_norm(&self.pointwise_norm, self.pointwise.forward(x)))
    }
}

/// MobileNet v1 feature extractor.
#[derive(Module, Debug)]
pub struct MobileNetBackbone<B: Backend> {
    stem: Conv2d<B>,
    stem_norm: BatchNorm<B, 2>,
    blocks: Vec<SeparableBlock<B>>,
}

impl<B: Backend> MobileNetBackbone<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        let stem = Conv2dConfig::new([channels, STEM_FILTERS], [3, 3])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);

        let mut in_channels = STEM_FILTERS;
        let mut blocks = Vec::with_capacity(SEPARABLE_BLOCKS.len());
        for (filters, stride) in SEPARABLE_BLOCKS {
            blocks.push(SeparableBlock::new(in_channels, filters, stride, device));
            in_channels = filters;
        }

        Self {
            stem,
            stem_norm: BatchNormConfig::new(STEM_FILTERS).init(device),
            blocks,
        }
    }

    /// Read the pretrained record at `path` into a fresh backbone.
    pub fn pretrained(
        channels: usize,
        path: &std::path::Path,
        device: &B::Device,
    ) -> Result<Self, MlError> {
        if !path.is_file() {
            return Err(MlError::PretrainedWeights {
                path: path.to_path_buf(),
                reason: "file not found".into(),
            });
        }
        let backbone = Self::new(channels, device)
            .load_file(path.to_path_buf(), &backend::recorder(), device)
            .map_err(|e| MlError::PretrainedWeights {
                path: path.to_path_buf(),
                reason: format!("{e:?}"),
            })?;
        info!(path = %path.display(), "Pretrained MobileNet backbone loaded");
        Ok(backbone)
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = relu6(frozen_norm(&self.stem_norm, self.stem.forward(x)));
        for block in &self.blocks {
            x = block.forward(x);
        }
        x
    }
}

#[derive(Module, Debug)]
pub struct MobileNet<B: Backend> {
    backbone: MobileNetBackbone<B>,
    dense: Linear<B>,
    norm: BatchNorm<B, 1>,
    dropout: Dropout,
    output: Linear<B>,
}

impl<B: Backend> BinaryClassifier<B> for MobileNet<B> {
    fn init(
        spec: &ArchitectureSpec,
        init: WeightInit<'_>,
        device: &B::Device,
    ) -> Result<Self, MlError> {
        check_input(spec.input_shape)?;
        let channels = spec.input_shape.channels;
        let backbone = match init {
            WeightInit::Pretrained(path) => MobileNetBackbone::pretrained(channels, path, device)?,
            WeightInit::Random => MobileNetBackbone::new(channels, device),
        };
        let features = feature_len(spec.input_shape);

        Ok(Self {
            backbone: backbone.no_grad(),
            dense: LinearConfig::new(features, spec.head.units).init(device),
            norm: BatchNormConfig::new(spec.head.units).init(device),
            dropout: DropoutConfig::new(spec.head.dropout_rate).init(),
            output: LinearConfig::new(spec.head.units, 1).init(device),
        })
    }

    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(images).flatten::<2>(1, 3);
        let x = relu(self.dense.forward(features));
        // [n, units] -> [n, units, 1] for the 1-d batch norm and back
        let x = self.norm.forward(x.unsqueeze_dim::<3>(2)).squeeze::<2>(2);
        let x = self.dropout.forward(x);
        sigmoid(self.output.forward(x))
    }

    fn after_load(mut self) -> Self {
        self.backbone = self.backbone.no_grad();
        self
    }
}

/// Spatial size of a 3x3 stride-`s` convolution with one pixel of padding.
fn strided(size: usize, stride: usize) -> usize {
    (size + 2 - 3) / stride + 1
}

fn backbone_sizes(shape: InputShape) -> Vec<(usize, usize)> {
    let mut h = strided(shape.height, 2);
    let mut w = strided(shape.width, 2);
    let mut sizes = vec![(h, w)];
    for (_, stride) in SEPARABLE_BLOCKS {
        h = strided(h, stride);
        w = strided(w, stride);
        sizes.push((h, w));
    }
    sizes
}

fn feature_len(shape: InputShape) -> usize {
    let (h, w) = backbone_sizes(shape).last().copied().unwrap_or((1, 1));
    SEPARABLE_BLOCKS[SEPARABLE_BLOCKS.len() - 1].0 * h * w
}

pub(crate) fn check_input(shape: InputShape) -> Result<(), MlError> {
    if shape.height < MIN_INPUT_SIZE || shape.width < MIN_INPUT_SIZE {
        return Err(MlError::invalid_hyperparameter(format!(
            "MobileNet needs inputs of at least {MIN_INPUT_SIZE}x{MIN_INPUT_SIZE}, got {shape}"
        )));
    }
    Ok(())
}

pub(crate) fn layers(spec: &ArchitectureSpec) -> Vec<LayerSummary> {
    let shape = spec.input_shape;
    let sizes = backbone_sizes(shape);
    let mut rows = Vec::new();

    let (h, w) = sizes[0];
    rows.push(LayerSummary::conv("conv1", shape.channels, STEM_FILTERS, 3, 1, false, [h, w]).frozen());
    rows.push(LayerSummary::batch_norm("conv1_bn", vec![STEM_FILTERS, h, w]).frozen());

    let mut in_channels = STEM_FILTERS;
    for (i, ((filters, _), (h, w))) in SEPARABLE_BLOCKS.iter().zip(&sizes[1..]).enumerate() {
        let block = i + 1;
        rows.push(
            LayerSummary::conv(
                format!("conv_dw_{block}"),
                in_channels,
                in_channels,
                3,
                in_channels,
                false,
                [*h, *w],
            )
            .frozen(),
        );
        rows.push(
            LayerSummary::batch_norm(format!("conv_dw_{block}_bn"), vec![in_channels, *h, *w])
                .frozen(),
        );
        rows.push(
            LayerSummary::conv(
                format!("conv_pw_{block}"),
                in_channels,
                *filters,
                1,
                1,
                false,
                [*h, *w],
            )
            .frozen(),
        );
        rows.push(
            LayerSummary::batch_norm(format!("conv_pw_{block}_bn"), vec![*filters, *h, *w])
                .frozen(),
        );
        in_channels = *filters;
    }

    let features = feature_len(shape);
    let units = spec.head.units;
    rows.push(LayerSummary::new("flatten", "Flatten", vec![features], 0));
    rows.push(LayerSummary::dense("dense", features, units));
    rows.push(LayerSummary::batch_norm("batch_norm", vec![units]));
    rows.push(LayerSummary::new("dropout", "Dropout", vec![units], 0));
    rows.push(LayerSummary::dense("output", units, 1));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperparams::{HeadParams, Proposal};
    use burn::backend::NdArray;
    use std::path::Path;

    type B = NdArray<f32>;

    fn spec(size: usize) -> ArchitectureSpec {
        ArchitectureSpec::new(
            Proposal::MobileNet(HeadParams::new(32, 0.2, 1e-4).unwrap()),
            InputShape::new(3, size, size),
        )
    }

    #[test]
    fn test_feature_len_for_imagenet_shape() {
        assert_eq!(feature_len(InputShape::new(3, 224, 224)), 7 * 7 * 1024);
        assert_eq!(feature_len(InputShape::new(3, 32, 32)), 1024);
    }

    #[test]
    fn test_missing_pretrained_record_is_fatal() {
        let device = Default::default();
        let result = MobileNet::<B>::init(
            &spec(32),
            WeightInit::Pretrained(Path::new("/nonexistent/mobilenet.mpk")),
            &device,
        );
        assert!(matches!(result, Err(MlError::PretrainedWeights { .. })));
    }

    #[test]
    fn test_pretrained_record_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mobilenet.mpk");
        let device = Default::default();
        MobileNetBackbone::<B>::new(3, &device)
            .save_file(path.clone(), &backend::recorder())
            .unwrap();

        let model =
            MobileNet::<B>::init(&spec(32), WeightInit::Pretrained(&path), &device).unwrap();
        let out = model.forward(Tensor::<B, 4>::zeros([2, 3, 32, 32], &device));
        assert_eq!(out.dims(), [2, 1]);
    }

    #[test]
    fn test_frozen_norm_matches_inference_batch_norm() {
        let device = Default::default();
        let mut norm: BatchNorm<B, 2> = BatchNormConfig::new(2).init(&device);
        norm.running_mean = burn::module::RunningState::new(Tensor::from_floats([0.5, -1.0], &device));
        norm.running_var = burn::module::RunningState::new(Tensor::from_floats([4.0, 0.25], &device));
        let x = Tensor::<B, 4>::ones([1, 2, 1, 1], &device);

        let expected = norm.forward(x.clone()).into_data().to_vec::<f32>().unwrap();
        let actual = frozen_norm(&norm, x).into_data().to_vec::<f32>().unwrap();
        for (a, e) in actual.iter().zip(&expected) {
            assert!((a - e).abs() < 1e-5);
        }
    }

    #[test]
    fn test_training_leaves_backbone_statistics_unchanged() {
        use crate::backend::TrainingBackend;
        use crate::dataset::ImageSet;
        use crate::training::{FitOptions, TrainingRunner};
        use burn::module::AutodiffModule;
        use rand::SeedableRng;
        use rand::rngs::StdRng;

        let shape = InputShape::new(3, 32, 32);
        let mut pixels = Vec::new();
        for i in 0..4 {
            pixels.extend(std::iter::repeat_n(0.2 * i as f32 + 0.1, shape.numel()));
        }
        let set = ImageSet::new(shape, pixels, vec![0.0, 1.0, 0.0, 1.0]).unwrap();

        let device = Default::default();
        let model = MobileNet::<TrainingBackend>::init(&spec(32), WeightInit::Random, &device).unwrap();
        let stats = |m: &MobileNet<TrainingBackend>| {
            let valid = m.valid();
            let backbone = &valid.backbone;
            let mut values = backbone.stem_norm.running_mean.value().into_data().to_vec::<f32>().unwrap();
            values.extend(backbone.stem_norm.running_var.value().into_data().to_vec::<f32>().unwrap());
            let last = &backbone.blocks[SEPARABLE_BLOCKS.len() - 1].pointwise_norm;
            values.extend(last.running_mean.value().into_data().to_vec::<f32>().unwrap());
            values
        };
        let before = stats(&model);

        let runner = TrainingRunner::<TrainingBackend>::new(device, 2);
        let options = FitOptions {
            epochs: 1,
            learning_rate: 1e-3,
            patience: None,
        };
        let (model, _) = runner
            .fit(model, &set, None, &options, &mut StdRng::seed_from_u64(5))
            .unwrap();

        assert_eq!(stats(&model), before);
    }

    #[test]
    fn test_layer_table_marks_backbone_frozen() {
        let rows = layers(&spec(224));
        let frozen = rows.iter().filter(|r| !r.trainable).count();
        assert_eq!(frozen, 2 + 4 * SEPARABLE_BLOCKS.len());
        assert_eq!(rows.last().unwrap().output_shape, vec![1]);
    }
}
