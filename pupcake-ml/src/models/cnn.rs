//! Convolutional network: six conv blocks, global max pooling, tunable head.

use super::{ArchitectureSpec, BinaryClassifier, LayerSummary, WeightInit};
use crate::error::MlError;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig};
use burn::tensor::activation::{relu, sigmoid};
use burn::tensor::{Tensor, backend::Backend};
use pupcake_core::InputShape;

/// Filters of the six convolution blocks.
pub const BLOCK_FILTERS: [usize; 6] = [32, 32, 64, 64, 128, 128];

/// Smallest square input that survives six valid-conv + pool reductions.
pub const MIN_INPUT_SIZE: usize = 190;

const BLOCK_DROPOUT: f64 = 0.25;

/// Conv 3x3 (valid) -> ReLU -> batch norm -> max-pool 2x2 -> dropout.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    pool: MaxPool2d,
    dropout: Dropout,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [3, 3]).init(device),
            norm: BatchNormConfig::new(out_channels).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout: DropoutConfig::new(BLOCK_DROPOUT).init(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.conv.forward(x));
        let x = self.norm.forward(x);
        let x = self.pool.forward(x);
        self.dropout.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct Cnn<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    dense: Linear<B>,
    dropout: Dropout,
    output: Linear<B>,
}

impl<B: Backend> BinaryClassifier<B> for Cnn<B> {
    fn init(
        spec: &ArchitectureSpec,
        _init: WeightInit<'_>,
        device: &B::Device,
    ) -> Result<Self, MlError> {
        check_input(spec.input_shape)?;

        let mut in_channels = spec.input_shape.channels;
        let mut blocks = Vec::with_capacity(BLOCK_FILTERS.len());
        for filters in BLOCK_FILTERS {
            blocks.push(ConvBlock::new(in_channels, filters, device));
            in_channels = filters;
        }

        Ok(Self {
            blocks,
            dense: LinearConfig::new(in_channels, spec.head.units).init(device),
            dropout: DropoutConfig::new(spec.head.dropout_rate).init(),
            output: LinearConfig::new(spec.head.units, 1).init(device),
        })
    }

    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for block in &self.blocks {
            x = block.forward(x);
        }
        // global max pooling over the spatial plane
        let pooled = x.flatten::<3>(2, 3).max_dim(2).flatten::<2>(1, 2);
        let x = relu(self.dense.forward(pooled));
        let x = self.dropout.forward(x);
        sigmoid(self.output.forward(x))
    }
}

/// Spatial size after each block, `None` once a dimension collapses.
fn block_sizes(mut h: usize, mut w: usize) -> Option<Vec<(usize, usize)>> {
    let mut sizes = Vec::with_capacity(BLOCK_FILTERS.len());
    for _ in BLOCK_FILTERS {
        if h < 3 || w < 3 {
            return None;
        }
        h = (h - 2) / 2;
        w = (w - 2) / 2;
        if h == 0 || w == 0 {
            return None;
        }
        sizes.push((h, w));
    }
    Some(sizes)
}

pub(crate) fn check_input(shape: InputShape) -> Result<(), MlError> {
    if shape.height < MIN_INPUT_SIZE || shape.width < MIN_INPUT_SIZE {
        return Err(MlError::invalid_hyperparameter(format!(
            "CNN needs inputs of at least {MIN_INPUT_SIZE}x{MIN_INPUT_SIZE}, got {shape}"
        )));
    }
    Ok(())
}

pub(crate) fn layers(spec: &ArchitectureSpec) -> Vec<LayerSummary> {
    let shape = spec.input_shape;
    let sizes = block_sizes(shape.height, shape.width).unwrap_or_default();
    let mut rows = Vec::new();
    let (mut h, mut w) = (shape.height, shape.width);
    let mut in_channels = shape.channels;

    for (i, (filters, (ph, pw))) in BLOCK_FILTERS.iter().zip(sizes).enumerate() {
        let (ch, cw) = (h - 2, w - 2);
        rows.push(LayerSummary::conv(
            format!("conv2d_{i}"),
            in_channels,
            *filters,
            3,
            1,
            true,
            [ch, cw],
        ));
        rows.push(LayerSummary::batch_norm(
            format!("batch_norm_{i}"),
            vec![*filters, ch, cw],
        ));
        rows.push(LayerSummary::new(
            format!("max_pool_{i}"),
            "MaxPool2d",
            vec![*filters, ph, pw],
            0,
        ));
        rows.push(LayerSummary::new(
            format!("dropout_{i}"),
            "Dropout",
            vec![*filters, ph, pw],
            0,
        ));
        (h, w) = (ph, pw);
        in_channels = *filters;
    }

    rows.push(LayerSummary::new(
        "global_max_pool",
        "GlobalMaxPool2d",
        vec![in_channels],
        0,
    ));
    rows.push(LayerSummary::dense("dense", in_channels, spec.head.units));
    rows.push(LayerSummary::new(
        "dropout",
        "Dropout",
        vec![spec.head.units],
        0,
    ));
    rows.push(LayerSummary::dense("output", spec.head.units, 1));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperparams::{HeadParams, Proposal};
    use burn::backend::NdArray;

    #[test]
    fn test_min_input_is_smallest_surviving_size() {
        assert!(block_sizes(MIN_INPUT_SIZE, MIN_INPUT_SIZE).is_some());
        assert!(block_sizes(MIN_INPUT_SIZE - 1, MIN_INPUT_SIZE - 1).is_none());
        assert_eq!(block_sizes(224, 224).unwrap().last(), Some(&(1, 1)));
    }

    #[test]
    fn test_small_input_rejected_at_build() {
        let spec = ArchitectureSpec::new(
            Proposal::Cnn(HeadParams::new(64, 0.3, 1e-3).unwrap()),
            InputShape::new(3, 64, 64),
        );
        let device = Default::default();
        let result = Cnn::<NdArray<f32>>::init(&spec, WeightInit::Random, &device);
        assert!(matches!(result, Err(MlError::InvalidHyperparameter(_))));
    }

    #[test]
    fn test_layer_table_shapes() {
        let spec = ArchitectureSpec::new(
            Proposal::Cnn(HeadParams::new(96, 0.3, 1e-3).unwrap()),
            InputShape::new(3, 224, 224),
        );
        let rows = layers(&spec);
        assert_eq!(rows[0].output_shape, vec![32, 222, 222]);
        assert_eq!(rows[0].params, 3 * 32 * 9 + 32);
        let dense = rows.iter().find(|r| r.name == "dense").unwrap();
        assert_eq!(dense.params, 128 * 96 + 96);
        assert_eq!(rows.last().unwrap().output_shape, vec![1]);
    }
}
