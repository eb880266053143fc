//! Dense network: a fixed funnel of hidden layers followed by a tunable head.

use super::{ArchitectureSpec, BinaryClassifier, LayerSummary, WeightInit};
use crate::error::MlError;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::tensor::activation::{relu, sigmoid};
use burn::tensor::{Tensor, backend::Backend};

/// Hidden widths before the tunable layer.
pub const HIDDEN_WIDTHS: [usize; 4] = [256, 128, 64, 32];

#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    hidden: Vec<Linear<B>>,
    dropout: Dropout,
    output: Linear<B>,
}

impl<B: Backend> BinaryClassifier<B> for Mlp<B> {
    fn init(
        spec: &ArchitectureSpec,
        _init: WeightInit<'_>,
        device: &B::Device,
    ) -> Result<Self, MlError> {
        let mut widths = vec![spec.input_shape.numel()];
        widths.extend(HIDDEN_WIDTHS);
        widths.push(spec.head.units);

        let hidden = widths
            .windows(2)
            .map(|pair| LinearConfig::new(pair[0], pair[1]).init(device))
            .collect();

        Ok(Self {
            hidden,
            dropout: DropoutConfig::new(spec.head.dropout_rate).init(),
            output: LinearConfig::new(spec.head.units, 1).init(device),
        })
    }

    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images.flatten::<2>(1, 3);
        for layer in &self.hidden {
            x = relu(layer.forward(x));
        }
        let x = self.dropout.forward(x);
        sigmoid(self.output.forward(x))
    }
}

pub(crate) fn layers(spec: &ArchitectureSpec) -> Vec<LayerSummary> {
    let numel = spec.input_shape.numel();
    let mut rows = vec![LayerSummary::new("flatten", "Flatten", vec![numel], 0)];

    let mut fan_in = numel;
    for (i, width) in HIDDEN_WIDTHS
        .iter()
        .copied()
        .chain([spec.head.units])
        .enumerate()
    {
        rows.push(LayerSummary::dense(format!("dense_{i}"), fan_in, width));
        fan_in = width;
    }
    rows.push(LayerSummary::new(
        "dropout",
        "Dropout",
        vec![spec.head.units],
        0,
    ));
    rows.push(LayerSummary::dense("output", spec.head.units, 1));
    rows
}
