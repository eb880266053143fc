//! Typed hyperparameter proposals and the space they are drawn from.

use crate::error::MlError;
use crate::models::ModelKind;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer range with a step, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntRange {
    pub min: usize,
    pub max: usize,
    pub step: usize,
}

impl IntRange {
    pub fn values(&self) -> Vec<usize> {
        (self.min..=self.max).step_by(self.step.max(1)).collect()
    }

    pub fn contains(&self, value: usize) -> bool {
        value >= self.min && value <= self.max && (value - self.min) % self.step.max(1) == 0
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> usize {
        let values = self.values();
        values[rng.gen_range(0..values.len())]
    }
}

/// Float range with a step, bounds inclusive. Values are snapped to 1e-6.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloatRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl FloatRange {
    pub fn values(&self) -> Vec<f64> {
        let count = ((self.max - self.min) / self.step).round() as usize + 1;
        (0..count)
            .map(|i| snap(self.min + i as f64 * self.step))
            .collect()
    }

    pub fn contains(&self, value: f64) -> bool {
        self.values().iter().any(|v| (v - value).abs() < 1e-6)
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        let values = self.values();
        values[rng.gen_range(0..values.len())]
    }
}

fn snap(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

/// Learning rates the optimizer may be compiled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum LearningRate {
    High,
    Medium,
    Low,
}

impl LearningRate {
    pub const ALL: [LearningRate; 3] = [Self::High, Self::Medium, Self::Low];

    pub fn value(self) -> f64 {
        match self {
            Self::High => 1e-2,
            Self::Medium => 1e-3,
            Self::Low => 1e-4,
        }
    }
}

impl TryFrom<f64> for LearningRate {
    type Error = MlError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|lr| (lr.value() - value).abs() < value.abs() * 1e-6 + 1e-12)
            .ok_or_else(|| {
                MlError::invalid_hyperparameter(format!(
                    "learning_rate {value} is not one of 0.01, 0.001, 0.0001"
                ))
            })
    }
}

impl From<LearningRate> for f64 {
    fn from(lr: LearningRate) -> Self {
        lr.value()
    }
}

impl fmt::Display for LearningRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// The declared search space shared by the three architectures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub units: IntRange,
    pub dropout_rate: FloatRange,
    pub learning_rate: Vec<LearningRate>,
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            units: IntRange {
                min: 32,
                max: 512,
                step: 32,
            },
            dropout_rate: FloatRange {
                min: 0.2,
                max: 0.5,
                step: 0.1,
            },
            learning_rate: LearningRate::ALL.to_vec(),
        }
    }
}

impl SearchSpace {
    /// Draw one proposal uniformly from each dimension.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> HeadParams {
        HeadParams {
            units: self.units.sample(rng),
            dropout_rate: self.dropout_rate.sample(rng),
            learning_rate: self.learning_rate[rng.gen_range(0..self.learning_rate.len())],
        }
    }

    pub fn validate(&self, params: &HeadParams) -> Result<(), MlError> {
        if !self.units.contains(params.units) {
            return Err(MlError::invalid_hyperparameter(format!(
                "units {} outside {}..={} step {}",
                params.units, self.units.min, self.units.max, self.units.step
            )));
        }
        if !self.dropout_rate.contains(params.dropout_rate) {
            return Err(MlError::invalid_hyperparameter(format!(
                "dropout_rate {} outside {}..={} step {}",
                params.dropout_rate,
                self.dropout_rate.min,
                self.dropout_rate.max,
                self.dropout_rate.step
            )));
        }
        if !self.learning_rate.contains(&params.learning_rate) {
            return Err(MlError::invalid_hyperparameter(format!(
                "learning_rate {} not allowed",
                params.learning_rate
            )));
        }
        Ok(())
    }
}

/// Width, dropout and learning rate of a classifier head.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadParams {
    pub units: usize,
    pub dropout_rate: f64,
    pub learning_rate: LearningRate,
}

impl HeadParams {
    /// Validated constructor against [`SearchSpace::default`].
    pub fn new(units: usize, dropout_rate: f64, learning_rate: f64) -> Result<Self, MlError> {
        let params = Self {
            units,
            dropout_rate: snap(dropout_rate),
            learning_rate: LearningRate::try_from(learning_rate)?,
        };
        SearchSpace::default().validate(&params)?;
        Ok(params)
    }

    /// Identity used to detect duplicate proposals.
    pub fn key(&self) -> (usize, i64, LearningRate) {
        (
            self.units,
            (self.dropout_rate * 1000.0).round() as i64,
            self.learning_rate,
        )
    }
}

impl fmt::Display for HeadParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "units={} dropout_rate={:.1} learning_rate={}",
            self.units, self.dropout_rate, self.learning_rate
        )
    }
}

/// Hyperparameters bound to one architecture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "architecture", content = "params")]
pub enum Proposal {
    #[serde(rename = "MLP")]
    Mlp(HeadParams),
    #[serde(rename = "CNN")]
    Cnn(HeadParams),
    MobileNet(HeadParams),
}

impl Proposal {
    pub fn new(kind: ModelKind, head: HeadParams) -> Self {
        match kind {
            ModelKind::Dense => Self::Mlp(head),
            ModelKind::Convolutional => Self::Cnn(head),
            ModelKind::TransferLearning => Self::MobileNet(head),
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Mlp(_) => ModelKind::Dense,
            Self::Cnn(_) => ModelKind::Convolutional,
            Self::MobileNet(_) => ModelKind::TransferLearning,
        }
    }

    pub fn head(&self) -> &HeadParams {
        match self {
            Self::Mlp(head) | Self::Cnn(head) | Self::MobileNet(head) => head,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_default_space_values() {
        let space = SearchSpace::default();
        assert_eq!(space.units.values().len(), 16);
        assert_eq!(space.units.values()[0], 32);
        assert_eq!(space.units.values()[15], 512);
        assert_eq!(space.dropout_rate.values(), vec![0.2, 0.3, 0.4, 0.5]);
    }

    #[test]
    fn test_head_params_validation() {
        assert!(HeadParams::new(64, 0.3, 1e-3).is_ok());
        assert!(HeadParams::new(48, 0.3, 1e-3).is_err());
        assert!(HeadParams::new(544, 0.3, 1e-3).is_err());
        assert!(HeadParams::new(64, 0.25, 1e-3).is_err());
        assert!(HeadParams::new(64, 0.3, 5e-3).is_err());
    }

    #[test]
    fn test_samples_stay_in_space() {
        let space = SearchSpace::default();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let params = space.sample(&mut rng);
            space.validate(&params).unwrap();
        }
    }

    #[test]
    fn test_proposal_serde_is_tagged() {
        let proposal = Proposal::Cnn(HeadParams::new(128, 0.4, 1e-4).unwrap());
        let json = serde_json::to_value(proposal).unwrap();
        assert_eq!(json["architecture"], "CNN");
        assert_eq!(json["params"]["units"], 128);
        assert_eq!(json["params"]["learning_rate"], 1e-4);
        let back: Proposal = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), ModelKind::Convolutional);
    }

    #[test]
    fn test_learning_rate_rejects_unknown_value() {
        let result: Result<LearningRate, _> = serde_json::from_str("0.5");
        assert!(result.is_err());
    }
}
