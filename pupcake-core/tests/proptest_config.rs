//! Property-based tests for configuration validation and path rooting.

use proptest::prelude::*;
use pupcake_core::{ExperimentConfig, InputShape};
use std::path::Path;

proptest! {
    #[test]
    fn kfold_below_two_is_rejected(k in 0usize..2) {
        let mut config = ExperimentConfig::default();
        config.dataset.kfold_count = k;
        prop_assert!(config.validate().is_err());
    }

    #[test]
    fn kfold_of_two_or_more_is_accepted(k in 2usize..50) {
        let mut config = ExperimentConfig::default();
        config.dataset.kfold_count = k;
        prop_assert!(config.validate().is_ok());
    }

    #[test]
    fn input_shape_survives_toml(c in 1usize..5, h in 1usize..512, w in 1usize..512) {
        let mut config = ExperimentConfig::default();
        config.dataset.input_shape = InputShape::new(c, h, w);
        let rendered = config.to_toml().unwrap();
        let parsed: ExperimentConfig = toml::from_str(&rendered).unwrap();
        prop_assert_eq!(parsed.dataset.input_shape, config.dataset.input_shape);
    }

    #[test]
    fn rooting_is_idempotent(root in "/[a-z]{1,8}(/[a-z]{1,8}){0,3}") {
        let root = Path::new(&root);
        let once = ExperimentConfig::default().rooted_at(root);
        let twice = once.rooted_at(Path::new("/elsewhere"));
        prop_assert_eq!(once, twice);
    }
}
