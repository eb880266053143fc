//! Property-based tests for fold partitioning, fold averaging and the search space.

use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

use pupcake_ml::hyperparams::SearchSpace;
use pupcake_ml::kfold::{FoldRecord, FoldSummary, KFold};
use pupcake_ml::training::EvalMetrics;
use pupcake_ml::training::metrics::zero_one_loss;
use pupcake_ml::tuning::hyperband;

// --- K-fold partition properties ---

proptest! {
    #[test]
    fn every_example_validates_exactly_once(
        k in 2usize..8,
        extra in 0usize..60,
        seed in any::<u64>(),
    ) {
        let n = k + extra;
        let mut rng = StdRng::seed_from_u64(seed);
        let folds = KFold::new(k).split(n, &mut rng).unwrap();
        prop_assert_eq!(folds.len(), k);

        let mut seen = vec![0usize; n];
        for fold in &folds {
            for &i in &fold.validation {
                seen[i] += 1;
            }
            // train and validation are disjoint and cover the pool
            prop_assert_eq!(fold.train.len() + fold.validation.len(), n);
            prop_assert!(fold.train.iter().all(|i| !fold.validation.contains(i)));
        }
        prop_assert!(seen.iter().all(|&count| count == 1));
    }

    #[test]
    fn fold_sizes_differ_by_at_most_one(
        k in 2usize..10,
        extra in 0usize..100,
        seed in any::<u64>(),
    ) {
        let n = k + extra;
        let mut rng = StdRng::seed_from_u64(seed);
        let sizes: Vec<usize> = KFold::new(k)
            .split(n, &mut rng)
            .unwrap()
            .iter()
            .map(|f| f.validation.len())
            .collect();
        let max = *sizes.iter().max().unwrap();
        let min = *sizes.iter().min().unwrap();
        prop_assert!(max - min <= 1);
        prop_assert!(sizes.windows(2).all(|w| w[0] >= w[1]));
    }
}

// --- Average row ---

fn metrics_strategy() -> impl Strategy<Value = EvalMetrics> {
    (0.0f64..5.0, 0.0f64..=1.0, 0.0f64..=1.0).prop_map(|(loss, accuracy, zero_one_loss)| {
        EvalMetrics {
            loss,
            accuracy,
            zero_one_loss,
        }
    })
}

proptest! {
    #[test]
    fn average_row_is_arithmetic_mean(folds in prop::collection::vec(metrics_strategy(), 1..10)) {
        let records: Vec<FoldRecord> = folds
            .iter()
            .enumerate()
            .map(|(i, &metrics)| FoldRecord { fold: i + 1, metrics })
            .collect();
        let summary = FoldSummary::new(records);
        let n = folds.len() as f64;
        let mean = |f: fn(&EvalMetrics) -> f64| folds.iter().map(f).sum::<f64>() / n;

        prop_assert!((summary.average.loss - mean(|m| m.loss)).abs() < 1e-9);
        prop_assert!((summary.average.accuracy - mean(|m| m.accuracy)).abs() < 1e-9);
        prop_assert!((summary.average.zero_one_loss - mean(|m| m.zero_one_loss)).abs() < 1e-9);
    }
}

// --- Misclassification rate and search space ---

proptest! {
    #[test]
    fn zero_one_loss_is_a_fraction(
        pairs in prop::collection::vec((0u8..2, 0.0f32..=1.0), 1..64)
    ) {
        let labels: Vec<f32> = pairs.iter().map(|(y, _)| *y as f32).collect();
        let probs: Vec<f32> = pairs.iter().map(|(_, p)| *p).collect();
        let rate = zero_one_loss(&labels, &probs);
        prop_assert!((0.0..=1.0).contains(&rate));
        // perfectly confident correct predictions never miss
        prop_assert_eq!(zero_one_loss(&labels, &labels), 0.0);
    }

    #[test]
    fn sampled_proposals_stay_in_space(seed in any::<u64>()) {
        let space = SearchSpace::default();
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..16 {
            let params = space.sample(&mut rng);
            prop_assert!(space.validate(&params).is_ok());
        }
    }

    #[test]
    fn hyperband_rounds_shrink_and_grow_budget(
        max_epochs in 1usize..40,
        factor in 2usize..5,
    ) {
        for bracket in hyperband::plan(max_epochs, factor, 1) {
            let last = bracket.rounds.last().unwrap();
            prop_assert_eq!(last.epochs, max_epochs);
            for pair in bracket.rounds.windows(2) {
                prop_assert!(pair[1].size <= pair[0].size);
                prop_assert!(pair[1].epochs >= pair[0].epochs);
            }
        }
    }
}
