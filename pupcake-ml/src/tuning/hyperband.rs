//! Hyperband bracket schedule, as laid out in the Hyperband paper.
//!
//! Bracket `s` starts `ceil((s_max + 1) * factor^s / (s + 1))` trials, and each
//! round keeps `floor(n / factor)` of them while the epoch budget of round `r`
//! grows to `ceil(max_epochs / factor^(s - r))`.

use serde::{Deserialize, Serialize};

/// One successive-halving round: how many trials run and to which epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundPlan {
    pub size: usize,
    /// Cumulative epoch budget a trial reaches by the end of this round.
    pub epochs: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketPlan {
    pub iteration: usize,
    pub s: usize,
    pub rounds: Vec<RoundPlan>,
}

/// `floor(log_factor(max_epochs))`, computed on integers.
pub fn s_max(max_epochs: usize, factor: usize) -> usize {
    let factor = factor.max(2);
    let mut s = 0;
    let mut budget = 1usize;
    while budget.saturating_mul(factor) <= max_epochs {
        budget *= factor;
        s += 1;
    }
    s
}

/// The full schedule: `iterations` passes over brackets `s_max..=0`.
pub fn plan(max_epochs: usize, factor: usize, iterations: usize) -> Vec<BracketPlan> {
    let factor = factor.max(2);
    let max_epochs = max_epochs.max(1);
    let top = s_max(max_epochs, factor);

    let mut brackets = Vec::new();
    for iteration in 0..iterations.max(1) {
        for s in (0..=top).rev() {
            let mut size = ((top + 1) * factor.pow(s as u32)).div_ceil(s + 1);
            let mut rounds = Vec::with_capacity(s + 1);
            for r in 0..=s {
                if r > 0 {
                    size = (size / factor).max(1);
                }
                let epochs = max_epochs.div_ceil(factor.pow((s - r) as u32)).max(1);
                rounds.push(RoundPlan { size, epochs });
            }
            brackets.push(BracketPlan {
                iteration,
                s,
                rounds,
            });
        }
    }
    brackets
}

/// Total number of trials the schedule runs.
pub fn total_trials(brackets: &[BracketPlan]) -> usize {
    brackets
        .iter()
        .flat_map(|b| b.rounds.iter())
        .map(|r| r.size)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_s_max() {
        assert_eq!(s_max(5, 2), 2);
        assert_eq!(s_max(8, 2), 3);
        assert_eq!(s_max(1, 2), 0);
        assert_eq!(s_max(27, 3), 3);
    }

    #[test]
    fn test_default_schedule() {
        let brackets = plan(5, 2, 1);
        assert_eq!(brackets.len(), 3);
        assert_eq!(
            brackets[0].rounds,
            vec![
                RoundPlan { size: 4, epochs: 2 },
                RoundPlan { size: 2, epochs: 3 },
                RoundPlan { size: 1, epochs: 5 },
            ]
        );
        assert_eq!(
            brackets[1].rounds,
            vec![RoundPlan { size: 3, epochs: 3 }, RoundPlan { size: 1, epochs: 5 }]
        );
        assert_eq!(brackets[2].rounds, vec![RoundPlan { size: 3, epochs: 5 }]);
        assert_eq!(total_trials(&brackets), 14);
    }

    #[test]
    fn test_single_epoch_schedule() {
        let brackets = plan(1, 2, 2);
        assert_eq!(brackets.len(), 2);
        assert_eq!(brackets[1].iteration, 1);
        assert_eq!(brackets[0].rounds, vec![RoundPlan { size: 1, epochs: 1 }]);
    }
}
