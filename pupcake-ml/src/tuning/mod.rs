//! Hyperband hyperparameter search.
//!
//! [`hyperband`] computes the bracket schedule, [`oracle`] keeps the
//! persistent trial state and [`tuner`] trains the trials it hands out.

pub mod hyperband;
pub mod oracle;
pub mod tuner;

pub use hyperband::{BracketPlan, RoundPlan};
pub use oracle::{Oracle, OracleState, TrialRecord, TrialStatus};
pub use tuner::{TuneOutcome, Tuner};
