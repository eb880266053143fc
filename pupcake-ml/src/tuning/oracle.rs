//! Persistent Hyperband search state.
//!
//! The oracle owns every trial of one model's search and decides what runs
//! next. Its state is a single JSON file rewritten after each change, so an
//! interrupted search picks up at the first pending trial.

use super::hyperband::{self, BracketPlan};
use crate::error::MlError;
use crate::hyperparams::{HeadParams, SearchSpace};
use crate::models::ModelKind;
use chrono::{DateTime, Utc};
use pupcake_core::persistence::{atomic_write_json, load_json};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const ORACLE_FILE: &str = "oracle.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Pending,
    Completed,
}

/// One evaluated (or scheduled) hyperparameter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial_id: usize,
    pub params: HeadParams,
    pub bracket: usize,
    pub round: usize,
    /// Cumulative epoch budget this trial trains to.
    pub epochs: usize,
    /// Trial whose checkpoint this one continues from.
    pub parent: Option<usize>,
    pub status: TrialStatus,
    /// Best validation accuracy reached.
    pub score: Option<f64>,
}

impl TrialRecord {
    pub fn pending(trial_id: usize, params: HeadParams) -> Self {
        Self {
            trial_id,
            params,
            bracket: 0,
            round: 0,
            epochs: 0,
            parent: None,
            status: TrialStatus::Pending,
            score: None,
        }
    }

    pub fn completed(trial_id: usize, params: HeadParams, score: f64) -> Self {
        Self {
            status: TrialStatus::Completed,
            score: Some(score),
            ..Self::pending(trial_id, params)
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TrialStatus::Completed
    }
}

/// Ordering used for promotion and for picking the best trial: higher score
/// first, then lower trial id.
fn rank(a: &TrialRecord, b: &TrialRecord) -> std::cmp::Ordering {
    let sa = a.score.unwrap_or(f64::NEG_INFINITY);
    let sb = b.score.unwrap_or(f64::NEG_INFINITY);
    sb.partial_cmp(&sa)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then(a.trial_id.cmp(&b.trial_id))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleState {
    pub model: ModelKind,
    pub max_epochs: usize,
    pub factor: usize,
    pub iterations: usize,
    pub brackets: Vec<BracketPlan>,
    pub trials: Vec<TrialRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Hyperband oracle for one model, persisted under `<search_dir>/<model>/`.
#[derive(Debug)]
pub struct Oracle {
    dir: PathBuf,
    state: OracleState,
    space: SearchSpace,
    max_retries: usize,
}

impl Oracle {
    /// Load the saved search for `model`, or start a new one.
    ///
    /// A saved search with a different schedule is discarded.
    pub fn open(
        search_dir: &Path,
        model: ModelKind,
        max_epochs: usize,
        factor: usize,
        iterations: usize,
        space: SearchSpace,
        max_retries: usize,
    ) -> Result<Self, MlError> {
        let dir = search_dir.join(model.name());
        let path = dir.join(ORACLE_FILE);
        let saved: Option<OracleState> = load_json(&path)?;

        let state = match saved {
            Some(state)
                if state.model == model
                    && state.max_epochs == max_epochs
                    && state.factor == factor
                    && state.iterations == iterations =>
            {
                let done = state.trials.iter().filter(|t| t.is_completed()).count();
                info!(model = %model, completed = done, "Resuming hyperparameter search");
                state
            }
            other => {
                if other.is_some() {
                    warn!(model = %model, path = %path.display(), "Search schedule changed, restarting search");
                }
                let now = Utc::now();
                OracleState {
                    model,
                    max_epochs,
                    factor,
                    iterations,
                    brackets: hyperband::plan(max_epochs, factor, iterations),
                    trials: Vec::new(),
                    created_at: now,
                    updated_at: now,
                }
            }
        };

        Ok(Self {
            dir,
            state,
            space,
            max_retries,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state(&self) -> &OracleState {
        &self.state
    }

    pub fn trials(&self) -> &[TrialRecord] {
        &self.state.trials
    }

    pub fn trial(&self, trial_id: usize) -> Option<&TrialRecord> {
        self.state.trials.iter().find(|t| t.trial_id == trial_id)
    }

    pub fn trial_dir(&self, trial_id: usize) -> PathBuf {
        self.dir.join(format!("trial_{trial_id:04}"))
    }

    pub fn save(&mut self) -> Result<(), MlError> {
        self.state.updated_at = Utc::now();
        atomic_write_json(&self.dir.join(ORACLE_FILE), &self.state)?;
        Ok(())
    }

    fn trials_in(&self, bracket: usize, round: usize) -> impl Iterator<Item = &TrialRecord> {
        self.state
            .trials
            .iter()
            .filter(move |t| t.bracket == bracket && t.round == round)
    }

    /// Schedule the trials of `(bracket, round)` if none exist yet.
    ///
    /// Round 0 draws fresh, distinct proposals; later rounds promote the best
    /// completed trials of the previous round.
    fn populate<R: Rng>(&mut self, bracket: usize, round: usize, rng: &mut R) -> bool {
        if self.trials_in(bracket, round).next().is_some() {
            return false;
        }
        let plan = self.state.brackets[bracket].rounds[round];

        let scheduled: Vec<(HeadParams, Option<usize>)> = if round == 0 {
            let mut seen: HashSet<_> = self.state.trials.iter().map(|t| t.params.key()).collect();
            let mut fresh = Vec::with_capacity(plan.size);
            for _ in 0..plan.size {
                let mut found = None;
                for _ in 0..=self.max_retries {
                    let candidate = self.space.sample(rng);
                    if seen.insert(candidate.key()) {
                        found = Some(candidate);
                        break;
                    }
                }
                match found {
                    Some(params) => fresh.push((params, None)),
                    None => {
                        warn!(model = %self.state.model, "Search space exhausted, bracket runs fewer trials");
                        break;
                    }
                }
            }
            fresh
        } else {
            let mut previous: Vec<&TrialRecord> = self
                .trials_in(bracket, round - 1)
                .filter(|t| t.is_completed())
                .collect();
            previous.sort_by(|a, b| rank(a, b));
            previous
                .into_iter()
                .take(plan.size)
                .map(|t| (t.params, Some(t.trial_id)))
                .collect()
        };

        for (params, parent) in scheduled {
            let trial_id = self.state.trials.len();
            self.state.trials.push(TrialRecord {
                trial_id,
                params,
                bracket,
                round,
                epochs: plan.epochs,
                parent,
                status: TrialStatus::Pending,
                score: None,
            });
        }
        true
    }

    /// The next pending trial, scheduling new rounds as earlier ones finish.
    /// Newly scheduled rounds are persisted before they are returned.
    pub fn next_trial<R: Rng>(&mut self, rng: &mut R) -> Result<Option<TrialRecord>, MlError> {
        for bracket in 0..self.state.brackets.len() {
            for round in 0..self.state.brackets[bracket].rounds.len() {
                if self.populate(bracket, round, rng) {
                    self.save()?;
                }
                if let Some(pending) = self
                    .trials_in(bracket, round)
                    .filter(|t| !t.is_completed())
                    .min_by_key(|t| t.trial_id)
                {
                    return Ok(Some(pending.clone()));
                }
            }
        }
        Ok(None)
    }

    /// Record a finished trial and persist the state.
    pub fn complete(&mut self, trial_id: usize, score: f64) -> Result<(), MlError> {
        let trial = self
            .state
            .trials
            .iter_mut()
            .find(|t| t.trial_id == trial_id)
            .ok_or_else(|| MlError::training(format!("unknown trial {trial_id}")))?;
        trial.status = TrialStatus::Completed;
        trial.score = Some(score);
        self.save()
    }

    /// Highest-scoring completed trial; ties go to the lowest trial id.
    pub fn best_trial(&self) -> Option<&TrialRecord> {
        self.state
            .trials
            .iter()
            .filter(|t| t.is_completed())
            .min_by(|a, b| rank(a, b))
    }
}
