//! Trial tracking and search run management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use hs_types::{Assignment, HsResult, SearchError, SearchSpace};

/// Unique search run identifier.
pub type RunId = Uuid;

/// Top-level configuration for a search run. Fixed once the run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub id: RunId,
    pub name: String,
    pub description: String,

    /// The declared search space.
    pub search_space: SearchSpace,

    /// Which suggestion strategy to build: "random", "grid", "bayesian" or
    /// "tpe". Informational when a strategy is supplied directly.
    pub strategy: String,

    /// Hard cap on the number of trials.
    pub max_evaluations: usize,

    /// Seed for the built-in strategies. `None` seeds from the OS.
    pub seed: Option<u64>,

    /// Exploration weight for Bayesian search (ignored otherwise).
    pub exploration_weight: f64,

    /// Number of steps per continuous dimension for grid search.
    pub grid_steps: usize,

    /// Random start-up trials before TPE starts modelling.
    pub tpe_startup_trials: usize,

    pub created_at: DateTime<Utc>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new("search".to_string(), SearchSpace::new(), "random")
    }
}

impl RunConfig {
    pub fn new(name: String, search_space: SearchSpace, strategy: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            description: String::new(),
            search_space,
            strategy: strategy.to_string(),
            max_evaluations: 50,
            seed: None,
            exploration_weight: 0.3,
            grid_steps: 5,
            tpe_startup_trials: 10,
            created_at: Utc::now(),
        }
    }

    pub fn with_max_evaluations(mut self, n: usize) -> Self {
        self.max_evaluations = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_exploration_weight(mut self, weight: f64) -> Self {
        self.exploration_weight = weight;
        self
    }

    pub fn with_grid_steps(mut self, steps: usize) -> Self {
        self.grid_steps = steps;
        self
    }

    pub fn with_tpe_startup_trials(mut self, n: usize) -> Self {
        self.tpe_startup_trials = n;
        self
    }

    /// Reject configurations that cannot start a run.
    pub fn validate(&self) -> HsResult<()> {
        if self.max_evaluations == 0 {
            return Err(invalid("max_evaluations must be positive"));
        }
        if !(0.0..=1.0).contains(&self.exploration_weight) {
            return Err(invalid("exploration_weight must lie in [0, 1]"));
        }
        if self.grid_steps == 0 {
            return Err(invalid("grid_steps must be positive"));
        }
        self.search_space.validate()
    }
}

fn invalid(message: &str) -> hs_types::HsError {
    SearchError::InvalidConfig {
        message: message.to_string(),
    }
    .into()
}

/// Lifecycle state for a search run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Cancelled,
}

/// Aggregate status of a search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub id: RunId,
    pub config: RunConfig,
    pub state: RunState,
    pub trials_completed: usize,
    pub trials_failed: usize,
    /// Trial number of the incumbent best.
    pub best_trial: Option<usize>,
    pub best_score: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunStatus {
    pub fn new(config: RunConfig) -> Self {
        Self {
            id: config.id,
            config,
            state: RunState::Pending,
            trials_completed: 0,
            trials_failed: 0,
            best_trial: None,
            best_score: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = RunState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = RunState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.state = RunState::Cancelled;
        self.finished_at = Some(Utc::now());
    }

    /// Count a finalized trial. Returns true when it became the new best.
    pub fn record(&mut self, trial: &Trial) -> bool {
        let Some(score) = trial.succeeded_score() else {
            self.trials_failed += 1;
            return false;
        };
        self.trials_completed += 1;
        let improves = match self.best_score {
            None => true,
            Some(best) => score < best,
        };
        if improves {
            self.best_trial = Some(trial.number);
            self.best_score = Some(score);
        }
        improves
    }

    pub fn trials_attempted(&self) -> usize {
        self.trials_completed + self.trials_failed
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// Handle to an artifact held in a [`TrialHistory`].
///
/// Only the history hands these out, so a trial can reference an artifact
/// only if the history stored one for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId(usize);

impl ArtifactId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Succeeded,
    Failed,
}

/// How a trial ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrialOutcome {
    Succeeded { score: f64, artifact: ArtifactId },
    Failed { error: String },
}

/// What an evaluator reports for one successful trial.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation<A> {
    /// Lower is better (e.g. negative accuracy).
    pub score: f64,
    pub artifact: A,
    pub metrics: HashMap<String, f64>,
}

impl<A> Evaluation<A> {
    pub fn new(score: f64, artifact: A) -> Self {
        Self {
            score,
            artifact,
            metrics: HashMap::new(),
        }
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }
}

/// A trial whose evaluation has started but not finished.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTrial {
    id: Uuid,
    run_id: RunId,
    number: usize,
    assignment: Assignment,
    program: Option<String>,
    started_at: DateTime<Utc>,
}

impl PendingTrial {
    pub fn new(
        run_id: RunId,
        number: usize,
        assignment: Assignment,
        program: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            number,
            assignment,
            program,
            started_at: Utc::now(),
        }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    pub fn program(&self) -> Option<&str> {
        self.program.as_deref()
    }

    fn finish(self, outcome: TrialOutcome, metrics: HashMap<String, f64>) -> Trial {
        Trial {
            id: self.id,
            run_id: self.run_id,
            number: self.number,
            assignment: self.assignment,
            program: self.program,
            outcome,
            metrics,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// A finalized trial: one evaluated assignment plus its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub run_id: RunId,
    pub number: usize,
    pub assignment: Assignment,
    /// Expanded program text, when the run uses a template.
    pub program: Option<String>,
    pub outcome: TrialOutcome,
    pub metrics: HashMap<String, f64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Trial {
    pub fn status(&self) -> TrialStatus {
        match self.outcome {
            TrialOutcome::Succeeded { .. } => TrialStatus::Succeeded,
            TrialOutcome::Failed { .. } => TrialStatus::Failed,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.status() == TrialStatus::Succeeded
    }

    /// Score used for ranking. Failed trials rank below every success.
    pub fn score(&self) -> f64 {
        self.succeeded_score().unwrap_or(f64::INFINITY)
    }

    pub fn succeeded_score(&self) -> Option<f64> {
        match self.outcome {
            TrialOutcome::Succeeded { score, .. } => Some(score),
            TrialOutcome::Failed { .. } => None,
        }
    }

    pub fn artifact(&self) -> Option<ArtifactId> {
        match self.outcome {
            TrialOutcome::Succeeded { artifact, .. } => Some(artifact),
            TrialOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            TrialOutcome::Failed { error } => Some(error),
            TrialOutcome::Succeeded { .. } => None,
        }
    }
}

/// Append-only record of every trial in a run, plus the artifacts produced
/// by the successful ones.
#[derive(Debug, Clone)]
pub struct TrialHistory<A> {
    trials: Vec<Trial>,
    artifacts: Vec<A>,
}

impl<A> Default for TrialHistory<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> TrialHistory<A> {
    pub fn new() -> Self {
        Self {
            trials: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    /// Finalize `pending` as succeeded and append it.
    ///
    /// A non-finite score cannot be ranked, so it is recorded as a failure
    /// and the artifact is dropped.
    pub fn record_success(&mut self, pending: PendingTrial, evaluation: Evaluation<A>) -> &Trial {
        if !evaluation.score.is_finite() {
            let error = format!("evaluator returned non-finite score {}", evaluation.score);
            return self.record_failure(pending, error);
        }
        let artifact = ArtifactId(self.artifacts.len());
        self.artifacts.push(evaluation.artifact);
        let outcome = TrialOutcome::Succeeded {
            score: evaluation.score,
            artifact,
        };
        self.push(pending.finish(outcome, evaluation.metrics))
    }

    /// Finalize `pending` as failed and append it.
    pub fn record_failure(&mut self, pending: PendingTrial, error: impl Into<String>) -> &Trial {
        let outcome = TrialOutcome::Failed {
            error: error.into(),
        };
        self.push(pending.finish(outcome, HashMap::new()))
    }

    fn push(&mut self, trial: Trial) -> &Trial {
        self.trials.push(trial);
        &self.trials[self.trials.len() - 1]
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &Trial> {
        self.trials.iter().filter(|t| t.is_succeeded())
    }

    pub fn failed_count(&self) -> usize {
        self.trials.iter().filter(|t| !t.is_succeeded()).count()
    }

    /// Succeeded trial with the minimum score. Ties go to the earliest trial.
    pub fn best(&self) -> Option<&Trial> {
        let mut best: Option<&Trial> = None;
        for trial in self.succeeded() {
            if best.map_or(true, |b| trial.score() < b.score()) {
                best = Some(trial);
            }
        }
        best
    }

    pub fn artifact(&self, id: ArtifactId) -> Option<&A> {
        self.artifacts.get(id.0)
    }

    /// Consume the history, keeping only the artifact behind `id`.
    pub fn into_artifact(mut self, id: ArtifactId) -> Option<A> {
        if id.0 < self.artifacts.len() {
            Some(self.artifacts.swap_remove(id.0))
        } else {
            None
        }
    }

    /// Split into trials and artifacts (indexed by [`ArtifactId::index`]).
    pub fn into_parts(self) -> (Vec<Trial>, Vec<A>) {
        (self.trials, self.artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> RunConfig {
        let space = SearchSpace::new()
            .add_int("layers", 1, 4)
            .add_uniform("dropout", 0.0, 1.0);

        RunConfig::new("test_run".into(), space, "random")
            .with_max_evaluations(20)
            .with_seed(11)
    }

    fn pending(number: usize) -> PendingTrial {
        PendingTrial::new(
            Uuid::new_v4(),
            number,
            Assignment::new().with("layers", number as i64),
            None,
        )
    }

    #[test]
    fn run_status_lifecycle() {
        let mut status = RunStatus::new(sample_config());

        assert_eq!(status.state, RunState::Pending);
        assert!(status.started_at.is_none());

        status.mark_running();
        assert_eq!(status.state, RunState::Running);
        assert!(status.started_at.is_some());

        status.mark_cancelled();
        assert_eq!(status.state, RunState::Cancelled);
        assert!(status.finished_at.is_some());
    }

    #[test]
    fn config_validation() {
        assert!(sample_config().validate().is_ok());
        assert!(sample_config().with_max_evaluations(0).validate().is_err());
        assert!(sample_config()
            .with_exploration_weight(1.5)
            .validate()
            .is_err());
        let bad_space = RunConfig::new(
            "bad".into(),
            SearchSpace::new().add_uniform("x", 2.0, 1.0),
            "random",
        );
        assert!(bad_space.validate().is_err());
    }

    #[test]
    fn config_fills_defaults_from_partial_json() {
        let config: RunConfig =
            serde_json::from_str(r#"{"name": "sweep", "max_evaluations": 7}"#).unwrap();
        assert_eq!(config.name, "sweep");
        assert_eq!(config.max_evaluations, 7);
        assert_eq!(config.strategy, "random");
        assert_eq!(config.grid_steps, 5);
    }

    #[test]
    fn best_trial_tracking_minimizes() {
        let mut status = RunStatus::new(sample_config());
        let mut history: TrialHistory<&str> = TrialHistory::new();

        let first = history.record_success(pending(0), Evaluation::new(-0.80, "a"));
        assert!(status.record(first));
        let second = history.record_success(pending(1), Evaluation::new(-0.95, "b"));
        assert!(status.record(second));
        let third = history.record_success(pending(2), Evaluation::new(-0.90, "c"));
        assert!(!status.record(third));
        let failed = history.record_failure(pending(3), "out of memory");
        assert!(!status.record(failed));

        assert_eq!(status.best_trial, Some(1));
        assert_eq!(status.best_score, Some(-0.95));
        assert_eq!(status.trials_completed, 3);
        assert_eq!(status.trials_failed, 1);
        assert_eq!(status.trials_attempted(), 4);
    }

    #[test]
    fn artifact_present_only_for_success() {
        let mut history: TrialHistory<String> = TrialHistory::new();
        let ok = history
            .record_success(pending(0), Evaluation::new(0.5, "model-0".to_string()))
            .clone();
        let failed = history.record_failure(pending(1), "diverged").clone();

        assert_eq!(ok.status(), TrialStatus::Succeeded);
        let id = ok.artifact().unwrap();
        assert_eq!(history.artifact(id).map(String::as_str), Some("model-0"));

        assert_eq!(failed.status(), TrialStatus::Failed);
        assert!(failed.artifact().is_none());
        assert_eq!(failed.error(), Some("diverged"));
        assert_eq!(failed.score(), f64::INFINITY);
    }

    #[test]
    fn into_artifact_takes_ownership_of_one_artifact() {
        let mut history: TrialHistory<Vec<f32>> = TrialHistory::new();
        history.record_success(pending(0), Evaluation::new(0.4, vec![0.1, 0.2]));
        history.record_failure(pending(1), "nan loss");
        let best = history
            .record_success(pending(2), Evaluation::new(-0.3, vec![0.7]))
            .artifact()
            .unwrap();

        assert_eq!(history.into_artifact(best), Some(vec![0.7]));
        assert_eq!(TrialHistory::<Vec<f32>>::new().into_artifact(best), None);
    }

    #[test]
    fn non_finite_score_is_recorded_as_failure() {
        let mut history: TrialHistory<()> = TrialHistory::new();
        let trial = history.record_success(pending(0), Evaluation::new(f64::NAN, ()));
        assert_eq!(trial.status(), TrialStatus::Failed);
        assert!(history.best().is_none());
        assert_eq!(history.failed_count(), 1);
    }

    #[test]
    fn history_best_ignores_failures_and_keeps_earliest_tie() {
        let mut history: TrialHistory<usize> = TrialHistory::new();
        history.record_failure(pending(0), "boom");
        history.record_success(pending(1), Evaluation::new(-1.0, 1));
        history.record_success(pending(2), Evaluation::new(-1.0, 2));
        history.record_success(pending(3), Evaluation::new(3.0, 3));

        let best = history.best().unwrap();
        assert_eq!(best.number, 1);
        assert_eq!(history.succeeded().count(), 3);
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn trial_keeps_metrics_and_program() {
        let mut history: TrialHistory<()> = TrialHistory::new();
        let pending = PendingTrial::new(
            Uuid::new_v4(),
            0,
            Assignment::new().with("dropout", 0.1),
            Some("Dropout(0.1)".into()),
        );
        let trial = history.record_success(
            pending,
            Evaluation::new(-0.9, ()).with_metric("val_loss", 0.31),
        );
        assert_eq!(trial.program.as_deref(), Some("Dropout(0.1)"));
        assert_eq!(trial.metrics.get("val_loss"), Some(&0.31));
        assert!(trial.finished_at >= trial.started_at);
    }

    #[test]
    fn trial_round_trips_through_json() {
        let mut history: TrialHistory<()> = TrialHistory::new();
        let trial = history
            .record_success(pending(4), Evaluation::new(-0.5, ()))
            .clone();
        let json = serde_json::to_string(&trial).unwrap();
        let back: Trial = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trial);
    }
}
