//! The trial loop: suggest, expand, evaluate, record.

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use hs_template::{Expander, Template};
use hs_types::{Assignment, HsError, HsResult, SearchError, SearchSpace};

use crate::search::{build_strategy, SuggestionStrategy};
use crate::trial::{
    ArtifactId, Evaluation, PendingTrial, RunConfig, RunId, RunState, RunStatus, Trial,
    TrialHistory, TrialStatus,
};

/// Shared cancellation flag.
///
/// Cancelling stops the run before the next trial starts. Evaluators receive
/// a clone and may poll it to cut a long evaluation short.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Everything an evaluator gets for one trial.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub trial_number: usize,
    pub assignment: Assignment,
    /// Expanded program text, when the run uses a template.
    pub program: Option<String>,
    pub cancellation: CancellationToken,
}

/// Executes one assignment and scores it.
///
/// Returning `Err` (or panicking) marks only this trial as failed.
pub trait Evaluator<A> {
    fn evaluate(&mut self, request: &EvaluationRequest) -> anyhow::Result<Evaluation<A>>;
}

impl<A, E: Evaluator<A> + ?Sized> Evaluator<A> for &mut E {
    fn evaluate(&mut self, request: &EvaluationRequest) -> anyhow::Result<Evaluation<A>> {
        (**self).evaluate(request)
    }
}

/// Evaluator backed by a closure. See [`evaluator_fn`].
#[derive(Debug, Clone)]
pub struct FnEvaluator<F> {
    f: F,
}

/// Wrap a closure as an [`Evaluator`].
pub fn evaluator_fn<A, F>(f: F) -> FnEvaluator<F>
where
    F: FnMut(&EvaluationRequest) -> anyhow::Result<Evaluation<A>>,
{
    FnEvaluator { f }
}

impl<A, F> Evaluator<A> for FnEvaluator<F>
where
    F: FnMut(&EvaluationRequest) -> anyhow::Result<Evaluation<A>>,
{
    fn evaluate(&mut self, request: &EvaluationRequest) -> anyhow::Result<Evaluation<A>> {
        (self.f)(request)
    }
}

/// Progress notifications, sent best-effort while a run executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrialEvent {
    Started {
        run_id: RunId,
        number: usize,
        assignment: Assignment,
    },
    Finished {
        run_id: RunId,
        number: usize,
        status: TrialStatus,
        score: Option<f64>,
    },
    NewBest {
        run_id: RunId,
        number: usize,
        score: f64,
    },
}

/// Where the evaluated program comes from.
#[derive(Debug, Clone, Default)]
pub enum ProgramSource {
    /// Hand the assignment straight to the evaluator.
    #[default]
    Direct,
    /// Expand a template for every trial and hand over the program text too.
    Template {
        template: Template,
        expander: Expander,
    },
}

impl ProgramSource {
    pub fn template(template: Template) -> Self {
        Self::Template {
            template,
            expander: Expander::default(),
        }
    }

    fn check(&self, space: &SearchSpace) -> HsResult<()> {
        if let Self::Template { template, .. } = self {
            template.check(space)?;
        }
        Ok(())
    }

    fn prepare(&self, space: &SearchSpace, assignment: &Assignment) -> HsResult<Option<String>> {
        match self {
            Self::Direct => {
                space.check_assignment(assignment)?;
                Ok(None)
            }
            Self::Template { template, expander } => {
                Ok(Some(expander.expand(template, space, assignment)?))
            }
        }
    }
}

/// Result of a run with at least one succeeded trial.
#[derive(Debug, Clone)]
pub struct SearchOutcome<A> {
    pub status: RunStatus,
    pub history: TrialHistory<A>,
    best: usize,
    best_score: f64,
    best_artifact: ArtifactId,
}

impl<A> SearchOutcome<A> {
    pub fn best_trial(&self) -> &Trial {
        &self.history.trials()[self.best]
    }

    pub fn best_assignment(&self) -> &Assignment {
        &self.best_trial().assignment
    }

    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    pub fn best_artifact(&self) -> Option<&A> {
        self.history.artifact(self.best_artifact)
    }

    pub fn was_cancelled(&self) -> bool {
        self.status.state == RunState::Cancelled
    }

    /// Consume the outcome, keeping only (assignment, score, artifact) of the
    /// best trial.
    pub fn into_best(self) -> (Assignment, f64, A) {
        let (mut trials, mut artifacts) = self.history.into_parts();
        let trial = trials.swap_remove(self.best);
        let artifact = artifacts.swap_remove(self.best_artifact.index());
        (trial.assignment, self.best_score, artifact)
    }
}

/// Drives one search run.
pub struct TrialRunner {
    config: RunConfig,
    strategy: Option<Box<dyn SuggestionStrategy>>,
    program: ProgramSource,
    events: Option<Sender<TrialEvent>>,
    cancellation: CancellationToken,
}

impl TrialRunner {
    /// Runner whose strategy is built from `config.strategy` at run time.
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            strategy: None,
            program: ProgramSource::Direct,
            events: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: Box<dyn SuggestionStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_program(mut self, program: ProgramSource) -> Self {
        self.program = program;
        self
    }

    pub fn with_template(self, template: Template, expander: Expander) -> Self {
        self.with_program(ProgramSource::Template { template, expander })
    }

    pub fn with_events(mut self, events: Sender<TrialEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Token that cancels this runner. Clone it before calling [`run`](Self::run).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run up to `max_evaluations` trials and return the best one.
    ///
    /// Configuration, strategy and expansion errors abort the run. A failing
    /// evaluation is recorded and the run moves on. Fails with
    /// [`SearchError::NoSuccessfulTrial`] if nothing succeeded, including
    /// after cancellation.
    pub fn run<A, E: Evaluator<A>>(mut self, mut evaluator: E) -> HsResult<SearchOutcome<A>> {
        self.config.validate()?;
        self.program.check(&self.config.search_space)?;
        let mut strategy = match self.strategy.take() {
            Some(strategy) => strategy,
            None => build_strategy(&self.config)?,
        };

        let run_id = self.config.id;
        let mut status = RunStatus::new(self.config.clone());
        let mut history: TrialHistory<A> = TrialHistory::new();

        status.mark_running();
        info!(
            run = %run_id,
            name = %self.config.name,
            strategy = strategy.name(),
            max_evaluations = self.config.max_evaluations,
            "starting search"
        );

        for number in 0..self.config.max_evaluations {
            if self.cancellation.is_cancelled() {
                info!(run = %run_id, completed = number, "search cancelled");
                status.mark_cancelled();
                break;
            }

            let assignment = match strategy.suggest(history.trials(), &self.config.search_space) {
                Ok(assignment) => assignment,
                Err(e) => return Err(abort(run_id, e)),
            };
            let program = match self.program.prepare(&self.config.search_space, &assignment) {
                Ok(program) => program,
                Err(e) => return Err(abort(run_id, e)),
            };

            let pending = PendingTrial::new(run_id, number, assignment, program);
            self.emit(TrialEvent::Started {
                run_id,
                number,
                assignment: pending.assignment().clone(),
            });

            let request = EvaluationRequest {
                trial_number: number,
                assignment: pending.assignment().clone(),
                program: pending.program().map(str::to_string),
                cancellation: self.cancellation.clone(),
            };
            let result = catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(&request)));

            let trial = match result {
                Ok(Ok(evaluation)) => history.record_success(pending, evaluation),
                Ok(Err(e)) => history.record_failure(pending, format!("{e:#}")),
                Err(payload) => history.record_failure(
                    pending,
                    format!("evaluator panicked: {}", panic_message(payload.as_ref())),
                ),
            };

            match trial.succeeded_score() {
                Some(score) => debug!(run = %run_id, trial = number, score, "trial succeeded"),
                None => warn!(
                    run = %run_id,
                    trial = number,
                    error = trial.error().unwrap_or_default(),
                    "trial failed"
                ),
            }

            let improved = status.record(trial);
            let finished = TrialEvent::Finished {
                run_id,
                number,
                status: trial.status(),
                score: trial.succeeded_score(),
            };
            let new_best = trial.succeeded_score().filter(|_| improved);
            self.emit(finished);
            if let Some(score) = new_best {
                info!(run = %run_id, trial = number, score, "new best trial");
                self.emit(TrialEvent::NewBest {
                    run_id,
                    number,
                    score,
                });
            }
        }

        if status.state == RunState::Running {
            if self.cancellation.is_cancelled() {
                info!(run = %run_id, completed = history.len(), "search cancelled");
                status.mark_cancelled();
            } else {
                status.mark_completed();
            }
        }

        let Some((best, best_score, best_artifact)) = best_entry(&history) else {
            let attempted = history.len();
            error!(run = %run_id, attempted, "search produced no successful trial");
            return Err(SearchError::NoSuccessfulTrial { attempted }.into());
        };

        info!(
            run = %run_id,
            state = ?status.state,
            succeeded = status.trials_completed,
            failed = status.trials_failed,
            best_trial = best,
            best_score,
            "search finished"
        );

        Ok(SearchOutcome {
            status,
            history,
            best,
            best_score,
            best_artifact,
        })
    }

    fn emit(&self, event: TrialEvent) {
        if let Some(tx) = &self.events {
            // Best-effort send; a dropped receiver must not stop the run.
            let _ = tx.try_send(event);
        }
    }
}

fn abort(run_id: RunId, e: HsError) -> HsError {
    error!(run = %run_id, error = %e, "search aborted");
    e
}

/// Position, score and artifact of the best succeeded trial.
fn best_entry<A>(history: &TrialHistory<A>) -> Option<(usize, f64, ArtifactId)> {
    let best = history.best()?;
    let position = history.trials().iter().position(|t| t.id == best.id)?;
    Some((position, best.succeeded_score()?, best.artifact()?))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Search `space` with `strategy` for up to `max_evaluations` trials.
pub fn search<A, E: Evaluator<A>>(
    program: ProgramSource,
    space: SearchSpace,
    strategy: Box<dyn SuggestionStrategy>,
    evaluator: E,
    max_evaluations: usize,
) -> HsResult<SearchOutcome<A>> {
    let config = RunConfig::new("search".to_string(), space, strategy.name())
        .with_max_evaluations(max_evaluations);
    TrialRunner::new(config)
        .with_strategy(strategy)
        .with_program(program)
        .run(evaluator)
}
