//! # hs-optimizer
//!
//! Hyperparameter search for Hypersweep.
//!
//! Provides suggestion strategies (random, grid, Bayesian-style, TPE and
//! scripted), trial tracking with per-trial failure isolation, and the
//! [`TrialRunner`] that drives suggest / expand / evaluate / record until the
//! evaluation budget is spent or the run is cancelled.

mod runner;
mod search;
mod tpe;
mod trial;

pub use runner::{
    evaluator_fn, search, CancellationToken, EvaluationRequest, Evaluator, FnEvaluator,
    ProgramSource, SearchOutcome, TrialEvent, TrialRunner,
};
pub use search::{
    build_strategy, BayesianSearch, GridSearch, RandomSearch, ScriptedSearch, SuggestionStrategy,
};
pub use tpe::TpeSearch;
pub use trial::{
    ArtifactId, Evaluation, PendingTrial, RunConfig, RunId, RunState, RunStatus, Trial,
    TrialHistory, TrialOutcome, TrialStatus,
};
