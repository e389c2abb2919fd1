//! Suggestion strategies.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use hs_types::{
    clamp_half_open, Assignment, HsResult, ParameterKind, ParameterValue, SearchError,
    SearchSpace,
};

use crate::tpe::TpeSearch;
use crate::trial::{RunConfig, Trial};

/// Proposes the next assignment to evaluate.
///
/// The runner consults a strategy only between evaluations, so `history`
/// always holds every finalized trial of the run in order.
pub trait SuggestionStrategy: Send + Sync {
    fn suggest(&mut self, history: &[Trial], space: &SearchSpace) -> HsResult<Assignment>;

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Build the strategy named in `config.strategy`.
pub fn build_strategy(config: &RunConfig) -> HsResult<Box<dyn SuggestionStrategy>> {
    let rng = seeded_rng(config.seed);
    let strategy: Box<dyn SuggestionStrategy> = match config.strategy.as_str() {
        "random" => Box::new(RandomSearch::from_rng(rng)),
        "grid" => Box::new(GridSearch::new(config.grid_steps)),
        "bayesian" => Box::new(BayesianSearch::from_rng(config.exploration_weight, rng)),
        "tpe" => Box::new(TpeSearch::from_rng(rng).with_startup(config.tpe_startup_trials)),
        other => {
            return Err(SearchError::UnknownStrategy {
                name: other.to_string(),
            }
            .into())
        }
    };
    Ok(strategy)
}

pub(crate) fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    rng: StdRng,
}

impl RandomSearch {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    pub fn from_rng(rng: StdRng) -> Self {
        Self { rng }
    }
}

impl Default for RandomSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl SuggestionStrategy for RandomSearch {
    fn suggest(&mut self, _history: &[Trial], space: &SearchSpace) -> HsResult<Assignment> {
        Ok(space.sample(&mut self.rng))
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Grid search ----

/// Exhaustive grid search over the cartesian product of every dimension.
///
/// Continuous dimensions contribute `float_steps` evenly spaced points from
/// `[low, high)`. Points are decoded from a mixed-radix counter, the last
/// parameter varying fastest, so nothing is materialized up front. Once every
/// point has been proposed the grid starts over.
#[derive(Debug, Clone)]
pub struct GridSearch {
    float_steps: usize,
    cursor: usize,
    total: Option<usize>,
}

impl GridSearch {
    pub fn new(float_steps: usize) -> Self {
        Self {
            float_steps: float_steps.max(1),
            cursor: 0,
            total: None,
        }
    }

    /// The `i`-th point along one dimension, `i < kind.grid_len(float_steps)`.
    fn axis_value(kind: &ParameterKind, i: usize, float_steps: usize) -> ParameterValue {
        match kind {
            ParameterKind::Choice { values } => ParameterValue::Json(values[i].clone()),
            ParameterKind::IntRange { low, .. } => {
                ParameterValue::Int((i128::from(*low) + i as i128) as i64)
            }
            ParameterKind::Uniform { low, high } => {
                let t = i as f64 / float_steps as f64;
                ParameterValue::Float(clamp_half_open(low + t * (high - low), *low, *high))
            }
            ParameterKind::LogUniform { low, high } => {
                let (log_low, log_high) = (low.ln(), high.ln());
                if i == 0 || log_low >= log_high {
                    return ParameterValue::Float(*low);
                }
                let t = i as f64 / float_steps as f64;
                let v = (log_low + t * (log_high - log_low)).exp();
                ParameterValue::Float(clamp_half_open(v, *low, *high))
            }
        }
    }

    fn point(space: &SearchSpace, mut index: usize, float_steps: usize) -> HsResult<Assignment> {
        let mut assignment = Assignment::new();
        for param in space.parameters.iter().rev() {
            let len = param.kind.grid_len(float_steps).filter(|n| *n > 0).ok_or_else(|| {
                SearchError::StrategyFailed {
                    message: format!("parameter {} has no grid points", param.name),
                }
            })?;
            let value = Self::axis_value(&param.kind, index % len, float_steps);
            assignment.insert(param.name.clone(), value);
            index /= len;
        }
        Ok(assignment)
    }

    /// Number of distinct points, once the first suggestion has been made.
    pub fn len(&self) -> Option<usize> {
        self.total
    }
}

impl SuggestionStrategy for GridSearch {
    fn suggest(&mut self, _history: &[Trial], space: &SearchSpace) -> HsResult<Assignment> {
        let total = match self.total {
            Some(total) => total,
            None => {
                let total = space.grid_size(self.float_steps).ok_or_else(|| {
                    SearchError::StrategyFailed {
                        message: "grid has more points than can be counted".to_string(),
                    }
                })?;
                self.total = Some(total);
                total
            }
        };
        if total == 0 {
            return Err(SearchError::StrategyFailed {
                message: "grid has no points".to_string(),
            }
            .into());
        }
        if self.cursor == total {
            warn!(points = total, "grid exhausted, starting over");
            self.cursor = 0;
        }
        let point = Self::point(space, self.cursor, self.float_steps)?;
        self.cursor += 1;
        Ok(point)
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Scripted search ----

/// Replays a fixed list of assignments in order, starting over at the end.
///
/// Useful to re-execute known assignments outside an adaptive search.
#[derive(Debug, Clone)]
pub struct ScriptedSearch {
    assignments: Vec<Assignment>,
    cursor: usize,
}

impl ScriptedSearch {
    pub fn new(assignments: Vec<Assignment>) -> Self {
        Self {
            assignments,
            cursor: 0,
        }
    }
}

impl SuggestionStrategy for ScriptedSearch {
    fn suggest(&mut self, _history: &[Trial], _space: &SearchSpace) -> HsResult<Assignment> {
        if self.assignments.is_empty() {
            return Err(SearchError::StrategyFailed {
                message: "no scripted assignments".to_string(),
            }
            .into());
        }
        let assignment = self.assignments[self.cursor % self.assignments.len()].clone();
        self.cursor += 1;
        Ok(assignment)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ---- Bayesian search (surrogate-model stub) ----

/// Explore/exploit search guided by the trial history.
///
/// With probability `exploration_weight` (or while nothing has succeeded yet)
/// the next point is sampled at random. Otherwise the best succeeded trial is
/// perturbed: continuous dimensions by up to 10% of their range, integers by
/// up to two steps, and choices are resampled one time in four.
#[derive(Debug, Clone)]
pub struct BayesianSearch {
    rng: StdRng,
    exploration_weight: f64,
}

impl BayesianSearch {
    pub fn new(exploration_weight: f64) -> Self {
        Self::from_rng(exploration_weight, StdRng::from_os_rng())
    }

    pub fn with_seed(exploration_weight: f64, seed: u64) -> Self {
        Self::from_rng(exploration_weight, StdRng::seed_from_u64(seed))
    }

    pub fn from_rng(exploration_weight: f64, rng: StdRng) -> Self {
        Self {
            rng,
            exploration_weight,
        }
    }

    /// Exploitation: perturb the best-known point.
    fn exploit(&mut self, base: &Assignment, space: &SearchSpace) -> Assignment {
        let mut perturbed = Assignment::new();

        for param in &space.parameters {
            let base_val = base.get(&param.name);
            let value = match (&param.kind, base_val) {
                (ParameterKind::Uniform { low, high }, Some(ParameterValue::Float(v))) => {
                    let noise = self.rng.random_range(-0.1..0.1) * (high - low);
                    ParameterValue::Float(clamp_half_open(v + noise, *low, *high))
                }
                (ParameterKind::IntRange { low, high }, Some(ParameterValue::Int(v))) => {
                    let delta: i64 = self.rng.random_range(-2..=2);
                    ParameterValue::Int(v.saturating_add(delta).clamp(*low, *high))
                }
                (ParameterKind::LogUniform { low, high }, Some(ParameterValue::Float(v))) => {
                    let log_range = high.ln() - low.ln();
                    let noise = self.rng.random_range(-0.1..0.1) * log_range;
                    ParameterValue::Float(clamp_half_open((v.ln() + noise).exp(), *low, *high))
                }
                (ParameterKind::Choice { .. }, Some(value))
                    if param.kind.contains(value) && self.rng.random::<f64>() >= 0.25 =>
                {
                    value.clone()
                }
                // Resample choices and anything the base point lacks
                (kind, _) => kind.sample(&mut self.rng),
            };
            perturbed.insert(param.name.clone(), value);
        }

        perturbed
    }
}

impl SuggestionStrategy for BayesianSearch {
    fn suggest(&mut self, history: &[Trial], space: &SearchSpace) -> HsResult<Assignment> {
        let best = history
            .iter()
            .filter(|t| t.is_succeeded())
            .min_by(|a, b| a.score().total_cmp(&b.score()));

        match best {
            Some(best) if self.rng.random::<f64>() >= self.exploration_weight => {
                Ok(self.exploit(&best.assignment, space))
            }
            _ => Ok(space.sample(&mut self.rng)),
        }
    }

    fn name(&self) -> &str {
        "bayesian"
    }
}
