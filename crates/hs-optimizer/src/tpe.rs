//! Tree-structured Parzen Estimator.
//!
//! Succeeded trials are split at the `gamma` quantile of their scores into a
//! "good" set l(x) and a "bad" set g(x). Each dimension is then sampled
//! independently, preferring values where l(x) / g(x) is high.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use hs_types::{clamp_half_open, Assignment, HsResult, ParameterKind, ParameterValue, SearchSpace};

use crate::search::SuggestionStrategy;
use crate::trial::Trial;

/// Integer ranges wider than this are modelled as continuous.
const MAX_DISCRETE_BINS: i64 = 1024;

#[derive(Debug, Clone)]
pub struct TpeSearch {
    rng: StdRng,
    /// Quantile for splitting good/bad (default: 0.25)
    gamma: f64,
    /// Number of startup trials (random sampling)
    n_startup: usize,
    /// Candidates drawn from l(x) per continuous dimension
    n_candidates: usize,
    /// KDE bandwidth, as a fraction of one tenth of the range
    kde_bandwidth: f64,
}

impl TpeSearch {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    pub fn from_rng(rng: StdRng) -> Self {
        Self {
            rng,
            gamma: 0.25,
            n_startup: 10,
            n_candidates: 24,
            kde_bandwidth: 1.0,
        }
    }

    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma.clamp(0.01, 0.99);
        self
    }

    pub fn with_startup(mut self, n: usize) -> Self {
        self.n_startup = n.max(2);
        self
    }

    fn sample_parameter(
        &mut self,
        name: &str,
        kind: &ParameterKind,
        good: &[&Trial],
        bad: &[&Trial],
    ) -> ParameterValue {
        let floats = |trials: &[&Trial], log: bool| -> Vec<f64> {
            trials
                .iter()
                .filter_map(|t| t.assignment.get(name)?.as_f64())
                .filter(|v| v.is_finite())
                .map(|v| if log { v.max(f64::MIN_POSITIVE).ln() } else { v })
                .collect()
        };

        match kind {
            ParameterKind::Uniform { low, high } => {
                let value = self.sample_continuous(&floats(good, false), &floats(bad, false), *low, *high);
                ParameterValue::Float(clamp_half_open(value, *low, *high))
            }
            ParameterKind::LogUniform { low, high } => {
                let value =
                    self.sample_continuous(&floats(good, true), &floats(bad, true), low.ln(), high.ln());
                ParameterValue::Float(clamp_half_open(value.exp(), *low, *high))
            }
            ParameterKind::IntRange { low, high } if high.saturating_sub(*low) < MAX_DISCRETE_BINS => {
                let ints = |trials: &[&Trial]| -> Vec<i64> {
                    trials
                        .iter()
                        .filter_map(|t| t.assignment.get(name)?.as_i64())
                        .filter(|v| v >= low && v <= high)
                        .collect()
                };
                ParameterValue::Int(self.sample_discrete(&ints(good), &ints(bad), *low, *high))
            }
            ParameterKind::IntRange { low, high } => {
                let upper = *high as f64 + 1.0;
                let value =
                    self.sample_continuous(&floats(good, false), &floats(bad, false), *low as f64, upper);
                ParameterValue::Int((value.floor() as i64).clamp(*low, *high))
            }
            ParameterKind::Choice { values } => {
                let good_counts = count_choices(name, good, values);
                let bad_counts = count_choices(name, bad, values);
                // Laplace smoothing
                let weights: Vec<f64> = good_counts
                    .iter()
                    .zip(&bad_counts)
                    .map(|(l, g)| (*l as f64 + 1.0) / (*g as f64 + 1.0))
                    .collect();
                let idx = sample_weighted(&weights, &mut self.rng);
                ParameterValue::Json(values[idx].clone())
            }
        }
    }

    /// Pick the candidate drawn from l(x) with the best l(x) / g(x) ratio.
    fn sample_continuous(&mut self, good: &[f64], bad: &[f64], low: f64, high: f64) -> f64 {
        // Degenerate or unsampleable range
        if !(high > low) || !(high - low).is_finite() {
            return low;
        }
        if good.is_empty() {
            return self.rng.random_range(low..high);
        }

        let bandwidth = self.kde_bandwidth * (high - low) / 10.0;
        let mut best_value = low;
        let mut best_ei = f64::NEG_INFINITY;

        for _ in 0..self.n_candidates {
            let base = good[self.rng.random_range(0..good.len())];
            // Box-Muller transform for Gaussian noise
            let u1: f64 = self.rng.random::<f64>().max(1e-10);
            let u2: f64 = self.rng.random();
            let noise =
                (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos() * bandwidth;
            let candidate = clamp_half_open(base + noise, low, high);

            let ei = kde_score(candidate, good, bandwidth) / (kde_score(candidate, bad, bandwidth) + 1e-10);
            if ei > best_ei {
                best_ei = ei;
                best_value = candidate;
            }
        }

        best_value
    }

    fn sample_discrete(&mut self, good: &[i64], bad: &[i64], low: i64, high: i64) -> i64 {
        let range = (high - low + 1) as usize;
        let mut good_counts = vec![1.0; range];
        let mut bad_counts = vec![1.0; range];
        for &v in good {
            good_counts[(v - low) as usize] += 1.0;
        }
        for &v in bad {
            bad_counts[(v - low) as usize] += 1.0;
        }
        let weights: Vec<f64> = good_counts
            .iter()
            .zip(&bad_counts)
            .map(|(l, g)| l / g)
            .collect();
        low + sample_weighted(&weights, &mut self.rng) as i64
    }
}

impl Default for TpeSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl SuggestionStrategy for TpeSearch {
    fn suggest(&mut self, history: &[Trial], space: &SearchSpace) -> HsResult<Assignment> {
        let mut completed: Vec<&Trial> = history.iter().filter(|t| t.is_succeeded()).collect();
        if completed.len() < self.n_startup {
            return Ok(space.sample(&mut self.rng));
        }

        completed.sort_by(|a, b| a.score().total_cmp(&b.score()));
        let n_good = ((completed.len() as f64) * self.gamma).ceil() as usize;
        let n_good = n_good.max(1).min(completed.len() - 1);
        let (good, bad) = completed.split_at(n_good);

        let mut assignment = Assignment::new();
        for param in &space.parameters {
            let value = self.sample_parameter(&param.name, &param.kind, good, bad);
            assignment.insert(param.name.clone(), value);
        }
        Ok(assignment)
    }

    fn name(&self) -> &str {
        "tpe"
    }
}

/// Gaussian kernel density estimate at `x`.
fn kde_score(x: f64, values: &[f64], bandwidth: f64) -> f64 {
    if values.is_empty() {
        return 1.0;
    }
    values
        .iter()
        .map(|&v| (-(x - v).powi(2) / (2.0 * bandwidth.powi(2))).exp())
        .sum::<f64>()
        / values.len() as f64
}

fn count_choices(name: &str, trials: &[&Trial], values: &[serde_json::Value]) -> Vec<usize> {
    let mut counts = vec![0usize; values.len()];
    for trial in trials {
        if let Some(value) = trial.assignment.get(name) {
            let json = value.to_json();
            if let Some(idx) = values.iter().position(|v| *v == json) {
                counts[idx] += 1;
            }
        }
    }
    counts
}

/// Index drawn proportionally to `weights` (all positive).
fn sample_weighted<R: Rng>(weights: &[f64], rng: &mut R) -> usize {
    let total: f64 = weights.iter().sum();
    let r = rng.random::<f64>() * total;
    let mut cumsum = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cumsum += w;
        if r < cumsum {
            return i;
        }
    }
    weights.len() - 1
}
