//! Search space definitions: parameter specs, sampled values and assignments.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::errors::{HsResult, TemplateError};

/// A single named dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name, also the marker name used in templates (e.g. "dropout").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Discrete choice over an ordered list of literal values.
    Choice { values: Vec<serde_json::Value> },
    /// Continuous uniform range [low, high).
    Uniform { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range [low, high) (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
}

impl ParameterKind {
    /// Draw one value from this domain.
    ///
    /// The domain must already have passed [`SearchSpace::validate`].
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParameterValue {
        match self {
            ParameterKind::Choice { values } => {
                let idx = rng.random_range(0..values.len());
                ParameterValue::Json(values[idx].clone())
            }
            ParameterKind::Uniform { low, high } => {
                ParameterValue::Float(rng.random_range(*low..*high))
            }
            ParameterKind::IntRange { low, high } => {
                ParameterValue::Int(rng.random_range(*low..=*high))
            }
            ParameterKind::LogUniform { low, high } => {
                let (log_low, log_high) = (low.ln(), high.ln());
                if log_low >= log_high {
                    return ParameterValue::Float(*low);
                }
                let log_val: f64 = rng.random_range(log_low..log_high);
                ParameterValue::Float(clamp_half_open(log_val.exp(), *low, *high))
            }
        }
    }

    /// Check if a value lies inside this domain.
    pub fn contains(&self, value: &ParameterValue) -> bool {
        match (self, value) {
            (ParameterKind::Choice { values }, value) => {
                let json = value.to_json();
                values.iter().any(|v| *v == json)
            }
            (ParameterKind::Uniform { low, high }, value)
            | (ParameterKind::LogUniform { low, high }, value) => value
                .as_f64()
                .is_some_and(|v| v.is_finite() && v >= *low && v < *high),
            (ParameterKind::IntRange { low, high }, ParameterValue::Int(v)) => {
                *v >= *low && *v <= *high
            }
            _ => false,
        }
    }

    /// True when every value this domain can produce is numeric.
    pub fn is_numeric(&self) -> bool {
        match self {
            ParameterKind::Choice { values } => values.iter().all(|v| v.is_number()),
            _ => true,
        }
    }

    /// Number of grid points along this dimension. Continuous kinds
    /// contribute `float_steps` points. `None` when the count overflows.
    pub fn grid_len(&self, float_steps: usize) -> Option<usize> {
        match self {
            ParameterKind::Choice { values } => Some(values.len()),
            ParameterKind::IntRange { low, high } => {
                usize::try_from(high.abs_diff(*low)).ok()?.checked_add(1)
            }
            ParameterKind::Uniform { .. } | ParameterKind::LogUniform { .. } => Some(float_steps),
        }
    }

    fn validate(&self, name: &str) -> HsResult<()> {
        match self {
            ParameterKind::Choice { values } if values.is_empty() => Err(crate::validation_error!(
                "choice parameter {name} has no values"
            )),
            ParameterKind::Choice { .. } => Ok(()),
            ParameterKind::Uniform { low, high } => {
                if !low.is_finite() || !high.is_finite() || low >= high {
                    return Err(crate::validation_error!(
                        "uniform parameter {name} needs finite bounds with low < high, got [{low}, {high})"
                    ));
                }
                if !(high - low).is_finite() {
                    return Err(crate::validation_error!(
                        "uniform parameter {name} has a range too wide to sample: [{low}, {high})"
                    ));
                }
                Ok(())
            }
            ParameterKind::IntRange { low, high } if low > high => Err(crate::validation_error!(
                "int parameter {name} has low {low} above high {high}"
            )),
            ParameterKind::IntRange { .. } => Ok(()),
            ParameterKind::LogUniform { low, high } => {
                if !low.is_finite() || !high.is_finite() || *low <= 0.0 || low >= high {
                    return Err(crate::validation_error!(
                        "log-uniform parameter {name} needs 0 < low < high, got [{low}, {high})"
                    ));
                }
                if low.ln() >= high.ln() {
                    return Err(crate::validation_error!(
                        "log-uniform parameter {name} is empty in log space: [{low}, {high})"
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Clamp `v` into the half-open range `[low, high)`.
///
/// Values at or above `high` map to the largest float below it, which keeps
/// rounding in `exp(ln(x))` or additive noise inside the domain.
pub fn clamp_half_open(v: f64, low: f64, high: f64) -> f64 {
    if v.is_nan() || v < low {
        low
    } else if v >= high {
        let below = if high > 0.0 {
            f64::from_bits(high.to_bits() - 1)
        } else if high < 0.0 {
            f64::from_bits(high.to_bits() + 1)
        } else {
            -f64::MIN_POSITIVE
        };
        below.max(low)
    } else {
        v
    }
}

/// A concrete parameter value produced by a suggestion strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl ParameterValue {
    /// Numeric view (ints and JSON numbers convert).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Json(v) => v.as_f64(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(_) => None,
            Self::Json(v) => v.as_i64(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Json(v) => v.as_str(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Json(v) => v.as_bool(),
            _ => None,
        }
    }

    /// JSON form of the value. Non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Json(v) => v.clone(),
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParameterValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        Self::Json(serde_json::Value::Bool(v))
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::Json(serde_json::Value::String(v.to_string()))
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        Self::Json(serde_json::Value::String(v))
    }
}

impl From<serde_json::Value> for ParameterValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

/// One concrete value per parameter, for a single trial.
///
/// Backed by an ordered map so iteration and serialization are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Assignment {
    values: BTreeMap<String, ParameterValue>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParameterValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.values.iter()
    }
}

impl std::fmt::Display for Assignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, "}}")
    }
}

impl<K: Into<String>, V: Into<ParameterValue>> FromIterator<(K, V)> for Assignment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// True for names usable as template markers: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_parameter_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The full search space: an ordered list of parameter specs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterSpec>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add(mut self, name: impl Into<String>, kind: ParameterKind) -> Self {
        self.parameters.push(ParameterSpec {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn add_choice(self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.add(name, ParameterKind::Choice { values })
    }

    /// A two-way switch, declared as a choice over `[true, false]`.
    pub fn add_flag(self, name: impl Into<String>) -> Self {
        self.add_choice(
            name,
            vec![serde_json::Value::Bool(true), serde_json::Value::Bool(false)],
        )
    }

    pub fn add_uniform(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(name, ParameterKind::Uniform { low, high })
    }

    pub fn add_int(self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.add(name, ParameterKind::IntRange { low, high })
    }

    pub fn add_log_uniform(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(name, ParameterKind::LogUniform { low, high })
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Validate the declaration itself: names and domain bounds.
    pub fn validate(&self) -> HsResult<()> {
        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !is_valid_parameter_name(&param.name) {
                return Err(crate::validation_error!(
                    "invalid parameter name {:?}",
                    param.name
                ));
            }
            if !seen.insert(param.name.as_str()) {
                return Err(crate::validation_error!(
                    "duplicate parameter name {}",
                    param.name
                ));
            }
            param.kind.validate(&param.name)?;
        }
        Ok(())
    }

    /// Sample every parameter independently.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Assignment {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.kind.sample(rng)))
            .collect()
    }

    /// Check that `assignment` covers exactly the declared parameters, each
    /// with a value inside its domain.
    pub fn check_assignment(&self, assignment: &Assignment) -> Result<(), TemplateError> {
        for param in &self.parameters {
            if !assignment.contains(&param.name) {
                return Err(TemplateError::UnresolvedParameter {
                    name: param.name.clone(),
                });
            }
        }
        for (name, value) in assignment.iter() {
            let Some(param) = self.get(name) else {
                return Err(TemplateError::UnknownParameter { name: name.clone() });
            };
            if !param.kind.contains(value) {
                return Err(TemplateError::ValueOutOfDomain {
                    name: name.clone(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Total number of grid points, with `float_steps` points per continuous
    /// dimension. `None` when the product overflows `usize`.
    pub fn grid_size(&self, float_steps: usize) -> Option<usize> {
        self.parameters
            .iter()
            .try_fold(1usize, |total, p| total.checked_mul(p.kind.grid_len(float_steps)?))
    }
}
