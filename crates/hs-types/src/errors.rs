use thiserror::Error;

/// Main error type for the Hypersweep system
#[derive(Error, Debug)]
pub enum HsError {
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Expansion-time errors. These point at a defect in the template or the
/// search space declaration and are never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("Unresolved parameter: {name}")]
    UnresolvedParameter { name: String },

    #[error("Unknown parameter in assignment: {name}")]
    UnknownParameter { name: String },

    #[error("Value {value} is outside the domain of parameter {name}")]
    ValueOutOfDomain { name: String, value: String },

    #[error("Malformed template: {message}")]
    MalformedTemplate { message: String },
}

/// Errors raised by the trial runner and suggestion strategies
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("No successful trial out of {attempted} attempted")]
    NoSuccessfulTrial { attempted: usize },

    #[error("Invalid run configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Unknown search strategy: {name}")]
    UnknownStrategy { name: String },

    #[error("Suggestion strategy failed: {message}")]
    StrategyFailed { message: String },
}

/// Result type alias for Hypersweep operations
pub type HsResult<T> = Result<T, HsError>;

impl HsError {
    /// True for [`SearchError::NoSuccessfulTrial`].
    pub fn is_no_successful_trial(&self) -> bool {
        matches!(self, HsError::Search(SearchError::NoSuccessfulTrial { .. }))
    }
}

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::HsError::Validation(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::HsError::Config(format!($($arg)*))
    };
}
