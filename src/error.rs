use polars::error::PolarsError;
use thiserror::Error;

pub type TraderResult<T> = Result<T, TraderError>;

#[derive(Debug, Error)]
pub enum TraderError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Io(#[from] IoError),
}

/// Errors occurring within the learning agent or its policy.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Policy shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid input to agent: {0}")]
    InvalidInput(String),
}

/// Errors raised while validating or loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for '{field}': {msg}")]
    InvalidValue { field: &'static str, msg: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to encode configuration")]
    Encoding(#[from] postcard::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, msg: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            msg: msg.into(),
        }
    }
}

/// Errors related to market series and persisted tables.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Missing column '{0}'")]
    MissingColumn(String),

    #[error("Null value in column '{column}' at row {row}")]
    NullValue { column: String, row: usize },

    #[error("Empty series: {0}")]
    EmptySeries(String),

    #[error("Data frame error: {0}")]
    DataFrame(String),

    #[error("Failed to parse action: {0}")]
    ParseAction(#[from] strum::ParseError),

    #[error("Unexpected value in temporary file: {0}")]
    UnexpectedValue(String),
}

impl From<PolarsError> for DataError {
    fn from(err: PolarsError) -> Self {
        Self::DataFrame(err.to_string())
    }
}

/// Errors related to the environment lifecycle.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("Invalid environment state: {0}")]
    InvalidState(String),

    #[error("State {state} out of range (num_states = {num_states})")]
    StateOutOfRange { state: usize, num_states: usize },

    #[error("Action index {index} out of range (num_actions = {num_actions})")]
    ActionOutOfRange { index: usize, num_actions: usize },

    #[error("Progress bar error")]
    ProgressBar(#[from] indicatif::style::TemplateError),
}

/// Errors related to file I/O and serialization.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("IO operation failed")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed")]
    Json(#[from] serde_json::Error),

    #[error("Postcard serialization failed")]
    Postcard(#[from] postcard::Error),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),
}

impl From<PolarsError> for TraderError {
    fn from(err: PolarsError) -> Self {
        Self::Data(err.into())
    }
}
