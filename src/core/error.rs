use thiserror::Error;

/// Failures the engine reports before (or instead of) producing a result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("invalid configuration for `{field}`: {message}")]
    Config { field: String, message: String },

    #[error("nothing to simulate: {0}")]
    EmptyInput(String),

    #[error("simulation cancelled before any path completed")]
    Cancelled,
}

impl SimError {
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        SimError::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn empty(what: impl Into<String>) -> Self {
        SimError::EmptyInput(what.into())
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            SimError::Config { field, .. } => Some(field),
            _ => None,
        }
    }
}

pub type SimResult<T> = Result<T, SimError>;
