//! Error types for hindsight-core

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No execution record found at {}", .0.display())]
    MissingExecutionRecord(PathBuf),

    #[error("Execution record has no rows")]
    EmptyExecutionRecord,

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a missing required field
    pub fn missing(field: &'static str) -> Self {
        Error::InvalidField {
            field,
            reason: "is required".to_string(),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
