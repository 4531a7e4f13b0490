//! Custom error types for rustlitreview.
//!
//! This module defines all error types used throughout the pipeline.
//! All functions return `Result<T, PipelineError>` instead of using `unwrap()`.

use thiserror::Error;

/// Main error type for rustlitreview operations.
///
/// Uses `thiserror` for ergonomic error handling and automatic `Display` implementation.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Malformed payload or reply
    #[error("Parse error: {0}")]
    Parse(String),

    /// XML payload could not be read
    #[error("XML error: {0}")]
    Xml(String),

    /// External API returned an error
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code from API
        code: i32,
        /// Error message from API
        message: String,
    },

    /// A source table lacks a column the pipeline needs
    #[error("Missing column '{column}' in source '{table}'")]
    MissingColumn {
        /// Source table name (e.g. "WoS")
        table: String,
        /// Column that was expected in the header
        column: String,
    },

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Tabular file error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias using `PipelineError`
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| PipelineError::Parse(msg.to_string()))
    }
}
