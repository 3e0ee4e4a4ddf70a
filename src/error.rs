//! Error types for the channel-analytics library.
//!
//! This module provides custom error types using `thiserror` so the pipeline can
//! tell its fatal run checks apart from infrastructure failures.

use chrono::NaiveDate;
use thiserror::Error;

/// Errors that can occur while building or publishing the analytics marts.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV export errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Keyword file parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid date format
    #[error("Invalid date format: {0}")]
    InvalidDate(String),

    /// The configured calendar range does not cover the observed messages
    #[error(
        "Date range {start}..={end} does not cover observed messages ({observed_min}..={observed_max})"
    )]
    RangeMisconfiguration {
        /// Configured first day
        start: NaiveDate,
        /// Configured last day
        end: NaiveDate,
        /// Earliest observed message day
        observed_min: NaiveDate,
        /// Latest observed message day
        observed_max: NaiveDate,
    },

    /// Too many records failed shape checks in one stage
    #[error("Stage {stage} rejected {rejected} of {total} records (max rate {max_rate})")]
    ViolationThresholdExceeded {
        /// Stage name
        stage: String,
        /// Rejected record count
        rejected: usize,
        /// Input record count
        total: usize,
        /// Configured maximum rejection rate
        max_rate: f64,
    },

    /// Fact assembly produced a different row count than staging
    #[error("Join integrity violation: {fact_rows} fact rows for {message_rows} normalized messages")]
    JoinIntegrityViolation {
        /// Rows produced by the fact assembler
        fact_rows: usize,
        /// Rows produced by message staging
        message_rows: usize,
    },

    /// General error with context
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Result with `PipelineError`
pub type Result<T> = std::result::Result<T, PipelineError>;

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

impl PipelineError {
    /// True for the run checks that must stop publication.
    #[must_use]
    pub const fn is_fatal_check(&self) -> bool {
        matches!(
            self,
            Self::RangeMisconfiguration { .. }
                | Self::ViolationThresholdExceeded { .. }
                | Self::JoinIntegrityViolation { .. }
        )
    }
}

/// A record rejected by a shape check.
///
/// Rejections are collected per stage instead of aborting the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Stage that rejected the record
    pub stage: &'static str,
    /// Best-effort identifier of the rejected record
    pub record: String,
    /// What was wrong with it
    pub reason: String,
}

impl SchemaViolation {
    /// Build a violation for the given stage.
    pub fn new(stage: &'static str, record: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            stage,
            record: record.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.stage, self.record, self.reason)
    }
}
