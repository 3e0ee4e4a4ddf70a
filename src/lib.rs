//! Channel Analytics - batch marts over social-channel messages
//!
//! A Rust library that turns raw channel messages and image detections into a
//! queryable analytical model.
//!
//! # Features
//!
//! - Stage raw messages and images with keyword and object classification
//! - Build ranked channel and calendar dimensions with rolling averages
//! - Summarize image detections and join everything into one fact table
//! - Publish the marts to SQLite in a single transaction
//! - Reports, data-quality checks and CSV/JSON export over the marts

/// Channel dimension builder
pub mod channels;
/// Keyword and object-class classification
pub mod classification;
/// Configuration management
pub mod config;
/// Date dimension builder
pub mod dates;
/// Database operations and connection pooling
pub mod db;
/// Error types
pub mod error;
/// Fact table assembly
pub mod facts;
/// Mart export to files
pub mod file_writer;
/// Image aggregation builder
pub mod images;
/// Data lake reader
pub mod ingest;
/// Logging setup and utilities
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Stage sequencing and run checks
pub mod pipeline;
/// Read-side reports over the marts
pub mod reports;
/// Raw source and mart sink boundaries
pub mod repository;
/// Database schema definitions
pub mod schema;
/// Record normalization
pub mod staging;
/// Input validation and data-quality checks
pub mod validation;

// Re-export key components for easier access
pub use db::Database;
pub use error::{PipelineError, Result};
pub use models::{ChannelDimension, DateDimension, FactMessage, RawImage, RawMessage};
pub use pipeline::{MartSet, Pipeline, RunContext};
