use async_trait::async_trait;

use crate::error::{Result, SchemaViolation};
use crate::models::{RawImage, RawMessage};
use crate::pipeline::MartSet;

/// Records read from a raw store, with the ones that could not be decoded
#[derive(Debug, Clone)]
pub struct RawBatch<T> {
    /// Decoded records
    pub records: Vec<T>,
    /// Records rejected while decoding
    pub violations: Vec<SchemaViolation>,
}

impl<T> Default for RawBatch<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T> RawBatch<T> {
    /// Batch of decoded records with no violations
    pub fn new(records: Vec<T>) -> Self {
        Self {
            records,
            violations: Vec::new(),
        }
    }

    /// Number of records read, decoded or not
    pub fn total(&self) -> usize {
        self.records.len() + self.violations.len()
    }
}

/// Read side of the raw store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RawRecordSource: Send + Sync {
    /// Every stored message record
    async fn fetch_messages(&self) -> Result<RawBatch<RawMessage>>;
    /// Every stored image record
    async fn fetch_images(&self) -> Result<RawBatch<RawImage>>;
}

/// Row counts written by one publication
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    /// Rows written to `dim_channels`
    pub channels: usize,
    /// Rows written to `dim_dates`
    pub dates: usize,
    /// Rows written to `fct_messages`
    pub facts: usize,
    /// Rows written to `image_aggregations`
    pub images: usize,
}

/// Write side of the serving store; replaces every mart at once
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MartSink: Send + Sync {
    /// Replace the published marts with `marts`
    async fn publish(&self, marts: &MartSet) -> Result<PublishSummary>;
}
