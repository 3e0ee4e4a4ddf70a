//! Data lake reader.
//!
//! The scraper writes one JSON array per channel and day under
//! `<messages_path>/YYYY-MM-DD/<channel>.json`; the detector writes JSON
//! arrays of image records anywhere under `<images_path>`. Each element is
//! decoded on its own so one bad record never hides the rest of its file.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Result, SchemaViolation};
use crate::models::{RawImage, RawMessage};
use crate::repository::{RawBatch, RawRecordSource};
use crate::schema::table;

/// Raw record source over data lake JSON files
#[derive(Debug, Clone)]
pub struct DataLakeSource {
    messages_path: PathBuf,
    images_path: PathBuf,
}

impl DataLakeSource {
    pub fn new(messages_path: impl Into<PathBuf>, images_path: impl Into<PathBuf>) -> Self {
        Self {
            messages_path: messages_path.into(),
            images_path: images_path.into(),
        }
    }
}

#[async_trait]
impl RawRecordSource for DataLakeSource {
    async fn fetch_messages(&self) -> Result<RawBatch<RawMessage>> {
        let mut batch: RawBatch<RawMessage> = read_records(&self.messages_path, table::RAW_MESSAGES).await?;

        // Same rule as the raw table: the first copy of a key wins
        let mut seen = HashSet::new();
        let before = batch.records.len();
        batch.records.retain(|m| match &m.channel_username {
            Some(channel) => seen.insert((m.message_id, channel.trim().to_string())),
            None => true,
        });
        let duplicates = before - batch.records.len();
        if duplicates > 0 {
            info!(duplicates, "Dropped repeated scraper messages");
        }
        Ok(batch)
    }

    async fn fetch_images(&self) -> Result<RawBatch<RawImage>> {
        read_records(&self.images_path, table::RAW_IMAGES).await
    }
}

/// Decode every JSON array element under `root`, in file name order
pub async fn read_records<T: DeserializeOwned>(root: &Path, stage: &'static str) -> Result<RawBatch<T>> {
    let mut batch = RawBatch::default();
    if !tokio::fs::try_exists(root).await? {
        warn!(path = %root.display(), "Data lake directory does not exist");
        return Ok(batch);
    }

    for file in json_files(root).await? {
        let content = tokio::fs::read_to_string(&file).await?;
        let values: Vec<serde_json::Value> = match serde_json::from_str(&content) {
            Ok(values) => values,
            Err(e) => {
                let violation = SchemaViolation::new(stage, file.display().to_string(), format!("not a JSON array: {e}"));
                warn!(record = %violation.record, reason = %violation.reason, "Unreadable data lake file");
                batch.violations.push(violation);
                continue;
            }
        };

        for (index, value) in values.into_iter().enumerate() {
            match serde_json::from_value::<T>(value) {
                Ok(record) => batch.records.push(record),
                Err(e) => {
                    let violation =
                        SchemaViolation::new(stage, format!("{}#{index}", file.display()), e.to_string());
                    warn!(record = %violation.record, reason = %violation.reason, "Undecodable data lake record");
                    batch.violations.push(violation);
                }
            }
        }
        debug!(file = %file.display(), "Data lake file read");
    }

    info!(
        path = %root.display(),
        records = batch.records.len(),
        violations = batch.violations.len(),
        "Data lake records read"
    );
    Ok(batch)
}

/// All `.json` files below `root`, sorted by path
async fn json_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
