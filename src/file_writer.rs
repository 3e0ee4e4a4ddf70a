//! File writing utilities for mart export.
//!
//! Each mart is written to its own file under `output_dir/timestamp/`, named
//! after its table. Column order follows the field order of the row types.

use clap::ValueEnum;
use csv::Writer;
use serde::Serialize;
use serde_json::Value;
use std::fs::{create_dir_all, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::images::ImageAggregation;
use crate::metrics::MetricsCollector;
use crate::models::{ChannelDimension, DateDimension, FactMessage, NormalizedImage};
use crate::pipeline::MartSet;
use crate::schema::table;

/// Export file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    /// Parse a configured format name, falling back to CSV
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Csv,
        }
    }

    pub const fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

/// Borrowed view of the four marts
#[derive(Debug, Clone, Copy)]
pub struct MartTables<'a> {
    pub channels: &'a [ChannelDimension],
    pub dates: &'a [DateDimension],
    pub facts: &'a [FactMessage],
    pub images: &'a ImageAggregation,
}

impl<'a> From<&'a MartSet> for MartTables<'a> {
    fn from(marts: &'a MartSet) -> Self {
        Self {
            channels: &marts.channels,
            dates: &marts.dates,
            facts: &marts.facts,
            images: &marts.images,
        }
    }
}

/// Write every mart to `output_dir/timestamp/<table>.<ext>`.
///
/// # Returns
///
/// Paths of the created files, in table order
pub fn export_marts(
    marts: MartTables<'_>,
    format: ExportFormat,
    output_dir: &Path,
    timestamp: &str,
    metrics: &MetricsCollector,
) -> Result<Vec<PathBuf>> {
    let run_dir = output_dir.join(timestamp);
    create_dir_all(&run_dir)?;

    let images: Vec<&NormalizedImage> = marts.images.iter().collect();
    let files = vec![
        write_table(marts.channels, format, &run_dir, table::DIM_CHANNELS)?,
        write_table(marts.dates, format, &run_dir, table::DIM_DATES)?,
        write_table(marts.facts, format, &run_dir, table::FCT_MESSAGES)?,
        write_table(&images, format, &run_dir, table::IMAGE_AGGREGATIONS)?,
    ];

    metrics.record_export(format.extension(), files.len());
    info!(directory = %run_dir.display(), files = files.len(), format = format.extension(), "Marts exported");
    Ok(files)
}

/// Write one table of rows to `dir/<name>.<ext>`
pub fn write_table<T: Serialize>(rows: &[T], format: ExportFormat, dir: &Path, name: &str) -> Result<PathBuf> {
    let file_path = dir.join(format!("{name}.{}", format.extension()));
    match format {
        ExportFormat::Csv => write_csv_file(rows, &file_path)?,
        ExportFormat::Json => write_json_file(rows, &file_path)?,
    }
    Ok(file_path)
}

/// Write rows to a CSV file.
///
/// Header comes from the field names; nested values are written as JSON text.
fn write_csv_file<T: Serialize>(rows: &[T], file_path: &Path) -> Result<()> {
    let mut writer = Writer::from_writer(File::create(file_path)?);

    let mut header_written = false;
    for row in rows {
        let Value::Object(fields) = serde_json::to_value(row)? else {
            continue;
        };
        if !header_written {
            writer.write_record(fields.keys())?;
            header_written = true;
        }
        writer.write_record(fields.values().map(csv_cell))?;
    }

    writer.flush()?;
    Ok(())
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Write rows to a JSON file as one pretty-printed array
fn write_json_file<T: Serialize>(rows: &[T], file_path: &Path) -> Result<()> {
    let writer = BufWriter::new(File::create(file_path)?);
    serde_json::to_writer_pretty(writer, rows)?;
    Ok(())
}
