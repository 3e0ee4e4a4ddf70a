use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::channels::percentage;
use crate::models::{ChannelDimension, DateDimension, FactMessage};
use crate::pipeline::MartSet;
use crate::staging::engagement_score;

/// Validation utilities for command-line input
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Validate a channel username filter
    pub fn validate_channel_username(name: &str) -> Result<()> {
        let name = name.trim().trim_start_matches('@');
        if name.is_empty() {
            return Err(anyhow!("Channel username cannot be empty"));
        }

        if name.len() > 64 {
            return Err(anyhow!("Channel username too long (max 64 characters)"));
        }

        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(anyhow!("Channel username may only contain letters, digits and underscores"));
        }

        Ok(())
    }

    /// Validate file path
    pub fn validate_file_path(path: &Path) -> Result<()> {
        if path.to_string_lossy().is_empty() {
            return Err(anyhow!("File path cannot be empty"));
        }

        let path_str = path.to_string_lossy();
        if path_str.contains("..") || path_str.contains('~') {
            return Err(anyhow!("File path contains potentially dangerous characters"));
        }

        if path_str.len() > 4096 {
            return Err(anyhow!("File path too long (max 4096 characters)"));
        }

        Ok(())
    }

    /// Validate a date range given on the command line
    pub fn validate_date_range(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<()> {
        if let (Some(start_date), Some(end_date)) = (start, end) {
            if start_date > end_date {
                return Err(anyhow!("Start date cannot be after end date"));
            }

            let days = (end_date - start_date).num_days();
            if days > 365 * 50 {
                return Err(anyhow!(
                    "Date range too large ({days} days). The date spine holds one row per day; \
                    use a narrower range."
                ));
            }
            if days > 365 * 20 {
                tracing::warn!(days, "Large date range produces a large date dimension");
            }
        }

        Ok(())
    }

    /// Validate a report row limit
    pub fn validate_limit(limit: usize) -> Result<()> {
        if limit == 0 {
            return Err(anyhow!("Limit must be greater than 0"));
        }

        if limit > 10_000 {
            return Err(anyhow!("Limit too large (max 10,000)"));
        }

        Ok(())
    }

    /// Validate database URL
    pub fn validate_database_url(url: &str) -> Result<()> {
        if url.trim().is_empty() {
            return Err(anyhow!("Database URL cannot be empty"));
        }

        if !url.starts_with("sqlite:") {
            return Err(anyhow!("Only SQLite databases are supported"));
        }

        if url.len() > 1000 {
            return Err(anyhow!("Database URL too long"));
        }

        Ok(())
    }
}

/// One pass/fail data-quality assertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityCheck {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl QualityCheck {
    fn new(name: &'static str, failures: &[String], checked: usize) -> Self {
        let detail = match failures {
            [] => format!("{checked} rows checked"),
            [first, ..] if failures.len() == 1 => first.clone(),
            [first, ..] => format!("{first} (and {} more)", failures.len() - 1),
        };
        Self {
            name,
            passed: failures.is_empty(),
            detail,
        }
    }
}

/// Data-quality checks over a set of marts
#[derive(Debug, Clone, Default, Serialize)]
pub struct DataQualityReport {
    pub checks: Vec<QualityCheck>,
}

impl DataQualityReport {
    /// Check the marts of a run, including the fact row-count contract
    pub fn from_marts(marts: &MartSet) -> Self {
        Self::evaluate(&marts.channels, &marts.dates, &marts.facts, Some(marts.staged_messages))
    }

    /// Check published marts; `staged_messages` is unknown when reading back from the store
    pub fn evaluate(
        channels: &[ChannelDimension],
        dates: &[DateDimension],
        facts: &[FactMessage],
        staged_messages: Option<usize>,
    ) -> Self {
        let mut checks = Vec::with_capacity(6);
        if let Some(expected) = staged_messages {
            checks.push(fact_row_count(facts.len(), expected));
        }
        checks.push(facts_have_channel_keys(facts));
        checks.push(facts_have_date_keys(facts));
        checks.push(channel_percentages(channels));
        checks.push(engagement_scores(facts));
        checks.push(date_spine(dates));
        Self { checks }
    }

    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &QualityCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

impl fmt::Display for DataQualityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for check in &self.checks {
            let status = if check.passed { "PASS" } else { "FAIL" };
            writeln!(f, "[{status}] {}: {}", check.name, check.detail)?;
        }
        Ok(())
    }
}

fn fact_row_count(facts: usize, staged: usize) -> QualityCheck {
    let failures = if facts == staged {
        Vec::new()
    } else {
        vec![format!("{facts} fact rows for {staged} staged messages")]
    };
    QualityCheck::new("fact_row_count", &failures, facts)
}

fn facts_have_channel_keys(facts: &[FactMessage]) -> QualityCheck {
    let failures: Vec<String> = facts
        .iter()
        .filter(|f| f.channel_key.is_none())
        .map(|f| format!("message {} in {} has no channel key", f.message_id, f.channel_username))
        .collect();
    QualityCheck::new("fact_channel_keys", &failures, facts.len())
}

fn facts_have_date_keys(facts: &[FactMessage]) -> QualityCheck {
    let failures: Vec<String> = facts
        .iter()
        .filter(|f| f.date_key.is_none())
        .map(|f| format!("message {} on {} has no date key", f.message_id, f.message_date_only))
        .collect();
    QualityCheck::new("fact_date_keys", &failures, facts.len())
}

fn channel_percentages(channels: &[ChannelDimension]) -> QualityCheck {
    let failures: Vec<String> = channels
        .iter()
        .filter_map(|c| {
            let medical = percentage(c.medical_messages, c.total_messages);
            let images = percentage(c.messages_with_images, c.total_messages);
            if (medical - c.medical_content_percentage).abs() > f64::EPSILON
                || (images - c.image_content_percentage).abs() > f64::EPSILON
            {
                Some(format!(
                    "{} stores {}%/{}% but counts give {medical}%/{images}%",
                    c.channel_username, c.medical_content_percentage, c.image_content_percentage
                ))
            } else {
                None
            }
        })
        .collect();
    QualityCheck::new("channel_percentages", &failures, channels.len())
}

fn engagement_scores(facts: &[FactMessage]) -> QualityCheck {
    let failures: Vec<String> = facts
        .iter()
        .filter_map(|f| {
            let expected = engagement_score(Some(f.views), Some(f.forwards), Some(f.replies));
            (expected != f.engagement_score).then(|| {
                format!(
                    "message {} in {} stores {} but counters give {expected}",
                    f.message_id, f.channel_username, f.engagement_score
                )
            })
        })
        .collect();
    QualityCheck::new("engagement_scores", &failures, facts.len())
}

fn date_spine(dates: &[DateDimension]) -> QualityCheck {
    let failures: Vec<String> = dates
        .windows(2)
        .filter(|pair| pair[0].date_actual.succ_opt() != Some(pair[1].date_actual))
        .map(|pair| format!("spine jumps from {} to {}", pair[0].date_actual, pair[1].date_actual))
        .collect();
    QualityCheck::new("date_spine", &failures, dates.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::KeywordClassifier;
    use crate::dates::DateRange;
    use crate::pipeline::{Pipeline, RunContext};
    use crate::models::RawMessage;
    use chrono::NaiveDateTime;

    fn created_at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 31)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("valid timestamp")
    }

    fn marts() -> MartSet {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date"),
            NaiveDate::from_ymd_opt(2024, 3, 31).expect("valid date"),
        )
        .expect("Failed to build range");
        let pipeline = Pipeline::new(
            KeywordClassifier::with_defaults().expect("Failed to create classifier"),
            RunContext::new(created_at(), range),
        );
        let raw: Vec<RawMessage> = serde_json::from_str(
            r#"[{"message_id": 1, "channel_username": "chemed", "message_text": "pill sale",
                 "message_date": "2024-03-10T14:05:00", "views": 100, "forwards": 5, "replies": 2},
                {"message_id": 2, "channel_username": "lobelia4cosmetics", "message_text": "new cream",
                 "message_date": "2024-03-12T09:00:00", "has_media": true, "media_type": "photo"}]"#,
        )
        .expect("Failed to parse messages");
        pipeline.transform(&raw, &[]).expect("Failed to transform")
    }

    #[test]
    fn test_clean_run_passes() {
        let report = DataQualityReport::from_marts(&marts());
        assert!(report.passed(), "{report}");
        assert_eq!(report.checks.len(), 6);
    }

    #[test]
    fn test_detects_tampered_marts() {
        let mut marts = marts();
        marts.facts[0].engagement_score += 1;
        marts.facts[1].channel_key = None;
        marts.channels[0].medical_content_percentage = 12.5;
        marts.dates.remove(3);

        let report = DataQualityReport::from_marts(&marts);
        let failed: Vec<&str> = report.failures().map(|c| c.name).collect();
        assert_eq!(
            failed,
            vec!["fact_channel_keys", "channel_percentages", "engagement_scores", "date_spine"]
        );
    }

    #[test]
    fn test_row_count_mismatch() {
        let mut marts = marts();
        marts.staged_messages = 3;
        let report = DataQualityReport::from_marts(&marts);
        let check = &report.checks[0];
        assert!(!check.passed);
        assert_eq!(check.detail, "2 fact rows for 3 staged messages");
    }

    #[test]
    fn test_read_back_skips_row_count() {
        let marts = marts();
        let report = DataQualityReport::evaluate(&marts.channels, &marts.dates, &marts.facts, None);
        assert_eq!(report.checks.len(), 5);
        assert!(report.passed());
    }
}
