//! Unit tests for config.rs module

use channel_analytics::config::AppConfig;
use channel_analytics::facts::EngagementThresholds;
use channel_analytics::models::{Hemisphere, Season};
use chrono::NaiveDate;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_default_config_values() {
    let config = AppConfig::default();

    assert_eq!(config.database.url, "sqlite:data/analytics.db");
    assert_eq!(config.database.max_connections, 10);
    assert_eq!(config.database.connection_timeout_secs, 30);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.file_path, None);
    assert_eq!(config.logging.format, "text");
    assert_eq!(config.export.default_format, "csv");
    assert_eq!(config.export.output_directory, "./output");
}

#[test]
fn test_default_pipeline_config() {
    let config = AppConfig::default();

    assert!((config.pipeline.max_violation_rate - 0.05).abs() < f64::EPSILON);
    assert_eq!(config.pipeline.fiscal_year_start_month, 7);
    assert_eq!(config.pipeline.hemisphere, Hemisphere::Northern);

    let range = config.date_range().expect("Failed to build date range");
    assert_eq!(range.start, NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid date"));
    assert_eq!(range.end, NaiveDate::from_ymd_opt(2030, 12, 31).expect("valid date"));
}

#[test]
fn test_config_validation_success() {
    assert!(AppConfig::default().validate().is_ok());
}

#[test]
fn test_config_validation_zero_max_connections() {
    let mut config = AppConfig::default();
    config.database.max_connections = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_invalid_log_level() {
    let mut config = AppConfig::default();
    config.logging.level = "verbose".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_valid_log_formats() {
    for format in ["text", "compact", "json"] {
        let mut config = AppConfig::default();
        config.logging.format = format.to_string();
        assert!(config.validate().is_ok(), "{format} should be accepted");
    }
}

#[test]
fn test_config_validation_invalid_export_format() {
    let mut config = AppConfig::default();
    config.export.default_format = "txt".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_reversed_date_range() {
    let mut config = AppConfig::default();
    config.pipeline.date_range_start = "2025-01-01".to_string();
    config.pipeline.date_range_end = "2024-01-01".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_malformed_date() {
    let mut config = AppConfig::default();
    config.pipeline.date_range_start = "01/01/2024".to_string();
    let err = config.validate().expect_err("malformed date should fail");
    assert!(err.to_string().contains("date_range_start"));
}

#[test]
fn test_config_validation_violation_rate_bounds() {
    let mut config = AppConfig::default();
    config.pipeline.max_violation_rate = 1.5;
    assert!(config.validate().is_err());

    config.pipeline.max_violation_rate = 0.0;
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_validation_fiscal_month() {
    let mut config = AppConfig::default();
    config.pipeline.fiscal_year_start_month = 13;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_engagement_thresholds() {
    let mut config = AppConfig::default();
    config.classification.engagement = EngagementThresholds {
        high: 100,
        medium: 100,
        low: 10,
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_empty_keywords() {
    let mut config = AppConfig::default();
    config.classification.medical_keywords = vec![" ".to_string()];
    assert!(config.validate().is_err());
}

#[test]
fn test_calendar_follows_config() {
    let mut config = AppConfig::default();
    config.pipeline.hemisphere = Hemisphere::Southern;
    config.pipeline.fiscal_year_start_month = 1;

    let calendar = config.calendar();
    assert_eq!(calendar.season(1), Season::Summer);
    assert_eq!(calendar.fiscal_year(2024, 3), 2024);
}

#[test]
fn test_classifier_from_keyword_file() {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    writeln!(file, "version: pharma-v2\nkeywords:\n  - paracetamol\n  - amoxicillin").expect("Failed to write");

    let mut config = AppConfig::default();
    config.classification.keyword_file = Some(file.path().display().to_string());

    let classifier = config.classifier().expect("Failed to build classifier");
    assert_eq!(classifier.version, "pharma-v2");
    assert!(classifier.is_medical_text("Amoxicillin in stock"));
    assert!(!classifier.is_medical_text("tablets in stock"));
}

#[test]
fn test_classifier_missing_keyword_file() {
    let mut config = AppConfig::default();
    config.classification.keyword_file = Some("/nonexistent/keywords.yaml".to_string());
    assert!(config.classifier().is_err());
}

#[test]
fn test_config_serialization_round_trip() {
    let config = AppConfig::default();
    let yaml = serde_yaml::to_string(&config).expect("Failed to serialize");
    let parsed: AppConfig = serde_yaml::from_str(&yaml).expect("Failed to deserialize");
    assert_eq!(parsed.pipeline.date_range_end, config.pipeline.date_range_end);
    assert_eq!(parsed.classification.medical_keywords, config.classification.medical_keywords);
}
