use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::classification::{KeywordClassifier, KeywordSet, DEFAULT_KEYWORD_VERSION, MEDICAL_KEYWORDS, MEDICAL_OBJECT_CLASSES};
use crate::dates::{CalendarConventions, DateRange};
use crate::facts::EngagementThresholds;
use crate::models::Hemisphere;

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub pipeline: PipelineConfig,
    pub classification: ClassificationConfig,
    pub ingest: IngestConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub format: String, // "text", "compact" or "json"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// First day of the date dimension, `YYYY-MM-DD`
    pub date_range_start: String,
    /// Last day of the date dimension, `YYYY-MM-DD`
    pub date_range_end: String,
    /// Largest tolerated share of rejected records per stage
    pub max_violation_rate: f64,
    pub fiscal_year_start_month: u32,
    pub hemisphere: Hemisphere,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    pub version: String,
    pub medical_keywords: Vec<String>,
    pub medical_object_classes: Vec<String>,
    /// YAML file overriding `version` and `medical_keywords`
    pub keyword_file: Option<String>,
    pub engagement: EngagementThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Directory of scraped message files, one folder per day
    pub messages_path: String,
    /// Directory of image detection files
    pub images_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub default_format: String,
    pub output_directory: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite:data/analytics.db".to_string(),
                max_connections: 10,
                connection_timeout_secs: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                format: "text".to_string(),
            },
            pipeline: PipelineConfig {
                date_range_start: "2020-01-01".to_string(),
                date_range_end: "2030-12-31".to_string(),
                max_violation_rate: 0.05,
                fiscal_year_start_month: 7,
                hemisphere: Hemisphere::Northern,
            },
            classification: ClassificationConfig {
                version: DEFAULT_KEYWORD_VERSION.to_string(),
                medical_keywords: MEDICAL_KEYWORDS.iter().map(ToString::to_string).collect(),
                medical_object_classes: MEDICAL_OBJECT_CLASSES.iter().map(ToString::to_string).collect(),
                keyword_file: None,
                engagement: EngagementThresholds::default(),
            },
            ingest: IngestConfig {
                messages_path: "data/raw/telegram_messages".to_string(),
                images_path: "data/raw/telegram_images".to_string(),
            },
            export: ExportConfig {
                default_format: "csv".to_string(),
                output_directory: "./output".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    pub fn load() -> Result<Self> {
        let defaults = Config::try_from(&Self::default()).context("Failed to serialize default configuration")?;
        let config = Config::builder()
            // Start with default values
            .add_source(defaults)
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("config").required(false))
            // Add environment variables with prefix
            .add_source(
                Environment::with_prefix("CHANNEL_ANALYTICS")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("classification.medical_keywords")
                    .with_list_parse_key("classification.medical_object_classes")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        let app_config: Self = config.try_deserialize().context("Failed to deserialize configuration")?;

        // Validate configuration
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Validate database config
        if self.database.max_connections == 0 {
            bail!("max_connections must be greater than 0");
        }
        if self.database.connection_timeout_secs == 0 {
            bail!("connection_timeout_secs must be greater than 0");
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            bail!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            );
        }

        let valid_formats = ["text", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            bail!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            );
        }

        // Validate pipeline config
        self.date_range()?;
        if !(0.0..=1.0).contains(&self.pipeline.max_violation_rate) {
            bail!(
                "max_violation_rate must be within [0, 1], got {}",
                self.pipeline.max_violation_rate
            );
        }
        self.calendar().validate()?;

        // Validate classification config
        if self.classification.keyword_file.is_none()
            && self.classification.medical_keywords.iter().all(|k| k.trim().is_empty())
        {
            bail!("medical_keywords must not be empty");
        }
        self.classification.engagement.validate()?;

        // Validate export config
        let valid_formats = ["csv", "json"];
        if !valid_formats.contains(&self.export.default_format.as_str()) {
            bail!(
                "Invalid export format: {}. Must be one of: {:?}",
                self.export.default_format,
                valid_formats
            );
        }

        Ok(())
    }

    /// Configured date dimension range
    pub fn date_range(&self) -> Result<DateRange> {
        let start = parse_day(&self.pipeline.date_range_start, "date_range_start")?;
        let end = parse_day(&self.pipeline.date_range_end, "date_range_end")?;
        Ok(DateRange::new(start, end)?)
    }

    /// Configured calendar conventions
    pub fn calendar(&self) -> CalendarConventions {
        CalendarConventions {
            fiscal_year_start_month: self.pipeline.fiscal_year_start_month,
            hemisphere: self.pipeline.hemisphere,
        }
    }

    /// Build the keyword classifier, reading the keyword file when set
    pub fn classifier(&self) -> Result<KeywordClassifier> {
        let keywords = match &self.classification.keyword_file {
            Some(path) => KeywordSet::from_yaml_file(Path::new(path))
                .with_context(|| format!("Failed to read keyword file {path}"))?,
            None => KeywordSet {
                version: self.classification.version.clone(),
                keywords: self.classification.medical_keywords.clone(),
            },
        };
        Ok(KeywordClassifier::new(keywords, &self.classification.medical_object_classes)?)
    }

    /// Get database URL from environment or config
    pub fn get_database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.database.url.clone())
    }
}

fn parse_day(value: &str, field: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .with_context(|| format!("{field} must be YYYY-MM-DD, got '{value}'"))
}
