use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use channel_analytics::config::AppConfig;
use channel_analytics::db::Database;
use channel_analytics::dates::DateRange;
use channel_analytics::file_writer::{export_marts, ExportFormat, MartTables};
use channel_analytics::ingest::DataLakeSource;
use channel_analytics::logging::{init_logging, LogFormat, OperationTimer};
use channel_analytics::models::FactMessage;
use channel_analytics::pipeline::{Pipeline, RunContext};
use channel_analytics::reports::{self, ChannelSort, Granularity};
use channel_analytics::repository::RawRecordSource;
use channel_analytics::schema::table;
use channel_analytics::validation::{DataQualityReport, InputValidator};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where a run reads its raw records from
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    /// Scraper and detector JSON files
    Lake,
    /// Raw tables of the local database
    Db,
}

#[derive(Subcommand)]
enum Commands {
    /// Load data lake files into the raw tables
    Ingest {
        /// Directory of scraped message files
        #[arg(long)]
        messages_dir: Option<PathBuf>,

        /// Directory of image detection files
        #[arg(long)]
        images_dir: Option<PathBuf>,
    },
    /// Rebuild and publish all marts
    Run {
        /// Raw record source
        #[arg(short, long, value_enum, default_value = "db")]
        source: SourceKind,

        /// First day of the date dimension (YYYY-MM-DD)
        #[arg(long)]
        start_date: Option<String>,

        /// Last day of the date dimension (YYYY-MM-DD)
        #[arg(long)]
        end_date: Option<String>,

        /// Also export the published marts
        #[arg(short, long, value_enum)]
        export: Option<ExportFormat>,

        /// Export directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// Export the published marts
    Export {
        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<ExportFormat>,

        /// Output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// List top channels
    Channels {
        /// Sort key
        #[arg(short, long, value_enum, default_value = "total_messages")]
        sort: ChannelSort,

        /// Number of channels
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Platform-wide totals
    Summary,
    /// Most mentioned product keywords in medical messages
    Products {
        /// Minimum mentions for a keyword to be listed
        #[arg(short, long, default_value_t = 1)]
        min_mentions: usize,

        /// Number of keywords
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Posting activity over time
    Trends {
        /// Bucket size
        #[arg(short, long, value_enum, default_value = "daily")]
        granularity: Granularity,

        /// Days to look back from today
        #[arg(short, long, default_value_t = 30)]
        days: i64,

        /// Only count messages of this channel
        #[arg(short, long)]
        channel: Option<String>,
    },
    /// Per-channel image detection summary
    Images {
        /// Number of channels
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Only summarize this channel
        #[arg(short, long)]
        channel: Option<String>,
    },
    /// Check the published marts
    Quality,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;

    let _log_guard = init_logging(
        Some(&config.logging.level),
        config.logging.file_path.as_deref().map(Path::new),
        LogFormat::from_name(&config.logging.format),
    )?;

    info!("Starting channel-analytics");

    let cli = Cli::parse();

    let database_url = config.get_database_url();
    InputValidator::validate_database_url(&database_url)?;
    let db = Database::with_pool_size(
        &database_url,
        config.database.max_connections,
        Duration::from_secs(config.database.connection_timeout_secs),
    )
    .context("Failed to open database")?;

    match cli.command {
        Commands::Ingest {
            messages_dir,
            images_dir,
        } => ingest(&config, &db, messages_dir, images_dir).await?,
        Commands::Run {
            source,
            start_date,
            end_date,
            export,
            output_dir,
        } => run_pipeline(&config, &db, source, start_date.as_deref(), end_date.as_deref(), export, output_dir).await?,
        Commands::Export { format, output_dir } => export_published(&config, &db, format, output_dir)?,
        Commands::Channels { sort, limit } => {
            InputValidator::validate_limit(limit)?;
            let channels = db.fetch_channels(sort, Some(limit))?;
            print_json(&channels)?;
        }
        Commands::Summary => print_json(&reports::summary(&db.fetch_facts()?))?,
        Commands::Products { min_mentions, limit } => {
            InputValidator::validate_limit(limit)?;
            let classifier = config.classifier()?;
            let mentions = reports::product_mentions(&db.fetch_facts()?, &classifier, min_mentions, limit);
            print_json(&mentions)?;
        }
        Commands::Trends {
            granularity,
            days,
            channel,
        } => {
            if days <= 0 {
                bail!("Days must be greater than 0");
            }
            let since = Local::now().date_naive() - ChronoDuration::days(days);
            let facts = facts_for_channel(&db, channel.as_deref())?;
            print_json(&reports::trends(&facts, granularity, since))?;
        }
        Commands::Images { limit, channel } => {
            InputValidator::validate_limit(limit)?;
            let facts = facts_for_channel(&db, channel.as_deref())?;
            print_json(&reports::image_analysis(&facts, limit))?;
        }
        Commands::Quality => {
            let report = DataQualityReport::evaluate(
                &db.fetch_channels(ChannelSort::TotalMessages, None)?,
                &db.fetch_dates()?,
                &db.fetch_facts()?,
                None,
            );
            print!("{report}");
            if !report.passed() {
                bail!("Data quality checks failed");
            }
        }
    }

    Ok(())
}

/// Copy data lake files into the raw tables
async fn ingest(config: &AppConfig, db: &Database, messages_dir: Option<PathBuf>, images_dir: Option<PathBuf>) -> Result<()> {
    let messages_dir = messages_dir.unwrap_or_else(|| PathBuf::from(&config.ingest.messages_path));
    let images_dir = images_dir.unwrap_or_else(|| PathBuf::from(&config.ingest.images_path));
    InputValidator::validate_file_path(&messages_dir)?;
    InputValidator::validate_file_path(&images_dir)?;

    let timer = OperationTimer::new("ingest");
    let lake = DataLakeSource::new(messages_dir, images_dir);

    let messages = lake.fetch_messages().await?;
    let summary = db.insert_raw_messages(&messages.records)?;
    info!(
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        skipped = summary.skipped,
        undecodable = messages.violations.len(),
        "Messages ingested"
    );

    let images = lake.fetch_images().await?;
    let image_summary = db.insert_raw_images(&images.records)?;
    info!(
        inserted = image_summary.inserted,
        duplicates = image_summary.duplicates,
        skipped = image_summary.skipped,
        undecodable = images.violations.len(),
        "Images ingested"
    );

    println!(
        "Ingested {} messages ({} already stored) and {} images ({} already stored)",
        summary.inserted, summary.duplicates, image_summary.inserted, image_summary.duplicates
    );
    if !messages.violations.is_empty() || !images.violations.is_empty() {
        warn!(
            messages = messages.violations.len(),
            images = images.violations.len(),
            "Some data lake records could not be decoded"
        );
    }

    timer.finish();
    Ok(())
}

/// Transform raw records and publish the marts
async fn run_pipeline(
    config: &AppConfig,
    db: &Database,
    source: SourceKind,
    start_date: Option<&str>,
    end_date: Option<&str>,
    export: Option<ExportFormat>,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    let date_range = resolve_date_range(config, start_date, end_date)?;
    let mut context = RunContext::new(Local::now().naive_local(), date_range);
    context.calendar = config.calendar();
    context.engagement = config.classification.engagement;
    context.max_violation_rate = config.pipeline.max_violation_rate;

    let pipeline = Pipeline::new(config.classifier()?, context);
    let lake;
    let raw_source: &dyn RawRecordSource = match source {
        SourceKind::Db => db,
        SourceKind::Lake => {
            lake = DataLakeSource::new(&config.ingest.messages_path, &config.ingest.images_path);
            &lake
        }
    };

    let outcome = match pipeline.run(raw_source, db).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if e.is_fatal_check() {
                error!(error = %e, "Run aborted, marts left unchanged");
            }
            return Err(e.into());
        }
    };

    for report in &outcome.marts.reports {
        println!(
            "{:<22} in={:<8} out={:<8} filtered={:<6} rejected={:<6} {:?}",
            report.stage,
            report.input_rows,
            report.output_rows,
            report.filtered_rows,
            report.rejected_rows,
            report.duration
        );
    }

    let quality = DataQualityReport::from_marts(&outcome.marts);
    print!("{quality}");
    if !quality.passed() {
        warn!(failed = quality.failures().count(), "Published marts failed data quality checks");
    }

    if let Some(format) = export {
        let output_dir = output_dir.unwrap_or_else(|| PathBuf::from(&config.export.output_directory));
        write_export(MartTables::from(&outcome.marts), format, &output_dir)?;
    }

    Ok(())
}

/// Export what is currently published
fn export_published(config: &AppConfig, db: &Database, format: Option<ExportFormat>, output_dir: Option<PathBuf>) -> Result<()> {
    let format = format.unwrap_or_else(|| ExportFormat::from_name(&config.export.default_format));
    let output_dir = output_dir.unwrap_or_else(|| PathBuf::from(&config.export.output_directory));

    let channels = db.fetch_channels(ChannelSort::TotalMessages, None)?;
    let dates = db.fetch_dates()?;
    let facts = db.fetch_facts()?;
    let images = db.fetch_image_aggregations()?;
    if facts.is_empty() {
        warn!(table = table::FCT_MESSAGES, "Nothing published yet");
    }

    write_export(
        MartTables {
            channels: &channels,
            dates: &dates,
            facts: &facts,
            images: &images,
        },
        format,
        &output_dir,
    )
}

fn write_export(marts: MartTables<'_>, format: ExportFormat, output_dir: &Path) -> Result<()> {
    InputValidator::validate_file_path(output_dir)?;
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let files = export_marts(marts, format, output_dir, &timestamp, &Default::default())?;
    for file in files {
        println!("Wrote {}", file.display());
    }
    Ok(())
}

/// Published facts, optionally narrowed to one channel
fn facts_for_channel(db: &Database, channel: Option<&str>) -> Result<Vec<FactMessage>> {
    let mut facts = db.fetch_facts()?;
    if let Some(channel) = channel {
        InputValidator::validate_channel_username(channel)?;
        let channel = channel.trim().trim_start_matches('@');
        facts.retain(|f| f.channel_username == channel);
    }
    Ok(facts)
}

/// Command-line dates override the configured range
fn resolve_date_range(config: &AppConfig, start: Option<&str>, end: Option<&str>) -> Result<DateRange> {
    let configured = config.date_range()?;
    let start = start.map(parse_date).transpose()?.unwrap_or(configured.start);
    let end = end.map(parse_date).transpose()?.unwrap_or(configured.end);
    InputValidator::validate_date_range(Some(start), Some(end))?;
    Ok(DateRange::new(start, end)?)
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").with_context(|| format!("Invalid date '{value}', expected YYYY-MM-DD"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
