//! Batch pipeline orchestration.
//!
//! [`Pipeline::transform`] is the pure core: raw records in, marts out, with
//! every stage run in order and every run check applied. [`Pipeline::run`]
//! wraps it with the raw source read and the mart publication, publishing
//! only when the transform succeeded.

use chrono::NaiveDateTime;
use std::time::Duration;
use tracing::{error, info};

use crate::channels::build_channel_dimension;
use crate::classification::KeywordClassifier;
use crate::dates::{build_date_dimension, CalendarConventions, DateRange};
use crate::error::{PipelineError, Result, SchemaViolation};
use crate::facts::{assemble_facts, EngagementThresholds};
use crate::images::{build_image_aggregation, ImageAggregation};
use crate::logging::OperationTimer;
use crate::metrics::MetricsCollector;
use crate::models::{ChannelDimension, DateDimension, FactMessage, RawImage, RawMessage};
use crate::repository::{MartSink, PublishSummary, RawBatch, RawRecordSource};
use crate::schema::table;
use crate::staging::{stage_messages, IMAGE_STAGE, MESSAGE_STAGE};

/// Everything a transform depends on besides its input records
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Stamp written to every mart row
    pub created_at: NaiveDateTime,
    /// Range of the date dimension
    pub date_range: DateRange,
    /// Fiscal year and season conventions
    pub calendar: CalendarConventions,
    /// Engagement tier cut-offs
    pub engagement: EngagementThresholds,
    /// Largest tolerated share of rejected records per staging stage
    pub max_violation_rate: f64,
}

impl RunContext {
    /// Context with default conventions
    #[must_use]
    pub fn new(created_at: NaiveDateTime, date_range: DateRange) -> Self {
        Self {
            created_at,
            date_range,
            calendar: CalendarConventions::default(),
            engagement: EngagementThresholds::default(),
            max_violation_rate: 0.05,
        }
    }
}

/// Row flow through one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    /// Stage name, the mart table name for builders
    pub stage: &'static str,
    /// Rows read
    pub input_rows: usize,
    /// Rows produced
    pub output_rows: usize,
    /// Rows dropped by a key-field filter or deduplication
    pub filtered_rows: usize,
    /// Rows rejected by shape checks
    pub rejected_rows: usize,
    /// Wall-clock time
    pub duration: Duration,
}

/// The four marts produced by one run
#[derive(Debug, Clone)]
pub struct MartSet {
    /// Channel dimension
    pub channels: Vec<ChannelDimension>,
    /// Date dimension
    pub dates: Vec<DateDimension>,
    /// Fact table
    pub facts: Vec<FactMessage>,
    /// Image aggregates
    pub images: ImageAggregation,
    /// Normalized message count the fact table was checked against
    pub staged_messages: usize,
    /// Per-stage row flow, in execution order
    pub reports: Vec<StageReport>,
    /// Records rejected anywhere in the run
    pub violations: Vec<SchemaViolation>,
}

/// Result of a published run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The marts that were published
    pub marts: MartSet,
    /// Rows written per mart
    pub published: PublishSummary,
}

/// The analytics pipeline
pub struct Pipeline {
    classifier: KeywordClassifier,
    context: RunContext,
    metrics: MetricsCollector,
}

impl Pipeline {
    /// Pipeline with its own metrics collector
    pub fn new(classifier: KeywordClassifier, context: RunContext) -> Self {
        Self {
            classifier,
            context,
            metrics: MetricsCollector::default(),
        }
    }

    /// Conventions applied to every run
    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Build all marts from raw records
    pub fn transform(&self, messages: &[RawMessage], images: &[RawImage]) -> Result<MartSet> {
        self.transform_with_rejects(messages, Vec::new(), images, Vec::new())
    }

    /// Fetch raw records, transform them and publish the marts.
    ///
    /// Nothing is published when any run check fails.
    pub async fn run(&self, source: &dyn RawRecordSource, sink: &dyn MartSink) -> Result<RunOutcome> {
        let timer = OperationTimer::new("pipeline_run");

        let RawBatch {
            records: messages,
            violations: message_rejects,
        } = source.fetch_messages().await?;
        let RawBatch {
            records: images,
            violations: image_rejects,
        } = source.fetch_images().await?;
        info!(
            messages = messages.len(),
            images = images.len(),
            undecodable = message_rejects.len() + image_rejects.len(),
            "Raw records fetched"
        );

        let marts = self.transform_with_rejects(&messages, message_rejects, &images, image_rejects)?;

        let published = sink.publish(&marts).await?;
        for (mart, rows) in [
            (table::DIM_CHANNELS, published.channels),
            (table::DIM_DATES, published.dates),
            (table::FCT_MESSAGES, published.facts),
            (table::IMAGE_AGGREGATIONS, published.images),
        ] {
            self.metrics.record_published(mart, rows);
        }

        timer.finish();
        Ok(RunOutcome { marts, published })
    }

    fn transform_with_rejects(
        &self,
        messages: &[RawMessage],
        message_rejects: Vec<SchemaViolation>,
        images: &[RawImage],
        image_rejects: Vec<SchemaViolation>,
    ) -> Result<MartSet> {
        let ctx = &self.context;
        info!(
            keyword_version = %self.classifier.version,
            keywords = self.classifier.keyword_count(),
            start = %ctx.date_range.start,
            end = %ctx.date_range.end,
            "Starting transform"
        );
        let mut reports = Vec::new();

        // Staging
        let timer = OperationTimer::new(MESSAGE_STAGE);
        let mut staged = stage_messages(messages, &self.classifier);
        let undecodable = message_rejects.len();
        let mut violations = message_rejects;
        violations.append(&mut staged.violations);
        reports.push(self.report(StageReport {
            stage: MESSAGE_STAGE,
            input_rows: messages.len() + undecodable,
            output_rows: staged.records.len(),
            filtered_rows: staged.filtered,
            rejected_rows: violations.len(),
            duration: timer.elapsed(),
        }));

        let timer = OperationTimer::new(IMAGE_STAGE);
        let mut image_build = build_image_aggregation(images, &self.classifier);
        let undecodable = image_rejects.len();
        let mut image_violations = image_rejects;
        image_violations.append(&mut image_build.violations);
        let staged_images = image_build.aggregation.len() + image_build.aggregation.duplicates_dropped();
        reports.push(self.report(StageReport {
            stage: IMAGE_STAGE,
            input_rows: images.len() + undecodable,
            output_rows: staged_images,
            filtered_rows: image_build.filtered,
            rejected_rows: image_violations.len(),
            duration: timer.elapsed(),
        }));

        // Run checks before any mart is built
        for report in &reports {
            self.check_violation_rate(report)?;
        }
        if let Err(err) = ctx.date_range.check_coverage(&staged.records) {
            error!(error = %err, "Configured date range does not cover the data");
            self.metrics.record_fatal_check("range_coverage");
            return Err(err);
        }

        // Dimensions
        let timer = OperationTimer::new(table::DIM_CHANNELS);
        let channels = build_channel_dimension(&staged.records, ctx.created_at);
        reports.push(self.report(StageReport {
            stage: table::DIM_CHANNELS,
            input_rows: staged.records.len(),
            output_rows: channels.len(),
            filtered_rows: 0,
            rejected_rows: 0,
            duration: timer.elapsed(),
        }));

        let timer = OperationTimer::new(table::DIM_DATES);
        let dates = build_date_dimension(ctx.date_range, &ctx.calendar, &staged.records, ctx.created_at);
        reports.push(self.report(StageReport {
            stage: table::DIM_DATES,
            input_rows: staged.records.len(),
            output_rows: dates.len(),
            filtered_rows: 0,
            rejected_rows: 0,
            duration: timer.elapsed(),
        }));

        let images = image_build.aggregation;
        self.metrics.record_duplicate_images(images.duplicates_dropped());
        reports.push(self.report(StageReport {
            stage: table::IMAGE_AGGREGATIONS,
            input_rows: staged_images,
            output_rows: images.len(),
            filtered_rows: images.duplicates_dropped(),
            rejected_rows: 0,
            duration: Duration::ZERO,
        }));

        // Facts
        let timer = OperationTimer::new(table::FCT_MESSAGES);
        let facts = match assemble_facts(
            &staged.records,
            &channels,
            &dates,
            &images,
            &ctx.engagement,
            ctx.created_at,
        ) {
            Ok(facts) => facts,
            Err(err) => {
                self.metrics.record_fatal_check("join_integrity");
                return Err(err);
            }
        };
        reports.push(self.report(StageReport {
            stage: table::FCT_MESSAGES,
            input_rows: staged.records.len(),
            output_rows: facts.len(),
            filtered_rows: 0,
            rejected_rows: 0,
            duration: timer.elapsed(),
        }));

        violations.append(&mut image_violations);
        info!(
            channels = channels.len(),
            days = dates.len(),
            facts = facts.len(),
            images = images.len(),
            rejected = violations.len(),
            "Transform completed"
        );

        Ok(MartSet {
            channels,
            dates,
            facts,
            images,
            staged_messages: staged.records.len(),
            reports,
            violations,
        })
    }

    fn report(&self, report: StageReport) -> StageReport {
        info!(
            stage = report.stage,
            input = report.input_rows,
            output = report.output_rows,
            filtered = report.filtered_rows,
            rejected = report.rejected_rows,
            duration_ms = report.duration.as_millis() as u64,
            "Stage completed"
        );
        self.metrics.record_stage(
            report.stage,
            report.input_rows,
            report.output_rows,
            report.filtered_rows,
            report.rejected_rows,
            report.duration,
        );
        report
    }

    fn check_violation_rate(&self, report: &StageReport) -> Result<()> {
        if report.input_rows == 0 || report.rejected_rows == 0 {
            return Ok(());
        }
        let rate = report.rejected_rows as f64 / report.input_rows as f64;
        if rate > self.context.max_violation_rate {
            error!(
                stage = report.stage,
                rejected = report.rejected_rows,
                total = report.input_rows,
                rate,
                "Violation rate above threshold"
            );
            self.metrics.record_fatal_check("violation_rate");
            return Err(PipelineError::ViolationThresholdExceeded {
                stage: report.stage.to_string(),
                rejected: report.rejected_rows,
                total: report.input_rows,
                max_rate: self.context.max_violation_rate,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentCategory, Detection, EngagementLevel};
    use crate::repository::{MockMartSink, MockRawRecordSource};
    use chrono::NaiveDate;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn context() -> RunContext {
        let created_at = day(2024, 6, 1).and_hms_opt(0, 0, 0).expect("valid time");
        RunContext::new(created_at, DateRange::new(day(2024, 1, 1), day(2024, 12, 31)).expect("valid range"))
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(KeywordClassifier::with_defaults().expect("Failed to create classifier"), context())
    }

    fn raw_message(id: i64, channel: &str, text: &str, date: NaiveDate) -> RawMessage {
        RawMessage {
            message_id: id,
            channel_username: Some(channel.to_string()),
            channel_title: Some(channel.to_uppercase()),
            message_text: Some(text.to_string()),
            message_date: date.and_hms_opt(12, 0, 0),
            has_media: Some(false),
            media_type: None,
            media_url: None,
            views: Some(100),
            forwards: Some(10),
            replies: Some(5),
            raw_payload: None,
        }
    }

    fn raw_image(id: i64, channel: &str, hash: &str) -> RawImage {
        RawImage {
            message_id: id,
            channel_username: Some(channel.to_string()),
            image_url: None,
            local_path: None,
            image_hash: Some(hash.to_string()),
            detections: Some(vec![Detection {
                class_label: "pill".to_string(),
                confidence: Some(0.9),
                bbox: None,
            }]),
        }
    }

    #[test]
    fn test_transform_end_to_end() {
        let mut photo = raw_message(2, "chemed", "", day(2024, 3, 11));
        photo.has_media = Some(true);
        photo.media_type = Some("photo".to_string());
        let messages = vec![
            raw_message(1, "tikvahpharma", "Paracetamol tablets available", day(2024, 3, 10)),
            photo,
        ];
        let images = vec![raw_image(2, "chemed", "b"), raw_image(2, "chemed", "a")];

        let marts = pipeline().transform(&messages, &images).expect("Failed to transform");

        assert_eq!(marts.facts.len(), 2);
        assert_eq!(marts.staged_messages, 2);
        assert_eq!(marts.channels.len(), 2);
        assert_eq!(marts.dates.len(), 366);
        assert_eq!(marts.images.len(), 1);
        assert_eq!(marts.images.duplicates_dropped(), 1);

        let paracetamol = &marts.facts[0];
        assert_eq!(paracetamol.engagement_score, 135);
        assert_eq!(paracetamol.engagement_level, EngagementLevel::Medium);
        assert_eq!(paracetamol.content_category, ContentCategory::MedicalText);

        let image_fact = &marts.facts[1];
        assert_eq!(image_fact.content_category, ContentCategory::MedicalImage);
        assert_eq!(image_fact.image_hash.as_deref(), Some("a"));

        let stages: Vec<&str> = marts.reports.iter().map(|r| r.stage).collect();
        assert_eq!(
            stages,
            vec![
                MESSAGE_STAGE,
                IMAGE_STAGE,
                table::DIM_CHANNELS,
                table::DIM_DATES,
                table::IMAGE_AGGREGATIONS,
                table::FCT_MESSAGES
            ]
        );
    }

    #[test]
    fn test_transform_is_deterministic() {
        let messages = vec![
            raw_message(3, "b", "pill", day(2024, 5, 1)),
            raw_message(1, "a", "cream", day(2024, 5, 1)),
            raw_message(2, "a", "hello", day(2024, 4, 1)),
        ];
        let mut reversed = messages.clone();
        reversed.reverse();

        let first = pipeline().transform(&messages, &[]).expect("Failed to transform");
        let second = pipeline().transform(&reversed, &[]).expect("Failed to transform");
        assert_eq!(first.facts, second.facts);
        assert_eq!(first.channels, second.channels);
        assert_eq!(first.dates, second.dates);
    }

    #[test]
    fn test_message_outside_range_is_fatal() {
        let messages = vec![raw_message(1, "chemed", "pill", day(2025, 1, 1))];
        let err = pipeline().transform(&messages, &[]).expect_err("range check should fail");
        assert!(matches!(err, PipelineError::RangeMisconfiguration { .. }));
        assert!(err.is_fatal_check());
    }

    #[test]
    fn test_violation_rate_threshold() {
        let mut broken = raw_message(2, "chemed", "pill", day(2024, 2, 1));
        broken.views = Some(-1);
        let messages = vec![raw_message(1, "chemed", "pill", day(2024, 2, 1)), broken];

        let err = pipeline().transform(&messages, &[]).expect_err("rate check should fail");
        assert!(matches!(
            err,
            PipelineError::ViolationThresholdExceeded { rejected: 1, total: 2, .. }
        ));

        let mut lenient = context();
        lenient.max_violation_rate = 0.5;
        let classifier = KeywordClassifier::with_defaults().expect("Failed to create classifier");
        let marts = Pipeline::new(classifier, lenient)
            .transform(&messages, &[])
            .expect("Failed to transform");
        assert_eq!(marts.facts.len(), 1);
        assert_eq!(marts.violations.len(), 1);
    }

    #[test]
    fn test_filtered_records_do_not_count_as_violations() {
        let mut undated = raw_message(2, "chemed", "pill", day(2024, 2, 1));
        undated.message_date = None;
        let messages = vec![raw_message(1, "chemed", "pill", day(2024, 2, 1)), undated];

        let marts = pipeline().transform(&messages, &[]).expect("Failed to transform");
        assert_eq!(marts.reports[0].filtered_rows, 1);
        assert_eq!(marts.reports[0].rejected_rows, 0);
        assert_eq!(marts.facts.len(), 1);
    }

    #[tokio::test]
    async fn test_run_publishes_marts() {
        let mut source = MockRawRecordSource::new();
        source
            .expect_fetch_messages()
            .times(1)
            .returning(|| Ok(RawBatch::new(vec![raw_message(1, "chemed", "syrup", day(2024, 2, 1))])));
        source
            .expect_fetch_images()
            .times(1)
            .returning(|| Ok(RawBatch::new(Vec::new())));

        let mut sink = MockMartSink::new();
        sink.expect_publish()
            .withf(|marts: &MartSet| marts.facts.len() == 1 && marts.channels.len() == 1)
            .times(1)
            .returning(|marts| {
                Ok(PublishSummary {
                    channels: marts.channels.len(),
                    dates: marts.dates.len(),
                    facts: marts.facts.len(),
                    images: marts.images.len(),
                })
            });

        let outcome = pipeline().run(&source, &sink).await.expect("Failed to run pipeline");
        assert_eq!(outcome.published.facts, 1);
        assert_eq!(outcome.published.dates, 366);
    }

    #[tokio::test]
    async fn test_run_does_not_publish_after_failed_check() {
        let mut source = MockRawRecordSource::new();
        source
            .expect_fetch_messages()
            .returning(|| Ok(RawBatch::new(vec![raw_message(1, "chemed", "syrup", day(2019, 2, 1))])));
        source.expect_fetch_images().returning(|| Ok(RawBatch::new(Vec::new())));

        let mut sink = MockMartSink::new();
        sink.expect_publish().never();

        let err = pipeline().run(&source, &sink).await.expect_err("run should fail");
        assert!(err.is_fatal_check());
    }

    #[tokio::test]
    async fn test_source_decode_failures_count_towards_threshold() {
        let mut source = MockRawRecordSource::new();
        source.expect_fetch_messages().returning(|| {
            Ok(RawBatch {
                records: vec![raw_message(1, "chemed", "syrup", day(2024, 2, 1))],
                violations: vec![SchemaViolation::new("raw_telegram_messages", "line 2", "invalid JSON")],
            })
        });
        source.expect_fetch_images().returning(|| Ok(RawBatch::new(Vec::new())));
        let mut sink = MockMartSink::new();
        sink.expect_publish().never();

        let err = pipeline().run(&source, &sink).await.expect_err("run should fail");
        assert!(matches!(
            err,
            PipelineError::ViolationThresholdExceeded { rejected: 1, total: 2, .. }
        ));
    }
}
