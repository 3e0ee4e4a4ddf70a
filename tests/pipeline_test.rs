//! End-to-end tests of the transform over small raw batches

use chrono::{NaiveDate, NaiveDateTime};
use channel_analytics::classification::KeywordClassifier;
use channel_analytics::dates::DateRange;
use channel_analytics::error::PipelineError;
use channel_analytics::models::{ContentCategory, EngagementLevel, RawImage, RawMessage};
use channel_analytics::pipeline::{MartSet, Pipeline, RunContext};
use channel_analytics::repository::{MartSink, PublishSummary, RawBatch, RawRecordSource};
use channel_analytics::schema::table;
use channel_analytics::staging::{IMAGE_STAGE, MESSAGE_STAGE};

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn created_at() -> NaiveDateTime {
    day(2024, 4, 1).and_hms_opt(0, 0, 0).expect("valid time")
}

fn march_pipeline() -> Pipeline {
    let range = DateRange::new(day(2024, 3, 1), day(2024, 3, 31)).expect("Failed to build range");
    Pipeline::new(
        KeywordClassifier::with_defaults().expect("Failed to create classifier"),
        RunContext::new(created_at(), range),
    )
}

fn raw_messages() -> Vec<RawMessage> {
    serde_json::from_str(
        r#"[
            {"message_id": 1, "channel_username": "tikvahpharma", "channel_title": "Tikvah Pharma",
             "message_text": "Paracetamol tablets available", "message_date": "2024-03-10T14:05:00",
             "views": 100, "forwards": 10, "replies": 5},
            {"message_id": 2, "channel_username": "chemed", "channel_title": "CheMed",
             "message_text": "Fresh arrivals", "message_date": "2024-03-12T09:00:00",
             "has_media": true, "media_type": "photo", "views": 2000},
            {"message_id": 3, "channel_username": "chemed", "message_text": "no timestamp"}
        ]"#,
    )
    .expect("Failed to parse messages")
}

fn raw_images() -> Vec<RawImage> {
    serde_json::from_str(
        r#"[
            {"message_id": 2, "channel_username": "chemed", "image_hash": "bbb",
             "object_detection_results": [{"class": "pill", "confidence": 0.9}, {"class": "box", "confidence": 0.6}]},
            {"message_id": 2, "channel_username": "chemed", "image_hash": "zzz",
             "object_detection_results": [{"class": "person", "confidence": 0.4}]}
        ]"#,
    )
    .expect("Failed to parse images")
}

#[test]
fn test_medical_text_message() {
    let marts = march_pipeline()
        .transform(&raw_messages(), &raw_images())
        .expect("Failed to transform");

    let fact = marts.facts.iter().find(|f| f.message_id == 1).expect("fact for message 1");
    assert!(fact.is_medical_related);
    assert_eq!(fact.engagement_score, 135);
    assert_eq!(fact.engagement_level, EngagementLevel::Medium);
    assert_eq!(fact.content_category, ContentCategory::MedicalText);
    assert_eq!(fact.image_hash, None);
    assert!(!fact.has_medical_objects);
    assert_eq!(fact.date_key, Some(20_240_310));
}

#[test]
fn test_image_join_keeps_one_row_per_message() {
    let marts = march_pipeline()
        .transform(&raw_messages(), &raw_images())
        .expect("Failed to transform");

    assert_eq!(marts.facts.len(), 2);
    assert_eq!(marts.staged_messages, 2);
    assert_eq!(marts.images.len(), 1);
    assert_eq!(marts.images.duplicates_dropped(), 1);

    let fact = marts.facts.iter().find(|f| f.message_id == 2).expect("fact for message 2");
    assert_eq!(fact.image_hash.as_deref(), Some("bbb"));
    assert_eq!(fact.detected_objects_count, Some(2));
    let confidence = fact.avg_confidence_score.expect("confidence present");
    assert!((confidence - 0.75).abs() < 1e-9);
    assert!(fact.has_medical_objects);
    assert_eq!(fact.content_category, ContentCategory::MedicalImage);
    assert_eq!(fact.engagement_level, EngagementLevel::High);
}

#[test]
fn test_dimensions() {
    let marts = march_pipeline()
        .transform(&raw_messages(), &raw_images())
        .expect("Failed to transform");

    let keys: Vec<(i64, &str)> = marts
        .channels
        .iter()
        .map(|c| (c.channel_key, c.channel_username.as_str()))
        .collect();
    assert_eq!(keys, vec![(1, "chemed"), (2, "tikvahpharma")]);

    assert_eq!(marts.dates.len(), 31);
    let tenth = &marts.dates[9];
    assert_eq!(tenth.date_actual, day(2024, 3, 10));
    assert_eq!(tenth.message_count, 1);
    assert_eq!(tenth.medical_message_count, 1);
    assert_eq!(marts.dates[0].message_count, 0);
}

#[test]
fn test_stage_reports() {
    let marts = march_pipeline()
        .transform(&raw_messages(), &raw_images())
        .expect("Failed to transform");

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

    let messages = &marts.reports[0];
    assert_eq!(messages.input_rows, 3);
    assert_eq!(messages.output_rows, 2);
    assert_eq!(messages.filtered_rows, 1);
    assert_eq!(messages.rejected_rows, 0);
}

#[test]
fn test_output_independent_of_input_order() {
    let pipeline = march_pipeline();
    let first = pipeline
        .transform(&raw_messages(), &raw_images())
        .expect("Failed to transform");

    let mut messages = raw_messages();
    messages.reverse();
    let mut images = raw_images();
    images.reverse();
    let second = pipeline.transform(&messages, &images).expect("Failed to transform");

    assert_eq!(first.facts, second.facts);
    assert_eq!(first.channels, second.channels);
    assert_eq!(first.dates, second.dates);
    assert_eq!(first.images, second.images);
}

#[test]
fn test_violation_rate_aborts_run() {
    let mut messages = raw_messages();
    for id in 10..30 {
        let mut message = messages[0].clone();
        message.message_id = id;
        messages.push(message);
    }
    for id in 100..102 {
        let mut message = messages[0].clone();
        message.message_id = id;
        message.channel_username = None;
        messages.push(message);
    }

    // 2 rejected of 25 input rows
    let err = march_pipeline()
        .transform(&messages, &[])
        .expect_err("run should abort");
    match err {
        PipelineError::ViolationThresholdExceeded { stage, rejected, total, .. } => {
            assert_eq!(stage, MESSAGE_STAGE);
            assert_eq!(rejected, 2);
            assert_eq!(total, 25);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_message_outside_range_is_fatal() {
    let mut messages = raw_messages();
    messages[0].message_date = day(2024, 4, 2).and_hms_opt(8, 0, 0);

    let err = march_pipeline()
        .transform(&messages, &[])
        .expect_err("run should abort");
    assert!(err.is_fatal_check());
    match err {
        PipelineError::RangeMisconfiguration { observed_max, .. } => assert_eq!(observed_max, day(2024, 4, 2)),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_empty_input() {
    let marts = march_pipeline().transform(&[], &[]).expect("Failed to transform");
    assert!(marts.facts.is_empty());
    assert!(marts.channels.is_empty());
    assert_eq!(marts.dates.len(), 31);
    assert!(marts.dates.iter().all(|d| d.message_count == 0));
}

#[test]
fn test_largest_accepted_counters_aggregate() {
    let cap = i64::MAX / 8;
    let mut messages = raw_messages();
    messages.truncate(1);
    messages[0].views = Some(cap);
    messages[0].forwards = Some(cap);
    messages[0].replies = Some(cap);
    let mut second = messages[0].clone();
    second.message_id = 2;
    messages.push(second);

    let marts = march_pipeline().transform(&messages, &[]).expect("Failed to transform");
    assert_eq!(marts.facts.len(), 2);
    assert_eq!(marts.facts[0].engagement_score, 6 * cap);

    let channel = &marts.channels[0];
    assert_eq!(channel.total_views, 2 * cap);
    assert_eq!(channel.total_replies, 2 * cap);
    assert!(channel.avg_engagement_score > 0.0);
    assert_eq!(marts.dates[9].message_count, 2);
}

#[tokio::test]
async fn test_run_over_empty_source() {
    struct EmptySource;

    #[async_trait::async_trait]
    impl RawRecordSource for EmptySource {
        async fn fetch_messages(&self) -> channel_analytics::Result<RawBatch<RawMessage>> {
            Ok(RawBatch::default())
        }
        async fn fetch_images(&self) -> channel_analytics::Result<RawBatch<RawImage>> {
            Ok(RawBatch::default())
        }
    }

    struct CountingSink;

    #[async_trait::async_trait]
    impl MartSink for CountingSink {
        async fn publish(&self, marts: &MartSet) -> channel_analytics::Result<PublishSummary> {
            Ok(PublishSummary {
                channels: marts.channels.len(),
                dates: marts.dates.len(),
                facts: marts.facts.len(),
                images: marts.images.len(),
            })
        }
    }

    assert_eq!(RawBatch::<RawMessage>::default().total(), 0);
    let outcome = march_pipeline()
        .run(&EmptySource, &CountingSink)
        .await
        .expect("Failed to run pipeline");
    assert_eq!(outcome.published.facts, 0);
    assert_eq!(outcome.published.dates, 31);
}
