//! Staging normalizer for raw messages and images.
//!
//! Every function here is a per-record transform with no cross-record state.
//! Records missing their key field (message date, image hash) are filtered;
//! records with a malformed field are rejected with a [`SchemaViolation`].

use chrono::{Datelike, Timelike};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::classification::KeywordClassifier;
use crate::error::SchemaViolation;
use crate::models::{NormalizedImage, NormalizedMessage, RawImage, RawMessage};

/// Stage name of the message normalizer
pub const MESSAGE_STAGE: &str = "stg_telegram_messages";
/// Stage name of the image normalizer
pub const IMAGE_STAGE: &str = "stg_telegram_images";

/// Outcome of normalizing one raw record
#[derive(Debug, Clone, PartialEq)]
pub enum Staged<T> {
    /// The record survived staging
    Kept(T),
    /// The record lacks its key field and is dropped silently
    Filtered,
    /// The record is malformed
    Rejected(SchemaViolation),
}

/// All records of one stream after staging
#[derive(Debug, Clone)]
pub struct StagedSet<T> {
    /// Surviving records
    pub records: Vec<T>,
    /// Number of records dropped by the key-field filter
    pub filtered: usize,
    /// Malformed records
    pub violations: Vec<SchemaViolation>,
}

impl<T> Default for StagedSet<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            filtered: 0,
            violations: Vec::new(),
        }
    }
}

impl<T> StagedSet<T> {
    fn push(&mut self, staged: Staged<T>) {
        match staged {
            Staged::Kept(record) => self.records.push(record),
            Staged::Filtered => self.filtered += 1,
            Staged::Rejected(violation) => {
                warn!(stage = violation.stage, record = %violation.record, reason = %violation.reason, "Record rejected");
                self.violations.push(violation);
            }
        }
    }
}

/// `views + 2 * forwards + 3 * replies`, absent counters count as 0
#[must_use]
pub fn engagement_score(views: Option<i64>, forwards: Option<i64>, replies: Option<i64>) -> i64 {
    views.unwrap_or(0) + 2 * forwards.unwrap_or(0) + 3 * replies.unwrap_or(0)
}

/// Normalize one raw message
#[must_use]
pub fn normalize_message(raw: &RawMessage, classifier: &KeywordClassifier) -> Staged<NormalizedMessage> {
    let Some(message_date) = raw.message_date else {
        return Staged::Filtered;
    };

    let record = format!(
        "{}/{}",
        raw.channel_username.as_deref().unwrap_or("?"),
        raw.message_id
    );
    let channel_username = match raw.channel_username.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            return Staged::Rejected(SchemaViolation::new(
                MESSAGE_STAGE,
                record,
                "channel_username is missing",
            ))
        }
    };

    for (field, value) in [("views", raw.views), ("forwards", raw.forwards), ("replies", raw.replies)] {
        if value.is_some_and(|v| v < 0) {
            return Staged::Rejected(SchemaViolation::new(
                MESSAGE_STAGE,
                record,
                format!("{field} is negative"),
            ));
        }
    }
    if [raw.views, raw.forwards, raw.replies]
        .iter()
        .any(|v| v.unwrap_or(0) > i64::MAX / 8)
    {
        return Staged::Rejected(SchemaViolation::new(MESSAGE_STAGE, record, "counter out of range"));
    }

    let message_text = raw.message_text.as_deref().map(str::trim).unwrap_or_default().to_string();
    let has_media = raw.has_media.unwrap_or(false);
    let media_type = raw.media_type.as_deref();

    Staged::Kept(NormalizedMessage {
        message_id: raw.message_id,
        channel_username,
        channel_title: raw
            .channel_title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ToString::to_string),
        message_length: message_text.chars().count() as i64,
        is_medical_related: classifier.is_medical_text(&message_text),
        message_text,
        message_date,
        message_date_only: message_date.date(),
        year: message_date.year(),
        month: message_date.month() as i32,
        day: message_date.day() as i32,
        day_of_week: message_date.weekday().num_days_from_sunday() as i32,
        hour: message_date.hour() as i32,
        has_media,
        media_type: raw.media_type.clone(),
        media_url: raw.media_url.clone(),
        has_image: has_media && media_type == Some("photo"),
        has_document: has_media && media_type == Some("document"),
        views: raw.views.unwrap_or(0),
        forwards: raw.forwards.unwrap_or(0),
        replies: raw.replies.unwrap_or(0),
        engagement_score: engagement_score(raw.views, raw.forwards, raw.replies),
    })
}

/// Normalize one raw image and summarize its detections
#[must_use]
pub fn normalize_image(raw: &RawImage, classifier: &KeywordClassifier) -> Staged<NormalizedImage> {
    let Some(image_hash) = raw.image_hash.as_deref().map(str::trim).filter(|h| !h.is_empty()) else {
        return Staged::Filtered;
    };

    let record = format!(
        "{}/{}",
        raw.channel_username.as_deref().unwrap_or("?"),
        raw.message_id
    );
    let channel_username = match raw.channel_username.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            return Staged::Rejected(SchemaViolation::new(
                IMAGE_STAGE,
                record,
                "channel_username is missing",
            ))
        }
    };

    let detections = raw.detections.as_deref().unwrap_or_default();
    let mut confidences = Vec::with_capacity(detections.len());
    let mut classes = BTreeSet::new();
    let mut has_medical_objects = false;

    for detection in detections {
        let label = detection.class_label.trim();
        if label.is_empty() {
            return Staged::Rejected(SchemaViolation::new(IMAGE_STAGE, record, "detection has an empty class_label"));
        }
        if let Some(confidence) = detection.confidence {
            if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
                return Staged::Rejected(SchemaViolation::new(
                    IMAGE_STAGE,
                    record,
                    format!("confidence {confidence} is outside [0, 1]"),
                ));
            }
            confidences.push(confidence);
        }
        has_medical_objects |= classifier.is_medical_object(label);
        classes.insert(label.to_string());
    }

    let avg_confidence_score = if confidences.is_empty() {
        None
    } else {
        Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
    };

    Staged::Kept(NormalizedImage {
        message_id: raw.message_id,
        channel_username,
        image_url: raw.image_url.clone(),
        local_path: raw.local_path.clone(),
        image_hash: image_hash.to_string(),
        detected_objects_count: detections.len() as i64,
        avg_confidence_score,
        detected_classes: classes.into_iter().collect(),
        has_medical_objects,
    })
}

/// Stage a whole message stream.
///
/// Output is ordered by `(message_date, channel_username, message_id)` so that
/// identical input always yields identical output.
#[must_use]
pub fn stage_messages(raws: &[RawMessage], classifier: &KeywordClassifier) -> StagedSet<NormalizedMessage> {
    let mut set = StagedSet::default();
    for raw in raws {
        set.push(normalize_message(raw, classifier));
    }
    set.records.sort_by(|a, b| {
        (a.message_date, &a.channel_username, a.message_id).cmp(&(b.message_date, &b.channel_username, b.message_id))
    });
    debug!(
        kept = set.records.len(),
        filtered = set.filtered,
        rejected = set.violations.len(),
        "Messages staged"
    );
    set
}

/// Stage a whole image stream
#[must_use]
pub fn stage_images(raws: &[RawImage], classifier: &KeywordClassifier) -> StagedSet<NormalizedImage> {
    let mut set = StagedSet::default();
    for raw in raws {
        set.push(normalize_image(raw, classifier));
    }
    debug!(
        kept = set.records.len(),
        filtered = set.filtered,
        rejected = set.violations.len(),
        "Images staged"
    );
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Detection;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn classifier() -> KeywordClassifier {
        KeywordClassifier::with_defaults().expect("Failed to create classifier")
    }

    fn raw_message(text: Option<&str>) -> RawMessage {
        RawMessage {
            message_id: 1,
            channel_username: Some("tikvahpharma".to_string()),
            channel_title: Some("Tikvah Pharma".to_string()),
            message_text: text.map(ToString::to_string),
            message_date: NaiveDate::from_ymd_opt(2024, 3, 10).and_then(|d| d.and_hms_opt(14, 5, 0)),
            has_media: Some(false),
            media_type: None,
            media_url: None,
            views: Some(100),
            forwards: Some(10),
            replies: Some(5),
            raw_payload: None,
        }
    }

    fn detection(class_label: &str, confidence: Option<f64>) -> Detection {
        Detection {
            class_label: class_label.to_string(),
            confidence,
            bbox: None,
        }
    }

    fn raw_image(detections: Option<Vec<Detection>>) -> RawImage {
        RawImage {
            message_id: 1,
            channel_username: Some("tikvahpharma".to_string()),
            image_url: None,
            local_path: None,
            image_hash: Some("abc123".to_string()),
            detections,
        }
    }

    #[test]
    fn test_empty_staged_sets() {
        let messages = StagedSet::<NormalizedMessage>::default();
        assert!(messages.records.is_empty());
        assert_eq!(messages.filtered, 0);
        assert!(messages.violations.is_empty());
        assert!(StagedSet::<NormalizedImage>::default().records.is_empty());
    }

    #[test]
    fn test_paracetamol_scenario() {
        let raw = raw_message(Some("Paracetamol tablets available"));
        let Staged::Kept(message) = normalize_message(&raw, &classifier()) else {
            panic!("message should be kept");
        };

        assert!(message.is_medical_related);
        assert_eq!(message.engagement_score, 135);
        assert_eq!(message.message_length, 29);
        assert!(!message.has_image);
        assert!(!message.has_document);
        // 2024-03-10 is a Sunday
        assert_eq!(message.day_of_week, 0);
        assert_eq!(message.hour, 14);
    }

    #[test]
    fn test_message_without_date_is_filtered() {
        let mut raw = raw_message(Some("hello"));
        raw.message_date = None;
        assert_eq!(normalize_message(&raw, &classifier()), Staged::Filtered);
    }

    #[test]
    fn test_null_counters_default_to_zero() {
        let mut raw = raw_message(None);
        raw.views = None;
        raw.forwards = Some(4);
        raw.replies = None;
        let Staged::Kept(message) = normalize_message(&raw, &classifier()) else {
            panic!("message should be kept");
        };
        assert_eq!(message.engagement_score, 8);
        assert_eq!(message.message_text, "");
        assert_eq!(message.views, 0);
    }

    #[test]
    fn test_media_typing_requires_has_media() {
        let classifier = classifier();
        let cases = [
            (Some(true), Some("photo"), true, false),
            (Some(true), Some("document"), false, true),
            (Some(false), Some("photo"), false, false),
            (None, Some("document"), false, false),
            (Some(true), Some("video"), false, false),
            (Some(true), None, false, false),
        ];
        for (has_media, media_type, image, document) in cases {
            let mut raw = raw_message(None);
            raw.has_media = has_media;
            raw.media_type = media_type.map(ToString::to_string);
            let Staged::Kept(message) = normalize_message(&raw, &classifier) else {
                panic!("message should be kept");
            };
            assert_eq!(message.has_image, image, "{has_media:?} {media_type:?}");
            assert_eq!(message.has_document, document, "{has_media:?} {media_type:?}");
        }
    }

    #[test]
    fn test_negative_counter_is_rejected() {
        let mut raw = raw_message(None);
        raw.views = Some(-3);
        assert!(matches!(normalize_message(&raw, &classifier()), Staged::Rejected(_)));
    }

    #[test]
    fn test_missing_channel_is_rejected() {
        let mut raw = raw_message(None);
        raw.channel_username = Some("   ".to_string());
        let Staged::Rejected(violation) = normalize_message(&raw, &classifier()) else {
            panic!("message should be rejected");
        };
        assert_eq!(violation.stage, MESSAGE_STAGE);
    }

    #[test]
    fn test_pill_box_scenario() {
        let raw = raw_image(Some(vec![detection("pill", Some(0.9)), detection("box", Some(0.6))]));
        let Staged::Kept(image) = normalize_image(&raw, &classifier()) else {
            panic!("image should be kept");
        };

        assert_eq!(image.detected_objects_count, 2);
        let avg = image.avg_confidence_score.expect("average present");
        assert!((avg - 0.75).abs() < 1e-9);
        assert!(image.has_medical_objects);
        assert_eq!(image.detected_classes, vec!["box".to_string(), "pill".to_string()]);
    }

    #[test]
    fn test_empty_detections_have_no_average() {
        for detections in [None, Some(Vec::new())] {
            let Staged::Kept(image) = normalize_image(&raw_image(detections), &classifier()) else {
                panic!("image should be kept");
            };
            assert_eq!(image.detected_objects_count, 0);
            assert_eq!(image.avg_confidence_score, None);
            assert!(!image.has_medical_objects);
        }
    }

    #[test]
    fn test_absent_confidence_is_excluded_from_mean() {
        let raw = raw_image(Some(vec![
            detection("bottle", Some(0.8)),
            detection("bottle", None),
            detection("person", Some(0.4)),
        ]));
        let Staged::Kept(image) = normalize_image(&raw, &classifier()) else {
            panic!("image should be kept");
        };
        assert_eq!(image.detected_objects_count, 3);
        let avg = image.avg_confidence_score.expect("average present");
        assert!((avg - 0.6).abs() < 1e-9);
        assert_eq!(image.detected_classes.len(), 2);
    }

    #[test]
    fn test_image_without_hash_is_filtered() {
        let mut raw = raw_image(None);
        raw.image_hash = None;
        assert_eq!(normalize_image(&raw, &classifier()), Staged::Filtered);
    }

    #[test]
    fn test_out_of_range_confidence_is_rejected() {
        let raw = raw_image(Some(vec![detection("pill", Some(1.5))]));
        assert!(matches!(normalize_image(&raw, &classifier()), Staged::Rejected(_)));
    }

    #[test]
    fn test_stage_messages_counts_and_orders() {
        let classifier = classifier();
        let mut late = raw_message(Some("b"));
        late.message_id = 2;
        late.message_date = NaiveDate::from_ymd_opt(2024, 3, 12).and_then(|d| d.and_hms_opt(0, 0, 0));
        let early = raw_message(Some("a"));
        let mut undated = raw_message(Some("c"));
        undated.message_date = None;
        let mut broken = raw_message(Some("d"));
        broken.replies = Some(-1);

        let set = stage_messages(&[late, early, undated, broken], &classifier);
        assert_eq!(set.records.len(), 2);
        assert_eq!(set.records[0].message_id, 1);
        assert_eq!(set.filtered, 1);
        assert_eq!(set.violations.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_engagement_score_is_linear(
            views in proptest::option::of(0i64..1_000_000),
            forwards in proptest::option::of(0i64..1_000_000),
            replies in proptest::option::of(0i64..1_000_000),
        ) {
            let mut raw = raw_message(Some("text"));
            raw.views = views;
            raw.forwards = forwards;
            raw.replies = replies;
            let Staged::Kept(message) = normalize_message(&raw, &classifier()) else {
                panic!("message should be kept");
            };
            prop_assert_eq!(
                message.engagement_score,
                views.unwrap_or(0) + 2 * forwards.unwrap_or(0) + 3 * replies.unwrap_or(0)
            );
        }
    }
}
