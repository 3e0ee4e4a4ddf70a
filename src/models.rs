//! Data models for raw records, staged records and the published marts
//!
//! This module contains all data structures that flow through the pipeline,
//! from the raw scraper/detector output to the joined fact table.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// A message event exactly as received from the channel scraper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Scraper message identifier, unique within a channel
    pub message_id: i64,
    /// Channel the message was posted in
    #[serde(default)]
    pub channel_username: Option<String>,
    /// Display title of the channel at scrape time
    #[serde(default)]
    pub channel_title: Option<String>,
    /// Message text content
    #[serde(default)]
    pub message_text: Option<String>,
    /// Naive local timestamp of the post
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub message_date: Option<NaiveDateTime>,
    /// True if the message carries media
    #[serde(default)]
    pub has_media: Option<bool>,
    /// Media kind ("photo", "document", ...)
    #[serde(default)]
    pub media_type: Option<String>,
    /// Media location, if known
    #[serde(default)]
    pub media_url: Option<String>,
    /// View counter
    #[serde(default)]
    pub views: Option<i64>,
    /// Forward counter
    #[serde(default)]
    pub forwards: Option<i64>,
    /// Reply counter
    #[serde(default)]
    pub replies: Option<i64>,
    /// Untouched scraper payload
    #[serde(default, alias = "raw_data")]
    pub raw_payload: Option<serde_json::Value>,
}

/// Bounding box of a detection, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge
    pub x1: f64,
    /// Top edge
    pub y1: f64,
    /// Right edge
    pub x2: f64,
    /// Bottom edge
    pub y2: f64,
}

/// One object found by the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Free-text class label
    #[serde(alias = "class")]
    pub class_label: String,
    /// Detector confidence in `[0, 1]`; absent values are excluded from means
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Optional bounding box
    #[serde(default, alias = "bounding_box")]
    pub bbox: Option<BoundingBox>,
}

/// An image event with the detector output attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawImage {
    /// Message the image was attached to
    pub message_id: i64,
    /// Channel of that message
    #[serde(default)]
    pub channel_username: Option<String>,
    /// Source URL
    #[serde(default)]
    pub image_url: Option<String>,
    /// Downloaded file location
    #[serde(default)]
    pub local_path: Option<String>,
    /// Content hash; images without one are not staged
    #[serde(default)]
    pub image_hash: Option<String>,
    /// Detector output
    #[serde(default, alias = "object_detection_results")]
    pub detections: Option<Vec<Detection>>,
}

/// A cleaned message with per-record derived fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    /// Scraper message identifier
    pub message_id: i64,
    /// Channel the message was posted in
    pub channel_username: String,
    /// Channel title as carried by this message
    pub channel_title: Option<String>,
    /// Trimmed text, empty when absent
    pub message_text: String,
    /// Text length in characters
    pub message_length: i64,
    /// Post timestamp
    pub message_date: NaiveDateTime,
    /// Calendar day of the post
    pub message_date_only: NaiveDate,
    /// Calendar year
    pub year: i32,
    /// Calendar month (1-12)
    pub month: i32,
    /// Day of month (1-31)
    pub day: i32,
    /// Day of week, 0 = Sunday
    pub day_of_week: i32,
    /// Hour of day (0-23)
    pub hour: i32,
    /// True if the message carries media
    pub has_media: bool,
    /// Media kind, if any
    pub media_type: Option<String>,
    /// Media location, if any
    pub media_url: Option<String>,
    /// True for photo media
    pub has_image: bool,
    /// True for document media
    pub has_document: bool,
    /// View counter, 0 when absent
    pub views: i64,
    /// Forward counter, 0 when absent
    pub forwards: i64,
    /// Reply counter, 0 when absent
    pub replies: i64,
    /// Keyword classifier result
    pub is_medical_related: bool,
    /// `views + 2 * forwards + 3 * replies`
    pub engagement_score: i64,
}

/// Join key of an image aggregate
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageKey {
    /// Message identifier
    pub message_id: i64,
    /// Channel username
    pub channel_username: String,
}

impl ImageKey {
    /// Create a key from its parts
    #[must_use]
    pub fn new(message_id: i64, channel_username: &str) -> Self {
        Self {
            message_id,
            channel_username: channel_username.to_string(),
        }
    }
}

/// A staged image with its detection summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedImage {
    /// Message the image was attached to
    pub message_id: i64,
    /// Channel of that message
    pub channel_username: String,
    /// Source URL
    pub image_url: Option<String>,
    /// Downloaded file location
    pub local_path: Option<String>,
    /// Content hash
    pub image_hash: String,
    /// Number of detections
    pub detected_objects_count: i64,
    /// Mean of present confidences, `None` when there are none
    pub avg_confidence_score: Option<f64>,
    /// Sorted distinct class labels
    pub detected_classes: Vec<String>,
    /// True if any label is a medical object class
    pub has_medical_objects: bool,
}

impl NormalizedImage {
    /// Join key of this image
    #[must_use]
    pub fn key(&self) -> ImageKey {
        ImageKey::new(self.message_id, &self.channel_username)
    }
}

macro_rules! labelled_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $label)]
                $variant,
            )+
        }

        impl $name {
            /// Label stored in the marts
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }

            /// Parse a stored label
            #[must_use]
            pub fn from_label(label: &str) -> Option<Self> {
                match label {
                    $($label => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

labelled_enum!(
    /// Three-tier label over a channel's medical percentage
    MedicalFocusLevel {
        /// At least 50%
        High => "High Medical Focus",
        /// At least 25%
        Medium => "Medium Medical Focus",
        /// Below 25%
        Low => "Low Medical Focus",
    }
);

labelled_enum!(
    /// Three-tier label over a channel's image percentage
    VisualContentLevel {
        /// At least 50%
        High => "High Visual Content",
        /// At least 25%
        Medium => "Medium Visual Content",
        /// Below 25%
        Low => "Low Visual Content",
    }
);

labelled_enum!(
    /// Meteorological season by month triplet
    Season {
        /// Dec-Feb in the north
        Winter => "Winter",
        /// Mar-May in the north
        Spring => "Spring",
        /// Jun-Aug in the north
        Summer => "Summer",
        /// Sep-Nov in the north
        Fall => "Fall",
    }
);

labelled_enum!(
    /// What a message mostly carries
    ContentCategory {
        /// Photo with a medical object detected
        MedicalImage => "Medical Image",
        /// Photo without medical objects
        NonMedicalImage => "Non-Medical Image",
        /// Document attachment
        Document => "Document",
        /// Medical keywords in the text, no media
        MedicalText => "Medical Text",
        /// Anything else
        Other => "Other",
    }
);

labelled_enum!(
    /// Engagement tier of a message
    EngagementLevel {
        /// At or above the high threshold
        High => "High Engagement",
        /// At or above the medium threshold
        Medium => "Medium Engagement",
        /// At or above the low threshold
        Low => "Low Engagement",
        /// Below every threshold
        Minimal => "Minimal Engagement",
    }
);

/// Hemisphere used for season buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hemisphere {
    /// Dec-Feb is winter
    #[default]
    Northern,
    /// Dec-Feb is summer
    Southern,
}

/// One row of the channel dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDimension {
    /// Surrogate key, 1-based in username order
    pub channel_key: i64,
    /// Natural key
    pub channel_username: String,
    /// Chosen display title
    pub channel_title: Option<String>,
    /// Message count
    pub total_messages: i64,
    /// Medical message count
    pub medical_messages: i64,
    /// Photo message count
    pub messages_with_images: i64,
    /// Document message count
    pub messages_with_documents: i64,
    /// Mean text length
    pub avg_message_length: f64,
    /// Mean engagement score
    pub avg_engagement_score: f64,
    /// Summed views
    pub total_views: i64,
    /// Summed forwards
    pub total_forwards: i64,
    /// Summed replies
    pub total_replies: i64,
    /// Earliest post
    pub first_message_date: NaiveDateTime,
    /// Latest post
    pub last_message_date: NaiveDateTime,
    /// `round(100 * medical / total, 2)`
    pub medical_content_percentage: f64,
    /// `round(100 * images / total, 2)`
    pub image_content_percentage: f64,
    /// Position by message count
    pub rank_by_messages: i64,
    /// Position by medical message count
    pub rank_by_medical_content: i64,
    /// Position by mean engagement
    pub rank_by_engagement: i64,
    /// Position by photo count
    pub rank_by_images: i64,
    /// Label over the medical percentage
    pub medical_focus_level: MedicalFocusLevel,
    /// Label over the image percentage
    pub visual_content_level: VisualContentLevel,
    /// Run stamp
    pub created_at: NaiveDateTime,
}

/// One row of the date dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateDimension {
    /// `YYYYMMDD`
    pub date_key: i32,
    /// Calendar day
    pub date_actual: NaiveDate,
    /// Calendar year
    pub year: i32,
    /// Month (1-12)
    pub month: i32,
    /// Day of month
    pub day: i32,
    /// Day of week, 0 = Sunday
    pub day_of_week: i32,
    /// Day of year (1-366)
    pub day_of_year: i32,
    /// ISO week number
    pub week_of_year: i32,
    /// Calendar quarter (1-4)
    pub quarter: i32,
    /// English month name
    pub month_name: String,
    /// English day name
    pub day_name: String,
    /// Saturday or Sunday
    pub is_weekend: bool,
    /// Season bucket
    pub season: Season,
    /// Fiscal year
    pub fiscal_year: i32,
    /// Fiscal quarter (1-4)
    pub fiscal_quarter: i32,
    /// Approximate Ethiopian calendar year
    pub ethiopian_year: i32,
    /// Messages posted that day
    pub message_count: i64,
    /// Medical messages posted that day
    pub medical_message_count: i64,
    /// Photo messages posted that day
    pub image_message_count: i64,
    /// Mean engagement that day, 0 without messages
    pub avg_engagement_score: f64,
    /// Trailing 7-day mean of `message_count`
    pub rolling_7d_avg_messages: f64,
    /// Trailing 7-day mean of `medical_message_count`
    pub rolling_7d_avg_medical_messages: f64,
    /// Trailing 30-day mean of `message_count`
    pub rolling_30d_avg_messages: f64,
    /// Run stamp
    pub created_at: NaiveDateTime,
}

/// One row of the fact table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactMessage {
    /// Scraper message identifier
    pub message_id: i64,
    /// Channel dimension reference
    pub channel_key: Option<i64>,
    /// Date dimension reference
    pub date_key: Option<i32>,
    /// Channel username
    pub channel_username: String,
    /// Title from the channel dimension
    pub channel_title: Option<String>,
    /// Message text
    pub message_text: String,
    /// Text length in characters
    pub message_length: i64,
    /// Post timestamp
    pub message_date: NaiveDateTime,
    /// Post day
    pub message_date_only: NaiveDate,
    /// Hour of day
    pub hour: i32,
    /// Media flag
    pub has_media: bool,
    /// Media kind
    pub media_type: Option<String>,
    /// Photo flag
    pub has_image: bool,
    /// Document flag
    pub has_document: bool,
    /// Keyword classifier result
    pub is_medical_related: bool,
    /// View counter
    pub views: i64,
    /// Forward counter
    pub forwards: i64,
    /// Reply counter
    pub replies: i64,
    /// Engagement score
    pub engagement_score: i64,
    /// Channel medical focus label
    pub channel_medical_focus_level: Option<MedicalFocusLevel>,
    /// Channel visual content label
    pub channel_visual_content_level: Option<VisualContentLevel>,
    /// Day name of the post
    pub day_name: Option<String>,
    /// Weekend flag of the post day
    pub is_weekend: Option<bool>,
    /// Season of the post day
    pub season: Option<Season>,
    /// Fiscal year of the post day
    pub fiscal_year: Option<i32>,
    /// Fiscal quarter of the post day
    pub fiscal_quarter: Option<i32>,
    /// Hash of the attached image
    pub image_hash: Option<String>,
    /// Detected object count
    pub detected_objects_count: Option<i64>,
    /// Mean detection confidence
    pub avg_confidence_score: Option<f64>,
    /// Distinct detected classes
    pub detected_classes: Option<Vec<String>>,
    /// Medical objects detected, false without an image
    pub has_medical_objects: bool,
    /// Derived content category
    pub content_category: ContentCategory,
    /// Derived engagement tier
    pub engagement_level: EngagementLevel,
    /// Composite quality score (0-9)
    pub content_quality_score: i32,
    /// Run stamp
    pub created_at: NaiveDateTime,
}

/// Parse a scraper timestamp into naive local time.
///
/// RFC 3339 values keep their wall-clock time and drop the offset.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, String> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.naive_local());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| format!("unrecognized timestamp '{value}'"))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => parse_timestamp(&s).map(Some).map_err(serde::de::Error::custom),
    }
}
