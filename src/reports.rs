//! Read-side reports over the published marts.
//!
//! Every report is a pure function of fact or channel rows so it can run on
//! freshly transformed marts as well as on rows read back from the store.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::channels::{percentage, round2};
use crate::classification::KeywordClassifier;
use crate::models::{ChannelDimension, FactMessage};

/// Most detected classes listed per channel in the image report
pub const MAX_LISTED_CLASSES: usize = 10;

/// Sort key of the channel listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ChannelSort {
    #[default]
    #[value(name = "total_messages")]
    TotalMessages,
    #[value(name = "medical_messages")]
    MedicalMessages,
    #[value(name = "avg_engagement_score")]
    AvgEngagement,
    #[value(name = "medical_percentage")]
    MedicalPercentage,
    #[value(name = "image_percentage")]
    ImagePercentage,
}

impl ChannelSort {
    /// Column of `dim_channels` this key sorts on
    pub const fn column(self) -> &'static str {
        match self {
            Self::TotalMessages => "total_messages",
            Self::MedicalMessages => "medical_messages",
            Self::AvgEngagement => "avg_engagement_score",
            Self::MedicalPercentage => "medical_content_percentage",
            Self::ImagePercentage => "image_content_percentage",
        }
    }

    fn value(self, channel: &ChannelDimension) -> f64 {
        match self {
            Self::TotalMessages => channel.total_messages as f64,
            Self::MedicalMessages => channel.medical_messages as f64,
            Self::AvgEngagement => channel.avg_engagement_score,
            Self::MedicalPercentage => channel.medical_content_percentage,
            Self::ImagePercentage => channel.image_content_percentage,
        }
    }
}

/// Bucket size of the trend report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Daily,
    /// ISO weeks, starting Monday
    Weekly,
    Monthly,
}

impl Granularity {
    /// First day of the bucket holding `day`
    pub fn bucket_start(self, day: NaiveDate) -> NaiveDate {
        match self {
            Self::Daily => day,
            Self::Weekly => day - Duration::days(i64::from(day.weekday().num_days_from_monday())),
            Self::Monthly => day.with_day(1).unwrap_or(day),
        }
    }
}

/// Platform-wide totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_channels: usize,
    pub total_messages: i64,
    pub medical_messages: i64,
    pub messages_with_images: i64,
    pub messages_with_medical_objects: i64,
    pub avg_engagement_score: f64,
    pub earliest_message: Option<NaiveDateTime>,
    pub latest_message: Option<NaiveDateTime>,
    pub medical_content_percentage: f64,
    pub image_content_percentage: f64,
}

/// Whole-word mentions of one product keyword
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductMention {
    pub product_name: String,
    pub mention_count: usize,
    pub channels_mentioned: usize,
    pub avg_engagement: f64,
    pub first_mention_date: NaiveDateTime,
    pub last_mention_date: NaiveDateTime,
}

/// Message counts of one trend bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub period_start: NaiveDate,
    pub message_count: i64,
    pub medical_message_count: i64,
    pub image_message_count: i64,
    pub avg_engagement_score: f64,
}

/// Detection summary of one channel's images
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAnalysis {
    pub channel_username: String,
    pub total_images: i64,
    pub medical_images: i64,
    pub medical_percentage: f64,
    pub avg_objects_detected: f64,
    pub avg_confidence_score: f64,
    pub top_detected_classes: Vec<String>,
}

/// Totals over every fact row
pub fn summary(facts: &[FactMessage]) -> Summary {
    let total = facts.len() as i64;
    let medical = facts.iter().filter(|f| f.is_medical_related).count() as i64;
    let images = facts.iter().filter(|f| f.has_image).count() as i64;
    let channels: BTreeSet<&str> = facts.iter().map(|f| f.channel_username.as_str()).collect();
    let engagement: i128 = facts.iter().map(|f| i128::from(f.engagement_score)).sum();

    Summary {
        total_channels: channels.len(),
        total_messages: total,
        medical_messages: medical,
        messages_with_images: images,
        messages_with_medical_objects: facts.iter().filter(|f| f.has_medical_objects).count() as i64,
        avg_engagement_score: if total == 0 { 0.0 } else { engagement as f64 / total as f64 },
        earliest_message: facts.iter().map(|f| f.message_date).min(),
        latest_message: facts.iter().map(|f| f.message_date).max(),
        medical_content_percentage: percentage(medical, total),
        image_content_percentage: percentage(images, total),
    }
}

/// Product keyword mentions over medical messages, most mentioned first
pub fn product_mentions(
    facts: &[FactMessage],
    classifier: &KeywordClassifier,
    min_mentions: usize,
    limit: usize,
) -> Vec<ProductMention> {
    struct Acc<'a> {
        count: usize,
        channels: BTreeSet<&'a str>,
        engagement: i128,
        first: NaiveDateTime,
        last: NaiveDateTime,
    }

    let mut by_product: BTreeMap<String, Acc<'_>> = BTreeMap::new();
    for fact in facts.iter().filter(|f| f.is_medical_related) {
        for product in classifier.product_mentions(&fact.message_text) {
            let acc = by_product.entry(product).or_insert_with(|| Acc {
                count: 0,
                channels: BTreeSet::new(),
                engagement: 0,
                first: fact.message_date,
                last: fact.message_date,
            });
            acc.count += 1;
            acc.channels.insert(fact.channel_username.as_str());
            acc.engagement += i128::from(fact.engagement_score);
            acc.first = acc.first.min(fact.message_date);
            acc.last = acc.last.max(fact.message_date);
        }
    }

    let mut mentions: Vec<ProductMention> = by_product
        .into_iter()
        .filter(|(_, acc)| acc.count >= min_mentions)
        .map(|(product_name, acc)| ProductMention {
            product_name,
            mention_count: acc.count,
            channels_mentioned: acc.channels.len(),
            avg_engagement: acc.engagement as f64 / acc.count as f64,
            first_mention_date: acc.first,
            last_mention_date: acc.last,
        })
        .collect();
    // Product order from the map breaks ties
    mentions.sort_by(|a, b| b.mention_count.cmp(&a.mention_count));
    mentions.truncate(limit);
    mentions
}

/// Message counts per bucket for days on or after `since`, oldest first
pub fn trends(facts: &[FactMessage], granularity: Granularity, since: NaiveDate) -> Vec<TrendPoint> {
    let mut buckets: BTreeMap<NaiveDate, (i64, i64, i64, i128)> = BTreeMap::new();
    for fact in facts.iter().filter(|f| f.message_date_only >= since) {
        let bucket = buckets.entry(granularity.bucket_start(fact.message_date_only)).or_default();
        bucket.0 += 1;
        bucket.1 += i64::from(fact.is_medical_related);
        bucket.2 += i64::from(fact.has_image);
        bucket.3 += i128::from(fact.engagement_score);
    }

    buckets
        .into_iter()
        .map(|(period_start, (count, medical, images, engagement))| TrendPoint {
            period_start,
            message_count: count,
            medical_message_count: medical,
            image_message_count: images,
            avg_engagement_score: engagement as f64 / count as f64,
        })
        .collect()
}

/// Detection summary per channel over image messages with detections, most images first
pub fn image_analysis(facts: &[FactMessage], limit: usize) -> Vec<ImageAnalysis> {
    #[derive(Default)]
    struct Acc<'a> {
        images: i64,
        medical: i64,
        objects: i64,
        confidence_sum: f64,
        confidence_count: usize,
        classes: BTreeSet<&'a str>,
    }

    let mut by_channel: HashMap<&str, Acc<'_>> = HashMap::new();
    for fact in facts.iter().filter(|f| f.has_image) {
        let Some(objects) = fact.detected_objects_count else {
            continue;
        };
        let acc = by_channel.entry(fact.channel_username.as_str()).or_default();
        acc.images += 1;
        acc.medical += i64::from(fact.has_medical_objects);
        acc.objects += objects;
        if let Some(confidence) = fact.avg_confidence_score {
            acc.confidence_sum += confidence;
            acc.confidence_count += 1;
        }
        acc.classes
            .extend(fact.detected_classes.iter().flatten().map(String::as_str));
    }

    let mut rows: Vec<ImageAnalysis> = by_channel
        .into_iter()
        .map(|(channel, acc)| ImageAnalysis {
            channel_username: channel.to_string(),
            total_images: acc.images,
            medical_images: acc.medical,
            medical_percentage: percentage(acc.medical, acc.images),
            avg_objects_detected: round2(acc.objects as f64 / acc.images as f64),
            avg_confidence_score: if acc.confidence_count == 0 {
                0.0
            } else {
                acc.confidence_sum / acc.confidence_count as f64
            },
            top_detected_classes: acc
                .classes
                .into_iter()
                .take(MAX_LISTED_CLASSES)
                .map(ToString::to_string)
                .collect(),
        })
        .collect();
    rows.sort_by(|a, b| {
        b.total_images
            .cmp(&a.total_images)
            .then_with(|| a.channel_username.cmp(&b.channel_username))
    });
    rows.truncate(limit);
    rows
}

/// Channels ordered by `sort` descending, ties by username
pub fn top_channels(channels: &[ChannelDimension], sort: ChannelSort, limit: usize) -> Vec<ChannelDimension> {
    let mut rows = channels.to_vec();
    rows.sort_by(|a, b| {
        sort.value(b)
            .total_cmp(&sort.value(a))
            .then_with(|| a.channel_username.cmp(&b.channel_username))
    });
    rows.truncate(limit);
    rows
}
