//! Fact assembler
//!
//! Left-joins every normalized message to its channel row, its date row and
//! at most one image aggregate, then derives the categorical fields and the
//! quality score.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, error};

use crate::dates::date_key;
use crate::error::{PipelineError, Result};
use crate::images::ImageAggregation;
use crate::models::{
    ChannelDimension, ContentCategory, DateDimension, EngagementLevel, FactMessage, NormalizedMessage,
};

/// Score cut-offs for the engagement tiers, each inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementThresholds {
    /// Lowest High score
    pub high: i64,
    /// Lowest Medium score
    pub medium: i64,
    /// Lowest Low score
    pub low: i64,
}

impl Default for EngagementThresholds {
    fn default() -> Self {
        Self {
            high: 1000,
            medium: 100,
            low: 10,
        }
    }
}

impl EngagementThresholds {
    /// Reject thresholds that are not strictly descending
    pub fn validate(&self) -> Result<()> {
        if self.low < 0 || !(self.high > self.medium && self.medium > self.low) {
            return Err(PipelineError::InvalidConfig(format!(
                "engagement thresholds must satisfy high > medium > low >= 0, got {}/{}/{}",
                self.high, self.medium, self.low
            )));
        }
        Ok(())
    }

    /// Tier of an engagement score
    #[must_use]
    pub const fn level(&self, score: i64) -> EngagementLevel {
        if score >= self.high {
            EngagementLevel::High
        } else if score >= self.medium {
            EngagementLevel::Medium
        } else if score >= self.low {
            EngagementLevel::Low
        } else {
            EngagementLevel::Minimal
        }
    }
}

/// Content category by priority: medical image, image, document, medical text
#[must_use]
pub const fn content_category(
    has_image: bool,
    has_medical_objects: bool,
    has_document: bool,
    is_medical_related: bool,
) -> ContentCategory {
    if has_image && has_medical_objects {
        ContentCategory::MedicalImage
    } else if has_image {
        ContentCategory::NonMedicalImage
    } else if has_document {
        ContentCategory::Document
    } else if is_medical_related {
        ContentCategory::MedicalText
    } else {
        ContentCategory::Other
    }
}

/// Weighted sum of five indicators, 0 to 9
#[must_use]
pub fn content_quality_score(message: &NormalizedMessage, has_medical_objects: bool) -> i32 {
    let mut score = 0;
    if !message.message_text.is_empty() {
        score += 1;
    }
    if message.has_media {
        score += 2;
    }
    if message.is_medical_related {
        score += 3;
    }
    if has_medical_objects {
        score += 2;
    }
    if message.engagement_score > 0 {
        score += 1;
    }
    score
}

/// Join and derive one fact row per message.
///
/// Fails with [`PipelineError::JoinIntegrityViolation`] if the output row
/// count differs from the message count.
pub fn assemble_facts(
    messages: &[NormalizedMessage],
    channels: &[ChannelDimension],
    dates: &[DateDimension],
    images: &ImageAggregation,
    thresholds: &EngagementThresholds,
    created_at: NaiveDateTime,
) -> Result<Vec<FactMessage>> {
    let channel_by_name: HashMap<&str, &ChannelDimension> =
        channels.iter().map(|c| (c.channel_username.as_str(), c)).collect();
    let date_by_key: HashMap<i32, &DateDimension> = dates.iter().map(|d| (d.date_key, d)).collect();

    let mut facts: Vec<FactMessage> = messages
        .iter()
        .map(|message| {
            let channel = channel_by_name.get(message.channel_username.as_str()).copied();
            let date = date_by_key.get(&date_key(message.message_date_only)).copied();
            let image = images.get(message.message_id, &message.channel_username);
            let has_medical_objects = image.is_some_and(|i| i.has_medical_objects);

            FactMessage {
                message_id: message.message_id,
                channel_key: channel.map(|c| c.channel_key),
                date_key: date.map(|d| d.date_key),
                channel_username: message.channel_username.clone(),
                channel_title: channel.and_then(|c| c.channel_title.clone()),
                message_text: message.message_text.clone(),
                message_length: message.message_length,
                message_date: message.message_date,
                message_date_only: message.message_date_only,
                hour: message.hour,
                has_media: message.has_media,
                media_type: message.media_type.clone(),
                has_image: message.has_image,
                has_document: message.has_document,
                is_medical_related: message.is_medical_related,
                views: message.views,
                forwards: message.forwards,
                replies: message.replies,
                engagement_score: message.engagement_score,
                channel_medical_focus_level: channel.map(|c| c.medical_focus_level),
                channel_visual_content_level: channel.map(|c| c.visual_content_level),
                day_name: date.map(|d| d.day_name.clone()),
                is_weekend: date.map(|d| d.is_weekend),
                season: date.map(|d| d.season),
                fiscal_year: date.map(|d| d.fiscal_year),
                fiscal_quarter: date.map(|d| d.fiscal_quarter),
                image_hash: image.map(|i| i.image_hash.clone()),
                detected_objects_count: image.map(|i| i.detected_objects_count),
                avg_confidence_score: image.and_then(|i| i.avg_confidence_score),
                detected_classes: image.map(|i| i.detected_classes.clone()),
                has_medical_objects,
                content_category: content_category(
                    message.has_image,
                    has_medical_objects,
                    message.has_document,
                    message.is_medical_related,
                ),
                engagement_level: thresholds.level(message.engagement_score),
                content_quality_score: content_quality_score(message, has_medical_objects),
                created_at,
            }
        })
        .collect();

    facts.sort_by(|a, b| {
        (a.message_date, &a.channel_username, a.message_id).cmp(&(b.message_date, &b.channel_username, b.message_id))
    });

    check_row_count(facts.len(), messages.len())?;
    debug!(facts = facts.len(), "Fact table assembled");
    Ok(facts)
}

/// Fail unless the fact table has exactly one row per message
pub fn check_row_count(fact_rows: usize, message_rows: usize) -> Result<()> {
    if fact_rows != message_rows {
        error!(fact_rows, message_rows, "Fact row count does not match staged messages");
        return Err(PipelineError::JoinIntegrityViolation {
            fact_rows,
            message_rows,
        });
    }
    Ok(())
}
