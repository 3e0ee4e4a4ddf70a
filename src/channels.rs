//! Channel dimension builder
//!
//! Groups normalized messages by channel, computes the per-channel rollups,
//! and assigns four independent rankings. Rankings use row-number semantics
//! over a stable sort, so ties keep the username order and every ranking is a
//! permutation of `1..=N`.

use chrono::NaiveDateTime;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::models::{ChannelDimension, MedicalFocusLevel, NormalizedMessage, VisualContentLevel};

/// Percentage at or above which a channel is labelled High
pub const HIGH_SHARE_THRESHOLD: f64 = 50.0;
/// Percentage at or above which a channel is labelled Medium
pub const MEDIUM_SHARE_THRESHOLD: f64 = 25.0;

/// `round(100 * numerator / denominator, 2)`, 0 when the denominator is 0
#[must_use]
pub fn percentage(numerator: i64, denominator: i64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    round2(100.0 * numerator as f64 / denominator as f64)
}

/// Round half away from zero to two decimals
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl MedicalFocusLevel {
    /// Label for a medical content percentage
    #[must_use]
    pub fn from_percentage(pct: f64) -> Self {
        if pct >= HIGH_SHARE_THRESHOLD {
            Self::High
        } else if pct >= MEDIUM_SHARE_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl VisualContentLevel {
    /// Label for an image content percentage
    #[must_use]
    pub fn from_percentage(pct: f64) -> Self {
        if pct >= HIGH_SHARE_THRESHOLD {
            Self::High
        } else if pct >= MEDIUM_SHARE_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Default)]
struct ChannelAccumulator<'a> {
    total: i64,
    medical: i64,
    images: i64,
    documents: i64,
    length_sum: i64,
    engagement_sum: i128,
    views: i64,
    forwards: i64,
    replies: i64,
    first: Option<NaiveDateTime>,
    last: Option<NaiveDateTime>,
    titles: HashMap<&'a str, usize>,
}

impl<'a> ChannelAccumulator<'a> {
    fn add(&mut self, message: &'a NormalizedMessage) {
        self.total += 1;
        self.medical += i64::from(message.is_medical_related);
        self.images += i64::from(message.has_image);
        self.documents += i64::from(message.has_document);
        self.length_sum += message.message_length;
        self.engagement_sum += i128::from(message.engagement_score);
        // Totals saturate at i64::MAX
        self.views = self.views.saturating_add(message.views);
        self.forwards = self.forwards.saturating_add(message.forwards);
        self.replies = self.replies.saturating_add(message.replies);
        self.first = Some(self.first.map_or(message.message_date, |d| d.min(message.message_date)));
        self.last = Some(self.last.map_or(message.message_date, |d| d.max(message.message_date)));
        if let Some(title) = message.channel_title.as_deref().filter(|t| !t.is_empty()) {
            *self.titles.entry(title).or_default() += 1;
        }
    }

    /// Most frequent title, ties go to the smallest title
    fn title(&self) -> Option<String> {
        self.titles
            .iter()
            .max_by(|(a_title, a_count), (b_title, b_count)| a_count.cmp(b_count).then_with(|| b_title.cmp(a_title)))
            .map(|(title, _)| (*title).to_string())
    }
}

/// Build the channel dimension, one row per distinct username in username order
#[must_use]
pub fn build_channel_dimension(messages: &[NormalizedMessage], created_at: NaiveDateTime) -> Vec<ChannelDimension> {
    let mut groups: BTreeMap<&str, ChannelAccumulator<'_>> = BTreeMap::new();
    for message in messages {
        groups.entry(message.channel_username.as_str()).or_default().add(message);
    }

    let mut rows: Vec<ChannelDimension> = groups
        .into_iter()
        .enumerate()
        .filter_map(|(index, (username, acc))| {
            // Every group holds at least one message, so both dates are set
            let (first, last) = (acc.first?, acc.last?);
            let total = acc.total;
            let medical_pct = percentage(acc.medical, total);
            let image_pct = percentage(acc.images, total);
            Some(ChannelDimension {
                channel_key: index as i64 + 1,
                channel_username: username.to_string(),
                channel_title: acc.title(),
                total_messages: total,
                medical_messages: acc.medical,
                messages_with_images: acc.images,
                messages_with_documents: acc.documents,
                avg_message_length: mean(i128::from(acc.length_sum), total),
                avg_engagement_score: mean(acc.engagement_sum, total),
                total_views: acc.views,
                total_forwards: acc.forwards,
                total_replies: acc.replies,
                first_message_date: first,
                last_message_date: last,
                medical_content_percentage: medical_pct,
                image_content_percentage: image_pct,
                rank_by_messages: 0,
                rank_by_medical_content: 0,
                rank_by_engagement: 0,
                rank_by_images: 0,
                medical_focus_level: MedicalFocusLevel::from_percentage(medical_pct),
                visual_content_level: VisualContentLevel::from_percentage(image_pct),
                created_at,
            })
        })
        .collect();

    for (position, rank) in descending_ranks(&rows, |a, b| a.total_messages.cmp(&b.total_messages))
        .into_iter()
        .enumerate()
    {
        rows[position].rank_by_messages = rank;
    }
    for (position, rank) in descending_ranks(&rows, |a, b| a.medical_messages.cmp(&b.medical_messages))
        .into_iter()
        .enumerate()
    {
        rows[position].rank_by_medical_content = rank;
    }
    for (position, rank) in descending_ranks(&rows, |a, b| a.avg_engagement_score.total_cmp(&b.avg_engagement_score))
        .into_iter()
        .enumerate()
    {
        rows[position].rank_by_engagement = rank;
    }
    for (position, rank) in descending_ranks(&rows, |a, b| a.messages_with_images.cmp(&b.messages_with_images))
        .into_iter()
        .enumerate()
    {
        rows[position].rank_by_images = rank;
    }

    debug!(channels = rows.len(), "Channel dimension built");
    rows
}

/// Row-number ranks by a descending metric.
///
/// Returns one rank per input row, in input order. Ties keep input order.
pub fn descending_ranks<T, F>(rows: &[T], compare: F) -> Vec<i64>
where
    F: Fn(&T, &T) -> Ordering,
{
    let mut order: Vec<usize> = (0..rows.len()).collect();
    // sort_by is stable
    order.sort_by(|&a, &b| compare(&rows[b], &rows[a]));

    let mut ranks = vec![0; rows.len()];
    for (rank, index) in order.into_iter().enumerate() {
        ranks[index] = rank as i64 + 1;
    }
    ranks
}

fn mean(sum: i128, count: i64) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}
