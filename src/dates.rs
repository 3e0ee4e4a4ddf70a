//! Date dimension builder
//!
//! Generates one row per calendar day over an inclusive range, joins in the
//! per-day message aggregates and computes trailing rolling averages over the
//! date-ordered spine.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::models::{DateDimension, Hemisphere, NormalizedMessage, Season};

/// Window of the short rolling averages, in days
pub const SHORT_WINDOW_DAYS: usize = 7;
/// Window of the long rolling average, in days
pub const LONG_WINDOW_DAYS: usize = 30;

/// Inclusive calendar range of the date dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// First day
    pub start: NaiveDate,
    /// Last day
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a range, rejecting a start after its end
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(PipelineError::RangeMisconfiguration {
                start,
                end,
                observed_min: start,
                observed_max: end,
            });
        }
        Ok(Self { start, end })
    }

    /// True if the day lies inside the range
    #[must_use]
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Number of days in the range
    #[must_use]
    pub fn len_days(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    /// Fail unless every message day lies inside the range
    pub fn check_coverage(&self, messages: &[NormalizedMessage]) -> Result<()> {
        let observed_min = messages.iter().map(|m| m.message_date_only).min();
        let observed_max = messages.iter().map(|m| m.message_date_only).max();
        match (observed_min, observed_max) {
            (Some(min), Some(max)) if !self.contains(min) || !self.contains(max) => {
                Err(PipelineError::RangeMisconfiguration {
                    start: self.start,
                    end: self.end,
                    observed_min: min,
                    observed_max: max,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Locale conventions for seasons and the fiscal year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarConventions {
    /// Month (1-12) the fiscal year starts in
    pub fiscal_year_start_month: u32,
    /// Hemisphere for season buckets
    pub hemisphere: Hemisphere,
}

impl Default for CalendarConventions {
    fn default() -> Self {
        Self {
            fiscal_year_start_month: 7,
            hemisphere: Hemisphere::Northern,
        }
    }
}

impl CalendarConventions {
    /// Reject a fiscal start month outside 1-12
    pub fn validate(&self) -> Result<()> {
        if !(1..=12).contains(&self.fiscal_year_start_month) {
            return Err(PipelineError::InvalidConfig(format!(
                "fiscal_year_start_month must be 1-12, got {}",
                self.fiscal_year_start_month
            )));
        }
        Ok(())
    }

    /// Fiscal year of a calendar month.
    ///
    /// Months from the start month onwards belong to the next fiscal year,
    /// unless the fiscal year is the calendar year.
    #[must_use]
    pub fn fiscal_year(&self, year: i32, month: u32) -> i32 {
        if self.fiscal_year_start_month > 1 && month >= self.fiscal_year_start_month {
            year + 1
        } else {
            year
        }
    }

    /// Fiscal quarter (1-4) of a calendar month
    #[must_use]
    pub fn fiscal_quarter(&self, month: u32) -> i32 {
        (((month + 12 - self.fiscal_year_start_month) % 12) / 3 + 1) as i32
    }

    /// Season of a calendar month
    #[must_use]
    pub fn season(&self, month: u32) -> Season {
        let northern = match month {
            12 | 1 | 2 => Season::Winter,
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            _ => Season::Fall,
        };
        match self.hemisphere {
            Hemisphere::Northern => northern,
            Hemisphere::Southern => match northern {
                Season::Winter => Season::Summer,
                Season::Spring => Season::Fall,
                Season::Summer => Season::Winter,
                Season::Fall => Season::Spring,
            },
        }
    }
}

/// `YYYYMMDD` key of a day
#[must_use]
pub fn date_key(day: NaiveDate) -> i32 {
    day.year() * 10_000 + day.month() as i32 * 100 + day.day() as i32
}

/// Approximate Ethiopian calendar year, new year taken as September 11
#[must_use]
pub fn ethiopian_year(day: NaiveDate) -> i32 {
    if (day.month(), day.day()) >= (9, 11) {
        day.year() - 7
    } else {
        day.year() - 8
    }
}

#[derive(Default, Clone, Copy)]
struct DayAggregate {
    messages: i64,
    medical: i64,
    images: i64,
    engagement_sum: i128,
}

/// Build the date dimension for `range`.
///
/// Messages outside the range do not join to any row; callers check coverage
/// with [`DateRange::check_coverage`] first.
#[must_use]
pub fn build_date_dimension(
    range: DateRange,
    conventions: &CalendarConventions,
    messages: &[NormalizedMessage],
    created_at: NaiveDateTime,
) -> Vec<DateDimension> {
    let mut per_day: HashMap<NaiveDate, DayAggregate> = HashMap::new();
    for message in messages {
        let day = per_day.entry(message.message_date_only).or_default();
        day.messages += 1;
        day.medical += i64::from(message.is_medical_related);
        day.images += i64::from(message.has_image);
        day.engagement_sum += i128::from(message.engagement_score);
    }

    let spine: Vec<NaiveDate> = range.start.iter_days().take(range.len_days()).collect();
    let aggregates: Vec<DayAggregate> = spine
        .iter()
        .map(|day| per_day.get(day).copied().unwrap_or_default())
        .collect();

    let counts: Vec<i64> = aggregates.iter().map(|a| a.messages).collect();
    let medical_counts: Vec<i64> = aggregates.iter().map(|a| a.medical).collect();
    let rolling_7d = trailing_means(&counts, SHORT_WINDOW_DAYS);
    let rolling_7d_medical = trailing_means(&medical_counts, SHORT_WINDOW_DAYS);
    let rolling_30d = trailing_means(&counts, LONG_WINDOW_DAYS);

    let rows: Vec<DateDimension> = spine
        .iter()
        .zip(aggregates)
        .enumerate()
        .map(|(i, (&day, agg))| {
            let month = day.month();
            DateDimension {
                date_key: date_key(day),
                date_actual: day,
                year: day.year(),
                month: month as i32,
                day: day.day() as i32,
                day_of_week: day.weekday().num_days_from_sunday() as i32,
                day_of_year: day.ordinal() as i32,
                week_of_year: day.iso_week().week() as i32,
                quarter: ((month - 1) / 3 + 1) as i32,
                month_name: day.format("%B").to_string(),
                day_name: day.format("%A").to_string(),
                is_weekend: day.weekday().num_days_from_monday() >= 5,
                season: conventions.season(month),
                fiscal_year: conventions.fiscal_year(day.year(), month),
                fiscal_quarter: conventions.fiscal_quarter(month),
                ethiopian_year: ethiopian_year(day),
                message_count: agg.messages,
                medical_message_count: agg.medical,
                image_message_count: agg.images,
                avg_engagement_score: if agg.messages == 0 {
                    0.0
                } else {
                    agg.engagement_sum as f64 / agg.messages as f64
                },
                rolling_7d_avg_messages: rolling_7d[i],
                rolling_7d_avg_medical_messages: rolling_7d_medical[i],
                rolling_30d_avg_messages: rolling_30d[i],
                created_at,
            }
        })
        .collect();

    debug!(days = rows.len(), start = %range.start, end = %range.end, "Date dimension built");
    rows
}

/// Trailing mean over `window` values ending at each index.
///
/// Near the start the window is truncated to the values available.
#[must_use]
pub fn trailing_means(values: &[i64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut prefix = Vec::with_capacity(values.len() + 1);
    prefix.push(0i64);
    for value in values {
        prefix.push(prefix[prefix.len() - 1] + value);
    }
    (0..values.len())
        .map(|i| {
            let from = (i + 1).saturating_sub(window);
            let len = i + 1 - from;
            (prefix[i + 1] - prefix[from]) as f64 / len as f64
        })
        .collect()
}
