use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, Connection, Row};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{Result, SchemaViolation};
use crate::images::ImageAggregation;
use crate::metrics::MetricsCollector;
use crate::models::{
    ChannelDimension, ContentCategory, DateDimension, Detection, EngagementLevel, FactMessage, MedicalFocusLevel,
    NormalizedImage, RawImage, RawMessage, Season, VisualContentLevel, parse_timestamp,
};
use crate::pipeline::MartSet;
use crate::reports::ChannelSort;
use crate::repository::{MartSink, PublishSummary, RawBatch, RawRecordSource};
use crate::schema::{marts, raw_images, raw_messages, schema_migrations, table};

/// Embedded migrations, applied in order and recorded in `schema_migrations`
const MIGRATIONS: [(&str, &str); 2] = [
    (
        "0001_create_raw_tables",
        include_str!("../migrations/0001_create_raw_tables/up.sql"),
    ),
    (
        "0002_create_marts",
        include_str!("../migrations/0002_create_marts/up.sql"),
    ),
];

// Type alias for the database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Rows written by a raw ingestion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// New rows
    pub inserted: usize,
    /// Rows whose key was already stored
    pub duplicates: usize,
    /// Records that cannot be stored without a channel
    pub skipped: usize,
}

/// Database manager for the raw tables and the published marts
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    metrics: MetricsCollector,
}

impl Database {
    /// Create a new database connection pool with default settings
    pub fn new(database_url: &str) -> Result<Self> {
        Self::with_pool_size(database_url, 10, Duration::from_secs(30))
    }

    /// Create a new database connection pool and run migrations
    pub fn with_pool_size(database_url: &str, max_connections: u32, timeout: Duration) -> Result<Self> {
        let path = database_path(database_url);
        let in_memory = path == ":memory:";

        // Create parent directory if it doesn't exist
        if !in_memory {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        }

        // Every in-memory connection is its own database
        let max_size = if in_memory { 1 } else { max_connections.max(1) };
        let pool = Pool::builder()
            .max_size(max_size)
            .connection_timeout(timeout)
            .build(SqliteConnectionManager::file(path).with_init(move |c| c.busy_timeout(timeout)))?;

        let mut conn = pool.get()?;
        Self::run_migrations(&mut conn)?;
        info!(path, max_size, "Database ready");

        Ok(Self {
            pool,
            metrics: MetricsCollector::default(),
        })
    }

    fn run_migrations(conn: &mut Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({} TEXT PRIMARY KEY, {} TIMESTAMP NOT NULL)",
            schema_migrations::TABLE,
            schema_migrations::VERSION,
            schema_migrations::APPLIED_AT
        ))?;

        for (version, sql) in MIGRATIONS {
            let applied: bool = conn.query_row(
                &format!(
                    "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1)",
                    schema_migrations::TABLE,
                    schema_migrations::VERSION
                ),
                params![version],
                |row| row.get(0),
            )?;
            if applied {
                continue;
            }

            let tx = conn.transaction()?;
            tx.execute_batch(sql)?;
            tx.execute(
                &format!(
                    "INSERT INTO {} ({}, {}) VALUES (?1, ?2)",
                    schema_migrations::TABLE,
                    schema_migrations::VERSION,
                    schema_migrations::APPLIED_AT
                ),
                params![version, Utc::now().naive_utc()],
            )?;
            tx.commit()?;
            info!(version, "Applied migration");
        }
        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Insert raw messages, keeping the first copy of each `(message_id, channel_username)`
    pub fn insert_raw_messages(&self, messages: &[RawMessage]) -> Result<IngestSummary> {
        let start = Instant::now();
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        let mut summary = IngestSummary::default();
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
                 ON CONFLICT({}, {}) DO NOTHING",
                raw_messages::TABLE,
                raw_messages::MESSAGE_ID,
                raw_messages::CHANNEL_USERNAME,
                raw_messages::CHANNEL_TITLE,
                raw_messages::MESSAGE_TEXT,
                raw_messages::MESSAGE_DATE,
                raw_messages::HAS_MEDIA,
                raw_messages::MEDIA_TYPE,
                raw_messages::MEDIA_URL,
                raw_messages::VIEWS,
                raw_messages::FORWARDS,
                raw_messages::REPLIES,
                raw_messages::RAW_DATA,
                raw_messages::MESSAGE_ID,
                raw_messages::CHANNEL_USERNAME,
            ))?;

            for message in messages {
                let Some(channel) = message.channel_username.as_deref().filter(|c| !c.trim().is_empty()) else {
                    warn!(message_id = message.message_id, "Skipping raw message without channel");
                    summary.skipped += 1;
                    continue;
                };
                let raw_data = message.raw_payload.as_ref().map(serde_json::to_string).transpose()?;
                let changed = stmt.execute(params![
                    message.message_id,
                    channel.trim(),
                    message.channel_title,
                    message.message_text,
                    message.message_date,
                    message.has_media,
                    message.media_type,
                    message.media_url,
                    message.views,
                    message.forwards,
                    message.replies,
                    raw_data,
                ])?;
                if changed == 0 {
                    summary.duplicates += 1;
                } else {
                    summary.inserted += 1;
                }
            }
        }
        tx.commit()?;

        self.metrics.record_db_operation("insert_raw_messages", start.elapsed(), true);
        self.metrics.record_ingest(table::RAW_MESSAGES, summary.inserted);
        info!(
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            skipped = summary.skipped,
            "Raw messages stored"
        );
        Ok(summary)
    }

    /// Insert raw images, keeping the first copy of each `(message_id, channel_username, image_hash)`.
    ///
    /// Images without a channel or a hash are skipped.
    pub fn insert_raw_images(&self, images: &[RawImage]) -> Result<IngestSummary> {
        let start = Instant::now();
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        let mut summary = IngestSummary::default();
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}) VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT({}, {}, {}) DO NOTHING",
                raw_images::TABLE,
                raw_images::MESSAGE_ID,
                raw_images::CHANNEL_USERNAME,
                raw_images::IMAGE_URL,
                raw_images::LOCAL_PATH,
                raw_images::IMAGE_HASH,
                raw_images::DETECTIONS,
                raw_images::MESSAGE_ID,
                raw_images::CHANNEL_USERNAME,
                raw_images::IMAGE_HASH,
            ))?;

            for image in images {
                let Some(channel) = image.channel_username.as_deref().filter(|c| !c.trim().is_empty()) else {
                    warn!(message_id = image.message_id, "Skipping raw image without channel");
                    summary.skipped += 1;
                    continue;
                };
                // The raw key cannot detect repeats without a hash
                if image.image_hash.as_deref().map(str::trim).filter(|h| !h.is_empty()).is_none() {
                    warn!(message_id = image.message_id, channel, "Skipping raw image without hash");
                    summary.skipped += 1;
                    continue;
                }
                let detections = image.detections.as_ref().map(serde_json::to_string).transpose()?;
                let changed = stmt.execute(params![
                    image.message_id,
                    channel.trim(),
                    image.image_url,
                    image.local_path,
                    image.image_hash,
                    detections,
                ])?;
                if changed == 0 {
                    summary.duplicates += 1;
                } else {
                    summary.inserted += 1;
                }
            }
        }
        tx.commit()?;

        self.metrics.record_db_operation("insert_raw_images", start.elapsed(), true);
        self.metrics.record_ingest(table::RAW_IMAGES, summary.inserted);
        info!(
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            skipped = summary.skipped,
            "Raw images stored"
        );
        Ok(summary)
    }

    /// Read every raw message; rows with an unreadable date or payload become violations
    pub fn load_raw_messages(&self) -> Result<RawBatch<RawMessage>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {} FROM {} ORDER BY id",
            raw_messages::MESSAGE_ID,
            raw_messages::CHANNEL_USERNAME,
            raw_messages::CHANNEL_TITLE,
            raw_messages::MESSAGE_TEXT,
            raw_messages::MESSAGE_DATE,
            raw_messages::HAS_MEDIA,
            raw_messages::MEDIA_TYPE,
            raw_messages::MEDIA_URL,
            raw_messages::VIEWS,
            raw_messages::FORWARDS,
            raw_messages::REPLIES,
            raw_messages::RAW_DATA,
            raw_messages::TABLE,
        ))?;

        let rows = stmt.query_map([], |row| {
            Ok(RawMessageRow {
                message: RawMessage {
                    message_id: row.get(0)?,
                    channel_username: row.get(1)?,
                    channel_title: row.get(2)?,
                    message_text: row.get(3)?,
                    message_date: None,
                    has_media: row.get(5)?,
                    media_type: row.get(6)?,
                    media_url: row.get(7)?,
                    views: row.get(8)?,
                    forwards: row.get(9)?,
                    replies: row.get(10)?,
                    raw_payload: None,
                },
                message_date: row.get(4)?,
                raw_data: row.get(11)?,
            })
        })?;

        let mut batch = RawBatch::default();
        for row in rows {
            match row?.decode() {
                Ok(message) => batch.records.push(message),
                Err(violation) => {
                    warn!(record = %violation.record, reason = %violation.reason, "Undecodable raw message");
                    batch.violations.push(violation);
                }
            }
        }
        debug!(records = batch.records.len(), violations = batch.violations.len(), "Raw messages loaded");
        Ok(batch)
    }

    /// Read every raw image; rows whose detections are not a list become violations
    pub fn load_raw_images(&self) -> Result<RawBatch<RawImage>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, {}, {}, {}, {}, {} FROM {} ORDER BY id",
            raw_images::MESSAGE_ID,
            raw_images::CHANNEL_USERNAME,
            raw_images::IMAGE_URL,
            raw_images::LOCAL_PATH,
            raw_images::IMAGE_HASH,
            raw_images::DETECTIONS,
            raw_images::TABLE,
        ))?;

        let rows = stmt.query_map([], |row| {
            Ok((
                RawImage {
                    message_id: row.get(0)?,
                    channel_username: row.get(1)?,
                    image_url: row.get(2)?,
                    local_path: row.get(3)?,
                    image_hash: row.get(4)?,
                    detections: None,
                },
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut batch = RawBatch::default();
        for row in rows {
            let (mut image, detections) = row?;
            match detections.as_deref().map(serde_json::from_str::<Vec<Detection>>).transpose() {
                Ok(detections) => {
                    image.detections = detections;
                    batch.records.push(image);
                }
                Err(e) => {
                    let violation = SchemaViolation::new(
                        table::RAW_IMAGES,
                        format!("{}/{}", image.channel_username.unwrap_or_default(), image.message_id),
                        format!("object_detection_results is not a detection list: {e}"),
                    );
                    warn!(record = %violation.record, reason = %violation.reason, "Undecodable raw image");
                    batch.violations.push(violation);
                }
            }
        }
        debug!(records = batch.records.len(), violations = batch.violations.len(), "Raw images loaded");
        Ok(batch)
    }

    /// Replace all four marts in one transaction
    pub fn publish_marts(&self, marts: &MartSet) -> Result<PublishSummary> {
        let start = Instant::now();
        let mut conn = self.get_connection()?;
        let result = replace_marts(&mut conn, marts);
        self.metrics.record_db_operation("publish_marts", start.elapsed(), result.is_ok());

        let summary = result?;
        info!(
            channels = summary.channels,
            dates = summary.dates,
            facts = summary.facts,
            images = summary.images,
            "Marts published"
        );
        Ok(summary)
    }

    /// Published channels, best first by `sort`, ties by username
    pub fn fetch_channels(&self, sort: ChannelSort, limit: Option<usize>) -> Result<Vec<ChannelDimension>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} ORDER BY {} DESC, channel_username ASC LIMIT ?1",
            table::DIM_CHANNELS,
            sort.column()
        ))?;
        let limit = limit.map_or(-1, |l| l as i64);
        let rows = stmt.query_map(params![limit], map_channel)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Published date dimension in date order
    pub fn fetch_dates(&self) -> Result<Vec<DateDimension>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!("SELECT * FROM {} ORDER BY {}", table::DIM_DATES, marts::DATE_KEY))?;
        let rows = stmt.query_map([], map_date)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Published fact rows in message order
    pub fn fetch_facts(&self) -> Result<Vec<FactMessage>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} ORDER BY message_date, channel_username, message_id",
            table::FCT_MESSAGES
        ))?;
        let rows = stmt.query_map([], map_fact)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Published image aggregates
    pub fn fetch_image_aggregations(&self) -> Result<ImageAggregation> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} ORDER BY message_id, channel_username",
            table::IMAGE_AGGREGATIONS
        ))?;
        let rows = stmt.query_map([], map_image)?;
        let images = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ImageAggregation::from_staged(images))
    }

    /// Row count of a table
    pub fn count_rows(&self, table_name: &str) -> Result<i64> {
        let conn = self.get_connection()?;
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table_name}"), [], |row| row.get(0))?)
    }
}

#[async_trait]
impl RawRecordSource for Database {
    async fn fetch_messages(&self) -> Result<RawBatch<RawMessage>> {
        self.load_raw_messages()
    }

    async fn fetch_images(&self) -> Result<RawBatch<RawImage>> {
        self.load_raw_images()
    }
}

#[async_trait]
impl MartSink for Database {
    async fn publish(&self, marts: &MartSet) -> Result<PublishSummary> {
        self.publish_marts(marts)
    }
}

struct RawMessageRow {
    message: RawMessage,
    message_date: Option<String>,
    raw_data: Option<String>,
}

impl RawMessageRow {
    fn decode(self) -> std::result::Result<RawMessage, SchemaViolation> {
        let Self {
            mut message,
            message_date,
            raw_data,
        } = self;
        let record = format!(
            "{}/{}",
            message.channel_username.as_deref().unwrap_or_default(),
            message.message_id
        );

        message.message_date = match message_date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(value) => Some(
                parse_timestamp(value).map_err(|reason| SchemaViolation::new(table::RAW_MESSAGES, &record, reason))?,
            ),
            None => None,
        };
        message.raw_payload = raw_data
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| SchemaViolation::new(table::RAW_MESSAGES, &record, format!("raw_data is not JSON: {e}")))?;
        Ok(message)
    }
}

/// Strip the `sqlite:` scheme from a database URL
fn database_path(database_url: &str) -> &str {
    database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url)
}

fn replace_marts(conn: &mut Connection, marts: &MartSet) -> Result<PublishSummary> {
    let tx = conn.transaction()?;
    for table_name in [
        table::FCT_MESSAGES,
        table::IMAGE_AGGREGATIONS,
        table::DIM_CHANNELS,
        table::DIM_DATES,
    ] {
        tx.execute(&format!("DELETE FROM {table_name}"), [])?;
    }

    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {} (channel_key, channel_username, channel_title, total_messages, medical_messages, \
             messages_with_images, messages_with_documents, avg_message_length, avg_engagement_score, total_views, \
             total_forwards, total_replies, first_message_date, last_message_date, medical_content_percentage, \
             image_content_percentage, rank_by_messages, rank_by_medical_content, rank_by_engagement, rank_by_images, \
             medical_focus_level, visual_content_level, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
            table::DIM_CHANNELS
        ))?;
        for c in &marts.channels {
            stmt.execute(params![
                c.channel_key,
                c.channel_username,
                c.channel_title,
                c.total_messages,
                c.medical_messages,
                c.messages_with_images,
                c.messages_with_documents,
                c.avg_message_length,
                c.avg_engagement_score,
                c.total_views,
                c.total_forwards,
                c.total_replies,
                c.first_message_date,
                c.last_message_date,
                c.medical_content_percentage,
                c.image_content_percentage,
                c.rank_by_messages,
                c.rank_by_medical_content,
                c.rank_by_engagement,
                c.rank_by_images,
                c.medical_focus_level,
                c.visual_content_level,
                c.created_at,
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {} (date_key, date_actual, year, month, day, day_of_week, day_of_year, week_of_year, quarter, \
             month_name, day_name, is_weekend, season, fiscal_year, fiscal_quarter, ethiopian_year, message_count, \
             medical_message_count, image_message_count, avg_engagement_score, rolling_7d_avg_messages, \
             rolling_7d_avg_medical_messages, rolling_30d_avg_messages, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
            table::DIM_DATES
        ))?;
        for d in &marts.dates {
            stmt.execute(params![
                d.date_key,
                d.date_actual,
                d.year,
                d.month,
                d.day,
                d.day_of_week,
                d.day_of_year,
                d.week_of_year,
                d.quarter,
                d.month_name,
                d.day_name,
                d.is_weekend,
                d.season,
                d.fiscal_year,
                d.fiscal_quarter,
                d.ethiopian_year,
                d.message_count,
                d.medical_message_count,
                d.image_message_count,
                d.avg_engagement_score,
                d.rolling_7d_avg_messages,
                d.rolling_7d_avg_medical_messages,
                d.rolling_30d_avg_messages,
                d.created_at,
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {} (message_id, channel_username, image_url, local_path, image_hash, detected_objects_count, \
             avg_confidence_score, detected_classes, has_medical_objects) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            table::IMAGE_AGGREGATIONS
        ))?;
        for i in marts.images.iter() {
            stmt.execute(params![
                i.message_id,
                i.channel_username,
                i.image_url,
                i.local_path,
                i.image_hash,
                i.detected_objects_count,
                i.avg_confidence_score,
                serde_json::to_string(&i.detected_classes)?,
                i.has_medical_objects,
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {} (message_id, channel_key, date_key, channel_username, channel_title, message_text, \
             message_length, message_date, message_date_only, hour, has_media, media_type, has_image, has_document, \
             is_medical_related, views, forwards, replies, engagement_score, channel_medical_focus_level, \
             channel_visual_content_level, day_name, is_weekend, season, fiscal_year, fiscal_quarter, image_hash, \
             detected_objects_count, avg_confidence_score, detected_classes, has_medical_objects, content_category, \
             engagement_level, content_quality_score, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, \
             ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34, ?35)",
            table::FCT_MESSAGES
        ))?;
        for f in &marts.facts {
            let detected_classes = f.detected_classes.as_ref().map(serde_json::to_string).transpose()?;
            stmt.execute(params![
                f.message_id,
                f.channel_key,
                f.date_key,
                f.channel_username,
                f.channel_title,
                f.message_text,
                f.message_length,
                f.message_date,
                f.message_date_only,
                f.hour,
                f.has_media,
                f.media_type,
                f.has_image,
                f.has_document,
                f.is_medical_related,
                f.views,
                f.forwards,
                f.replies,
                f.engagement_score,
                f.channel_medical_focus_level,
                f.channel_visual_content_level,
                f.day_name,
                f.is_weekend,
                f.season,
                f.fiscal_year,
                f.fiscal_quarter,
                f.image_hash,
                f.detected_objects_count,
                f.avg_confidence_score,
                detected_classes,
                f.has_medical_objects,
                f.content_category,
                f.engagement_level,
                f.content_quality_score,
                f.created_at,
            ])?;
        }
    }

    tx.commit()?;
    Ok(PublishSummary {
        channels: marts.channels.len(),
        dates: marts.dates.len(),
        facts: marts.facts.len(),
        images: marts.images.len(),
    })
}

fn map_channel(row: &Row) -> rusqlite::Result<ChannelDimension> {
    Ok(ChannelDimension {
        channel_key: row.get("channel_key")?,
        channel_username: row.get("channel_username")?,
        channel_title: row.get("channel_title")?,
        total_messages: row.get("total_messages")?,
        medical_messages: row.get("medical_messages")?,
        messages_with_images: row.get("messages_with_images")?,
        messages_with_documents: row.get("messages_with_documents")?,
        avg_message_length: row.get("avg_message_length")?,
        avg_engagement_score: row.get("avg_engagement_score")?,
        total_views: row.get("total_views")?,
        total_forwards: row.get("total_forwards")?,
        total_replies: row.get("total_replies")?,
        first_message_date: row.get("first_message_date")?,
        last_message_date: row.get("last_message_date")?,
        medical_content_percentage: row.get("medical_content_percentage")?,
        image_content_percentage: row.get("image_content_percentage")?,
        rank_by_messages: row.get("rank_by_messages")?,
        rank_by_medical_content: row.get("rank_by_medical_content")?,
        rank_by_engagement: row.get("rank_by_engagement")?,
        rank_by_images: row.get("rank_by_images")?,
        medical_focus_level: row.get("medical_focus_level")?,
        visual_content_level: row.get("visual_content_level")?,
        created_at: row.get(marts::CREATED_AT)?,
    })
}

fn map_date(row: &Row) -> rusqlite::Result<DateDimension> {
    Ok(DateDimension {
        date_key: row.get("date_key")?,
        date_actual: row.get("date_actual")?,
        year: row.get("year")?,
        month: row.get("month")?,
        day: row.get("day")?,
        day_of_week: row.get("day_of_week")?,
        day_of_year: row.get("day_of_year")?,
        week_of_year: row.get("week_of_year")?,
        quarter: row.get("quarter")?,
        month_name: row.get("month_name")?,
        day_name: row.get("day_name")?,
        is_weekend: row.get("is_weekend")?,
        season: row.get("season")?,
        fiscal_year: row.get("fiscal_year")?,
        fiscal_quarter: row.get("fiscal_quarter")?,
        ethiopian_year: row.get("ethiopian_year")?,
        message_count: row.get("message_count")?,
        medical_message_count: row.get("medical_message_count")?,
        image_message_count: row.get("image_message_count")?,
        avg_engagement_score: row.get("avg_engagement_score")?,
        rolling_7d_avg_messages: row.get("rolling_7d_avg_messages")?,
        rolling_7d_avg_medical_messages: row.get("rolling_7d_avg_medical_messages")?,
        rolling_30d_avg_messages: row.get("rolling_30d_avg_messages")?,
        created_at: row.get(marts::CREATED_AT)?,
    })
}

fn map_image(row: &Row) -> rusqlite::Result<NormalizedImage> {
    Ok(NormalizedImage {
        message_id: row.get("message_id")?,
        channel_username: row.get("channel_username")?,
        image_url: row.get("image_url")?,
        local_path: row.get("local_path")?,
        image_hash: row.get("image_hash")?,
        detected_objects_count: row.get("detected_objects_count")?,
        avg_confidence_score: row.get("avg_confidence_score")?,
        detected_classes: json_column(row, marts::DETECTED_CLASSES)?.unwrap_or_default(),
        has_medical_objects: row.get("has_medical_objects")?,
    })
}

fn map_fact(row: &Row) -> rusqlite::Result<FactMessage> {
    Ok(FactMessage {
        message_id: row.get("message_id")?,
        channel_key: row.get(marts::CHANNEL_KEY)?,
        date_key: row.get(marts::DATE_KEY)?,
        channel_username: row.get("channel_username")?,
        channel_title: row.get("channel_title")?,
        message_text: row.get("message_text")?,
        message_length: row.get("message_length")?,
        message_date: row.get("message_date")?,
        message_date_only: row.get("message_date_only")?,
        hour: row.get("hour")?,
        has_media: row.get("has_media")?,
        media_type: row.get("media_type")?,
        has_image: row.get("has_image")?,
        has_document: row.get("has_document")?,
        is_medical_related: row.get("is_medical_related")?,
        views: row.get("views")?,
        forwards: row.get("forwards")?,
        replies: row.get("replies")?,
        engagement_score: row.get("engagement_score")?,
        channel_medical_focus_level: row.get("channel_medical_focus_level")?,
        channel_visual_content_level: row.get("channel_visual_content_level")?,
        day_name: row.get("day_name")?,
        is_weekend: row.get("is_weekend")?,
        season: row.get("season")?,
        fiscal_year: row.get("fiscal_year")?,
        fiscal_quarter: row.get("fiscal_quarter")?,
        image_hash: row.get("image_hash")?,
        detected_objects_count: row.get("detected_objects_count")?,
        avg_confidence_score: row.get("avg_confidence_score")?,
        detected_classes: json_column(row, marts::DETECTED_CLASSES)?,
        has_medical_objects: row.get("has_medical_objects")?,
        content_category: row.get("content_category")?,
        engagement_level: row.get("engagement_level")?,
        content_quality_score: row.get("content_quality_score")?,
        created_at: row.get(marts::CREATED_AT)?,
    })
}

/// Decode a nullable JSON text column
fn json_column<T: DeserializeOwned>(row: &Row, column: &str) -> rusqlite::Result<Option<T>> {
    let Some(text) = row.get::<_, Option<String>>(column)? else {
        return Ok(None);
    };
    serde_json::from_str(&text).map(Some).map_err(|e| {
        let index = row.as_ref().column_index(column).unwrap_or_default();
        rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e))
    })
}

/// Store labelled enums as their mart labels
macro_rules! label_column {
    ($($name:ty),+ $(,)?) => {
        $(
            impl ToSql for $name {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.as_str()))
                }
            }

            impl FromSql for $name {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    let label = value.as_str()?;
                    Self::from_label(label)
                        .ok_or_else(|| FromSqlError::Other(format!("unknown label '{label}'").into()))
                }
            }
        )+
    };
}

label_column!(MedicalFocusLevel, VisualContentLevel, Season, ContentCategory, EngagementLevel);
