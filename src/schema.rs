//! Database schema definitions
//!
//! This module provides constants for table and column names used with rusqlite.
//! Mart columns match the field names of the corresponding model structs.

/// Table names
pub mod table {
    /// Raw scraped messages
    pub const RAW_MESSAGES: &str = "raw_telegram_messages";
    /// Raw image detections
    pub const RAW_IMAGES: &str = "raw_telegram_images";
    /// Channel dimension
    pub const DIM_CHANNELS: &str = "dim_channels";
    /// Date dimension
    pub const DIM_DATES: &str = "dim_dates";
    /// Fact table
    pub const FCT_MESSAGES: &str = "fct_messages";
    /// Image aggregates
    pub const IMAGE_AGGREGATIONS: &str = "image_aggregations";
}

/// Raw messages table schema
pub mod raw_messages {
    /// Table name
    pub const TABLE: &str = super::table::RAW_MESSAGES;
    /// Scraper message identifier
    pub const MESSAGE_ID: &str = "message_id";
    /// Channel username column
    pub const CHANNEL_USERNAME: &str = "channel_username";
    /// Channel title column
    pub const CHANNEL_TITLE: &str = "channel_title";
    /// Message text column
    pub const MESSAGE_TEXT: &str = "message_text";
    /// Post timestamp column
    pub const MESSAGE_DATE: &str = "message_date";
    /// Media flag column
    pub const HAS_MEDIA: &str = "has_media";
    /// Media kind column
    pub const MEDIA_TYPE: &str = "media_type";
    /// Media location column
    pub const MEDIA_URL: &str = "media_url";
    /// View counter column
    pub const VIEWS: &str = "views";
    /// Forward counter column
    pub const FORWARDS: &str = "forwards";
    /// Reply counter column
    pub const REPLIES: &str = "replies";
    /// Untouched scraper payload, JSON text
    pub const RAW_DATA: &str = "raw_data";
    /// Ingestion timestamp column
    pub const INGESTED_AT: &str = "ingested_at";
}

/// Raw images table schema
pub mod raw_images {
    /// Table name
    pub const TABLE: &str = super::table::RAW_IMAGES;
    /// Message the image belongs to
    pub const MESSAGE_ID: &str = "message_id";
    /// Channel username column
    pub const CHANNEL_USERNAME: &str = "channel_username";
    /// Source URL column
    pub const IMAGE_URL: &str = "image_url";
    /// Local file column
    pub const LOCAL_PATH: &str = "local_path";
    /// Content hash column
    pub const IMAGE_HASH: &str = "image_hash";
    /// Detector output, JSON text
    pub const DETECTIONS: &str = "object_detection_results";
    /// Ingestion timestamp column
    pub const INGESTED_AT: &str = "ingested_at";
}

/// Columns shared by the mart tables
pub mod marts {
    /// Run stamp column
    pub const CREATED_AT: &str = "created_at";
    /// Channel surrogate key
    pub const CHANNEL_KEY: &str = "channel_key";
    /// Date surrogate key
    pub const DATE_KEY: &str = "date_key";
    /// Detected classes, JSON array text
    pub const DETECTED_CLASSES: &str = "detected_classes";
}

/// Schema version tracking table
pub mod schema_migrations {
    /// Table name
    pub const TABLE: &str = "schema_migrations";
    /// Applied migration version
    pub const VERSION: &str = "version";
    /// Application timestamp
    pub const APPLIED_AT: &str = "applied_at";
}
