//! Image aggregation builder
//!
//! Stages raw images and keys them by `(message_id, channel_username)`.
//! Duplicate keys are resolved before the map is built so the fact join
//! can never fan out.

use std::collections::btree_map::{BTreeMap, Entry};
use tracing::{debug, warn};

use crate::classification::KeywordClassifier;
use crate::error::SchemaViolation;
use crate::models::{ImageKey, NormalizedImage, RawImage};
use crate::staging::{stage_images, StagedSet};

/// Image aggregates keyed by message, at most one per key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageAggregation {
    by_key: BTreeMap<ImageKey, NormalizedImage>,
    duplicates_dropped: usize,
}

impl ImageAggregation {
    /// Build from already staged images.
    ///
    /// When two images share a key the one with the smallest `image_hash`
    /// wins, independent of input order.
    #[must_use]
    pub fn from_staged(images: Vec<NormalizedImage>) -> Self {
        let mut by_key = BTreeMap::new();
        let mut duplicates_dropped = 0;

        for image in images {
            match by_key.entry(image.key()) {
                Entry::Vacant(slot) => {
                    slot.insert(image);
                }
                Entry::Occupied(mut slot) => {
                    duplicates_dropped += 1;
                    if image.image_hash < slot.get().image_hash {
                        slot.insert(image);
                    }
                }
            }
        }

        if duplicates_dropped > 0 {
            warn!(duplicates_dropped, "Duplicate image keys resolved");
        }
        Self {
            by_key,
            duplicates_dropped,
        }
    }

    /// Look up the aggregate for a message
    #[must_use]
    pub fn get(&self, message_id: i64, channel_username: &str) -> Option<&NormalizedImage> {
        self.by_key.get(&ImageKey::new(message_id, channel_username))
    }

    /// Number of distinct keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// True if there are no aggregates
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Number of images dropped because their key was taken
    #[must_use]
    pub fn duplicates_dropped(&self) -> usize {
        self.duplicates_dropped
    }

    /// Aggregates in key order
    pub fn iter(&self) -> impl Iterator<Item = &NormalizedImage> {
        self.by_key.values()
    }
}

/// Output of the image stage
#[derive(Debug, Clone, Default)]
pub struct ImageBuild {
    /// Deduplicated aggregates
    pub aggregation: ImageAggregation,
    /// Images without a hash
    pub filtered: usize,
    /// Malformed images
    pub violations: Vec<SchemaViolation>,
}

/// Stage raw images and build the keyed aggregation
#[must_use]
pub fn build_image_aggregation(raws: &[RawImage], classifier: &KeywordClassifier) -> ImageBuild {
    let StagedSet {
        records,
        filtered,
        violations,
    } = stage_images(raws, classifier);
    let aggregation = ImageAggregation::from_staged(records);
    debug!(images = aggregation.len(), "Image aggregation built");
    ImageBuild {
        aggregation,
        filtered,
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: i64, channel: &str, hash: &str) -> NormalizedImage {
        NormalizedImage {
            message_id: id,
            channel_username: channel.to_string(),
            image_url: None,
            local_path: None,
            image_hash: hash.to_string(),
            detected_objects_count: 0,
            avg_confidence_score: None,
            detected_classes: Vec::new(),
            has_medical_objects: false,
        }
    }

    #[test]
    fn test_duplicate_keys_keep_smallest_hash() {
        let forward = ImageAggregation::from_staged(vec![
            image(1, "chemed", "ffff"),
            image(1, "chemed", "0aaa"),
            image(2, "chemed", "bbbb"),
        ]);
        let backward = ImageAggregation::from_staged(vec![
            image(2, "chemed", "bbbb"),
            image(1, "chemed", "0aaa"),
            image(1, "chemed", "ffff"),
        ]);

        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 2);
        assert_eq!(forward.duplicates_dropped(), 1);
        assert_eq!(forward.get(1, "chemed").map(|i| i.image_hash.as_str()), Some("0aaa"));
    }

    #[test]
    fn test_same_message_id_in_other_channel_is_distinct() {
        let aggregation = ImageAggregation::from_staged(vec![image(1, "chemed", "a"), image(1, "tikvahpharma", "b")]);
        assert_eq!(aggregation.len(), 2);
        assert_eq!(aggregation.duplicates_dropped(), 0);
        assert!(aggregation.get(1, "lobelia4cosmetics").is_none());
    }

    #[test]
    fn test_build_counts_filtered_and_rejected() {
        let classifier = KeywordClassifier::with_defaults().expect("Failed to create classifier");
        let raw = |id: i64, hash: Option<&str>, channel: Option<&str>| RawImage {
            message_id: id,
            channel_username: channel.map(ToString::to_string),
            image_url: None,
            local_path: None,
            image_hash: hash.map(ToString::to_string),
            detections: None,
        };
        let build = build_image_aggregation(
            &[
                raw(1, Some("a"), Some("chemed")),
                raw(2, None, Some("chemed")),
                raw(3, Some("c"), None),
            ],
            &classifier,
        );
        assert_eq!(build.aggregation.len(), 1);
        assert_eq!(build.filtered, 1);
        assert_eq!(build.violations.len(), 1);
    }
}
