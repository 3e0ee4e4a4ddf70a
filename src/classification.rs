//! Keyword-based content classification.
//!
//! Classification is a plain substring heuristic over a versioned keyword set,
//! not NLP. False positives on word boundaries ("drugstore") are accepted.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use unicode_normalization::UnicodeNormalization;

use crate::error::{PipelineError, Result};

/// Keywords that mark a message as medical
pub const MEDICAL_KEYWORDS: [&str; 12] = [
    "medicine",
    "drug",
    "pill",
    "tablet",
    "capsule",
    "syrup",
    "cream",
    "ointment",
    "injection",
    "vaccine",
    "pharmacy",
    "pharmaceutical",
];

/// Detector labels that count as medical objects
pub const MEDICAL_OBJECT_CLASSES: [&str; 7] =
    ["pill", "tablet", "capsule", "medicine", "drug", "bottle", "syringe"];

/// Product names matched as whole words by the mention report
pub const PRODUCT_KEYWORDS: [&str; 10] = [
    "medicine",
    "drug",
    "pill",
    "tablet",
    "capsule",
    "syrup",
    "cream",
    "ointment",
    "injection",
    "vaccine",
];

/// Version tag of the built-in keyword set
pub const DEFAULT_KEYWORD_VERSION: &str = "medical-v1";

/// A versioned list of classification keywords
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordSet {
    /// Version tag, carried into logs
    pub version: String,
    /// Keywords, matched case-insensitively as substrings
    pub keywords: Vec<String>,
}

impl Default for KeywordSet {
    fn default() -> Self {
        Self {
            version: DEFAULT_KEYWORD_VERSION.to_string(),
            keywords: MEDICAL_KEYWORDS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl KeywordSet {
    /// Load a keyword set from a YAML file with `version` and `keywords` keys
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let set: Self = serde_yaml::from_str(&content)?;
        if set.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(PipelineError::InvalidConfig(format!(
                "keyword file {} has no keywords",
                path.display()
            )));
        }
        Ok(set)
    }
}

/// Classifier for message text and detector labels
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    /// Version of the keyword set in use
    pub version: String,
    keywords: Vec<String>,
    medical_objects: HashSet<String>,
    product_regex: Regex,
}

impl KeywordClassifier {
    /// Create a classifier from a keyword set and the medical object labels
    pub fn new(keywords: KeywordSet, medical_object_classes: &[String]) -> Result<Self> {
        let normalized: Vec<String> = keywords
            .keywords
            .iter()
            .map(|k| normalize(k.trim()))
            .filter(|k| !k.is_empty())
            .collect();
        if normalized.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "medical keyword set is empty".to_string(),
            ));
        }

        let product_regex = Regex::new(&format!(r"(?i)\b({})\b", PRODUCT_KEYWORDS.join("|")))
            .map_err(|e| PipelineError::Other(format!("Failed to compile product regex: {e}")))?;

        Ok(Self {
            version: keywords.version,
            keywords: normalized,
            medical_objects: medical_object_classes
                .iter()
                .map(|c| normalize(c.trim()))
                .collect(),
            product_regex,
        })
    }

    /// Classifier with the built-in keyword and object sets
    pub fn with_defaults() -> Result<Self> {
        let objects: Vec<String> = MEDICAL_OBJECT_CLASSES.iter().map(ToString::to_string).collect();
        Self::new(KeywordSet::default(), &objects)
    }

    /// True if any keyword occurs anywhere in the text, ignoring case
    #[must_use]
    pub fn is_medical_text(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        let haystack = normalize(text);
        self.keywords.iter().any(|k| haystack.contains(k.as_str()))
    }

    /// True if the detector label is a medical object class
    #[must_use]
    pub fn is_medical_object(&self, class_label: &str) -> bool {
        self.medical_objects.contains(&normalize(class_label.trim()))
    }

    /// Lowercased whole-word product mentions, in text order
    #[must_use]
    pub fn product_mentions(&self, text: &str) -> Vec<String> {
        self.product_regex
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect()
    }

    /// Number of keywords in use
    #[must_use]
    pub fn keyword_count(&self) -> usize {
        self.keywords.len()
    }
}

fn normalize(text: &str) -> String {
    text.nfkc().collect::<String>().to_lowercase()
}
