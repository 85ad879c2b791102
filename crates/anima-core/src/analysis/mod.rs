//! Emotion analysis results and duplicate-save suppression.
//!
//! The analyzer can report the same photo more than once (a double click,
//! a retried upload). `SaveGuard` keeps those from being stored twice.

pub mod dedup;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use dedup::{analysis_hash, SaveGuard, SaveOutcome};

/// An analysis result as it is saved to the history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRecord {
    pub emotion: String,
    pub confidence: f64,
    /// Percentage per detected emotion.
    #[serde(default)]
    pub emotions_detected: BTreeMap<String, f64>,
    #[serde(default)]
    pub recommendations: Vec<serde_json::Value>,
}

impl AnalysisRecord {
    /// Whether `other` is the same result for dedup purposes: same emotion,
    /// confidence within 0.01 and identical per-emotion breakdown.
    pub fn is_duplicate_of(&self, other: &AnalysisRecord) -> bool {
        self.emotion == other.emotion
            && (self.confidence - other.confidence).abs() < 0.01
            && self.emotions_detected == other.emotions_detected
    }
}
