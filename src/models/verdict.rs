use serde::{ Serialize, Deserialize };
use std::collections::BTreeMap;

/// Why a verdict carries no usable diagnosis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Remote,
    Preprocessing,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentStats {
    pub segment_count: u64,
    pub percentage: f64,
    pub avg_confidence: f64,
}

/// Normalized outcome of one classification attempt.
///
/// Numeric fields are only meaningful when `preprocessing_succeeded` is true;
/// otherwise `error_message` explains the failure.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationVerdict {
    pub predicted_diagnosis: String,
    pub overall_confidence: f64,
    pub total_heartbeats: u64,
    pub continuous_samples: u64,
    pub segment_distribution: BTreeMap<String, SegmentStats>,
    pub preprocessing_succeeded: bool,
    pub majority_vote_count: u64,
    pub source_filename: Option<String>,
    pub error_message: Option<String>,
    pub failure: Option<FailureKind>,
}

impl ClassificationVerdict {
    pub fn failed(kind: FailureKind, message: impl Into<String>, filename: Option<String>) -> Self {
        Self {
            preprocessing_succeeded: false,
            source_filename: filename,
            error_message: Some(message.into()),
            failure: Some(kind),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.preprocessing_succeeded && self.error_message.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthStatus {
    pub status: String,
    pub model_loaded: bool,
    pub scaler_loaded: bool,
    pub class_mapping_loaded: bool,
}

impl HealthStatus {
    pub fn is_ready(&self) -> bool {
        self.status == "healthy" && self.model_loaded && self.scaler_loaded && self.class_mapping_loaded
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassList {
    pub classes: Vec<String>,
    pub total_classes: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchVerdict {
    pub results: Vec<ClassificationVerdict>,
    pub total_files: usize,
    pub successful_predictions: usize,
}
