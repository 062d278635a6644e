use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumCount, EnumIter, EnumString};

/// Canonical municipal issue categories, in the order the image model was
/// trained on. Used as the label source when no trained encoder is shipped.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
    Display, EnumString, EnumIter, EnumCount, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ImageCategory {
    BrokenStreetLight,
    ElectricIssue,
    GarbageOverflow,
    GasProblem,
    OpenManhole,
    Potholes,
    TrafficLights,
    WaterLeakage,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ClassifyRequest {
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClassifyResponse {
    pub category: String,
    pub predicted_category: String,
    pub confidence: f32,
    pub accuracy: f32,
    /// Probability of every category the model knows.
    #[serde(default)]
    pub all_predictions: BTreeMap<String, f32>,
}

impl ClassifyResponse {
    pub fn new(label: String, confidence: f32, all_predictions: BTreeMap<String, f32>) -> Self {
        Self {
            predicted_category: label.clone(),
            category: label,
            confidence,
            accuracy: confidence,
            all_predictions,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UrgencyRequest {
    #[serde(default)]
    pub text: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UrgencyResponse {
    pub urgency: String,
    pub predicted_urgency: String,
    pub confidence: Option<f32>,
}

impl UrgencyResponse {
    pub fn new(urgency: String, confidence: Option<f32>) -> Self {
        Self {
            predicted_urgency: urgency.clone(),
            urgency,
            confidence,
        }
    }
}

/// Body of `/predict`. The `status` field is the outcome marker clients
/// switch on.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriageResponse {
    Denied {
        reason: String,
    },
    Resubmit {
        issue_type: String,
        confidence: f32,
        message: String,
    },
    Success {
        issue_type: String,
        issue_confidence: f32,
        urgency: String,
        urgency_confidence: Option<f32>,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ModelStatus {
    pub image_classification: String,
    pub urgency_detection: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub models: ModelStatus,
    pub label_source: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Wire values carry two decimals, matching what the mobile client displays.
pub fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}
