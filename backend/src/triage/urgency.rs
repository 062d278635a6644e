use std::sync::Arc;

use crate::inference::{TextEmbedder, UrgencyClassifier};

use super::error::ClassificationError;
use super::labels::LabelEncoder;

#[derive(Debug, Clone, PartialEq)]
pub struct UrgencyResult {
    pub urgency: String,
    /// `None` when the classifier cannot score, which is not the same as a
    /// low score.
    pub confidence: Option<f32>,
}

/// Embeds a description and predicts how urgent the reported issue is.
#[derive(Clone)]
pub struct UrgencyStage {
    embedder: Arc<dyn TextEmbedder>,
    classifier: UrgencyClassifier,
    labels: LabelEncoder,
}

impl UrgencyStage {
    pub fn new(
        embedder: Arc<dyn TextEmbedder>,
        classifier: UrgencyClassifier,
        labels: LabelEncoder,
    ) -> Self {
        Self {
            embedder,
            classifier,
            labels,
        }
    }

    pub fn supports_confidence(&self) -> bool {
        self.classifier.supports_confidence()
    }

    pub fn assess(&self, description: &str) -> Result<UrgencyResult, ClassificationError> {
        let embedding = self.embedder.embed(description)?;
        let index = self.classifier.predict(&embedding)?;
        let urgency = self.labels.inverse_transform(index)?.to_string();
        let confidence = self.classifier.confidence(&embedding)?;

        match confidence {
            Some(c) => log::info!("Urgency: {} (confidence: {:.2}%)", urgency, c * 100.0),
            None => log::info!("Urgency: {}", urgency),
        }

        Ok(UrgencyResult {
            urgency,
            confidence,
        })
    }
}
