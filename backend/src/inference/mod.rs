pub mod linear;
pub mod remote;
#[cfg(feature = "torch")]
pub mod torch;

use std::sync::Arc;

use crate::triage::error::ClassificationError;
use crate::triage::normalizer::NormalizedTensor;

/// Maps a normalized photo to a probability vector over the categories the
/// model was built with.
pub trait ImageClassifier: Send + Sync {
    fn classify(&self, tensor: &NormalizedTensor) -> Result<Vec<f32>, ClassificationError>;

    fn describe(&self) -> String;
}

/// Maps free text to a fixed-length vector.
pub trait TextEmbedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ClassificationError>;
}

pub trait UrgencyModel: Send + Sync {
    fn predict(&self, embedding: &[f32]) -> Result<usize, ClassificationError>;
}

/// An urgency model that can also report class probabilities.
pub trait ScoringUrgencyModel: UrgencyModel {
    fn predict_proba(&self, embedding: &[f32]) -> Result<Vec<f32>, ClassificationError>;
}

/// Whether the urgency model scores its predictions is fixed when it is
/// loaded.
#[derive(Clone)]
pub enum UrgencyClassifier {
    Scoring(Arc<dyn ScoringUrgencyModel>),
    LabelOnly(Arc<dyn UrgencyModel>),
}

impl UrgencyClassifier {
    pub fn predict(&self, embedding: &[f32]) -> Result<usize, ClassificationError> {
        match self {
            UrgencyClassifier::Scoring(model) => model.predict(embedding),
            UrgencyClassifier::LabelOnly(model) => model.predict(embedding),
        }
    }

    /// Highest class probability, or `None` when the model cannot score.
    pub fn confidence(&self, embedding: &[f32]) -> Result<Option<f32>, ClassificationError> {
        match self {
            UrgencyClassifier::Scoring(model) => {
                let proba = model.predict_proba(embedding)?;
                argmax(&proba)
                    .map(|(_, p)| Some(p))
                    .ok_or(ClassificationError::EmptyOutput)
            }
            UrgencyClassifier::LabelOnly(_) => Ok(None),
        }
    }

    pub fn supports_confidence(&self) -> bool {
        matches!(self, UrgencyClassifier::Scoring(_))
    }
}

/// Index and value of the largest entry; the first one wins on ties.
pub fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &value) in values.iter().enumerate() {
        match best {
            Some((_, current)) if value <= current => {}
            _ => best = Some((index, value)),
        }
    }
    best
}
