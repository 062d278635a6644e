use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::inference::{ImageClassifier, argmax};

use super::error::ClassificationError;
use super::labels::ImageLabelResolver;
use super::normalizer::NormalizedTensor;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.80;
pub const DISAGREEMENT_REASON: &str = "Multiple images show different problems.";

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub label: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsensusVerdict {
    Denied { reason: String },
    Resubmit { issue_type: String, confidence: f32 },
    Accepted { issue_type: String, confidence: f32 },
}

/// Runs the image model over every photo of a submission and decides whether
/// they agree confidently enough to triage automatically.
#[derive(Clone)]
pub struct ConsensusGate {
    classifier: Arc<dyn ImageClassifier>,
    labels: ImageLabelResolver,
    threshold: f32,
}

impl ConsensusGate {
    pub fn new(
        classifier: Arc<dyn ImageClassifier>,
        labels: ImageLabelResolver,
        threshold: f32,
    ) -> Self {
        Self {
            classifier,
            labels,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn labels(&self) -> &ImageLabelResolver {
        &self.labels
    }

    pub fn classify(&self, tensor: &NormalizedTensor) -> Result<ClassificationResult, ClassificationError> {
        let probabilities = self.classifier.classify(tensor)?;
        self.pick(&probabilities)
    }

    /// Like [`classify`], also returning every probability keyed by the
    /// label it resolves to. Indices the resolver cannot name are left out.
    ///
    /// [`classify`]: ConsensusGate::classify
    pub fn classify_with_scores(
        &self,
        tensor: &NormalizedTensor,
    ) -> Result<(ClassificationResult, BTreeMap<String, f32>), ClassificationError> {
        let probabilities = self.classifier.classify(tensor)?;
        let result = self.pick(&probabilities)?;
        let scores = probabilities
            .iter()
            .enumerate()
            .filter_map(|(index, &p)| self.labels.resolve(index).ok().map(|label| (label, p)))
            .collect();
        Ok((result, scores))
    }

    /// Every value must be a probability in [0, 1]; NaN fails the check.
    fn pick(&self, probabilities: &[f32]) -> Result<ClassificationResult, ClassificationError> {
        if let Some((index, &value)) = probabilities
            .iter()
            .enumerate()
            .find(|(_, p)| !(0.0..=1.0).contains(*p))
        {
            return Err(ClassificationError::InvalidOutput { index, value });
        }
        let (index, confidence) = argmax(probabilities).ok_or(ClassificationError::EmptyOutput)?;
        let label = self.labels.resolve(index)?;
        Ok(ClassificationResult { label, confidence })
    }

    /// Classifies every tensor, in input order, then applies [`decide`].
    /// Any classifier failure aborts the whole evaluation.
    ///
    /// [`decide`]: ConsensusGate::decide
    pub fn evaluate(
        &self,
        tensors: &[NormalizedTensor],
    ) -> Result<(ConsensusVerdict, Vec<ClassificationResult>), ClassificationError> {
        let results = tensors
            .iter()
            .map(|tensor| self.classify(tensor))
            .collect::<Result<Vec<_>, _>>()?;

        for (position, result) in results.iter().enumerate() {
            log::debug!(
                "Image {}: {} ({:.2}%)",
                position,
                result.label,
                result.confidence * 100.0
            );
        }

        Ok((self.decide(&results), results))
    }

    /// Agreement first, then the mean-confidence threshold (inclusive).
    pub fn decide(&self, results: &[ClassificationResult]) -> ConsensusVerdict {
        let distinct: BTreeSet<&str> = results.iter().map(|r| r.label.as_str()).collect();
        let issue_type = match distinct.len() {
            1 => results[0].label.clone(),
            0 => {
                return ConsensusVerdict::Denied {
                    reason: "No images to compare.".into(),
                };
            }
            _ => {
                return ConsensusVerdict::Denied {
                    reason: DISAGREEMENT_REASON.into(),
                };
            }
        };

        let confidence = mean_confidence(results);
        if confidence < self.threshold {
            ConsensusVerdict::Resubmit {
                issue_type,
                confidence,
            }
        } else {
            ConsensusVerdict::Accepted {
                issue_type,
                confidence,
            }
        }
    }
}

/// Summed in ascending order so any permutation of the same results yields
/// the same value.
fn mean_confidence(results: &[ClassificationResult]) -> f32 {
    let mut confidences: Vec<f32> = results.iter().map(|r| r.confidence).collect();
    confidences.sort_by(f32::total_cmp);
    let sum: f64 = confidences.iter().map(|&c| c as f64).sum();
    (sum / confidences.len() as f64) as f32
}
