use std::collections::BTreeMap;

use super::error::{InputError, TriageError};
use super::gate::{ClassificationResult, ConsensusGate, ConsensusVerdict};
use super::normalizer::{ImageSample, NormalizedTensor};
use super::urgency::{UrgencyResult, UrgencyStage};

/// The single outcome handed back to the caller of a full triage.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalVerdict {
    Denied {
        reason: String,
    },
    Resubmit {
        issue_type: String,
        confidence: f32,
    },
    Success {
        issue_type: String,
        issue_confidence: f32,
        urgency: String,
        urgency_confidence: Option<f32>,
    },
}

/// Normalizer, consensus gate and urgency stage wired together. Holds only
/// read-only model handles, so one instance serves every request.
#[derive(Clone)]
pub struct TriagePipeline {
    gate: ConsensusGate,
    urgency: UrgencyStage,
    input_size: u32,
}

impl TriagePipeline {
    pub fn new(gate: ConsensusGate, urgency: UrgencyStage, input_size: u32) -> Self {
        Self {
            gate,
            urgency,
            input_size,
        }
    }

    pub fn gate(&self) -> &ConsensusGate {
        &self.gate
    }

    pub fn urgency(&self) -> &UrgencyStage {
        &self.urgency
    }

    /// Photos plus description to one verdict. The description is only
    /// embedded once the photos are accepted.
    pub fn triage(
        &self,
        images: &[ImageSample],
        description: &str,
    ) -> Result<FinalVerdict, TriageError> {
        if images.is_empty() {
            return Err(InputError::NoImages.into());
        }
        if description.trim().is_empty() {
            return Err(InputError::NoDescription.into());
        }

        log::info!(
            "{} image(s) received | Description: {}...",
            images.len(),
            description.chars().take(60).collect::<String>()
        );

        let tensors = self.normalize_all(images)?;
        let (verdict, _) = self.gate.evaluate(&tensors)?;

        let verdict = match verdict {
            ConsensusVerdict::Denied { reason } => {
                log::info!("Submission denied: {}", reason);
                FinalVerdict::Denied { reason }
            }
            ConsensusVerdict::Resubmit {
                issue_type,
                confidence,
            } => {
                log::info!(
                    "Resubmission requested: {} at {:.2}%",
                    issue_type,
                    confidence * 100.0
                );
                FinalVerdict::Resubmit {
                    issue_type,
                    confidence,
                }
            }
            ConsensusVerdict::Accepted {
                issue_type,
                confidence,
            } => {
                let UrgencyResult {
                    urgency,
                    confidence: urgency_confidence,
                } = self.urgency.assess(description)?;
                log::info!("Triaged as {} with urgency {}", issue_type, urgency);
                FinalVerdict::Success {
                    issue_type,
                    issue_confidence: confidence,
                    urgency,
                    urgency_confidence,
                }
            }
        };
        Ok(verdict)
    }

    /// Single photo, no gating. Also returns the per-category scores.
    pub fn classify_image(
        &self,
        image: &ImageSample,
    ) -> Result<(ClassificationResult, BTreeMap<String, f32>), TriageError> {
        if image.is_empty() {
            return Err(InputError::NoImage.into());
        }
        let tensor = self.normalize(image)?;
        let (result, scores) = self.gate.classify_with_scores(&tensor)?;
        log::info!(
            "Classification: {} ({:.2}%)",
            result.label,
            result.confidence * 100.0
        );
        Ok((result, scores))
    }

    /// Description only, no gating.
    pub fn predict_urgency(&self, description: &str) -> Result<UrgencyResult, TriageError> {
        if description.trim().is_empty() {
            return Err(InputError::NoDescription.into());
        }
        log::info!(
            "Predicting urgency for: {}...",
            description.chars().take(60).collect::<String>()
        );
        Ok(self.urgency.assess(description)?)
    }

    fn normalize_all(&self, images: &[ImageSample]) -> Result<Vec<NormalizedTensor>, TriageError> {
        images.iter().map(|image| self.normalize(image)).collect()
    }

    fn normalize(&self, image: &ImageSample) -> Result<NormalizedTensor, TriageError> {
        log::debug!(
            "Normalizing image {} ({} bytes)",
            image.fingerprint(),
            image.len()
        );
        Ok(image.normalize(self.input_size)?)
    }
}
