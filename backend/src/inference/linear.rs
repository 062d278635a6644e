use std::path::Path;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1};
use serde::Deserialize;

use super::{ScoringUrgencyModel, UrgencyClassifier, UrgencyModel, argmax};
use crate::triage::error::{ClassificationError, ConfigurationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearKind {
    /// Logistic regression; scores become probabilities.
    Logistic,
    /// Margin classifier; labels only.
    LinearSvc,
}

#[derive(Debug, Deserialize)]
struct LinearArtifact {
    kind: LinearKind,
    coef: Vec<Vec<f32>>,
    intercept: Vec<f32>,
}

/// A linear head over text embeddings, exported as JSON weights. A single
/// weight row is the binary form: positive margin means class 1.
#[derive(Debug, Clone)]
pub struct LinearUrgencyModel {
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl LinearUrgencyModel {
    pub fn new(coef: Vec<Vec<f32>>, intercept: Vec<f32>) -> Result<Self, ConfigurationError> {
        let rows = coef.len();
        let cols = coef.first().map(Vec::len).unwrap_or(0);
        if rows == 0 || cols == 0 {
            return Err(ConfigurationError::Invalid("urgency model has no weights".into()));
        }
        if coef.iter().any(|row| row.len() != cols) {
            return Err(ConfigurationError::Invalid(
                "urgency model weight rows differ in length".into(),
            ));
        }
        if intercept.len() != rows {
            return Err(ConfigurationError::Invalid(format!(
                "urgency model has {} weight rows but {} intercepts",
                rows,
                intercept.len()
            )));
        }

        let flat: Vec<f32> = coef.into_iter().flatten().collect();
        let weights = Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| ConfigurationError::Invalid(e.to_string()))?;
        Ok(Self {
            weights,
            bias: Array1::from(intercept),
        })
    }

    pub fn dimension(&self) -> usize {
        self.weights.ncols()
    }

    fn is_binary(&self) -> bool {
        self.weights.nrows() == 1
    }

    fn decision_function(&self, embedding: &[f32]) -> Result<Array1<f32>, ClassificationError> {
        if embedding.len() != self.dimension() {
            return Err(ClassificationError::TensorShape {
                expected: vec![self.dimension()],
                actual: vec![embedding.len()],
            });
        }
        Ok(self.weights.dot(&ArrayView1::from(embedding)) + &self.bias)
    }
}

impl UrgencyModel for LinearUrgencyModel {
    fn predict(&self, embedding: &[f32]) -> Result<usize, ClassificationError> {
        let scores = self.decision_function(embedding)?;
        if self.is_binary() {
            return Ok(usize::from(scores[0] > 0.0));
        }
        argmax(&scores.to_vec())
            .map(|(index, _)| index)
            .ok_or(ClassificationError::EmptyOutput)
    }
}

impl ScoringUrgencyModel for LinearUrgencyModel {
    fn predict_proba(&self, embedding: &[f32]) -> Result<Vec<f32>, ClassificationError> {
        let scores = self.decision_function(embedding)?;
        if self.is_binary() {
            let positive = 1.0 / (1.0 + (-scores[0]).exp());
            return Ok(vec![1.0 - positive, positive]);
        }
        let max = scores.fold(f32::NEG_INFINITY, |acc, &s| acc.max(s));
        let exp = scores.mapv(|s| (s - max).exp());
        let total = exp.sum();
        Ok(exp.iter().map(|e| e / total).collect())
    }
}

/// Reads the artifact and picks the classifier variant from its `kind`.
pub fn load_urgency_classifier(path: &Path) -> Result<UrgencyClassifier, ConfigurationError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let artifact: LinearArtifact =
        serde_json::from_str(&raw).map_err(|source| ConfigurationError::Artifact {
            path: path.display().to_string(),
            source,
        })?;

    let model = LinearUrgencyModel::new(artifact.coef, artifact.intercept)?;
    log::info!(
        "Urgency classifier loaded from {} ({:?}, {} dims)",
        path.display(),
        artifact.kind,
        model.dimension()
    );
    Ok(match artifact.kind {
        LinearKind::Logistic => UrgencyClassifier::Scoring(Arc::new(model)),
        LinearKind::LinearSvc => UrgencyClassifier::LabelOnly(Arc::new(model)),
    })
}
