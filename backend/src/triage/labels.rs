use std::path::Path;

use serde::Deserialize;
use shared::ImageCategory;
use strum::IntoEnumIterator;

use super::error::{ClassificationError, ConfigurationError};

/// Ordered class names exported next to a trained model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EncoderArtifact {
    Bare(Vec<String>),
    Wrapped { classes: Vec<String> },
}

impl LabelEncoder {
    pub fn new(classes: Vec<String>) -> Result<Self, ConfigurationError> {
        if classes.is_empty() {
            return Err(ConfigurationError::Invalid(
                "label encoder has no classes".into(),
            ));
        }
        Ok(Self { classes })
    }

    /// Accepts either a bare JSON array or `{"classes": [...]}`.
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let artifact: EncoderArtifact =
            serde_json::from_str(&raw).map_err(|source| ConfigurationError::Artifact {
                path: path.display().to_string(),
                source,
            })?;
        let classes = match artifact {
            EncoderArtifact::Bare(classes) => classes,
            EncoderArtifact::Wrapped { classes } => classes,
        };
        Self::new(classes)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn inverse_transform(&self, index: usize) -> Result<&str, ClassificationError> {
        self.classes
            .get(index)
            .map(String::as_str)
            .ok_or(ClassificationError::UnknownLabel {
                index,
                len: self.classes.len(),
            })
    }
}

/// Fallback when no encoder was shipped with the image model: the canonical
/// category order, then `class_<index>` past its end.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedListResolver;

impl FixedListResolver {
    pub fn resolve(&self, index: usize) -> String {
        match ImageCategory::iter().nth(index) {
            Some(category) => category.to_string(),
            None => format!("class_{}", index),
        }
    }

    #[cfg(test)]
    pub fn position(&self, label: &str) -> Option<usize> {
        ImageCategory::iter().position(|c| c.as_ref() == label)
    }
}

/// Maps the image model's arg-max index to a category name. Chosen once at
/// startup.
#[derive(Debug, Clone)]
pub enum ImageLabelResolver {
    Learned(LabelEncoder),
    FixedList(FixedListResolver),
}

impl ImageLabelResolver {
    pub fn from_optional_path(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        match path {
            Some(path) if path.exists() => {
                let encoder = LabelEncoder::load(path)?;
                log::info!(
                    "Image label encoder loaded from {} ({} classes)",
                    path.display(),
                    encoder.len()
                );
                Ok(ImageLabelResolver::Learned(encoder))
            }
            Some(path) => {
                log::warn!(
                    "No image label encoder at {}. Using default category order.",
                    path.display()
                );
                Ok(ImageLabelResolver::FixedList(FixedListResolver))
            }
            None => {
                log::info!("No image label encoder configured. Using default category order.");
                Ok(ImageLabelResolver::FixedList(FixedListResolver))
            }
        }
    }

    pub fn resolve(&self, index: usize) -> Result<String, ClassificationError> {
        match self {
            ImageLabelResolver::Learned(encoder) => {
                encoder.inverse_transform(index).map(str::to_string)
            }
            ImageLabelResolver::FixedList(list) => Ok(list.resolve(index)),
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            ImageLabelResolver::Learned(_) => "label_encoder",
            ImageLabelResolver::FixedList(_) => "default_categories",
        }
    }
}
