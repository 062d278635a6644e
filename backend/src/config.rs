use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::inference::linear::load_urgency_classifier;
use crate::inference::remote::{RemoteEmbedder, RemoteImageClassifier};
use crate::inference::ImageClassifier;
use crate::triage::error::ConfigurationError;
use crate::triage::gate::{ConsensusGate, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::triage::labels::{ImageLabelResolver, LabelEncoder};
use crate::triage::normalizer::INPUT_SIZE;
use crate::triage::pipeline::TriagePipeline;
use crate::triage::urgency::UrgencyStage;

pub const DEFAULT_CONFIG_PATH: &str = "config/triage.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gate: GateConfig,
    pub image_classifier: ImageClassifierConfig,
    pub embedder: EmbedderConfig,
    pub urgency: UrgencyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageClassifierConfig {
    #[serde(flatten)]
    pub backend: ImageBackend,
    #[serde(default)]
    pub label_encoder: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum ImageBackend {
    Remote {
        url: String,
        model: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    Torch {
        path: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    pub url: String,
    #[serde(default)]
    pub dimension: Option<usize>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrgencyConfig {
    pub classifier: PathBuf,
    #[serde(default)]
    pub label_encoder: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_threshold() -> f32 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

fn default_input_size() -> u32 {
    INPUT_SIZE
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_threshold(),
            input_size: default_input_size(),
        }
    }
}

impl TriageConfig {
    /// Reads the file named by `TRIAGE_CONFIG` (or the default path), then
    /// applies `HOST`/`PORT` overrides.
    pub fn load() -> Result<Self, ConfigurationError> {
        let path = std::env::var("TRIAGE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;

        if let Ok(host) = std::env::var("HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| ConfigurationError::Invalid(format!("PORT is not a port number: {}", port)))?;
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigurationError> {
        let config: TriageConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(0.0..=1.0).contains(&self.gate.confidence_threshold) {
            return Err(ConfigurationError::Invalid(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.gate.confidence_threshold
            )));
        }
        if self.gate.input_size == 0 {
            return Err(ConfigurationError::Invalid("input_size must be positive".into()));
        }
        if self.urgency.label_encoder.is_none() {
            return Err(ConfigurationError::Invalid(
                "urgency.label_encoder is required".into(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Loads every model artifact and client the pipeline needs. Any failure
    /// here means the process must not serve.
    pub fn build_pipeline(&self) -> Result<TriagePipeline, ConfigurationError> {
        let input_size = self.gate.input_size as usize;
        let classifier: Arc<dyn ImageClassifier> = match &self.image_classifier.backend {
            ImageBackend::Remote {
                url,
                model,
                timeout_secs,
            } => Arc::new(RemoteImageClassifier::new(
                url,
                model,
                input_size,
                Duration::from_secs(*timeout_secs),
            )?),
            #[cfg(feature = "torch")]
            ImageBackend::Torch { path } => Arc::new(
                crate::inference::torch::TorchImageClassifier::load(path, input_size)?,
            ),
            #[cfg(not(feature = "torch"))]
            ImageBackend::Torch { path } => {
                return Err(ConfigurationError::Invalid(format!(
                    "image model {} needs the `torch` feature",
                    path
                )));
            }
        };
        log::info!("Image classification model: {}", classifier.describe());

        let labels = ImageLabelResolver::from_optional_path(self.image_classifier.label_encoder.as_deref())?;
        let gate = ConsensusGate::new(classifier, labels, self.gate.confidence_threshold);

        let embedder = RemoteEmbedder::new(
            &self.embedder.url,
            self.embedder.dimension,
            Duration::from_secs(self.embedder.timeout_secs),
        )?;
        let urgency_classifier = load_urgency_classifier(&self.urgency.classifier)?;
        let urgency_labels = match &self.urgency.label_encoder {
            Some(path) => LabelEncoder::load(path)?,
            None => {
                return Err(ConfigurationError::Invalid(
                    "urgency.label_encoder is required".into(),
                ));
            }
        };
        log::info!("Urgency label encoder: {} classes", urgency_labels.len());

        let urgency = UrgencyStage::new(Arc::new(embedder), urgency_classifier, urgency_labels);
        if !urgency.supports_confidence() {
            log::warn!("Urgency classifier cannot score predictions; confidence will be null");
        }
        Ok(TriagePipeline::new(gate, urgency, self.gate.input_size))
    }
}
