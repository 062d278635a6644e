/// Request rejected before any model is invoked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("No images uploaded")]
    NoImages,
    #[error("No image provided")]
    NoImage,
    #[error("No description provided")]
    NoDescription,
    #[error("Description is not valid UTF-8")]
    InvalidDescription,
    #[error("Image payload is not valid base64: {0}")]
    InvalidBase64(String),
}

impl InputError {
    /// Machine-readable reason sent alongside the message.
    pub fn reason(&self) -> &'static str {
        match self {
            InputError::NoImages => "no_images",
            InputError::NoImage => "no_image",
            InputError::NoDescription => "no_description",
            InputError::InvalidDescription => "invalid_description",
            InputError::InvalidBase64(_) => "invalid_base64",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to decode image: {0}")]
pub struct DecodeError(#[from] pub image::ImageError);

#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("Tensor has shape {actual:?}, expected {expected:?}")]
    TensorShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Model returned an empty output")]
    EmptyOutput,
    #[error("Model output {value} at index {index} is not a probability")]
    InvalidOutput { index: usize, value: f32 },
    #[error("Model returned {actual} values, expected {expected}")]
    OutputLength { expected: usize, actual: usize },
    #[error("Label index {index} is outside the encoder's {len} classes")]
    UnknownLabel { index: usize, len: usize },
    #[error("Model backend error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Failed to parse artifact {path}: {source}")]
    Artifact {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Failed to build model client: {0}")]
    Client(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Classification(#[from] ClassificationError),
}
