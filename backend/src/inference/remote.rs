use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::{ImageClassifier, TextEmbedder};
use crate::triage::error::{ClassificationError, ConfigurationError};
use crate::triage::normalizer::NormalizedTensor;

fn build_client(timeout: Duration) -> Result<Client, ConfigurationError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigurationError::Client(e.to_string()))
}

fn backend_error(e: reqwest::Error) -> ClassificationError {
    ClassificationError::Backend(e.to_string())
}

#[derive(Serialize)]
struct PredictRequest {
    instances: Vec<Vec<Vec<Vec<f32>>>>,
}

#[derive(Deserialize)]
struct PredictResponse {
    predictions: Vec<Vec<f32>>,
}

/// Image model hosted behind a TensorFlow-Serving style REST endpoint.
pub struct RemoteImageClassifier {
    client: Client,
    endpoint: String,
    input_size: usize,
}

impl RemoteImageClassifier {
    pub fn new(
        base_url: &str,
        model: &str,
        input_size: usize,
        timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: predict_endpoint(base_url, model),
            input_size,
        })
    }
}

fn predict_endpoint(base_url: &str, model: &str) -> String {
    format!("{}/v1/models/{}:predict", base_url.trim_end_matches('/'), model)
}

impl ImageClassifier for RemoteImageClassifier {
    fn classify(&self, tensor: &NormalizedTensor) -> Result<Vec<f32>, ClassificationError> {
        tensor.check_shape(self.input_size)?;
        let body = PredictRequest {
            instances: vec![tensor.to_nested()],
        };

        let response: PredictResponse = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(backend_error)?;

        response
            .predictions
            .into_iter()
            .next()
            .filter(|p| !p.is_empty())
            .ok_or(ClassificationError::EmptyOutput)
    }

    fn describe(&self) -> String {
        self.endpoint.clone()
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    inputs: Vec<&'a str>,
}

/// Sentence-embedding model behind a text-embeddings REST endpoint
/// (`POST /embed`, one vector per input).
pub struct RemoteEmbedder {
    client: Client,
    endpoint: String,
    dimension: Option<usize>,
}

impl RemoteEmbedder {
    pub fn new(
        base_url: &str,
        dimension: Option<usize>,
        timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: format!("{}/embed", base_url.trim_end_matches('/')),
            dimension,
        })
    }
}

impl TextEmbedder for RemoteEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ClassificationError> {
        let vectors: Vec<Vec<f32>> = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest { inputs: vec![text] })
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(backend_error)?;

        let vector = vectors
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or(ClassificationError::EmptyOutput)?;

        match self.dimension {
            Some(expected) if expected != vector.len() => Err(ClassificationError::OutputLength {
                expected,
                actual: vector.len(),
            }),
            _ => Ok(vector),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predict_endpoint_format() {
        assert_eq!(
            predict_endpoint("http://models:8501/", "civic_issues"),
            "http://models:8501/v1/models/civic_issues:predict"
        );
    }

    #[test]
    fn test_request_bodies_serialize() {
        let body = serde_json::to_value(EmbedRequest {
            inputs: vec!["water leak"],
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"inputs": ["water leak"]}));

        let parsed: PredictResponse =
            serde_json::from_str(r#"{"predictions": [[0.1, 0.9]]}"#).unwrap();
        assert_eq!(parsed.predictions[0], vec![0.1, 0.9]);
    }
}
