use std::sync::Mutex;

use tch::{CModule, Device, Kind, Tensor};

use super::ImageClassifier;
use crate::triage::error::{ClassificationError, ConfigurationError};
use crate::triage::normalizer::{CHANNELS, NormalizedTensor};

/// TorchScript export of the image model, run in-process. Takes NHWC input
/// and returns logits, which are softmaxed here.
pub struct TorchImageClassifier {
    model: Mutex<CModule>,
    device: Device,
    path: String,
    input_size: usize,
}

impl TorchImageClassifier {
    pub fn load(model_path: &str, input_size: usize) -> Result<Self, ConfigurationError> {
        let device = Device::cuda_if_available();
        let model = CModule::load_on_device(model_path, device)
            .map_err(|e| ConfigurationError::Client(format!("{}: {}", model_path, e)))?;
        log::info!("TorchScript image model loaded from {} on {:?}", model_path, device);
        Ok(Self {
            model: Mutex::new(model),
            device,
            path: model_path.to_string(),
            input_size,
        })
    }
}

impl ImageClassifier for TorchImageClassifier {
    fn classify(&self, tensor: &NormalizedTensor) -> Result<Vec<f32>, ClassificationError> {
        tensor.check_shape(self.input_size)?;
        let side = self.input_size as i64;
        let input = Tensor::from_slice(&tensor.to_vec())
            .view([1, side, side, CHANNELS as i64])
            .to_device(self.device);

        let output = {
            let model = self
                .model
                .lock()
                .map_err(|_| ClassificationError::Backend("model lock poisoned".into()))?;
            model
                .forward_ts(&[input])
                .map_err(|e| ClassificationError::Backend(e.to_string()))?
        };

        let output_flat = output
            .softmax(-1, Kind::Float)
            .to_device(Device::Cpu)
            .view([-1]);
        let num_elements = output_flat.size()[0] as usize;
        let mut output_vec = vec![0.0f32; num_elements];
        output_flat.copy_data(&mut output_vec, num_elements);
        Ok(output_vec)
    }

    fn describe(&self) -> String {
        self.path.clone()
    }
}
