use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::imageops::FilterType;
use image::{ImageError, ImageFormat, ImageReader, RgbImage};
use ndarray::Array3;
use sha2::{Digest, Sha256};

use super::error::{ClassificationError, DecodeError, InputError};

/// Side length the image classifier was trained on.
pub const INPUT_SIZE: u32 = 224;
pub const CHANNELS: usize = 3;

/// One uploaded photo, still encoded.
#[derive(Debug, Clone)]
pub struct ImageSample {
    bytes: Vec<u8>,
    declared: Option<ImageFormat>,
}

impl ImageSample {
    /// Raw multipart upload; `mime` is the part's declared content type.
    pub fn from_upload(bytes: Vec<u8>, mime: Option<&str>) -> Self {
        Self {
            bytes,
            declared: mime.and_then(ImageFormat::from_mime_type),
        }
    }

    /// Base64 payload from a JSON body. A leading `data:image/...;base64,`
    /// prefix is tolerated.
    pub fn from_base64(payload: &str) -> Result<Self, InputError> {
        let (mime, encoded) = match payload.strip_prefix("data:") {
            Some(rest) => match rest.split_once(',') {
                Some((header, data)) => (header.strip_suffix(";base64"), data),
                None => return Err(InputError::InvalidBase64("data URI without payload".into())),
            },
            None => (None, payload),
        };

        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| InputError::InvalidBase64(e.to_string()))?;
        Ok(Self::from_upload(bytes, mime))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Short content hash for log lines.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(12);
        digest
    }

    /// Decode, force RGB, stretch to `size`x`size` and scale to [0,1].
    /// Aspect ratio is not preserved.
    pub fn normalize(&self, size: u32) -> Result<NormalizedTensor, DecodeError> {
        let mut reader = ImageReader::new(Cursor::new(&self.bytes))
            .with_guessed_format()
            .map_err(ImageError::IoError)?;
        if reader.format().is_none() {
            if let Some(format) = self.declared {
                reader.set_format(format);
            }
        }

        let rgb = reader.decode()?.to_rgb8();
        let resized = image::imageops::resize(&rgb, size, size, FilterType::CatmullRom);
        Ok(NormalizedTensor::from_rgb(&resized))
    }
}

/// HWC float tensor with channel values in [0,1].
#[derive(Debug, Clone)]
pub struct NormalizedTensor {
    data: Array3<f32>,
}

impl NormalizedTensor {
    pub fn from_rgb(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        let data = Array3::from_shape_fn(
            (height as usize, width as usize, CHANNELS),
            |(y, x, c)| image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0,
        );
        Self { data }
    }

    #[cfg(test)]
    pub fn from_array(data: Array3<f32>) -> Self {
        Self { data }
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    #[cfg(test)]
    pub fn view(&self) -> ndarray::ArrayView3<'_, f32> {
        self.data.view()
    }

    /// Row-major copy of the pixel data.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }

    /// Nested `[row][col][channel]` form used by JSON model endpoints.
    pub fn to_nested(&self) -> Vec<Vec<Vec<f32>>> {
        self.data
            .outer_iter()
            .map(|row| row.outer_iter().map(|px| px.to_vec()).collect())
            .collect()
    }

    pub fn check_shape(&self, side: usize) -> Result<(), ClassificationError> {
        let expected = [side, side, CHANNELS];
        if self.shape() != expected {
            return Err(ClassificationError::TensorShape {
                expected: expected.to_vec(),
                actual: self.shape().to_vec(),
            });
        }
        Ok(())
    }
}
