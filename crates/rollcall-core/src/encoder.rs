//! Embedding extraction — the encoder capability and its ArcFace implementation.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::frame::Frame;
use crate::types::{BoundingBox, Detection, Embedding};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric normalization, unlike the detectors
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("model file not found: {0} — download it into the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error(
        "detection box ({x:.1},{y:.1}) {width:.1}x{height:.1} lies outside the {frame_width}x{frame_height} frame"
    )]
    OutOfBounds {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        frame_width: u32,
        frame_height: u32,
    },
    #[error("detection box has zero extent")]
    DegenerateBox,
    #[error("detection carries no landmarks — alignment requires the five-point set")]
    MissingLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A face feature extractor.
///
/// Implementations are strictly deterministic: encoding the same
/// (frame, detection) pair twice under the same version yields bit-identical
/// embeddings. No randomness is permitted anywhere in the encoding path.
pub trait Encoder: Send {
    /// Version tag stamped on produced embeddings.
    fn version(&self) -> &'static str;

    /// Length of the embedding vectors this encoder produces.
    fn embedding_len(&self) -> usize;

    /// Extract an embedding for one detected face.
    fn encode(&mut self, frame: &Frame, detection: &Detection) -> Result<Embedding, EncodingError>;
}

/// Reject detections whose box violates the frame-bounds invariant.
pub(crate) fn validate_box(bbox: &BoundingBox, frame: &Frame) -> Result<(), EncodingError> {
    if bbox.is_degenerate() {
        return Err(EncodingError::DegenerateBox);
    }
    if !bbox.fits_within(frame.width, frame.height) {
        return Err(EncodingError::OutOfBounds {
            x: bbox.x,
            y: bbox.y,
            width: bbox.width,
            height: bbox.height,
            frame_width: frame.width,
            frame_height: frame.height,
        });
    }
    Ok(())
}

/// ArcFace-based encoder producing 512-dimensional L2-normalized embeddings.
pub struct ArcFaceEncoder {
    session: Session,
}

impl ArcFaceEncoder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EncodingError> {
        if !Path::new(model_path).exists() {
            return Err(EncodingError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Preprocess a 112×112 aligned grayscale crop into a NCHW float tensor.
    fn preprocess(aligned_face: &[u8]) -> Array4<f32> {
        let mut tensor = Array4::<f32>::zeros((1, 3, ALIGNED_SIZE, ALIGNED_SIZE));
        for y in 0..ALIGNED_SIZE {
            for x in 0..ALIGNED_SIZE {
                let pixel = aligned_face.get(y * ALIGNED_SIZE + x).copied().unwrap_or(0) as f32;
                let normalized = (pixel - ARCFACE_MEAN) / ARCFACE_STD;
                tensor[[0, 0, y, x]] = normalized;
                tensor[[0, 1, y, x]] = normalized;
                tensor[[0, 2, y, x]] = normalized;
            }
        }
        tensor
    }
}

impl Encoder for ArcFaceEncoder {
    fn version(&self) -> &'static str {
        ARCFACE_MODEL_VERSION
    }

    fn embedding_len(&self) -> usize {
        ARCFACE_EMBEDDING_DIM
    }

    fn encode(&mut self, frame: &Frame, detection: &Detection) -> Result<Embedding, EncodingError> {
        validate_box(&detection.bbox, frame)?;
        let landmarks = detection
            .landmarks
            .as_ref()
            .ok_or(EncodingError::MissingLandmarks)?;

        let aligned = alignment::align(frame, landmarks);
        let input = Self::preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncodingError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(EncodingError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        // L2-normalize so cosine similarity reduces to a dot product.
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };

        Ok(Embedding {
            values,
            encoder_version: ARCFACE_MODEL_VERSION.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_100() -> Frame {
        Frame::from_grayscale(vec![128u8; 100 * 100], 100, 100).unwrap()
    }

    #[test]
    fn validate_rejects_degenerate_box() {
        let bbox = BoundingBox { x: 10.0, y: 10.0, width: 0.0, height: 20.0 };
        assert!(matches!(
            validate_box(&bbox, &frame_100()),
            Err(EncodingError::DegenerateBox)
        ));
    }

    #[test]
    fn validate_rejects_out_of_bounds_box() {
        let bbox = BoundingBox { x: 90.0, y: 10.0, width: 20.0, height: 20.0 };
        assert!(matches!(
            validate_box(&bbox, &frame_100()),
            Err(EncodingError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn validate_accepts_interior_box() {
        let bbox = BoundingBox { x: 10.0, y: 10.0, width: 50.0, height: 50.0 };
        assert!(validate_box(&bbox, &frame_100()).is_ok());
    }

    #[test]
    fn preprocess_output_shape() {
        let aligned = vec![128u8; ALIGNED_SIZE * ALIGNED_SIZE];
        let tensor = ArcFaceEncoder::preprocess(&aligned);
        assert_eq!(tensor.shape(), &[1, 3, ALIGNED_SIZE, ALIGNED_SIZE]);
    }

    #[test]
    fn preprocess_normalization() {
        let aligned = vec![128u8; ALIGNED_SIZE * ALIGNED_SIZE];
        let tensor = ArcFaceEncoder::preprocess(&aligned);
        let expected = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn preprocess_is_deterministic() {
        let aligned: Vec<u8> = (0..ALIGNED_SIZE * ALIGNED_SIZE)
            .map(|i| (i % 256) as u8)
            .collect();
        assert_eq!(
            ArcFaceEncoder::preprocess(&aligned),
            ArcFaceEncoder::preprocess(&aligned)
        );
    }

    #[test]
    fn preprocess_replicates_channels() {
        let aligned = vec![100u8; ALIGNED_SIZE * ALIGNED_SIZE];
        let tensor = ArcFaceEncoder::preprocess(&aligned);
        for y in 0..ALIGNED_SIZE {
            for x in 0..ALIGNED_SIZE {
                assert_eq!(tensor[[0, 0, y, x]], tensor[[0, 1, y, x]]);
                assert_eq!(tensor[[0, 1, y, x]], tensor[[0, 2, y, x]]);
            }
        }
    }
}
