//! rollcall-core — face detection, embedding and matching engine.
//!
//! Detection runs through the [`Detector`] capability with two ONNX-backed
//! algorithms (SCRFD and YuNet); embeddings come from ArcFace. All inference
//! runs via ONNX Runtime on CPU.

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod frame;
pub mod liveness;
pub mod matcher;
pub mod merger;
pub mod scrfd;
pub mod types;
pub mod yunet;

pub use detector::{DetectionError, Detector};
pub use encoder::{Encoder, EncodingError};
pub use frame::Frame;
pub use matcher::MatchDecision;
pub use types::{BoundingBox, Detection, Embedding, Identity, Landmarks};
