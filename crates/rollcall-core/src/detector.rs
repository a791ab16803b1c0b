//! The detector capability and detection error taxonomy.

use crate::frame::Frame;
use crate::types::Detection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("image could not be decoded: {0}")]
    UndecodableImage(String),
    #[error("frame has no usable resolution ({width}x{height})")]
    ZeroResolution { width: u32, height: u32 },
    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    InvalidBuffer { expected: usize, actual: usize },
    #[error("model file not found: {0} — download it into the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A face-detection algorithm.
///
/// Each call returns a finite, confidence-sorted list of detections and
/// mutates no shared state. Confidence values are on the implementation's
/// own scale; callers must not compare them across algorithms without an
/// explicit policy (see the merger's trust order).
pub trait Detector: Send {
    /// Stable tag identifying the algorithm ("scrfd", "yunet", ...).
    fn algorithm(&self) -> &'static str;

    /// Detect faces in a grayscale frame, sorted by confidence descending.
    ///
    /// Returned boxes are clamped to the frame bounds.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectionError>;
}

/// Within-algorithm non-maximum suppression.
///
/// Removes detections overlapping an already-kept higher-confidence one.
/// Cross-algorithm deduplication is the merger's job; this runs inside each
/// detector on its own raw candidates.
pub(crate) fn suppress_overlaps(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        let overlaps = keep.iter().any(|k| k.bbox.iou(&det.bbox) > iou_threshold);
        if !overlaps {
            keep.push(det);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    fn det(x: f32, y: f32, w: f32, h: f32, conf: f32) -> Detection {
        Detection {
            bbox: BoundingBox { x, y, width: w, height: h },
            landmarks: None,
            confidence: conf,
            algorithm: "test".into(),
        }
    }

    #[test]
    fn suppression_drops_overlapping_lower_confidence() {
        let dets = vec![
            det(0.0, 0.0, 100.0, 100.0, 0.9),
            det(5.0, 5.0, 100.0, 100.0, 0.8),
            det(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let kept = suppress_overlaps(dets, 0.4);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn suppression_keeps_disjoint() {
        let dets = vec![
            det(0.0, 0.0, 10.0, 10.0, 0.9),
            det(50.0, 50.0, 10.0, 10.0, 0.8),
        ];
        assert_eq!(suppress_overlaps(dets, 0.4).len(), 2);
    }

    #[test]
    fn suppression_empty() {
        assert!(suppress_overlaps(vec![], 0.4).is_empty());
    }
}
