//! Cross-algorithm detection merging.
//!
//! Multiple detectors report the same physical face as overlapping boxes;
//! the merger reduces them to a ranked, non-overlapping candidate list.

use crate::types::Detection;

/// Merge policy. Trust order breaks exact confidence ties because raw
/// confidences are not calibrated across algorithms.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Maximum number of faces to keep (K).
    pub max_faces: usize,
    /// IoU above which two detections count as the same face.
    pub iou_threshold: f32,
    /// Algorithm tags in descending trust order; unknown tags rank last.
    pub trust_order: Vec<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_faces: 3,
            iou_threshold: 0.5,
            trust_order: vec!["scrfd".to_string(), "yunet".to_string()],
        }
    }
}

/// Merge detections from any number of algorithms into a ranked,
/// non-overlapping list of at most `max_faces` entries.
///
/// Sorts by confidence descending (equal confidence prefers the
/// higher-trust algorithm, then the lexicographically smaller tag so the
/// order is total), then greedily accepts detections that do not overlap an
/// already-accepted one beyond `iou_threshold`.
///
/// Empty input yields empty output. Merging an already-merged list returns
/// it unchanged.
pub fn merge(mut detections: Vec<Detection>, config: &MergeConfig) -> Vec<Detection> {
    let trust_rank = |algorithm: &str| {
        config
            .trust_order
            .iter()
            .position(|t| t == algorithm)
            .unwrap_or(usize::MAX)
    };

    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| trust_rank(&a.algorithm).cmp(&trust_rank(&b.algorithm)))
            .then_with(|| a.algorithm.cmp(&b.algorithm))
    });

    let mut accepted: Vec<Detection> = Vec::new();
    for det in detections {
        if accepted.len() == config.max_faces {
            break;
        }
        let duplicate = accepted
            .iter()
            .any(|kept| kept.bbox.iou(&det.bbox) > config.iou_threshold);
        if !duplicate {
            accepted.push(det);
        }
    }
    accepted
}
