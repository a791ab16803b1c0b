//! Multi-frame liveness assessment from landmark motion.
//!
//! A printed photo or a replayed still produces near-identical landmark
//! positions across consecutive frames, while a live subject shows
//! involuntary micro-saccades and drift. The gate scores the mean eye
//! displacement between consecutive frames and rejects sequences that are
//! either implausibly static or implausibly jittery.
//!
//! Blocks printed photographs and static replays. Does not block video
//! replay with natural motion or high-quality 3D masks.

use crate::types::Landmarks;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Minimum number of frames required to attempt an assessment.
    /// Shorter sequences can never pass: a single still is insufficient.
    pub min_frames: usize,
    /// Mean eye displacement (px) below which the sequence reads as a
    /// static reproduction. Even a steady gaze produces >1 px of movement
    /// between frames at 30 fps on a 640x480 sensor; a printed photo stays
    /// under ~0.3 px of sensor noise.
    pub min_eye_displacement: f32,
    /// Mean eye displacement (px) above which the sequence reads as
    /// implausible jitter (hand-held replay, shaking print).
    pub max_eye_displacement: f32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            min_frames: 3,
            min_eye_displacement: 0.8,
            max_eye_displacement: 24.0,
        }
    }
}

/// Verdict of a liveness assessment.
#[derive(Debug, Clone, Serialize)]
pub struct LivenessResult {
    pub is_live: bool,
    /// Confidence in the verdict, [0, 1]: distance of the observed motion
    /// from the decision boundary, normalized to the boundary's scale.
    pub confidence: f32,
    /// Mean Euclidean displacement of the eye landmarks across consecutive
    /// frame pairs.
    pub mean_eye_displacement: f32,
    /// Number of frame pairs analysed.
    pub frame_pairs: usize,
}

/// Assess liveness from per-frame landmarks of the same tracked face.
///
/// Fails closed: sequences shorter than `min_frames` return `is_live =
/// false` with zero confidence, since no motion evidence exists either way.
pub fn assess(landmark_sequence: &[Landmarks], config: &LivenessConfig) -> LivenessResult {
    if landmark_sequence.len() < config.min_frames.max(2) {
        return LivenessResult {
            is_live: false,
            confidence: 0.0,
            mean_eye_displacement: 0.0,
            frame_pairs: 0,
        };
    }

    let mut total = 0.0f32;
    let mut pairs = 0usize;
    for window in landmark_sequence.windows(2) {
        let (prev, curr) = (&window[0], &window[1]);
        // Landmarks 0 and 1 are the eye centres.
        let left = point_distance(prev[0], curr[0]);
        let right = point_distance(prev[1], curr[1]);
        total += (left + right) / 2.0;
        pairs += 1;
    }
    let mean = total / pairs as f32;

    let min = config.min_eye_displacement;
    let max = config.max_eye_displacement;

    let (is_live, confidence) = if mean < min {
        (false, (1.0 - mean / min).clamp(0.0, 1.0))
    } else if mean > max {
        (false, ((mean - max) / max).clamp(0.0, 1.0))
    } else {
        let margin = (mean - min).min(max - mean);
        let half_band = (max - min) / 2.0;
        (true, (margin / half_band).clamp(0.0, 1.0))
    };

    LivenessResult {
        is_live,
        confidence,
        mean_eye_displacement: mean,
        frame_pairs: pairs,
    }
}

fn point_distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = b.0 - a.0;
    let dy = b.1 - a.1;
    (dx * dx + dy * dy).sqrt()
}
