use serde::{Deserialize, Serialize};

/// Axis-aligned face bounding box in source-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Intersection-over-Union with another box, in [0, 1].
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter_w = (x2 - x1).max(0.0);
        let inter_h = (y2 - y1).max(0.0);
        let inter_area = inter_w * inter_h;

        let union_area = self.area() + other.area() - inter_area;
        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }

    /// Clamp the box to lie within a `width` × `height` frame.
    ///
    /// A box entirely outside the frame clamps to zero extent; callers
    /// validate with [`is_degenerate`](Self::is_degenerate) before cropping.
    pub fn clamp_to(&self, width: u32, height: u32) -> BoundingBox {
        let fw = width as f32;
        let fh = height as f32;
        let x1 = self.x.clamp(0.0, fw);
        let y1 = self.y.clamp(0.0, fh);
        let x2 = (self.x + self.width).clamp(0.0, fw);
        let y2 = (self.y + self.height).clamp(0.0, fh);
        BoundingBox {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0.0),
            height: (y2 - y1).max(0.0),
        }
    }

    /// True when the box has zero or negative extent.
    pub fn is_degenerate(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// True when the box lies fully within a `width` × `height` frame.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.x + self.width <= width as f32
            && self.y + self.height <= height as f32
    }
}

/// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type Landmarks = [(f32, f32); 5];

/// One located face, tagged with the algorithm that produced it.
///
/// Detections are produced per detector invocation and consumed by the
/// merger; they are never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Five-point landmarks, when the producing algorithm emits them.
    pub landmarks: Option<Landmarks>,
    /// Confidence in [0, 1] on the producing algorithm's own scale.
    pub confidence: f32,
    /// Tag of the producing algorithm ("scrfd", "yunet", ...).
    pub algorithm: String,
}

/// Face embedding vector (512-dimensional for ArcFace).
///
/// Two embeddings are only comparable when produced by the same encoder
/// version with the same length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Encoder version that produced this embedding (e.g. "w600k_r50").
    pub encoder_version: String,
}

impl Embedding {
    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Zero-norm or length-mismatched inputs
    /// compare as 0.0, never NaN. Always processes all dimensions.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return 0.0;
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// An enrolled identity with its reference embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Unique key across the gallery (e.g. an employee id).
    pub key: String,
    pub name: String,
    /// Reference embeddings; at least one is required to be matchable.
    pub embeddings: Vec<Embedding>,
    /// RFC 3339 enrollment timestamp.
    pub enrolled_at: String,
}
