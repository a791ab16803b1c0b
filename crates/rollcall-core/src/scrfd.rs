//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free detection head with three stride levels, decoded into
//! landmark-bearing [`Detection`]s and deduplicated with per-algorithm NMS.

use crate::detector::{suppress_overlaps, DetectionError, Detector};
use crate::frame::{bilinear_resize, Frame, Letterbox};
use crate::types::{BoundingBox, Detection};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

pub const SCRFD_ALGORITHM: &str = "scrfd";

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Session,
    input_size: usize,
    /// Per-stride output indices [(score, bbox, kps)] for strides [8, 16, 32].
    /// Discovered by name at load time; falls back to positional ordering.
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectionError> {
        if !Path::new(model_path).exists() {
            return Err(DetectionError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectionError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides x score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            input_size: SCRFD_INPUT_SIZE,
            stride_indices,
        })
    }

    /// Preprocess a frame into a letterboxed NCHW float tensor.
    fn preprocess(&self, frame: &Frame) -> (Array4<f32>, Letterbox) {
        let letterbox = Letterbox::fit(frame.width as usize, frame.height as usize, self.input_size);
        let resized = bilinear_resize(
            &frame.data,
            frame.width as usize,
            frame.height as usize,
            letterbox.content_w,
            letterbox.content_h,
        );

        let pad_x = letterbox.pad_x.floor() as usize;
        let pad_y = letterbox.pad_y.floor() as usize;

        let mut tensor = Array4::<f32>::zeros((1, 3, self.input_size, self.input_size));
        for y in 0..self.input_size {
            for x in 0..self.input_size {
                let pixel = if y >= pad_y
                    && y < pad_y + letterbox.content_h
                    && x >= pad_x
                    && x < pad_x + letterbox.content_w
                {
                    resized[(y - pad_y) * letterbox.content_w + (x - pad_x)] as f32
                } else {
                    SCRFD_MEAN // pad value normalizes to 0.0
                };

                let normalized = (pixel - SCRFD_MEAN) / SCRFD_STD;
                // Grayscale replicated into all three input channels.
                tensor[[0, 0, y, x]] = normalized;
                tensor[[0, 1, y, x]] = normalized;
                tensor[[0, 2, y, x]] = normalized;
            }
        }

        (tensor, letterbox)
    }

    /// Decode all anchors of one stride level into frame-space detections.
    fn decode_stride(
        input_size: usize,
        scores: &[f32],
        bboxes: &[f32],
        kps: &[f32],
        stride: usize,
        letterbox: &Letterbox,
    ) -> Vec<Detection> {
        let grid = input_size / stride;
        let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;

        let mut detections = Vec::new();
        for idx in 0..num_anchors {
            let score = scores.get(idx).copied().unwrap_or(0.0);
            if score <= SCRFD_CONFIDENCE_THRESHOLD {
                continue;
            }

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let anchor_cx = ((cell % grid) * stride) as f32;
            let anchor_cy = ((cell / grid) * stride) as f32;

            // Box offsets are [left, top, right, bottom] distances in stride units.
            let off = idx * 4;
            if off + 3 >= bboxes.len() {
                continue;
            }
            let (x1, y1) = letterbox.unmap(
                anchor_cx - bboxes[off] * stride as f32,
                anchor_cy - bboxes[off + 1] * stride as f32,
            );
            let (x2, y2) = letterbox.unmap(
                anchor_cx + bboxes[off + 2] * stride as f32,
                anchor_cy + bboxes[off + 3] * stride as f32,
            );

            let kps_off = idx * 10;
            let landmarks = if kps_off + 9 < kps.len() {
                let mut lms = [(0.0f32, 0.0f32); 5];
                for (i, lm) in lms.iter_mut().enumerate() {
                    *lm = letterbox.unmap(
                        anchor_cx + kps[kps_off + i * 2] * stride as f32,
                        anchor_cy + kps[kps_off + i * 2 + 1] * stride as f32,
                    );
                }
                Some(lms)
            } else {
                None
            };

            detections.push(Detection {
                bbox: BoundingBox {
                    x: x1,
                    y: y1,
                    width: x2 - x1,
                    height: y2 - y1,
                },
                landmarks,
                confidence: score,
                algorithm: SCRFD_ALGORITHM.to_string(),
            });
        }

        detections
    }
}

impl Detector for ScrfdDetector {
    fn algorithm(&self) -> &'static str {
        SCRFD_ALGORITHM
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        let (input, letterbox) = self.preprocess(frame);
        let input_size = self.input_size;

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectionError::InferenceFailed(format!("scores stride {stride}: {e}"))
            })?;
            let (_, bboxes) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectionError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
            })?;
            let (_, kps) = outputs[kps_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectionError::InferenceFailed(format!("kps stride {stride}: {e}"))
            })?;

            all.extend(Self::decode_stride(
                input_size, scores, bboxes, kps, stride, &letterbox,
            ));
        }

        let mut result = suppress_overlaps(all, SCRFD_NMS_THRESHOLD);
        for det in &mut result {
            det.bbox = det.bbox.clamp_to(frame.width, frame.height);
        }
        result.retain(|d| !d.bbox.is_degenerate());

        Ok(result)
    }
}

/// Discover output tensor ordering by name.
///
/// SCRFD exports name tensors either as "score_8"/"bbox_16"/"kps_32" or as
/// opaque integers. Named patterns are mapped to stride slots; otherwise the
/// standard positional layout applies:
///   [0-2] = scores (strides 8, 16, 32)
///   [3-5] = bboxes (strides 8, 16, 32)
///   [6-8] = kps    (strides 8, 16, 32)
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named = SCRFD_STRIDES.iter().all(|&stride| {
        find("score", stride).is_some()
            && find("bbox", stride).is_some()
            && find("kps", stride).is_some()
    });

    if named {
        tracing::info!("SCRFD: using name-based output tensor mapping");
        std::array::from_fn(|i| {
            let stride = SCRFD_STRIDES[i];
            (
                find("score", stride).unwrap(),
                find("bbox", stride).unwrap(),
                find("kps", stride).unwrap(),
            )
        })
    } else {
        tracing::info!(
            ?names,
            "SCRFD: output names not recognized, using positional mapping"
        );
        [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_named_outputs() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32",
            "bbox_8", "bbox_16", "bbox_32",
            "kps_8", "kps_16", "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices[0], (0, 3, 6));
        assert_eq!(indices[1], (1, 4, 7));
        assert_eq!(indices[2], (2, 5, 8));
    }

    #[test]
    fn discover_shuffled_named_outputs() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices[0], (2, 0, 1));
        assert_eq!(indices[1], (5, 3, 4));
        assert_eq!(indices[2], (8, 6, 7));
    }

    #[test]
    fn discover_falls_back_to_positional() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(
            discover_output_indices(&names),
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        );
    }
}
