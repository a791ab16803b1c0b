//! YuNet face detector via ONNX Runtime.
//!
//! Lightweight per-cell detection head (one prior per cell) over three
//! stride levels, scoring each cell as sqrt(cls * obj). YuNet emits the same
//! five facial landmarks as SCRFD, in a different order, so its detections
//! can feed alignment directly after reordering.

use crate::detector::{suppress_overlaps, DetectionError, Detector};
use crate::frame::{bilinear_resize, Frame, Letterbox};
use crate::types::{BoundingBox, Detection};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

pub const YUNET_ALGORITHM: &str = "yunet";

const YUNET_INPUT_SIZE: usize = 640;
const YUNET_SCORE_THRESHOLD: f32 = 0.6;
const YUNET_NMS_THRESHOLD: f32 = 0.3;
const YUNET_STRIDES: [usize; 3] = [8, 16, 32];

/// Output tensor indices for one stride: (cls_idx, obj_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize, usize);

/// YuNet-based face detector.
///
/// Expects the fixed 640x640-input export of the model; frames are
/// letterboxed into it.
pub struct YuNetDetector {
    session: Session,
    input_size: usize,
    stride_indices: [StrideOutputIndices; 3],
}

impl YuNetDetector {
    /// Load the YuNet ONNX model from the given path.
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
            "loaded YuNet model"
        );

        if output_names.len() < 12 {
            return Err(DetectionError::InferenceFailed(format!(
                "YuNet model requires 12 outputs (3 strides x cls/obj/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "YuNet output tensor mapping");

        Ok(Self {
            session,
            input_size: YUNET_INPUT_SIZE,
            stride_indices,
        })
    }

    /// Preprocess a frame into a letterboxed NCHW float tensor.
    ///
    /// YuNet takes raw 0–255 pixel values without normalization; the
    /// grayscale plane is replicated into all three channels.
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
                    0.0
                };
                tensor[[0, 0, y, x]] = pixel;
                tensor[[0, 1, y, x]] = pixel;
                tensor[[0, 2, y, x]] = pixel;
            }
        }

        (tensor, letterbox)
    }
}

impl Detector for YuNetDetector {
    fn algorithm(&self) -> &'static str {
        YUNET_ALGORITHM
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        let (input, letterbox) = self.preprocess(frame);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all = Vec::new();
        for (stride_pos, &stride) in YUNET_STRIDES.iter().enumerate() {
            let (cls_idx, obj_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

            let (_, cls) = outputs[cls_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectionError::InferenceFailed(format!("cls stride {stride}: {e}"))
            })?;
            let (_, obj) = outputs[obj_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectionError::InferenceFailed(format!("obj stride {stride}: {e}"))
            })?;
            let (_, bboxes) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectionError::InferenceFailed(format!("bbox stride {stride}: {e}"))
            })?;
            let (_, kps) = outputs[kps_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectionError::InferenceFailed(format!("kps stride {stride}: {e}"))
            })?;

            all.extend(decode_stride(
                cls,
                obj,
                bboxes,
                kps,
                stride,
                self.input_size,
                &letterbox,
            ));
        }

        let mut result = suppress_overlaps(all, YUNET_NMS_THRESHOLD);
        for det in &mut result {
            det.bbox = det.bbox.clamp_to(frame.width, frame.height);
        }
        result.retain(|d| !d.bbox.is_degenerate());

        Ok(result)
    }
}

/// Decode one stride plane of the YuNet head into frame-space detections.
///
/// Per cell: score = sqrt(cls * obj); box center = (cell + offset) * stride,
/// box extent = exp(raw) * stride; landmarks = (cell + offset) * stride.
/// YuNet's landmark order [right_eye, left_eye, nose, mouth_right,
/// mouth_left] is reordered into the canonical five-point layout.
fn decode_stride(
    cls: &[f32],
    obj: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    input_size: usize,
    letterbox: &Letterbox,
) -> Vec<Detection> {
    let grid = input_size / stride;
    let cells = grid * grid;

    let mut detections = Vec::new();
    for idx in 0..cells {
        let cls_score = cls.get(idx).copied().unwrap_or(0.0).clamp(0.0, 1.0);
        let obj_score = obj.get(idx).copied().unwrap_or(0.0).clamp(0.0, 1.0);
        let score = (cls_score * obj_score).sqrt();
        if score <= YUNET_SCORE_THRESHOLD {
            continue;
        }

        let col = (idx % grid) as f32;
        let row = (idx / grid) as f32;

        let off = idx * 4;
        if off + 3 >= bboxes.len() {
            continue;
        }
        let cx = (col + bboxes[off]) * stride as f32;
        let cy = (row + bboxes[off + 1]) * stride as f32;
        let w = bboxes[off + 2].exp() * stride as f32;
        let h = bboxes[off + 3].exp() * stride as f32;

        let (x1, y1) = letterbox.unmap(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.unmap(cx + w / 2.0, cy + h / 2.0);

        let kps_off = idx * 10;
        let landmarks = if kps_off + 9 < kps.len() {
            let mut raw = [(0.0f32, 0.0f32); 5];
            for (i, lm) in raw.iter_mut().enumerate() {
                *lm = letterbox.unmap(
                    (col + kps[kps_off + i * 2]) * stride as f32,
                    (row + kps[kps_off + i * 2 + 1]) * stride as f32,
                );
            }
            // [right_eye, left_eye, nose, mouth_right, mouth_left]
            //   -> [left_eye, right_eye, nose, left_mouth, right_mouth]
            Some([raw[1], raw[0], raw[2], raw[4], raw[3]])
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
            algorithm: YUNET_ALGORITHM.to_string(),
        });
    }

    detections
}

/// Discover output tensor ordering by name, with positional fallback:
///   [0-2] = cls, [3-5] = obj, [6-8] = bbox, [9-11] = kps (strides 8, 16, 32).
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named = YUNET_STRIDES.iter().all(|&stride| {
        find("cls", stride).is_some()
            && find("obj", stride).is_some()
            && find("bbox", stride).is_some()
            && find("kps", stride).is_some()
    });

    if named {
        tracing::info!("YuNet: using name-based output tensor mapping");
        std::array::from_fn(|i| {
            let stride = YUNET_STRIDES[i];
            (
                find("cls", stride).unwrap(),
                find("obj", stride).unwrap(),
                find("bbox", stride).unwrap(),
                find("kps", stride).unwrap(),
            )
        })
    } else {
        tracing::info!(
            ?names,
            "YuNet: output names not recognized, using positional mapping"
        );
        [(0, 3, 6, 9), (1, 4, 7, 10), (2, 5, 8, 11)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_letterbox() -> Letterbox {
        Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            content_w: 640,
            content_h: 640,
        }
    }

    /// One 2x2 grid (stride 320 over a 640 input) with a single hot cell.
    fn hot_cell_planes(cell: usize) -> (Vec<f32>, Vec<f32>, Vec<f32>, Vec<f32>) {
        let mut cls = vec![0.0f32; 4];
        let mut obj = vec![0.0f32; 4];
        cls[cell] = 0.81;
        obj[cell] = 1.0;

        let mut bboxes = vec![0.0f32; 16];
        // center at cell origin + 0.5 cells, extent exp(0) = 1 stride
        bboxes[cell * 4] = 0.5;
        bboxes[cell * 4 + 1] = 0.5;

        let mut kps = vec![0.0f32; 40];
        for i in 0..5 {
            kps[cell * 10 + i * 2] = 0.1 * (i as f32 + 1.0);
            kps[cell * 10 + i * 2 + 1] = 0.2;
        }
        (cls, obj, bboxes, kps)
    }

    #[test]
    fn decode_hot_cell_box_geometry() {
        let (cls, obj, bboxes, kps) = hot_cell_planes(0);
        let dets = decode_stride(&cls, &obj, &bboxes, &kps, 320, 640, &identity_letterbox());
        assert_eq!(dets.len(), 1);

        let d = &dets[0];
        // score = sqrt(0.81 * 1.0)
        assert!((d.confidence - 0.9).abs() < 1e-6);
        // center (0.5, 0.5) cells * 320 = (160, 160); extent = 320
        assert!((d.bbox.x - 0.0).abs() < 1e-3);
        assert!((d.bbox.width - 320.0).abs() < 1e-3);
        assert_eq!(d.algorithm, YUNET_ALGORITHM);
    }

    #[test]
    fn decode_reorders_landmarks_to_canonical() {
        let (cls, obj, bboxes, kps) = hot_cell_planes(0);
        let dets = decode_stride(&cls, &obj, &bboxes, &kps, 320, 640, &identity_letterbox());
        let lms = dets[0].landmarks.unwrap();

        // Raw landmark i sits at x = 0.1 * (i + 1) * 320. After reordering,
        // canonical left_eye is raw index 1 and right_eye raw index 0.
        assert!((lms[0].0 - 0.2 * 320.0).abs() < 1e-3);
        assert!((lms[1].0 - 0.1 * 320.0).abs() < 1e-3);
        assert!((lms[2].0 - 0.3 * 320.0).abs() < 1e-3);
        assert!((lms[3].0 - 0.5 * 320.0).abs() < 1e-3);
        assert!((lms[4].0 - 0.4 * 320.0).abs() < 1e-3);
    }

    #[test]
    fn decode_skips_cold_cells() {
        let cls = vec![0.1f32; 4];
        let obj = vec![0.1f32; 4];
        let bboxes = vec![0.0f32; 16];
        let kps = vec![0.0f32; 40];
        let dets = decode_stride(&cls, &obj, &bboxes, &kps, 320, 640, &identity_letterbox());
        assert!(dets.is_empty());
    }

    #[test]
    fn discover_named_outputs() {
        let names: Vec<String> = [
            "cls_8", "cls_16", "cls_32",
            "obj_8", "obj_16", "obj_32",
            "bbox_8", "bbox_16", "bbox_32",
            "kps_8", "kps_16", "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices[0], (0, 3, 6, 9));
        assert_eq!(indices[1], (1, 4, 7, 10));
        assert_eq!(indices[2], (2, 5, 8, 11));
    }

    #[test]
    fn discover_falls_back_to_positional() {
        let names: Vec<String> = (0..12).map(|i: usize| i.to_string()).collect();
        assert_eq!(
            discover_output_indices(&names),
            [(0, 3, 6, 9), (1, 4, 7, 10), (2, 5, 8, 11)]
        );
    }
}
