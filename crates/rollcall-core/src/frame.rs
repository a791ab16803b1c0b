//! Grayscale frame decoding and shared pixel operations.

use crate::detector::DetectionError;

/// A decoded grayscale image frame.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Decode an encoded image (JPEG, PNG, ...) into a grayscale frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, DetectionError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| DetectionError::UndecodableImage(e.to_string()))?;
        let gray = image.to_luma8();
        let (width, height) = gray.dimensions();
        Self::from_grayscale(gray.into_raw(), width, height)
    }

    /// Wrap raw grayscale pixels, validating the buffer shape.
    pub fn from_grayscale(data: Vec<u8>, width: u32, height: u32) -> Result<Self, DetectionError> {
        if width == 0 || height == 0 {
            return Err(DetectionError::ZeroResolution { width, height });
        }
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(DetectionError::InvalidBuffer {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, width, height })
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// True when more than `threshold_pct` of pixels fall in the darkest
    /// histogram bucket (0–31). Such frames carry no usable face signal.
    pub fn is_dark(&self, threshold_pct: f32) -> bool {
        if self.data.is_empty() {
            return true;
        }
        let dark_count = self.data.iter().filter(|&&p| p < 32).count();
        (dark_count as f32 / self.data.len() as f32) > threshold_pct
    }
}

/// Resize a grayscale buffer with bilinear interpolation.
///
/// Sub-pixel sampling uses the half-pixel-center convention so uniform
/// inputs stay uniform and edges keep their sharpness.
pub(crate) fn bilinear_resize(
    src: &[u8],
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
) -> Vec<u8> {
    let scale_x = src_w as f32 / dst_w as f32;
    let scale_y = src_h as f32 / dst_h as f32;

    let mut dst = vec![0u8; dst_w * dst_h];
    for y in 0..dst_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, src_h as i32 - 1) as usize;
        let y1 = (y0 + 1).min(src_h - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..dst_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, src_w as i32 - 1) as usize;
            let x1 = (x0 + 1).min(src_w - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = src[y0 * src_w + x0] as f32;
            let tr = src[y0 * src_w + x1] as f32;
            let bl = src[y1 * src_w + x0] as f32;
            let br = src[y1 * src_w + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            dst[y * dst_w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
    dst
}

/// Geometry of a letterbox fit: uniform scale plus centering pads.
///
/// Both ONNX detectors resize frames into a fixed square input while
/// preserving aspect ratio; this records how to map detections back.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub content_w: usize,
    pub content_h: usize,
}

impl Letterbox {
    /// Fit a `src_w` × `src_h` frame into a `target` × `target` square.
    pub fn fit(src_w: usize, src_h: usize, target: usize) -> Letterbox {
        let scale_w = target as f32 / src_w as f32;
        let scale_h = target as f32 / src_h as f32;
        let scale = scale_w.min(scale_h);

        let content_w = (src_w as f32 * scale).round() as usize;
        let content_h = (src_h as f32 * scale).round() as usize;
        Letterbox {
            scale,
            pad_x: (target - content_w) as f32 / 2.0,
            pad_y: (target - content_h) as f32 / 2.0,
            content_w,
            content_h,
        }
    }

    /// Map a point in letterboxed input space back to source-frame space.
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_grayscale_rejects_zero_resolution() {
        assert!(Frame::from_grayscale(vec![], 0, 10).is_err());
        assert!(Frame::from_grayscale(vec![], 10, 0).is_err());
    }

    #[test]
    fn from_grayscale_rejects_short_buffer() {
        let err = Frame::from_grayscale(vec![0u8; 5], 4, 2).unwrap_err();
        assert!(matches!(
            err,
            DetectionError::InvalidBuffer { expected: 8, actual: 5 }
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            Frame::decode(b"not an image"),
            Err(DetectionError::UndecodableImage(_))
        ));
    }

    #[test]
    fn dark_frame_detection() {
        let dark = Frame::from_grayscale(vec![5u8; 100], 10, 10).unwrap();
        assert!(dark.is_dark(0.95));

        let lit = Frame::from_grayscale(vec![128u8; 100], 10, 10).unwrap();
        assert!(!lit.is_dark(0.95));
    }

    #[test]
    fn bilinear_resize_uniform_stays_uniform() {
        let src = vec![128u8; 50 * 40];
        let dst = bilinear_resize(&src, 50, 40, 100, 80);
        assert_eq!(dst.len(), 100 * 80);
        assert!(dst.iter().all(|&p| p == 128));
    }

    #[test]
    fn bilinear_resize_downscale_shape() {
        let src: Vec<u8> = (0..64).map(|i| (i * 4) as u8).collect();
        let dst = bilinear_resize(&src, 8, 8, 4, 4);
        assert_eq!(dst.len(), 16);
    }

    #[test]
    fn letterbox_roundtrip() {
        let lb = Letterbox::fit(320, 240, 640);
        let x = 100.0f32;
        let y = 50.0f32;
        let mapped_x = x * lb.scale + lb.pad_x;
        let mapped_y = y * lb.scale + lb.pad_y;
        let (rx, ry) = lb.unmap(mapped_x, mapped_y);
        assert!((rx - x).abs() < 0.1, "x: {rx} vs {x}");
        assert!((ry - y).abs() < 0.1, "y: {ry} vs {y}");
    }

    #[test]
    fn letterbox_wide_frame_pads_vertically() {
        let lb = Letterbox::fit(640, 360, 640);
        assert_eq!(lb.pad_x, 0.0);
        assert!(lb.pad_y > 0.0);
        assert_eq!(lb.content_w, 640);
        assert_eq!(lb.content_h, 360);
    }
}
