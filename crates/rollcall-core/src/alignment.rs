//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face to the canonical 112×112 ArcFace position using the
//! five reference landmarks and a least-squares similarity estimate.

use crate::frame::Frame;
use crate::types::Landmarks;

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: Landmarks = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: usize = 112;

/// Align a detected face to the canonical 112×112 crop.
///
/// Estimates the similarity transform from the detected landmarks to the
/// reference positions and warps the face region with bilinear sampling.
/// Out-of-frame samples fill with black.
pub fn align(frame: &Frame, landmarks: &Landmarks) -> Vec<u8> {
    let matrix = estimate_similarity(landmarks, &REFERENCE_LANDMARKS_112);
    warp_affine(frame, &matrix, ALIGNED_SIZE)
}

/// Estimate a 2×3 similarity transform (scale, rotation, translation) from
/// `src` to `dst` landmarks by least squares.
///
/// Returns [a, -b, tx, b, a, ty] representing:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
fn estimate_similarity(src: &Landmarks, dst: &Landmarks) -> [f32; 6] {
    // Normal equations for the overdetermined system; each point pair
    // contributes two rows in the unknowns [a, b, tx, ty]:
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [[0.0f32; 4]; 4];
    let mut atb = [0.0f32; 4];

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];
        let rows = [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)];

        for (row, rhs) in rows {
            for j in 0..4 {
                for k in 0..4 {
                    ata[j][k] += row[j] * row[k];
                }
                atb[j] += row[j] * rhs;
            }
        }
    }

    let x = solve_normal_equations(&mut ata, &mut atb);
    let (a, b, tx, ty) = (x[0], x[1], x[2], x[3]);
    [a, -b, tx, b, a, ty]
}

/// Solve the 4×4 normal-equation system in place via Gaussian elimination
/// with partial pivoting. Near-singular systems fall back to identity.
#[allow(clippy::needless_range_loop)]
fn solve_normal_equations(ata: &mut [[f32; 4]; 4], atb: &mut [f32; 4]) -> [f32; 4] {
    for col in 0..4 {
        let mut pivot_row = col;
        for row in (col + 1)..4 {
            if ata[row][col].abs() > ata[pivot_row][col].abs() {
                pivot_row = row;
            }
        }
        ata.swap(col, pivot_row);
        atb.swap(col, pivot_row);

        let pivot = ata[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in (col + 1)..4 {
            let factor = ata[row][col] / pivot;
            for j in col..4 {
                ata[row][j] -= factor * ata[col][j];
            }
            atb[row] -= factor * atb[col];
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = atb[i];
        for j in (i + 1)..4 {
            x[i] -= ata[i][j] * x[j];
        }
        x[i] /= ata[i][i];
    }
    x
}

/// Apply a 2×3 similarity warp, sampling the source with bilinear
/// interpolation through the inverted transform.
fn warp_affine(frame: &Frame, matrix: &[f32; 6], out_size: usize) -> Vec<u8> {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);
    let src_w = frame.width as usize;
    let src_h = frame.height as usize;

    // Invert the 2x2 part of M = [[a, -b], [b, a]]; det = a^2 + b^2.
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return vec![0u8; out_size * out_size];
    }
    let ia = a / det;
    let ib = b / det;

    let sample = |x: i32, y: i32| -> f32 {
        if x >= 0 && x < src_w as i32 && y >= 0 && y < src_h as i32 {
            frame.data[y as usize * src_w + x as usize] as f32
        } else {
            0.0
        }
    };

    let mut output = vec![0u8; out_size * out_size];
    for oy in 0..out_size {
        for ox in 0..out_size {
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let x0 = sx.floor() as i32;
            let y0 = sy.floor() as i32;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let val = sample(x0, y0) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0) * fx * (1.0 - fy)
                + sample(x0, y0 + 1) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1) * fx * fy;

            output[oy * out_size + ox] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_frame(w: u32, h: u32, value: u8) -> Frame {
        Frame::from_grayscale(vec![value; (w * h) as usize], w, h).unwrap()
    }

    #[test]
    fn identity_when_landmarks_match_reference() {
        let m = estimate_similarity(&REFERENCE_LANDMARKS_112, &REFERENCE_LANDMARKS_112);
        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4, "-b = {}", m[1]);
        assert!(m[2].abs() < 1e-3, "tx = {}", m[2]);
        assert!(m[3].abs() < 1e-4, "b = {}", m[3]);
        assert!((m[4] - 1.0).abs() < 1e-4, "a2 = {}", m[4]);
        assert!(m[5].abs() < 1e-3, "ty = {}", m[5]);
    }

    #[test]
    fn double_scale_landmarks_halve() {
        let src: Landmarks = [
            (76.5892, 103.3926),
            (147.0636, 103.0028),
            (112.0504, 143.4732),
            (83.0986, 184.7310),
            (141.4598, 184.4082),
        ];
        let m = estimate_similarity(&src, &REFERENCE_LANDMARKS_112);
        assert!((m[0] - 0.5).abs() < 0.05, "a = {}, expected ~0.5", m[0]);
    }

    #[test]
    fn align_output_size() {
        let frame = uniform_frame(640, 480, 128);
        let aligned = align(&frame, &REFERENCE_LANDMARKS_112);
        assert_eq!(aligned.len(), ALIGNED_SIZE * ALIGNED_SIZE);
    }

    #[test]
    fn align_is_deterministic() {
        let frame = Frame::from_grayscale(
            (0..(200 * 200)).map(|i| (i % 251) as u8).collect(),
            200,
            200,
        )
        .unwrap();
        let landmarks: Landmarks = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        assert_eq!(align(&frame, &landmarks), align(&frame, &landmarks));
    }

    #[test]
    fn bright_landmark_lands_near_reference() {
        let w = 200u32;
        let h = 200u32;
        let mut data = vec![0u8; (w * h) as usize];

        let landmarks: Landmarks = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        // 5x5 bright patch at the left eye, large enough to survive bilinear sampling.
        let (lx, ly) = (landmarks[0].0 as usize, landmarks[0].1 as usize);
        for dy in 0..5 {
            for dx in 0..5 {
                let px = lx - 2 + dx;
                let py = ly - 2 + dy;
                data[py * w as usize + px] = 255;
            }
        }
        let frame = Frame::from_grayscale(data, w, h).unwrap();
        let aligned = align(&frame, &landmarks);

        let ref_x = REFERENCE_LANDMARKS_112[0].0.round() as usize;
        let ref_y = REFERENCE_LANDMARKS_112[0].1.round() as usize;
        let mut max_val = 0u8;
        for dy in 0..3 {
            for dx in 0..3 {
                let x = ref_x - 1 + dx;
                let y = ref_y - 1 + dy;
                max_val = max_val.max(aligned[y * ALIGNED_SIZE + x]);
            }
        }
        assert!(
            max_val > 100,
            "expected bright patch near reference left eye, max={max_val}"
        );
    }
}
