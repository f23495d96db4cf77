//! Face alignment via 4-DOF similarity transform.
//!
//! Aligns detected faces to canonical crops using five reference landmarks and
//! least-squares estimation. The ArcFace template feeds the recognizer (112)
//! and the swapper (128); the FFHQ template feeds the enhancer (512).

use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// FFHQ reference landmarks for a 512×512 output (GFPGAN).
pub const FFHQ_TEMPLATE_512: [(f32, f32); 5] = [
    (192.98138, 239.94708),
    (318.90277, 240.19360),
    (256.63416, 314.01935),
    (201.26117, 371.41043),
    (313.08905, 371.15118),
];

/// A 2×3 affine transform:
/// ```text
/// | m0  m1  m2 |
/// | m3  m4  m5 |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform(pub [f32; 6]);

impl AffineTransform {
    pub const IDENTITY: AffineTransform = AffineTransform([1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);

    /// Map a point through the transform.
    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let m = &self.0;
        (m[0] * x + m[1] * y + m[2], m[3] * x + m[4] * y + m[5])
    }

    /// Inverse transform, or `None` when the linear part is singular.
    pub fn invert(&self) -> Option<AffineTransform> {
        let m = &self.0;
        let det = m[0] * m[4] - m[1] * m[3];
        if det.abs() < 1e-12 {
            return None;
        }
        let inv_det = 1.0 / det;
        let a = m[4] * inv_det;
        let b = -m[1] * inv_det;
        let c = -m[3] * inv_det;
        let d = m[0] * inv_det;
        Some(AffineTransform([
            a,
            b,
            -(a * m[2] + b * m[5]),
            c,
            d,
            -(c * m[2] + d * m[5]),
        ]))
    }
}

/// Estimate a similarity transform (4-DOF: scale, rotation, translation)
/// from `src` landmarks to `dst` landmarks using least-squares.
///
/// The result has the form `[a, -b, tx, b, a, ty]`.
pub fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> AffineTransform {
    // Build overdetermined system A * [a, b, tx, ty]^T = B
    // For each point pair (sx, sy) -> (dx, dy):
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [0.0f32; 16]; // 4x4, row-major
    let mut atb = [0.0f32; 4];

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];

        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let x = solve_4x4(&ata, &atb);
    let (a, b, tx, ty) = (x[0], x[1], x[2], x[3]);

    AffineTransform([a, -b, tx, b, a, ty])
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..4 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0]; // degenerate landmarks: identity
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    x
}

/// ArcFace template scaled for a square crop of `size` pixels.
///
/// Multiples of 112 scale the template directly; other sizes scale by
/// `size / 128` and shift x by `8 * ratio` (the 128 crop used by inswapper).
pub fn arcface_template(size: u32) -> [(f32, f32); 5] {
    let (ratio, diff_x) = if size % 112 == 0 {
        (size as f32 / 112.0, 0.0)
    } else {
        let ratio = size as f32 / 128.0;
        (ratio, 8.0 * ratio)
    };
    REFERENCE_LANDMARKS_112.map(|(x, y)| (x * ratio + diff_x, y * ratio))
}

/// Bilinear sample of an RGB image at a sub-pixel position; outside is black.
pub(crate) fn sample_bilinear(image: &RgbImage, sx: f32, sy: f32) -> [f32; 3] {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let x0 = sx.floor() as i32;
    let y0 = sy.floor() as i32;
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;

    let px = |x: i32, y: i32| -> [f32; 3] {
        if x >= 0 && x < w && y >= 0 && y < h {
            let p = image.get_pixel(x as u32, y as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr, bl, br) = (px(x0, y0), px(x0 + 1, y0), px(x0, y0 + 1), px(x0 + 1, y0 + 1));
    let mut out = [0.0f32; 3];
    for c in 0..3 {
        out[c] = tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy;
    }
    out
}

/// Warp `image` by `transform` (source → output coordinates) into a
/// `width × height` image. Bilinear interpolation, black border.
pub fn warp_affine(image: &RgbImage, transform: &AffineTransform, width: u32, height: u32) -> RgbImage {
    let Some(inverse) = transform.invert() else {
        return RgbImage::new(width, height);
    };

    RgbImage::from_fn(width, height, |ox, oy| {
        let (sx, sy) = inverse.apply(ox as f32, oy as f32);
        let v = sample_bilinear(image, sx, sy);
        Rgb(v.map(|c| c.round().clamp(0.0, 255.0) as u8))
    })
}

/// Align a face to a square `size × size` crop using the ArcFace template.
///
/// Returns the crop and the frame → crop transform used to produce it.
pub fn norm_crop(image: &RgbImage, landmarks: &[(f32, f32); 5], size: u32) -> (RgbImage, AffineTransform) {
    let template = arcface_template(size);
    align_to_template(image, landmarks, &template, size)
}

/// Align a face to an arbitrary five-point template in a square crop.
pub fn align_to_template(
    image: &RgbImage,
    landmarks: &[(f32, f32); 5],
    template: &[(f32, f32); 5],
    size: u32,
) -> (RgbImage, AffineTransform) {
    let transform = estimate_similarity_transform(landmarks, template);
    (warp_affine(image, &transform, size, size), transform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let pts = REFERENCE_LANDMARKS_112;
        let m = estimate_similarity_transform(&pts, &pts).0;

        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4, "-b = {}", m[1]);
        assert!(m[2].abs() < 1e-3, "tx = {}", m[2]);
        assert!(m[3].abs() < 1e-4, "b = {}", m[3]);
        assert!((m[4] - 1.0).abs() < 1e-4, "a2 = {}", m[4]);
        assert!(m[5].abs() < 1e-3, "ty = {}", m[5]);
    }

    #[test]
    fn test_scaled_transform() {
        // Source landmarks at 2x scale → transform should have a ≈ 0.5
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let m = estimate_similarity_transform(&src, &REFERENCE_LANDMARKS_112);
        assert!((m.0[0] - 0.5).abs() < 0.05, "a = {}, expected ~0.5", m.0[0]);
    }

    #[test]
    fn test_invert_roundtrip() {
        let t = AffineTransform([0.8, -0.3, 12.0, 0.3, 0.8, -5.0]);
        let inv = t.invert().unwrap();
        let (x, y) = t.apply(40.0, 70.0);
        let (bx, by) = inv.apply(x, y);
        assert!((bx - 40.0).abs() < 1e-3 && (by - 70.0).abs() < 1e-3, "({bx}, {by})");
    }

    #[test]
    fn test_invert_singular() {
        assert!(AffineTransform([0.0; 6]).invert().is_none());
    }

    #[test]
    fn test_arcface_template_sizes() {
        assert_eq!(arcface_template(112), REFERENCE_LANDMARKS_112);

        let t128 = arcface_template(128);
        assert!((t128[0].0 - (38.2946 + 8.0)).abs() < 1e-4);
        assert!((t128[0].1 - 51.6963).abs() < 1e-4);

        let t224 = arcface_template(224);
        assert!((t224[2].0 - 56.0252 * 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_warp_output_size() {
        let frame = RgbImage::from_pixel(64, 48, Rgb([128, 128, 128]));
        let out = warp_affine(&frame, &AffineTransform::IDENTITY, 112, 112);
        assert_eq!(out.dimensions(), (112, 112));
        assert_eq!(out.get_pixel(10, 10).0, [128, 128, 128]);
        // Outside the source is black
        assert_eq!(out.get_pixel(100, 100).0, [0, 0, 0]);
    }

    #[test]
    fn test_warp_translation() {
        let mut frame = RgbImage::new(20, 20);
        frame.put_pixel(5, 7, Rgb([255, 10, 20]));
        let shift = AffineTransform([1.0, 0.0, 3.0, 0.0, 1.0, 2.0]);
        let out = warp_affine(&frame, &shift, 20, 20);
        assert_eq!(out.get_pixel(8, 9).0, [255, 10, 20]);
    }

    #[test]
    fn test_norm_crop_output_size() {
        let frame = RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]));
        let (crop, transform) = norm_crop(&frame, &REFERENCE_LANDMARKS_112, 128);
        assert_eq!(crop.dimensions(), (128, 128));
        // Reference landmarks shift by +8 in x on the 128 template
        let (x, _) = transform.apply(REFERENCE_LANDMARKS_112[0].0, REFERENCE_LANDMARKS_112[0].1);
        assert!((x - (38.2946 + 8.0)).abs() < 1e-2);
    }

    #[test]
    fn test_landmark_roundtrip() {
        // A bright patch at a landmark lands near the reference position after alignment.
        let mut frame = RgbImage::new(200, 200);

        let src_landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        let lx = src_landmarks[0].0 as u32;
        let ly = src_landmarks[0].1 as u32;
        for dy in 0..5 {
            for dx in 0..5 {
                frame.put_pixel(lx - 2 + dx, ly - 2 + dy, Rgb([255, 255, 255]));
            }
        }

        let (aligned, _) = norm_crop(&frame, &src_landmarks, 112);

        let ref_x = REFERENCE_LANDMARKS_112[0].0.round() as u32;
        let ref_y = REFERENCE_LANDMARKS_112[0].1.round() as u32;

        let mut max_val = 0u8;
        for dy in 0..3 {
            for dx in 0..3 {
                max_val = max_val.max(aligned.get_pixel(ref_x - 1 + dx, ref_y - 1 + dy).0[0]);
            }
        }
        assert!(max_val > 100, "expected bright patch near ({ref_x}, {ref_y}), max={max_val}");
    }
}
