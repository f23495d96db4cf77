//! Paste-back of processed face crops into the original frame.
//!
//! The crop is inverse-warped into frame space together with a white mask.
//! The mask is eroded and Gaussian-blurred so the seam fades out, then used as
//! per-pixel alpha between the warped crop and the frame.

use crate::alignment::{sample_bilinear, AffineTransform};
use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::filter::separable_filter_equal;

/// Warped mask values above this become fully opaque.
const MASK_BINARIZE_THRESHOLD: f32 = 20.0;
const ERODE_DIVISOR: u32 = 10;
const ERODE_MIN: u32 = 10;
const BLUR_DIVISOR: u32 = 20;
const BLUR_MIN: u32 = 5;

/// Blur kernel side for a mask of the given size (always odd).
fn blur_kernel_size(mask_size: u32) -> u32 {
    2 * (mask_size / BLUR_DIVISOR).max(BLUR_MIN) + 1
}

/// Square erosion kernel side for a mask of the given size.
fn erode_kernel_size(mask_size: u32) -> u32 {
    (mask_size / ERODE_DIVISOR).max(ERODE_MIN)
}

/// Sigma OpenCV derives for a Gaussian kernel of side `ksize` when sigma is 0.
fn opencv_sigma(ksize: u32) -> f32 {
    0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Normalized 1-D Gaussian of side `ksize` with OpenCV's default sigma.
fn gaussian_kernel(ksize: u32) -> Vec<f32> {
    let sigma = opencv_sigma(ksize);
    let center = (ksize as f32 - 1.0) / 2.0;
    let weights: Vec<f32> = (0..ksize)
        .map(|i| {
            let d = i as f32 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Binary erosion with a `k × k` square anchored at `k / 2`, as OpenCV does for
/// even sides too. Pixels outside the image count as set.
///
/// The square is separable, so rows and columns are eroded in two passes.
fn erode_square(mask: &GrayImage, k: u32) -> GrayImage {
    let (w, h) = mask.dimensions();
    let before = (k / 2) as i64;
    let after = k.saturating_sub(1) as i64 - before;

    let window_min = |len: u32, at: i64, value: &dyn Fn(u32) -> u8| -> u8 {
        (at - before..=at + after)
            .filter(|&i| i >= 0 && i < len as i64)
            .map(|i| value(i as u32))
            .min()
            .unwrap_or(u8::MAX)
    };

    let rows = GrayImage::from_fn(w, h, |x, y| {
        Luma([window_min(w, x as i64, &|i| mask.get_pixel(i, y).0[0])])
    });
    GrayImage::from_fn(w, h, |x, y| {
        Luma([window_min(h, y as i64, &|i| rows.get_pixel(x, i).0[0])])
    })
}

/// Bilinear coverage of an all-white `width × height` image at (x, y), black outside.
fn white_coverage(width: u32, height: u32, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let inside = |px: i64, py: i64| -> f32 {
        if px >= 0 && px < width as i64 && py >= 0 && py < height as i64 {
            255.0
        } else {
            0.0
        }
    };
    inside(x0, y0) * (1.0 - fx) * (1.0 - fy)
        + inside(x0 + 1, y0) * fx * (1.0 - fy)
        + inside(x0, y0 + 1) * (1.0 - fx) * fy
        + inside(x0 + 1, y0 + 1) * fx * fy
}

/// Blend `crop` back into `frame`.
///
/// `transform` maps frame coordinates to crop coordinates, i.e. the transform
/// that produced the crop from the frame.
pub fn paste_back(frame: &RgbImage, crop: &RgbImage, transform: &AffineTransform) -> RgbImage {
    let mut out = frame.clone();
    let Some(inverse) = transform.invert() else {
        tracing::warn!("paste-back skipped: singular alignment transform");
        return out;
    };

    let (fw, fh) = frame.dimensions();
    let (cw, ch) = crop.dimensions();
    if fw == 0 || fh == 0 || cw == 0 || ch == 0 {
        return out;
    }

    // Frame-space extent of the crop, padded so the blurred edge fits.
    let corners = [(0, 0), (cw, 0), (0, ch), (cw, ch)].map(|(x, y)| inverse.apply(x as f32, y as f32));
    let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min);
    let max_x = corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max);
    let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min);
    let max_y = corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max);
    let approx_size = ((max_x - min_x) * (max_y - min_y)).max(0.0).sqrt() as u32;
    let margin = blur_kernel_size(approx_size) as f32;

    let x0 = (min_x - margin).floor().clamp(0.0, fw as f32) as u32;
    let x1 = (max_x + margin).ceil().clamp(0.0, fw as f32) as u32;
    let y0 = (min_y - margin).floor().clamp(0.0, fh as f32) as u32;
    let y1 = (max_y + margin).ceil().clamp(0.0, fh as f32) as u32;
    if x0 >= x1 || y0 >= y1 {
        return out;
    }
    let (rw, rh) = (x1 - x0, y1 - y0);

    let mut warped = vec![[0.0f32; 3]; (rw * rh) as usize];
    let mut mask = GrayImage::new(rw, rh);
    let (mut mx0, mut mx1, mut my0, mut my1) = (u32::MAX, 0u32, u32::MAX, 0u32);

    for ry in 0..rh {
        for rx in 0..rw {
            let (cx, cy) = transform.apply((x0 + rx) as f32, (y0 + ry) as f32);
            if white_coverage(cw, ch, cx, cy) > MASK_BINARIZE_THRESHOLD {
                warped[(ry * rw + rx) as usize] = sample_bilinear(crop, cx, cy);
                mask.put_pixel(rx, ry, Luma([255]));
                mx0 = mx0.min(rx);
                mx1 = mx1.max(rx);
                my0 = my0.min(ry);
                my1 = my1.max(ry);
            }
        }
    }

    if mx0 > mx1 || my0 > my1 {
        return out;
    }

    let mask_size = (((mx1 - mx0) as f32) * ((my1 - my0) as f32)).sqrt() as u32;
    let mask = erode_square(&mask, erode_kernel_size(mask_size));
    let mask: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(rw, rh, |x, y| Luma([mask.get_pixel(x, y).0[0] as f32]));
    let mask = separable_filter_equal(&mask, &gaussian_kernel(blur_kernel_size(mask_size)));

    for ry in 0..rh {
        for rx in 0..rw {
            // the blurred mask is stored as 8-bit before blending
            let alpha = mask.get_pixel(rx, ry).0[0].round().clamp(0.0, 255.0) / 255.0;
            if alpha <= 0.0 {
                continue;
            }
            let face = warped[(ry * rw + rx) as usize];
            let px = out.get_pixel_mut(x0 + rx, y0 + ry);
            let bg = px.0;
            *px = Rgb([0, 1, 2].map(|c| {
                (alpha * face[c] + (1.0 - alpha) * bg[c] as f32).round().clamp(0.0, 255.0) as u8
            }));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translate(dx: f32, dy: f32) -> AffineTransform {
        AffineTransform([1.0, 0.0, dx, 0.0, 1.0, dy])
    }

    #[test]
    fn test_kernel_sizes() {
        assert_eq!(erode_kernel_size(50), 10);
        assert_eq!(erode_kernel_size(300), 30);
        assert_eq!(blur_kernel_size(50), 11);
        assert_eq!(blur_kernel_size(300), 31);
    }

    #[test]
    fn test_opencv_sigma() {
        // OpenCV: ksize 11 -> sigma 2.0
        assert!((opencv_sigma(11) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_gaussian_kernel_matches_opencv() {
        let k = gaussian_kernel(11);
        assert_eq!(k.len(), 11);
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!((k[0] - k[10]).abs() < 1e-7);
        // sigma 2.0: neighbouring weights differ by exp(1 / 8)
        assert!((k[5] / k[4] - (1.0f32 / 8.0).exp()).abs() < 1e-5);
    }

    #[test]
    fn test_erode_even_square_keeps_kernel_width() {
        let mut mask = GrayImage::new(30, 30);
        for y in 5..25 {
            for x in 5..25 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        // side 10, anchor 5: a pixel survives when x-5..=x+4 is inside 5..25
        let eroded = erode_square(&mask, 10);
        let row: Vec<u32> = (0..30).filter(|&x| eroded.get_pixel(x, 15).0[0] == 255).collect();
        assert_eq!(row.first(), Some(&10));
        assert_eq!(row.last(), Some(&20));
        assert_eq!(row.len(), 11);
        let col: Vec<u32> = (0..30).filter(|&y| eroded.get_pixel(15, y).0[0] == 255).collect();
        assert_eq!((col[0], col.len()), (10, 11));
    }

    #[test]
    fn test_erode_treats_outside_as_set() {
        let mask = GrayImage::from_pixel(12, 12, Luma([255]));
        assert_eq!(erode_square(&mask, 10), mask);
    }

    #[test]
    fn test_white_coverage() {
        assert_eq!(white_coverage(10, 10, 5.0, 5.0), 255.0);
        assert_eq!(white_coverage(10, 10, -3.0, 5.0), 0.0);
        assert!((white_coverage(10, 10, 9.5, 5.0) - 127.5).abs() < 1e-3);
    }

    #[test]
    fn test_paste_center_is_crop_and_outside_is_frame() {
        let frame = RgbImage::new(200, 200);
        let crop = RgbImage::from_pixel(128, 128, Rgb([255, 255, 255]));
        // crop origin sits at frame (36, 36)
        let out = paste_back(&frame, &crop, &translate(-36.0, -36.0));

        assert_eq!(out.get_pixel(100, 100).0, [255, 255, 255]);
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(out.get_pixel(199, 100).0, [0, 0, 0]);
    }

    #[test]
    fn test_paste_feathers_edges() {
        let frame = RgbImage::new(200, 200);
        let crop = RgbImage::from_pixel(128, 128, Rgb([255, 255, 255]));
        let out = paste_back(&frame, &crop, &translate(-36.0, -36.0));

        // Just inside the crop border the eroded, blurred mask keeps the frame
        let edge = out.get_pixel(37, 100).0[0];
        assert!(edge < 128, "edge should be mostly background, got {edge}");
    }

    #[test]
    fn test_paste_crop_outside_frame_is_noop() {
        let frame = RgbImage::from_pixel(50, 50, Rgb([9, 9, 9]));
        let crop = RgbImage::from_pixel(16, 16, Rgb([255, 0, 0]));
        let out = paste_back(&frame, &crop, &translate(500.0, 500.0));
        assert_eq!(out, frame);
    }

    #[test]
    fn test_paste_singular_transform_is_noop() {
        let frame = RgbImage::from_pixel(20, 20, Rgb([1, 2, 3]));
        let crop = RgbImage::from_pixel(8, 8, Rgb([255, 255, 255]));
        let out = paste_back(&frame, &crop, &AffineTransform([0.0; 6]));
        assert_eq!(out, frame);
    }
}
