//! Post-swap sanity check.
//!
//! A failed swap or paste-back tends to leave large pure-black regions, so the
//! share of zero-luma pixels is used as a cheap success heuristic.

use image::{Rgb, RgbImage};

pub const DEFAULT_BLACK_RATIO_THRESHOLD: f32 = 0.1;

/// BT.601 luma in 14-bit fixed point, rounded: 0.299 R + 0.587 G + 0.114 B.
fn luma(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0.map(u32::from);
    ((r * 4899 + g * 9617 + b * 1868 + (1 << 13)) >> 14) as u8
}

/// Fraction of pixels whose grayscale value is exactly 0. Empty images count as all black.
pub fn black_ratio(image: &RgbImage) -> f32 {
    let total = image.width() as usize * image.height() as usize;
    if total == 0 {
        return 1.0;
    }
    let black = image.pixels().filter(|p| luma(p) == 0).count();
    black as f32 / total as f32
}

/// True when the black share stays below `threshold`.
pub fn is_swap_successful(image: &RgbImage, threshold: f32) -> bool {
    black_ratio(image) < threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_black_ratio_all_black() {
        let img = RgbImage::new(10, 10);
        assert_eq!(black_ratio(&img), 1.0);
        assert!(!is_swap_successful(&img, DEFAULT_BLACK_RATIO_THRESHOLD));
    }

    #[test]
    fn test_black_ratio_no_black() {
        let img = RgbImage::from_pixel(10, 10, Rgb([40, 50, 60]));
        assert_eq!(black_ratio(&img), 0.0);
        assert!(is_swap_successful(&img, DEFAULT_BLACK_RATIO_THRESHOLD));
    }

    #[test]
    fn test_threshold_is_strict() {
        // exactly 10% black is not a success
        let mut img = RgbImage::from_pixel(10, 10, Rgb([200, 200, 200]));
        for x in 0..10 {
            img.put_pixel(x, 0, Rgb([0, 0, 0]));
        }
        assert!((black_ratio(&img) - 0.1).abs() < 1e-6);
        assert!(!is_swap_successful(&img, 0.1));

        img.put_pixel(0, 0, Rgb([1, 1, 1]));
        assert!(is_swap_successful(&img, 0.1));
    }

    #[test]
    fn test_near_black_pixels_round_to_gray_one() {
        for rgb in [[3, 0, 0], [0, 1, 0], [0, 0, 13]] {
            let img = RgbImage::from_pixel(10, 10, Rgb(rgb));
            assert_eq!(black_ratio(&img), 0.0, "{rgb:?} should not count as black");
            assert!(is_swap_successful(&img, DEFAULT_BLACK_RATIO_THRESHOLD));
        }
    }

    #[test]
    fn test_darkest_pixels_still_black() {
        for rgb in [[1, 0, 0], [0, 0, 4]] {
            let img = RgbImage::from_pixel(10, 10, Rgb(rgb));
            assert_eq!(black_ratio(&img), 1.0, "{rgb:?} should count as black");
        }
    }

    #[test]
    fn test_luma_matches_bt601() {
        assert_eq!(luma(&Rgb([255, 255, 255])), 255);
        assert_eq!(luma(&Rgb([255, 0, 0])), 76);
        assert_eq!(luma(&Rgb([0, 255, 0])), 150);
        assert_eq!(luma(&Rgb([0, 0, 255])), 29);
    }

    #[test]
    fn test_black_ratio_empty_image() {
        assert_eq!(black_ratio(&RgbImage::new(0, 0)), 1.0);
    }
}
