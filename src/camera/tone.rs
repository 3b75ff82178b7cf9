//! Background tone normalization and frame-to-frame motion measurement.
//!
//! Both operations use the same per-pixel ratio test: every channel of a
//! pixel is divided by a reference value, and the pixel "matches" when the
//! average ratio is close to 1.0 and no single channel strays far from that
//! average. Lighting changes scale all channels alike and pass the test;
//! real colour changes do not.

use crate::config::ToneTolerance;
use image::{Rgb, RgbImage};

const EPS: f64 = 1e-6;

/// Mean RGB of the background, used as the lighting reference
pub type ReferenceColor = [f64; 3];

/// Outcome of comparing two normalized frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    /// Share of pixels that failed the ratio test, in percent
    pub changed_percent: f64,
    /// Centre of mass of the changed pixels, when above the threshold
    pub centroid: Option<(f64, f64)>,
}

impl MotionSample {
    fn none() -> Self {
        Self {
            changed_percent: 0.0,
            centroid: None,
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator <= EPS {
        if numerator <= EPS {
            1.0
        } else {
            numerator / EPS
        }
    } else {
        numerator / denominator
    }
}

fn matches(ratios: [f64; 3], tolerance: &ToneTolerance) -> bool {
    let average = (ratios[0] + ratios[1] + ratios[2]) / 3.0;
    if (average - 1.0).abs() > tolerance.luminance_percent / 100.0 {
        return false;
    }
    ratios
        .iter()
        .zip(tolerance.color_percent.iter())
        .all(|(r, tol)| (r - average).abs() <= tol / 100.0)
}

fn pixel_ratios(pixel: &Rgb<u8>, reference: [f64; 3]) -> [f64; 3] {
    [
        ratio(pixel[0] as f64, reference[0]),
        ratio(pixel[1] as f64, reference[1]),
        ratio(pixel[2] as f64, reference[2]),
    ]
}

/// Mean colour of a `window`×`window` square at the image centre
pub fn reference_mean(image: &RgbImage, window: u32) -> ReferenceColor {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return [0.0; 3];
    }

    let w = window.min(width).max(1);
    let h = window.min(height).max(1);
    let x0 = (width - w) / 2;
    let y0 = (height - h) / 2;

    let mut sum = [0.0f64; 3];
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            let pixel = image.get_pixel(x, y);
            for c in 0..3 {
                sum[c] += pixel[c] as f64;
            }
        }
    }
    let count = (w * h) as f64;
    [sum[0] / count, sum[1] / count, sum[2] / count]
}

/// Paint every background-toned pixel white
pub fn white_out(
    image: &RgbImage,
    reference: ReferenceColor,
    tolerance: &ToneTolerance,
) -> RgbImage {
    let mut output = image.clone();
    for pixel in output.pixels_mut() {
        if matches(pixel_ratios(pixel, reference), tolerance) {
            *pixel = Rgb([255, 255, 255]);
        }
    }
    output
}

/// Compare `current` against `previous` and locate the changed region
///
/// Frames of different size are never comparable and report no motion.
pub fn diff_centroid(
    current: &RgbImage,
    previous: &RgbImage,
    tolerance: &ToneTolerance,
    threshold_percent: f64,
) -> MotionSample {
    if current.dimensions() != previous.dimensions() || current.is_empty() {
        return MotionSample::none();
    }

    let mut changed = 0u64;
    let mut sum_x = 0.0f64;
    let mut sum_y = 0.0f64;

    for ((x, y, cur), prev) in current.enumerate_pixels().zip(previous.pixels()) {
        let reference = [prev[0] as f64, prev[1] as f64, prev[2] as f64];
        if !matches(pixel_ratios(cur, reference), tolerance) {
            changed += 1;
            sum_x += x as f64;
            sum_y += y as f64;
        }
    }

    let total = current.width() as u64 * current.height() as u64;
    let changed_percent = changed as f64 / total as f64 * 100.0;
    let centroid = if changed > 0 && changed_percent > threshold_percent {
        Some((sum_x / changed as f64, sum_y / changed as f64))
    } else {
        None
    };

    MotionSample {
        changed_percent,
        centroid,
    }
}
