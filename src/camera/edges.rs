use crate::config::EdgeConfig;
use image::{imageops, RgbImage};
use imageproc::edges::canny;
use imageproc::hough::{detect_lines, LineDetectionOptions, PolarLine};
use tracing::{debug, warn};

const EPS: f64 = 1e-6;

/// Horizontal span of the belt between its two guide lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeltSpan {
    pub left: u32,
    pub right: u32,
}

impl BeltSpan {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    /// Horizontal midpoint in cropped coordinates
    pub fn center(&self) -> f64 {
        self.width() as f64 / 2.0
    }

    /// Crop a frame to the span (full height)
    pub fn crop(&self, frame: &RgbImage) -> RgbImage {
        let left = self.left.min(frame.width());
        let width = self.right.min(frame.width()).saturating_sub(left);
        imageops::crop_imm(frame, left, 0, width, frame.height()).to_image()
    }

    /// Configured span limited to an image of `width` pixels
    pub fn fallback(span: (u32, u32), width: u32) -> Self {
        let left = span.0.min(width);
        let right = span.1.min(width);
        if left < right {
            Self { left, right }
        } else {
            Self { left: 0, right: width }
        }
    }
}

/// x-coordinate where a Hough line crosses row `y`, if near-vertical
fn vertical_crossing(line: &PolarLine, y: f64, slope_tolerance: f64) -> Option<f64> {
    // x·cosθ + y·sinθ = r, direction (-sinθ, cosθ) so |dx|/|dy| = |tanθ|
    let theta = (line.angle_in_degrees as f64).to_radians();
    let (sin, cos) = theta.sin_cos();
    if cos.abs() <= EPS || sin.abs() > slope_tolerance * cos.abs() {
        return None;
    }
    Some((line.r as f64 - y * sin) / cos)
}

/// Average x of each run of sorted positions closer than `tolerance`
fn group_positions(mut xs: Vec<f64>, tolerance: f64) -> Vec<f64> {
    xs.sort_by(|a, b| a.total_cmp(b));

    let mut groups = Vec::new();
    let mut current: Vec<f64> = Vec::new();
    for x in xs {
        if let Some(last) = current.last() {
            if x - last > tolerance {
                groups.push(current.iter().sum::<f64>() / current.len() as f64);
                current.clear();
            }
        }
        current.push(x);
    }
    if !current.is_empty() {
        groups.push(current.iter().sum::<f64>() / current.len() as f64);
    }
    groups
}

/// Pick the guide closest to the centre on each side
fn select_span(groups: &[f64], width: u32) -> Option<BeltSpan> {
    let center = width as f64 / 2.0;
    let left = groups
        .iter()
        .copied()
        .filter(|x| *x < center)
        .max_by(|a, b| a.total_cmp(b))?;
    let right = groups
        .iter()
        .copied()
        .filter(|x| *x > center)
        .min_by(|a, b| a.total_cmp(b))?;

    let left = left.round().max(0.0) as u32;
    let right = (right.round() as u32).min(width);
    (left < right).then_some(BeltSpan { left, right })
}

/// Locate the belt guide lines in a background frame
///
/// Falls back to the configured span when no usable pair is found.
pub fn detect_belt_span(frame: &RgbImage, config: &EdgeConfig, fallback: (u32, u32)) -> BeltSpan {
    let (width, height) = frame.dimensions();
    let gray = imageops::grayscale(frame);
    let edges = canny(&gray, config.canny_low, config.canny_high);
    let lines = detect_lines(
        &edges,
        LineDetectionOptions {
            vote_threshold: config.vote_threshold,
            suppression_radius: config.suppression_radius,
        },
    );

    let mid_y = height as f64 / 2.0;
    let crossings: Vec<f64> = lines
        .iter()
        .filter_map(|line| vertical_crossing(line, mid_y, config.slope_tolerance))
        .filter(|x| *x >= 0.0 && *x < width as f64)
        .collect();

    debug!(
        "Belt edge detection: {} lines, {} near-vertical",
        lines.len(),
        crossings.len()
    );

    let groups = group_positions(crossings, config.merge_tolerance);
    match select_span(&groups, width) {
        Some(span) => {
            debug!("Belt span detected at {}..{}", span.left, span.right);
            span
        }
        None => {
            let span = BeltSpan::fallback(fallback, width);
            warn!(
                "No belt guide lines found, using fallback span {}..{}",
                span.left, span.right
            );
            span
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_vertical_crossing_of_upright_line() {
        let line = PolarLine {
            r: 120.0,
            angle_in_degrees: 0,
        };
        let x = vertical_crossing(&line, 240.0, 0.5).unwrap();
        assert!((x - 120.0).abs() < 1e-6);
    }

    #[test]
    fn test_horizontal_line_rejected() {
        let line = PolarLine {
            r: 50.0,
            angle_in_degrees: 90,
        };
        assert!(vertical_crossing(&line, 240.0, 0.5).is_none());
        let steep = PolarLine {
            r: 50.0,
            angle_in_degrees: 45,
        };
        assert!(vertical_crossing(&steep, 240.0, 0.5).is_none());
    }

    #[test]
    fn test_group_positions_merges_close_lines() {
        let groups = group_positions(vec![510.0, 100.0, 104.0, 98.0, 500.0], 15.0);
        assert_eq!(groups.len(), 2);
        assert!((groups[0] - 100.666).abs() < 0.01);
        assert!((groups[1] - 505.0).abs() < 1e-9);
    }

    #[test]
    fn test_select_span_nearest_to_center() {
        let span = select_span(&[20.0, 150.0, 480.0, 600.0], 640).unwrap();
        assert_eq!(span, BeltSpan { left: 150, right: 480 });
    }

    #[test]
    fn test_select_span_needs_both_sides() {
        assert!(select_span(&[20.0, 150.0], 640).is_none());
        assert!(select_span(&[], 640).is_none());
    }

    #[test]
    fn test_fallback_clamped_to_image() {
        assert_eq!(
            BeltSpan::fallback((0, 640), 320),
            BeltSpan { left: 0, right: 320 }
        );
        assert_eq!(
            BeltSpan::fallback((400, 640), 320),
            BeltSpan { left: 0, right: 320 }
        );
    }

    #[test]
    fn test_uniform_frame_uses_fallback() {
        let frame = RgbImage::from_pixel(200, 100, Rgb([128, 128, 128]));
        let span = detect_belt_span(&frame, &EdgeConfig::default(), (10, 180));
        assert_eq!(span, BeltSpan { left: 10, right: 180 });
    }

    #[test]
    fn test_detects_two_dark_guides() {
        let mut frame = RgbImage::from_pixel(640, 480, Rgb([230, 230, 230]));
        for y in 0..480 {
            for x in 98..103 {
                frame.put_pixel(x, y, Rgb([10, 10, 10]));
            }
            for x in 498..503 {
                frame.put_pixel(x, y, Rgb([10, 10, 10]));
            }
        }
        let span = detect_belt_span(&frame, &EdgeConfig::default(), (0, 640));
        assert!(span.left.abs_diff(100) <= 6, "left was {}", span.left);
        assert!(span.right.abs_diff(500) <= 6, "right was {}", span.right);
    }

    #[test]
    fn test_crop_to_span() {
        let frame = RgbImage::from_pixel(100, 40, Rgb([1, 2, 3]));
        let span = BeltSpan { left: 20, right: 70 };
        let cropped = span.crop(&frame);
        assert_eq!(cropped.dimensions(), (50, 40));
        assert_eq!(span.center(), 25.0);
    }
}
