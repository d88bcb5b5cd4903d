use crate::types::Frame;
const MIN_BRIGHTNESS: f32 = 50.0;
const MAX_BRIGHTNESS: f32 = 200.0;
const MIN_SKIN_COVERAGE: f32 = 0.5;
/// Preview-frame check run while the session is aligning.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AlignmentReport {
    /// Mean gray level of the skin region.
    pub brightness: f32,
    /// Gray-level standard deviation over the whole frame.
    pub contrast: f32,
    /// Mean absolute 4-neighbour Laplacian over the whole frame.
    pub sharpness: f32,
    /// Fraction of skin-coloured pixels inside the region.
    pub skin_coverage: f32,
    /// Weighted 0..1 frame score.
    pub score: f32,
    pub aligned: bool,
}
pub fn assess(frame: &Frame, roi_fraction: f32) -> AlignmentReport {
    let roi = frame.roi(roi_fraction);
    let mut gray_sum = 0.0f64;
    let mut skin = 0usize;
    let mut count = 0usize;
    for px in roi.rows() {
        let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
        gray_sum += ((r + g + b) / 3.0) as f64;
        if is_skin(r, g, b) {
            skin += 1;
        }
        count += 1;
    }
    let brightness = if count == 0 { 0.0 } else { (gray_sum / count as f64) as f32 };
    let skin_coverage = if count == 0 { 0.0 } else { skin as f32 / count as f32 };
    let gray = gray_plane(frame);
    let contrast = std_dev(&gray);
    let sharpness = laplacian(&gray, frame.height(), frame.width());
    let brightness_score = if brightness < MIN_BRIGHTNESS {
        0.3
    } else if brightness > MAX_BRIGHTNESS {
        0.5
    } else {
        1.0
    };
    let score = (0.3 * brightness_score
        + 0.3 * (contrast / 50.0).clamp(0.0, 1.0)
        + 0.4 * (sharpness / 100.0).clamp(0.0, 1.0))
    .clamp(0.0, 1.0);
    AlignmentReport {
        brightness,
        contrast,
        sharpness,
        skin_coverage,
        score,
        aligned: (MIN_BRIGHTNESS..=MAX_BRIGHTNESS).contains(&brightness)
            && skin_coverage >= MIN_SKIN_COVERAGE,
    }
}
/// Coarse RGB skin rule: red-dominant, not too dark, not grey.
fn is_skin(r: f32, g: f32, b: f32) -> bool {
    r > 60.0 && g > 30.0 && b > 15.0 && r > g && r > b && (r - g.min(b)) > 15.0
}
fn gray_plane(frame: &Frame) -> Vec<f32> {
    frame
        .pixels
        .rows()
        .into_iter()
        .map(|px| (px[0] as f32 + px[1] as f32 + px[2] as f32) / 3.0)
        .collect()
}
fn std_dev(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n).sqrt()
}
fn laplacian(gray: &[f32], h: usize, w: usize) -> f32 {
    if h < 3 || w < 3 {
        return 0.0;
    }
    let at = |y: usize, x: usize| gray[y * w + x];
    let mut total = 0.0;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            total += (4.0 * at(y, x) - at(y - 1, x) - at(y + 1, x) - at(y, x - 1) - at(y, x + 1)).abs();
        }
    }
    total / ((h - 2) * (w - 2)) as f32
}
#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use std::time::Duration;
    fn frame_with(face: [u8; 3], background: [u8; 3]) -> Frame {
        let pixels = Array3::from_shape_fn((20, 20, 3), |(y, x, c)| {
            if (4..16).contains(&y) && (4..16).contains(&x) {
                face[c]
            } else {
                background[c]
            }
        });
        Frame::new(0, Duration::ZERO, pixels)
    }
    #[test]
    fn lit_face_is_aligned() {
        let report = assess(&frame_with([170, 120, 95], [40, 40, 40]), 0.6);
        assert!(report.aligned, "{report:?}");
        assert_eq!(report.skin_coverage, 1.0);
        assert!(report.contrast > 10.0);
        assert!(report.score > 0.3 && report.score <= 1.0);
    }
    #[test]
    fn dark_frame_is_not_aligned() {
        let report = assess(&frame_with([30, 20, 15], [5, 5, 5]), 0.6);
        assert!(!report.aligned);
        assert!(report.brightness < MIN_BRIGHTNESS);
    }
    #[test]
    fn grey_wall_is_not_skin() {
        let report = assess(&frame_with([128, 128, 128], [128, 128, 128]), 0.6);
        assert_eq!(report.skin_coverage, 0.0);
        assert!(!report.aligned);
        assert_eq!(report.sharpness, 0.0);
    }
}
