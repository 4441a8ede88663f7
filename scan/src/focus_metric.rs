//! Scalar sharpness metrics for captured frames.
//!
//! Both metrics score higher on sharper images and carry no state. The
//! [`FocusScorer`] trait is the seam the autofocus engine searches through;
//! tests substitute deterministic scorers there.

use serde::{Deserialize, Serialize};
use shared::camera_interface::Frame;
use std::fmt;

/// Anything that can score a frame for sharpness.
pub trait FocusScorer {
    /// Score a frame; higher is sharper.
    fn score(&self, frame: &Frame) -> f64;
}

/// Built-in focus metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FocusMetric {
    /// Variance of the 4-neighbour Laplacian response.
    LaplacianVariance,
    /// Mean gradient energy from 3x3 Sobel responses.
    Tenengrad,
}

impl fmt::Display for FocusMetric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FocusMetric::LaplacianVariance => write!(f, "LaplacianVar"),
            FocusMetric::Tenengrad => write!(f, "Tenengrad"),
        }
    }
}

impl FocusScorer for FocusMetric {
    fn score(&self, frame: &Frame) -> f64 {
        match self {
            FocusMetric::LaplacianVariance => laplacian_variance(frame),
            FocusMetric::Tenengrad => tenengrad(frame),
        }
    }
}

/// Variance of the 4-neighbour Laplacian over the frame interior.
fn laplacian_variance(frame: &Frame) -> f64 {
    let (h, w) = frame.dim();
    if h < 3 || w < 3 {
        return 0.0;
    }
    let n = ((h - 2) * (w - 2)) as f64;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for r in 1..h - 1 {
        for c in 1..w - 1 {
            let lap = f64::from(frame[[r - 1, c]])
                + f64::from(frame[[r + 1, c]])
                + f64::from(frame[[r, c - 1]])
                + f64::from(frame[[r, c + 1]])
                - 4.0 * f64::from(frame[[r, c]]);
            sum += lap;
            sum_sq += lap * lap;
        }
    }
    let mean = sum / n;
    sum_sq / n - mean * mean
}

/// Mean of squared 3x3 Sobel gradient magnitude over the frame interior.
fn tenengrad(frame: &Frame) -> f64 {
    let (h, w) = frame.dim();
    if h < 3 || w < 3 {
        return 0.0;
    }
    let n = ((h - 2) * (w - 2)) as f64;
    let px = |r: usize, c: usize| f64::from(frame[[r, c]]);
    let mut energy = 0.0;
    for r in 1..h - 1 {
        for c in 1..w - 1 {
            let gx = px(r - 1, c + 1) + 2.0 * px(r, c + 1) + px(r + 1, c + 1)
                - px(r - 1, c - 1)
                - 2.0 * px(r, c - 1)
                - px(r + 1, c - 1);
            let gy = px(r + 1, c - 1) + 2.0 * px(r + 1, c) + px(r + 1, c + 1)
                - px(r - 1, c - 1)
                - 2.0 * px(r - 1, c)
                - px(r - 1, c + 1);
            energy += gx * gx + gy * gy;
        }
    }
    energy / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Checkerboard: maximal high-frequency content.
    fn sharp_frame(size: usize) -> Frame {
        Array2::from_shape_fn((size, size), |(r, c)| {
            if (r + c) % 2 == 0 {
                4000
            } else {
                0
            }
        })
    }

    fn flat_frame(size: usize) -> Frame {
        Array2::from_elem((size, size), 2000)
    }

    #[test]
    fn sharp_scores_above_flat() {
        for metric in [FocusMetric::LaplacianVariance, FocusMetric::Tenengrad] {
            let sharp = metric.score(&sharp_frame(16));
            let flat = metric.score(&flat_frame(16));
            assert!(
                sharp > flat,
                "{metric}: sharp {sharp} should beat flat {flat}"
            );
            assert_eq!(flat, 0.0, "{metric}: flat field has no structure");
        }
    }

    #[test]
    fn degenerate_frames_score_zero() {
        let tiny = Array2::<u16>::zeros((2, 2));
        assert_eq!(FocusMetric::LaplacianVariance.score(&tiny), 0.0);
        assert_eq!(FocusMetric::Tenengrad.score(&tiny), 0.0);
    }

    #[test]
    fn blur_reduces_both_metrics() {
        // Halving the contrast of the checkerboard must lower both scores.
        let sharp = sharp_frame(16);
        let soft = sharp.mapv(|v| v / 2 + 1000);
        for metric in [FocusMetric::LaplacianVariance, FocusMetric::Tenengrad] {
            assert!(metric.score(&sharp) > metric.score(&soft));
        }
    }
}
