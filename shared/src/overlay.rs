//! Scale-bar overlay for captured frames.
//!
//! Burns a horizontal white bar of a "nice" physical length (1/2/5 × 10ⁿ µm)
//! into the bottom-right corner of a frame, given the lens calibration in
//! microns per pixel. Text labelling is left to the presentation layer.

use crate::camera_interface::Frame;
use tracing::debug;

/// Bar thickness in pixels.
const BAR_THICKNESS: usize = 4;

/// Margin from the right and bottom frame edges, in pixels.
const MARGIN: usize = 20;

/// Fraction of the frame width the bar may occupy.
const MAX_WIDTH_FRACTION: f64 = 0.2;

/// Geometry of a drawn scale bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleBar {
    /// Left end of the bar, in pixels.
    pub x0: usize,
    /// Row of the bar's top edge, in pixels.
    pub y0: usize,
    /// Bar length in pixels.
    pub length_px: usize,
    /// Physical length the bar represents, in microns.
    pub length_um: f64,
}

/// Pick the largest 1/2/5 × 10ⁿ value not exceeding `max_um`.
fn nice_length_um(max_um: f64) -> f64 {
    if max_um <= 0.0 {
        return 0.0;
    }
    let exp = max_um.log10().floor();
    let base = 10f64.powf(exp);
    for m in [5.0, 2.0, 1.0] {
        let candidate = m * base;
        if candidate <= max_um {
            return candidate;
        }
    }
    base
}

/// Draw a scale bar in place and return its geometry.
///
/// Returns `None` without touching the frame when `um_per_px` is not
/// positive or the frame is too small to hold a bar plus margins.
pub fn draw_scale_bar(frame: &mut Frame, um_per_px: f64) -> Option<ScaleBar> {
    if um_per_px <= 0.0 {
        return None;
    }
    let (h, w) = frame.dim();
    if w <= 2 * MARGIN + 1 || h <= MARGIN + BAR_THICKNESS {
        debug!("frame {w}x{h} too small for a scale bar");
        return None;
    }

    let max_um = MAX_WIDTH_FRACTION * w as f64 * um_per_px;
    let mut length_um = nice_length_um(max_um);
    let mut length_px = (length_um / um_per_px).round() as usize;
    let max_length = w - 2 * MARGIN;
    if length_px > max_length {
        length_px = max_length;
        length_um = length_px as f64 * um_per_px;
    }
    if length_px == 0 {
        return None;
    }

    let x0 = w - MARGIN - length_px;
    let y0 = h - MARGIN;
    for row in y0..(y0 + BAR_THICKNESS).min(h) {
        for col in x0..x0 + length_px {
            frame[[row, col]] = u16::MAX;
        }
    }

    Some(ScaleBar {
        x0,
        y0,
        length_px,
        length_um,
    })
}
