//! Focus stacking: capture a sweep of Z planes about the current position.
//!
//! Used standalone and per tile by the raster engine. The stage starts the
//! sweep `range/2` below its current Z, captures a plane after every step,
//! and is restored to the starting Z afterwards.

use crate::error::{ScanError, ScanResult};
use serde::{Deserialize, Serialize};
use shared::camera_interface::CameraInterface;
use shared::image_sink::{CaptureMetadata, ImageFormat, ImageSink};
use shared::stage_interface::StageInterface;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Settle time after each Z step before capturing.
const PLANE_SETTLE: Duration = Duration::from_millis(20);

/// Z sweep parameters for a focus stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackParams {
    /// Total sweep depth, mm.
    pub range_mm: f64,
    /// Distance between planes, mm.
    pub step_mm: f64,
    pub feed_mm_per_min: f64,
}

impl StackParams {
    /// Number of planes the sweep will capture.
    pub fn planes(&self) -> usize {
        ((self.range_mm / self.step_mm).round() as i64).max(1) as usize
    }

    fn validate(&self) -> ScanResult<()> {
        if self.range_mm <= 0.0 || self.step_mm <= 0.0 {
            return Err(ScanError::InvalidArgument(
                "stack range and step must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Capture a Z stack about the current position.
///
/// Planes are saved as `{prefix}_z{index:03}`. A missed frame skips that
/// plane and the sweep continues; the count of persisted planes is
/// returned. The stage always ends back at its starting Z.
#[allow(clippy::too_many_arguments)]
pub fn focus_stack<S, C, W>(
    stage: &mut S,
    camera: &mut C,
    sink: &mut W,
    params: &StackParams,
    directory: &Path,
    prefix: &str,
    format: ImageFormat,
    metadata: &CaptureMetadata,
) -> ScanResult<usize>
where
    S: StageInterface,
    C: CameraInterface,
    W: ImageSink,
{
    params.validate()?;
    let planes = params.planes();
    let half = (planes / 2) as f64 * params.step_mm;

    stage.move_relative(0.0, 0.0, -half, params.feed_mm_per_min)?;
    stage.wait_for_moves()?;

    let mut travelled = -half;
    let mut saved = 0;
    for index in 0..planes {
        std::thread::sleep(PLANE_SETTLE);
        match camera.snap() {
            Some(frame) => {
                let filename = format!("{prefix}_z{index:03}");
                match sink.save(&frame, directory, &filename, false, format, metadata) {
                    Ok(()) => saved += 1,
                    Err(err) => warn!("failed to save stack plane {index}: {err}"),
                }
            }
            None => debug!("no frame at stack plane {index}; skipping"),
        }
        if index + 1 < planes {
            stage.move_relative(0.0, 0.0, params.step_mm, params.feed_mm_per_min)?;
            stage.wait_for_moves()?;
            travelled += params.step_mm;
        }
    }

    // Restore the starting Z exactly.
    stage.move_relative(0.0, 0.0, -travelled, params.feed_mm_per_min)?;
    stage.wait_for_moves()?;
    Ok(saved)
}
