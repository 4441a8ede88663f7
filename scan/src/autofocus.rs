//! Coarse-to-fine autofocus search along Z.
//!
//! A deterministic two-phase hill search: a wide sweep at the coarse step,
//! then a dense sweep over ±10% of the range around the coarse best. All
//! moves are relative to the pre-search origin and the returned offset is
//! measured from it. Ties break to the first maximum so repeated runs over
//! identical scores reproduce the same focus position.
//!
//! The sweep has no mid-search cancellation checkpoint; callers cancel
//! between tiles/points, not inside a sweep.

use crate::error::{ScanError, ScanResult};
use crate::focus_metric::{FocusMetric, FocusScorer};
use serde::{Deserialize, Serialize};
use shared::camera_interface::CameraInterface;
use shared::stage_interface::StageInterface;
use std::time::Duration;
use tracing::{debug, warn};

/// Default Z feed for focus moves, mm/min.
pub const DEFAULT_FEED_MM_PER_MIN: f64 = 240.0;

/// Settle time after each coarse move before sampling.
const COARSE_SETTLE: Duration = Duration::from_millis(30);

/// Settle time after each fine move before sampling.
const FINE_SETTLE: Duration = Duration::from_millis(20);

/// The fine sweep spans this fraction of the full range around the coarse best.
const FINE_RANGE_FRACTION: f64 = 0.1;

/// Fine moves run at this fraction of the caller's feed.
const FINE_FEED_FRACTION: f64 = 0.75;

/// Search parameters for one autofocus run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutofocusParams {
    pub metric: FocusMetric,
    /// Half-width of the coarse sweep, mm.
    pub z_range_mm: f64,
    pub coarse_step_mm: f64,
    pub fine_step_mm: f64,
    pub feed_mm_per_min: f64,
}

impl Default for AutofocusParams {
    fn default() -> Self {
        Self {
            metric: FocusMetric::LaplacianVariance,
            z_range_mm: 0.5,
            coarse_step_mm: 0.01,
            fine_step_mm: 0.002,
            feed_mm_per_min: DEFAULT_FEED_MM_PER_MIN,
        }
    }
}

/// Autofocus engine bound to a stage/camera pair for one run.
pub struct AutoFocus<'a, S, C> {
    stage: &'a mut S,
    camera: &'a mut C,
}

impl<'a, S: StageInterface, C: CameraInterface> AutoFocus<'a, S, C> {
    pub fn new(stage: &'a mut S, camera: &'a mut C) -> Self {
        Self { stage, camera }
    }

    /// Run the search with the metric given in `params`.
    pub fn run(&mut self, params: &AutofocusParams) -> ScanResult<f64> {
        let metric = params.metric;
        self.coarse_to_fine(
            &metric,
            params.z_range_mm,
            params.coarse_step_mm,
            params.fine_step_mm,
            params.feed_mm_per_min,
        )
    }

    /// Two-phase search; returns the best Z offset relative to the starting
    /// position and leaves the stage there.
    ///
    /// Unavailable frames are skipped but the sweep still advances, so a
    /// flaky camera shifts which offsets get scored, not where they are.
    /// With zero coarse samples the search reports 0.0; with zero fine
    /// samples it returns to the coarse best and reports that.
    pub fn coarse_to_fine<M: FocusScorer>(
        &mut self,
        scorer: &M,
        z_range_mm: f64,
        coarse_step_mm: f64,
        fine_step_mm: f64,
        feed_mm_per_min: f64,
    ) -> ScanResult<f64> {
        if coarse_step_mm <= 0.0 || fine_step_mm <= 0.0 {
            return Err(ScanError::InvalidArgument(
                "coarse and fine steps must be > 0".to_string(),
            ));
        }

        // Coarse sweep: 2*steps+1 symmetric offsets around the origin,
        // visited incrementally from -range to +range.
        let steps = ((z_range_mm / coarse_step_mm).round() as i64).max(1);
        let mut samples: Vec<(f64, f64)> = Vec::with_capacity(2 * steps as usize + 1);
        let mut cumulative = 0.0;
        for i in -steps..=steps {
            let dz = i as f64 * coarse_step_mm;
            self.stage
                .move_relative(0.0, 0.0, dz - cumulative, feed_mm_per_min)?;
            cumulative = dz;
            self.stage.wait_for_moves()?;
            std::thread::sleep(COARSE_SETTLE);
            let Some(frame) = self.camera.snap() else {
                debug!("no frame at dz={dz:.4} mm; skipping sample");
                continue;
            };
            samples.push((dz, scorer.score(&frame)));
        }
        let Some((coarse_best, coarse_score)) = first_max(&samples) else {
            warn!("coarse sweep collected no samples; staying put");
            return Ok(0.0);
        };
        debug!("coarse best dz={coarse_best:.4} mm (score {coarse_score:.2})");
        self.stage
            .move_relative(0.0, 0.0, coarse_best - cumulative, feed_mm_per_min)?;
        self.stage.wait_for_moves()?;

        // Fine sweep around the coarse best.
        let fine_range = FINE_RANGE_FRACTION * z_range_mm;
        let fine_steps = ((fine_range / fine_step_mm).floor() as i64).max(1);
        let fine_feed = FINE_FEED_FRACTION * feed_mm_per_min;
        let mut fine_samples: Vec<(f64, f64)> = Vec::with_capacity(2 * fine_steps as usize + 1);
        let mut cumulative = 0.0;
        for i in -fine_steps..=fine_steps {
            let offset = i as f64 * fine_step_mm;
            self.stage
                .move_relative(0.0, 0.0, offset - cumulative, fine_feed)?;
            cumulative = offset;
            self.stage.wait_for_moves()?;
            std::thread::sleep(FINE_SETTLE);
            let Some(frame) = self.camera.snap() else {
                debug!("no frame at fine offset {offset:.4} mm; skipping sample");
                continue;
            };
            fine_samples.push((coarse_best + offset, scorer.score(&frame)));
        }
        let Some((fine_best, fine_score)) = first_max(&fine_samples) else {
            warn!("fine sweep collected no samples; returning to coarse best");
            self.stage
                .move_relative(0.0, 0.0, -cumulative, feed_mm_per_min)?;
            self.stage.wait_for_moves()?;
            return Ok(coarse_best);
        };
        debug!("fine best dz={fine_best:.4} mm (score {fine_score:.2})");
        self.stage.move_relative(
            0.0,
            0.0,
            fine_best - (coarse_best + cumulative),
            feed_mm_per_min,
        )?;
        self.stage.wait_for_moves()?;
        Ok(fine_best)
    }
}

/// First occurrence of the maximum score wins; `None` on an empty slice.
fn first_max(samples: &[(f64, f64)]) -> Option<(f64, f64)> {
    let mut iter = samples.iter().copied();
    let mut best = iter.next()?;
    for sample in iter {
        if sample.1 > best.1 {
            best = sample;
        }
    }
    Some(best)
}
