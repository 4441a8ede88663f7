//! Raster traversal engine.
//!
//! Builds a rows x cols coordinate matrix for a rectangular, parallelogram
//! or trapezoidal region, walks it row by row (serpentine optional), and
//! runs the per-tile pipeline: settle, report, autofocus, capture, focus
//! stack. Tiles are keyed by `(row, logical_col)` regardless of physical
//! traversal direction, so stored filenames are traversal-independent.

use crate::autofocus::{AutoFocus, AutofocusParams};
use crate::cancel::CancelToken;
use crate::error::{ScanError, ScanResult};
use crate::stack::{focus_stack, StackParams};
use serde::{Deserialize, Serialize};
use shared::camera_interface::CameraInterface;
use shared::image_sink::{CaptureMetadata, ImageFormat, ImageSink};
use shared::overlay::draw_scale_bar;
use shared::position::Position;
use shared::stage_interface::StageInterface;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Matching tolerance between the stage position and a tile target, mm.
const POSITION_TOLERANCE_MM: f64 = 1e-6;

/// Dwell after each per-tile operation.
const TILE_DWELL: Duration = Duration::from_millis(30);

/// Default XY feed for raster moves, mm/min.
pub const DEFAULT_RASTER_FEED: f64 = 300.0;

/// Region shape of a raster scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RasterMode {
    /// P1/P2 are opposite corners; P3/P4 are derived.
    Rectangle,
    /// P1 origin, P2 ends the first row, P3 starts the last row.
    Parallelogram,
    /// P1->P2 is the top edge, P3->P4 the bottom edge.
    Trapezoid,
}

/// Full configuration for one raster run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterConfig {
    pub mode: RasterMode,
    pub p1: (f64, f64),
    pub p2: (f64, f64),
    pub p3: Option<(f64, f64)>,
    pub p4: Option<(f64, f64)>,
    pub rows: usize,
    pub cols: usize,
    pub serpentine: bool,
    pub feed_x_mm_min: f64,
    pub feed_y_mm_min: f64,
    /// Autofocus at every tile when set.
    pub autofocus: Option<AutofocusParams>,
    /// Capture and persist a frame at every tile.
    pub capture: bool,
    /// Capture a focus stack at every tile when set.
    pub stack: Option<StackParams>,
}

impl RasterConfig {
    fn base(mode: RasterMode, p1: (f64, f64), p2: (f64, f64), rows: usize, cols: usize) -> Self {
        Self {
            mode,
            p1,
            p2,
            p3: None,
            p4: None,
            rows,
            cols,
            serpentine: true,
            feed_x_mm_min: DEFAULT_RASTER_FEED,
            feed_y_mm_min: DEFAULT_RASTER_FEED,
            autofocus: None,
            capture: false,
            stack: None,
        }
    }

    /// Rectangle spanned by opposite corners `p1` and `p2`.
    pub fn rectangle(p1: (f64, f64), p2: (f64, f64), rows: usize, cols: usize) -> Self {
        Self::base(RasterMode::Rectangle, p1, p2, rows, cols)
    }

    /// Parallelogram with first-row edge `p1 -> p2` and last-row origin `p3`.
    pub fn parallelogram(
        p1: (f64, f64),
        p2: (f64, f64),
        p3: (f64, f64),
        rows: usize,
        cols: usize,
    ) -> Self {
        let mut cfg = Self::base(RasterMode::Parallelogram, p1, p2, rows, cols);
        cfg.p3 = Some(p3);
        cfg
    }

    /// Trapezoid with top edge `p1 -> p2` and bottom edge `p3 -> p4`.
    pub fn trapezoid(
        p1: (f64, f64),
        p2: (f64, f64),
        p3: (f64, f64),
        p4: (f64, f64),
        rows: usize,
        cols: usize,
    ) -> Self {
        let mut cfg = Self::base(RasterMode::Trapezoid, p1, p2, rows, cols);
        cfg.p3 = Some(p3);
        cfg.p4 = Some(p4);
        cfg
    }

    fn validate(&self) -> ScanResult<()> {
        if self.rows < 1 || self.cols < 1 {
            return Err(ScanError::InvalidArgument(
                "rows and cols must be >= 1".to_string(),
            ));
        }
        match self.mode {
            RasterMode::Rectangle => {
                let (x1, y1) = self.p1;
                let (x2, y2) = self.p2;
                if (x2 - x1).abs() <= POSITION_TOLERANCE_MM
                    || (y2 - y1).abs() <= POSITION_TOLERANCE_MM
                {
                    return Err(ScanError::InvalidArgument(
                        "rectangle corners must differ in both X and Y".to_string(),
                    ));
                }
            }
            RasterMode::Parallelogram => {
                if self.p3.is_none() {
                    return Err(ScanError::InvalidArgument(
                        "parallelogram requires P3".to_string(),
                    ));
                }
            }
            RasterMode::Trapezoid => {
                if self.p3.is_none() || self.p4.is_none() {
                    return Err(ScanError::InvalidArgument(
                        "trapezoid requires P3 and P4".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn lerp(a: (f64, f64), b: (f64, f64), t: f64) -> (f64, f64) {
    (a.0 + (b.0 - a.0) * t, a.1 + (b.1 - a.1) * t)
}

/// Build the rows x cols grid of (x, y) tile centres for `config`.
///
/// Pure function of the configuration; the runner memoizes it per run.
/// Every shape reduces to per-row edge interpolation: row `r` runs from
/// `lerp(P1, P3, r/(rows-1))` to `lerp(P2, P4, r/(rows-1))`, with P3/P4
/// derived for rectangles and parallelograms.
pub fn build_coordinate_matrix(config: &RasterConfig) -> ScanResult<Vec<Vec<(f64, f64)>>> {
    config.validate()?;
    let (p1, p2, p3, p4) = match config.mode {
        RasterMode::Rectangle => {
            let (x1, y1) = config.p1;
            let (x2, y2) = config.p2;
            ((x1, y1), (x2, y1), (x1, y2), (x2, y2))
        }
        RasterMode::Parallelogram => {
            let p3 = config.p3.unwrap_or(config.p1);
            let p4 = (
                config.p2.0 + p3.0 - config.p1.0,
                config.p2.1 + p3.1 - config.p1.1,
            );
            (config.p1, config.p2, p3, p4)
        }
        RasterMode::Trapezoid => (
            config.p1,
            config.p2,
            config.p3.unwrap_or(config.p1),
            config.p4.unwrap_or(config.p2),
        ),
    };

    let mut matrix = Vec::with_capacity(config.rows);
    for r in 0..config.rows {
        let t = if config.rows > 1 {
            r as f64 / (config.rows - 1) as f64
        } else {
            0.0
        };
        let start = lerp(p1, p3, t);
        let end = lerp(p2, p4, t);
        let mut row = Vec::with_capacity(config.cols);
        for c in 0..config.cols {
            let s = if config.cols > 1 {
                c as f64 / (config.cols - 1) as f64
            } else {
                0.0
            };
            row.push(lerp(start, end, s));
        }
        matrix.push(row);
    }
    Ok(matrix)
}

/// Progress events for one raster run.
#[derive(Debug, Clone)]
pub enum RasterEvent {
    /// The stage settled on a tile.
    TileReached {
        row: usize,
        col: usize,
        x: f64,
        y: f64,
    },
    /// A frame was persisted for a tile.
    TileCaptured {
        row: usize,
        col: usize,
        filename: String,
    },
    /// The tile's frame was unavailable and the capture was skipped.
    TileSkipped { row: usize, col: usize },
    Complete { tiles: usize },
}

/// Counts reported by a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RasterSummary {
    pub tiles: usize,
    pub captures: usize,
}

type EventCallback = Box<dyn Fn(&RasterEvent) + Send>;

/// Drives one raster run against an exclusively-owned stage/camera/sink.
pub struct RasterRunner<'a, S, C, W> {
    stage: &'a mut S,
    camera: &'a mut C,
    sink: &'a mut W,
    config: RasterConfig,
    output_dir: PathBuf,
    format: ImageFormat,
    lens: Option<String>,
    um_per_px: Option<f64>,
    cancel: CancelToken,
    on_event: Option<EventCallback>,
    matrix: Option<Vec<Vec<(f64, f64)>>>,
}

impl<'a, S, C, W> RasterRunner<'a, S, C, W>
where
    S: StageInterface,
    C: CameraInterface,
    W: ImageSink,
{
    pub fn new(stage: &'a mut S, camera: &'a mut C, sink: &'a mut W, config: RasterConfig) -> Self {
        Self {
            stage,
            camera,
            sink,
            config,
            output_dir: PathBuf::from("runs"),
            format: ImageFormat::Png,
            lens: None,
            um_per_px: None,
            cancel: CancelToken::new(),
            on_event: None,
            matrix: None,
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = format;
        self
    }

    /// Record the lens id in capture metadata.
    pub fn with_lens(mut self, name: impl Into<String>) -> Self {
        self.lens = Some(name.into());
        self
    }

    /// Burn a scale bar into captured frames using this lens calibration.
    pub fn with_scale_overlay(mut self, um_per_px: f64) -> Self {
        self.um_per_px = Some(um_per_px);
        self
    }

    pub fn on_event(mut self, callback: impl Fn(&RasterEvent) + Send + 'static) -> Self {
        self.on_event = Some(Box::new(callback));
        self
    }

    /// Token to cancel this run from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Walk every tile of the configured region.
    ///
    /// Cancellation is polled after every wait-for-settle: a move already
    /// issued completes, but no operation starts for a tile once the token
    /// is observed set.
    pub fn run(&mut self) -> ScanResult<RasterSummary> {
        let matrix = match &self.matrix {
            Some(matrix) => matrix.clone(),
            None => {
                let matrix = build_coordinate_matrix(&self.config)?;
                self.matrix = Some(matrix.clone());
                matrix
            }
        };
        info!(
            "raster: {:?} {}x{} serpentine={}",
            self.config.mode, self.config.rows, self.config.cols, self.config.serpentine
        );

        // Seek the first tile if the stage is not already on it.
        let origin = matrix[0][0];
        let position = self.stage.get_position()?;
        let mut cx = position.x.unwrap_or(origin.0);
        let mut cy = position.y.unwrap_or(origin.1);
        if (cx - origin.0).abs() > POSITION_TOLERANCE_MM
            || (cy - origin.1).abs() > POSITION_TOLERANCE_MM
        {
            self.cancel.check()?;
            self.stage.move_absolute(
                Some(origin.0),
                Some(origin.1),
                None,
                self.config.feed_x_mm_min,
            )?;
            self.stage.wait_for_moves()?;
            self.cancel.check()?;
            cx = origin.0;
            cy = origin.1;
        }

        let mut summary = RasterSummary::default();
        for r in 0..self.config.rows {
            let forward = r % 2 == 0 || !self.config.serpentine;
            let columns: Vec<usize> = if forward {
                (0..self.config.cols).collect()
            } else {
                (0..self.config.cols).rev().collect()
            };
            for c in columns {
                let (tx, ty) = matrix[r][c];
                let (dx, dy) = (tx - cx, ty - cy);
                if dx.abs() > POSITION_TOLERANCE_MM || dy.abs() > POSITION_TOLERANCE_MM {
                    let feed = if dx.abs() >= dy.abs() {
                        self.config.feed_x_mm_min
                    } else {
                        self.config.feed_y_mm_min
                    };
                    self.stage.move_relative(dx, dy, 0.0, feed)?;
                    self.stage.wait_for_moves()?;
                }
                cx = tx;
                cy = ty;
                self.cancel.check()?;

                self.emit(&RasterEvent::TileReached {
                    row: r,
                    col: c,
                    x: tx,
                    y: ty,
                });
                std::thread::sleep(TILE_DWELL);

                if let Some(params) = self.config.autofocus.clone() {
                    match AutoFocus::new(&mut *self.stage, &mut *self.camera).run(&params) {
                        Ok(dz) => debug!("tile ({r},{c}): autofocus dz={dz:.4} mm"),
                        Err(err @ ScanError::InvalidArgument(_)) => return Err(err),
                        Err(err) => warn!("tile ({r},{c}): autofocus failed: {err}"),
                    }
                    std::thread::sleep(TILE_DWELL);
                }

                if self.config.capture {
                    if self.capture_tile(r, c, tx, ty)? {
                        summary.captures += 1;
                    }
                    std::thread::sleep(TILE_DWELL);
                }

                if let Some(stack) = self.config.stack.clone() {
                    let metadata = self.tile_metadata(tx, ty);
                    let prefix = tile_key(r, c);
                    let saved = focus_stack(
                        &mut *self.stage,
                        &mut *self.camera,
                        &mut *self.sink,
                        &stack,
                        &self.output_dir,
                        &prefix,
                        self.format,
                        &metadata,
                    )?;
                    debug!("tile ({r},{c}): stacked {saved} plane(s)");
                }

                summary.tiles += 1;
            }
        }

        self.emit(&RasterEvent::Complete {
            tiles: summary.tiles,
        });
        Ok(summary)
    }

    /// Snap, overlay, and persist one tile. Returns whether a frame was saved.
    fn capture_tile(&mut self, row: usize, col: usize, x: f64, y: f64) -> ScanResult<bool> {
        let Some(mut frame) = self.camera.snap() else {
            warn!("tile ({row},{col}): no frame; skipping capture");
            self.emit(&RasterEvent::TileSkipped { row, col });
            return Ok(false);
        };
        if let Some(um_per_px) = self.um_per_px {
            draw_scale_bar(&mut frame, um_per_px);
        }
        let metadata = self.tile_metadata(x, y);
        let filename = tile_key(row, col);
        match self.sink.save(
            &frame,
            &self.output_dir,
            &filename,
            false,
            self.format,
            &metadata,
        ) {
            Ok(()) => {
                self.emit(&RasterEvent::TileCaptured {
                    row,
                    col,
                    filename,
                });
                Ok(true)
            }
            Err(err) => {
                warn!("tile ({row},{col}): save failed: {err}");
                Ok(false)
            }
        }
    }

    fn tile_metadata(&mut self, x: f64, y: f64) -> CaptureMetadata {
        // Best effort: a stage that cannot report falls back to the target.
        let position = self
            .stage
            .get_position()
            .unwrap_or(Position {
                x: Some(x),
                y: Some(y),
                z: None,
            });
        CaptureMetadata {
            camera: self.camera.name().to_string(),
            position,
            lens: self.lens.clone(),
        }
    }

    fn emit(&self, event: &RasterEvent) {
        if let Some(callback) = &self.on_event {
            callback(event);
        }
    }
}

/// Traversal-independent filename key for a tile.
fn tile_key(row: usize, col: usize) -> String {
    format!("tile_r{row:04}_c{col:04}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn rectangle_matrix_from_two_corners() {
        let cfg = RasterConfig::rectangle((0.0, 0.0), (2.0, 1.0), 2, 3);
        let matrix = build_coordinate_matrix(&cfg).unwrap();
        let expected = [
            [(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)],
            [(0.0, 1.0), (1.0, 1.0), (2.0, 1.0)],
        ];
        for (row, expected_row) in matrix.iter().zip(&expected) {
            for (&(x, y), &(ex, ey)) in row.iter().zip(expected_row) {
                assert_abs_diff_eq!(x, ex, epsilon = 1e-12);
                assert_abs_diff_eq!(y, ey, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn parallelogram_matrix_shears_rows() {
        let cfg = RasterConfig::parallelogram((0.0, 0.0), (4.0, 0.0), (1.0, 3.0), 2, 3);
        let matrix = build_coordinate_matrix(&cfg).unwrap();
        // Second row is the first row translated by P3 - P1.
        for c in 0..3 {
            assert_abs_diff_eq!(matrix[1][c].0, matrix[0][c].0 + 1.0, epsilon = 1e-12);
            assert_abs_diff_eq!(matrix[1][c].1, matrix[0][c].1 + 3.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn trapezoid_matrix_interpolates_edges() {
        let cfg = RasterConfig::trapezoid(
            (0.0, 0.0),
            (4.0, 0.0),
            (1.0, 2.0),
            (3.0, 2.0),
            3,
            2,
        );
        let matrix = build_coordinate_matrix(&cfg).unwrap();
        // Middle row edges sit halfway between top and bottom edges.
        assert_abs_diff_eq!(matrix[1][0].0, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(matrix[1][0].1, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(matrix[1][1].0, 3.5, epsilon = 1e-12);
        assert_abs_diff_eq!(matrix[1][1].1, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn degenerate_rectangle_is_rejected() {
        let cfg = RasterConfig::rectangle((1.0, 1.0), (1.0, 5.0), 2, 2);
        assert!(matches!(
            build_coordinate_matrix(&cfg),
            Err(ScanError::InvalidArgument(_))
        ));
        let cfg = RasterConfig::rectangle((0.0, 0.0), (2.0, 1.0), 0, 3);
        assert!(matches!(
            build_coordinate_matrix(&cfg),
            Err(ScanError::InvalidArgument(_))
        ));
    }

    #[test]
    fn single_row_and_column_grids_are_flat() {
        let cfg = RasterConfig::rectangle((0.0, 0.0), (3.0, 1.0), 1, 4);
        let matrix = build_coordinate_matrix(&cfg).unwrap();
        assert_eq!(matrix.len(), 1);
        assert_eq!(matrix[0].len(), 4);
        for (c, &(x, y)) in matrix[0].iter().enumerate() {
            assert_abs_diff_eq!(x, c as f64, epsilon = 1e-12);
            assert_abs_diff_eq!(y, 0.0, epsilon = 1e-12);
        }
    }
}
