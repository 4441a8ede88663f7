//! Surface leveling: probe a set of XY points, record focused Z at each,
//! fit a polynomial surface, and install it as a focus area.
//!
//! A run walks `Probing -> {AutoFocusing | AwaitingManualContinue} ->
//! Recording` per point, then `Fitting -> Complete`; progress is surfaced
//! through [`LevelingEvent`] callbacks. Cancellation is checked before each
//! move and before each position read, so a cancelled point never records a
//! half-probed sample.

use crate::autofocus::{AutoFocus, AutofocusParams, DEFAULT_FEED_MM_PER_MIN};
use crate::cancel::CancelToken;
use crate::error::{ScanError, ScanResult};
use crate::focus_planes::{Area, FocusPlaneManager};
use crate::surface::{SurfaceKind, SurfaceModel};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use shared::camera_interface::CameraInterface;
use shared::stage_interface::StageInterface;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Poll interval while blocked on a manual continuation.
const GATE_POLL: Duration = Duration::from_millis(50);

/// Point layout for a leveling run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LevelingMethod {
    /// Exactly three user-chosen XY points.
    ThreePoint { points: [(f64, f64); 3] },
    /// rows x cols grid evenly spaced over `(x1, y1, x2, y2)`.
    Grid {
        rect: (f64, f64, f64, f64),
        rows: usize,
        cols: usize,
    },
}

impl LevelingMethod {
    /// Probe targets in visit order (grids are row-major).
    fn points(&self) -> Vec<(f64, f64)> {
        match *self {
            LevelingMethod::ThreePoint { points } => points.to_vec(),
            LevelingMethod::Grid {
                rect: (x1, y1, x2, y2),
                rows,
                cols,
            } => {
                let dx = if cols > 1 {
                    (x2 - x1) / (cols - 1) as f64
                } else {
                    0.0
                };
                let dy = if rows > 1 {
                    (y2 - y1) / (rows - 1) as f64
                } else {
                    0.0
                };
                let mut points = Vec::with_capacity(rows * cols);
                for r in 0..rows {
                    for c in 0..cols {
                        points.push((x1 + c as f64 * dx, y1 + r as f64 * dy));
                    }
                }
                points
            }
        }
    }
}

/// How focus is reached at each probe point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProbeMode {
    /// Run the autofocus engine at each point.
    Auto(AutofocusParams),
    /// Prompt the operator and block on a [`ManualGate`] continuation.
    Manual,
}

/// Progress events for one leveling run.
#[derive(Debug, Clone)]
pub enum LevelingEvent {
    /// Moving to probe point `point` of `total`.
    Probing {
        point: usize,
        total: usize,
        x: f64,
        y: f64,
    },
    AutoFocusing {
        point: usize,
    },
    /// Blocked until the operator signals the gate.
    AwaitingManualContinue {
        point: usize,
    },
    /// Measured sample stored for `point`.
    Recorded {
        point: usize,
        x: f64,
        y: f64,
        z: f64,
    },
    Fitting {
        samples: usize,
    },
    Complete,
}

/// Operator-side handle that releases one manual probe point per call.
pub struct ManualTrigger {
    tx: Sender<()>,
}

impl ManualTrigger {
    /// Allow the run to proceed past the current (or next) manual gate.
    pub fn proceed(&self) {
        let _ = self.tx.send(());
    }
}

/// Run-side handle that blocks until the operator proceeds.
pub struct ManualGate {
    rx: Receiver<()>,
}

impl ManualGate {
    /// Block until triggered, polling the cancellation token.
    ///
    /// A dropped trigger counts as cancellation: the operator went away.
    fn wait(&self, cancel: &CancelToken) -> ScanResult<()> {
        loop {
            cancel.check()?;
            match self.rx.recv_timeout(GATE_POLL) {
                Ok(()) => return Ok(()),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(ScanError::Cancelled),
            }
        }
    }
}

/// Create a connected trigger/gate pair for manual probing.
pub fn manual_gate() -> (ManualTrigger, ManualGate) {
    let (tx, rx) = unbounded();
    (ManualTrigger { tx }, ManualGate { rx })
}

/// Result of a completed leveling run.
#[derive(Debug, Clone)]
pub struct LevelingOutcome {
    /// Measured (x, y, z) samples in probe order.
    pub samples: Vec<(f64, f64, f64)>,
    pub model: SurfaceModel,
    /// Priority-0 area covering the bounding rectangle of the probed extent.
    pub area: Area,
}

type EventCallback = Box<dyn Fn(&LevelingEvent) + Send>;

/// Orchestrates one leveling run against an exclusively-owned stage/camera.
pub struct LevelingRunner<'a, S, C> {
    stage: &'a mut S,
    camera: &'a mut C,
    kind: SurfaceKind,
    probe: ProbeMode,
    gate: Option<ManualGate>,
    feed_mm_per_min: f64,
    cancel: CancelToken,
    on_event: Option<EventCallback>,
}

impl<'a, S: StageInterface, C: CameraInterface> LevelingRunner<'a, S, C> {
    pub fn new(stage: &'a mut S, camera: &'a mut C, kind: SurfaceKind, probe: ProbeMode) -> Self {
        Self {
            stage,
            camera,
            kind,
            probe,
            gate: None,
            feed_mm_per_min: DEFAULT_FEED_MM_PER_MIN,
            cancel: CancelToken::new(),
            on_event: None,
        }
    }

    /// Attach the gate for [`ProbeMode::Manual`] runs.
    pub fn with_manual_gate(mut self, gate: ManualGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_feed(mut self, feed_mm_per_min: f64) -> Self {
        self.feed_mm_per_min = feed_mm_per_min;
        self
    }

    pub fn on_event(mut self, callback: impl Fn(&LevelingEvent) + Send + 'static) -> Self {
        self.on_event = Some(Box::new(callback));
        self
    }

    /// Token to cancel this run from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Probe every point of `method`, fit the surface, build the area.
    pub fn run(&mut self, method: &LevelingMethod) -> ScanResult<LevelingOutcome> {
        let points = method.points();
        let required = self.kind.required_samples();
        if points.len() < required {
            return Err(ScanError::InsufficientSamples {
                kind: self.kind,
                required,
                actual: points.len(),
            });
        }
        if matches!(self.probe, ProbeMode::Manual) && self.gate.is_none() {
            return Err(ScanError::InvalidArgument(
                "manual probing requires a continuation gate".to_string(),
            ));
        }

        info!(
            "leveling: probing {} point(s) for a {} surface",
            points.len(),
            self.kind
        );
        let total = points.len();
        let mut samples = Vec::with_capacity(total);
        for (i, &(x, y)) in points.iter().enumerate() {
            samples.push(self.probe_point(i, total, x, y)?);
        }

        self.emit(&LevelingEvent::Fitting {
            samples: samples.len(),
        });
        let model = SurfaceModel::fit(self.kind, &samples)?;
        let area = bounding_area(&samples, model.clone());
        self.emit(&LevelingEvent::Complete);
        Ok(LevelingOutcome {
            samples,
            model,
            area,
        })
    }

    /// Run, then atomically replace `planes`' area set with the new surface.
    pub fn run_and_apply(
        &mut self,
        method: &LevelingMethod,
        planes: &FocusPlaneManager,
    ) -> ScanResult<LevelingOutcome> {
        let outcome = self.run(method)?;
        planes.apply(vec![outcome.area.clone()])?;
        Ok(outcome)
    }

    /// Move to (x, y), focus, and read back the measured position.
    fn probe_point(
        &mut self,
        point: usize,
        total: usize,
        x: f64,
        y: f64,
    ) -> ScanResult<(f64, f64, f64)> {
        self.cancel.check()?;
        self.emit(&LevelingEvent::Probing { point, total, x, y });
        self.stage
            .move_absolute(Some(x), Some(y), None, self.feed_mm_per_min)?;
        self.stage.wait_for_moves()?;
        self.cancel.check()?;

        match &self.probe {
            ProbeMode::Auto(params) => {
                self.emit(&LevelingEvent::AutoFocusing { point });
                let params = params.clone();
                match AutoFocus::new(&mut *self.stage, &mut *self.camera).run(&params) {
                    Ok(dz) => debug!("autofocus at point {point}: dz={dz:.4} mm"),
                    // The point is still usable: the stage reads back
                    // whatever Z it reached.
                    Err(err) => warn!("autofocus failed at point {point}: {err}"),
                }
                self.stage.wait_for_moves()?;
            }
            ProbeMode::Manual => {
                self.emit(&LevelingEvent::AwaitingManualContinue { point });
                let gate = self
                    .gate
                    .as_ref()
                    .ok_or_else(|| {
                        ScanError::InvalidArgument(
                            "manual probing requires a continuation gate".to_string(),
                        )
                    })?;
                gate.wait(&self.cancel)?;
            }
        }

        self.cancel.check()?;
        let position = self.stage.get_position()?;
        let z = position.z.ok_or_else(|| {
            ScanError::DeviceUnavailable("stage did not report a Z position".to_string())
        })?;
        // Store the measured position; stages may settle off-target. Axes
        // the controller cannot report fall back to the commanded target.
        let x_meas = position.x.unwrap_or(x);
        let y_meas = position.y.unwrap_or(y);
        self.emit(&LevelingEvent::Recorded {
            point,
            x: x_meas,
            y: y_meas,
            z,
        });
        Ok((x_meas, y_meas, z))
    }

    fn emit(&self, event: &LevelingEvent) {
        if let Some(callback) = &self.on_event {
            callback(event);
        }
    }
}

/// Priority-0 area over the bounding rectangle of the probed extent.
fn bounding_area(samples: &[(f64, f64, f64)], model: SurfaceModel) -> Area {
    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    for &(x, y, _) in samples {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    Area {
        name: "leveled surface".to_string(),
        polygon: vec![
            (min_x, min_y),
            (max_x, min_y),
            (max_x, max_y),
            (min_x, max_y),
        ],
        model,
        priority: 0,
    }
}
