//! In-memory stage for tests.

use super::{StageInterface, StageResult};
use crate::position::Position;

/// Callback invoked on every `wait_for_moves`, with the 1-based call count.
pub type WaitHook = Box<dyn FnMut(usize) + Send>;

/// Mock stage that tracks a virtual position and records every command.
///
/// An optional surface function makes `get_position` report
/// `z = f(x, y)`, emulating a stage whose focus height follows the sample
/// surface (useful for leveling tests). A wait hook lets tests inject side
/// effects (cancellation, fault injection) at motion-settle boundaries.
pub struct MockStage {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Relative deltas in command order.
    pub relative_moves: Vec<(f64, f64, f64)>,
    /// Absolute targets in command order.
    pub absolute_moves: Vec<Position>,
    pub wait_calls: usize,
    pub position_calls: usize,
    surface: Option<Box<dyn Fn(f64, f64) -> f64 + Send>>,
    wait_hook: Option<WaitHook>,
    report_position: bool,
}

impl Default for MockStage {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStage {
    pub fn new() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            relative_moves: Vec::new(),
            absolute_moves: Vec::new(),
            wait_calls: 0,
            position_calls: 0,
            surface: None,
            wait_hook: None,
            report_position: true,
        }
    }

    /// `get_position` will report `z = f(x, y)`.
    pub fn with_surface(mut self, f: impl Fn(f64, f64) -> f64 + Send + 'static) -> Self {
        self.surface = Some(Box::new(f));
        self
    }

    /// Run `hook(call_count)` at every `wait_for_moves`.
    pub fn with_wait_hook(mut self, hook: impl FnMut(usize) + Send + 'static) -> Self {
        self.wait_hook = Some(Box::new(hook));
        self
    }

    /// Make `get_position` omit all axes, emulating a controller that cannot
    /// report its position.
    pub fn without_position_reporting(mut self) -> Self {
        self.report_position = false;
        self
    }
}

impl StageInterface for MockStage {
    fn move_absolute(
        &mut self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        _feed_mm_per_min: f64,
    ) -> StageResult<()> {
        if let Some(x) = x {
            self.x = x;
        }
        if let Some(y) = y {
            self.y = y;
        }
        if let Some(z) = z {
            self.z = z;
        }
        self.absolute_moves.push(Position { x, y, z });
        Ok(())
    }

    fn move_relative(
        &mut self,
        dx: f64,
        dy: f64,
        dz: f64,
        _feed_mm_per_min: f64,
    ) -> StageResult<()> {
        self.x += dx;
        self.y += dy;
        self.z += dz;
        self.relative_moves.push((dx, dy, dz));
        Ok(())
    }

    fn wait_for_moves(&mut self) -> StageResult<()> {
        self.wait_calls += 1;
        let count = self.wait_calls;
        if let Some(hook) = self.wait_hook.as_mut() {
            hook(count);
        }
        Ok(())
    }

    fn get_position(&mut self) -> StageResult<Position> {
        self.position_calls += 1;
        if !self.report_position {
            return Ok(Position::default());
        }
        if let Some(surface) = &self.surface {
            self.z = surface(self.x, self.y);
        }
        Ok(Position::new(self.x, self.y, self.z))
    }
}
