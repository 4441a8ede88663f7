//! Motion stage abstraction.
//!
//! Models a Marlin-style XY-Z stage: moves are queued by the firmware and
//! `wait_for_moves` blocks until the motion queue drains (M400 semantics).
//! Implementations own the transport; the scan core only sees this trait.

pub mod mock;

use crate::position::Position;
use thiserror::Error;

pub use mock::MockStage;

/// Errors produced by stage implementations.
#[derive(Error, Debug)]
pub enum StageError {
    /// Transport-level failure (serial write/read, timeout, disconnect).
    #[error("stage communication error: {0}")]
    Comm(String),

    /// The controller replied but did not report a usable position.
    #[error("stage did not report a valid position")]
    NoPosition,

    /// The controller rejected a motion command.
    #[error("move rejected: {0}")]
    MoveRejected(String),
}

/// Result type for stage operations.
pub type StageResult<T> = Result<T, StageError>;

/// Capability contract for a motorized XY-Z stage.
///
/// All coordinates are millimetres, feed rates mm/min. Axes passed as `None`
/// to [`move_absolute`](Self::move_absolute) are left where they are.
pub trait StageInterface {
    /// Command an absolute move on the given axes.
    ///
    /// Returns once the command is accepted; use
    /// [`wait_for_moves`](Self::wait_for_moves) for completion.
    fn move_absolute(
        &mut self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        feed_mm_per_min: f64,
    ) -> StageResult<()>;

    /// Command a relative move.
    fn move_relative(&mut self, dx: f64, dy: f64, dz: f64, feed_mm_per_min: f64)
        -> StageResult<()>;

    /// Block until the firmware motion queue is empty.
    fn wait_for_moves(&mut self) -> StageResult<()>;

    /// Query the current position. Axes the controller cannot report come
    /// back as `None`.
    fn get_position(&mut self) -> StageResult<Position>;
}
