//! Camera abstraction.
//!
//! Frames are 16-bit grayscale `ndarray` arrays indexed `[row, col]`. The
//! scan core only needs single-shot capture; streaming, ROI control and
//! exposure management stay inside the concrete drivers.

pub mod mock;

use ndarray::Array2;

pub use mock::MockCamera;

/// A single captured frame.
pub type Frame = Array2<u16>;

/// Capability contract for an imaging sensor.
pub trait CameraInterface {
    /// Capture one frame.
    ///
    /// `None` marks a transient capture failure (dropped frame, bus hiccup).
    /// Callers are expected to skip the sample and carry on; persistent
    /// failure shows up as every snap returning `None`.
    fn snap(&mut self) -> Option<Frame>;

    /// Human-readable device name, recorded in capture metadata.
    fn name(&self) -> &str;
}
