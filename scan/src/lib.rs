//! SCAN - coordinated, cancellable operations for a motorized XY-Z stage
//! and camera.
//!
//! The crate covers four pillars: a FIFO command channel for one-off device
//! work, coarse-to-fine autofocus, raster tiling over rectangular, sheared
//! and tapered regions, and polygon-scoped focus-plane leveling backed by a
//! least-squares polynomial surface fit.

pub mod autofocus;
pub mod cancel;
pub mod command;
pub mod error;
pub mod focus_metric;
pub mod focus_planes;
pub mod leveling;
pub mod raster;
pub mod session;
pub mod stack;
pub mod surface;

// Re-export commonly used types for external use
pub use crate::autofocus::{AutoFocus, AutofocusParams};
pub use crate::cancel::CancelToken;
pub use crate::command::CommandChannel;
pub use crate::error::{ScanError, ScanResult};
pub use crate::focus_metric::{FocusMetric, FocusScorer};
pub use crate::focus_planes::{Area, FocusPlaneManager};
pub use crate::leveling::{
    manual_gate, LevelingEvent, LevelingMethod, LevelingOutcome, LevelingRunner, ManualGate,
    ManualTrigger, ProbeMode,
};
pub use crate::raster::{
    build_coordinate_matrix, RasterConfig, RasterEvent, RasterMode, RasterRunner, RasterSummary,
};
pub use crate::session::DeviceSession;
pub use crate::stack::{focus_stack, StackParams};
pub use crate::surface::{SurfaceKind, SurfaceModel};
