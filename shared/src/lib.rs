//! Device capability interfaces shared across the microstage scan stack.
//!
//! The scan core never talks to serial ports or vendor SDKs directly; it
//! drives hardware through the traits defined here. Mock implementations
//! suitable for tests live next to each trait.

pub mod camera_interface;
pub mod image_sink;
pub mod overlay;
pub mod position;
pub mod stage_interface;

pub use camera_interface::{CameraInterface, Frame};
pub use image_sink::{CaptureMetadata, ImageFormat, ImageSink, SinkError};
pub use position::Position;
pub use stage_interface::{StageError, StageInterface, StageResult};
