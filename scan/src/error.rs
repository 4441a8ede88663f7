use crate::surface::SurfaceKind;
use shared::stage_interface::StageError;
use thiserror::Error;

/// Errors produced by the scan core.
///
/// `Cancelled` is raised only through the cooperative cancellation path,
/// never for device faults; `DeviceUnavailable` covers stage and camera
/// failures that cannot be tolerated in place.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Malformed caller input: non-positive steps, bad region geometry.
    /// Reported immediately; the operation is not attempted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Surface fit attempted below the minimum point count for its kind.
    /// No partial model is installed.
    #[error("{kind} fit requires at least {required} samples, got {actual}")]
    InsufficientSamples {
        kind: SurfaceKind,
        required: usize,
        actual: usize,
    },

    /// A stage or camera call failed in a way the run cannot absorb.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The run observed its cancellation token at a checkpoint.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<StageError> for ScanError {
    fn from(err: StageError) -> Self {
        ScanError::DeviceUnavailable(err.to_string())
    }
}

/// Result type for scan operations.
pub type ScanResult<T> = Result<T, ScanError>;
