//! Shared frame builders for integration tests.

use ndarray::Array2;
use shared::camera_interface::Frame;

/// 8x8 checkerboard with the given contrast amplitude.
///
/// Both built-in focus metrics score a checkerboard monotonically in
/// `amplitude`, so a list of amplitudes scripts a whole focus sweep.
pub fn checkerboard(amplitude: u16) -> Frame {
    Array2::from_shape_fn((8, 8), |(r, c)| if (r + c) % 2 == 0 { amplitude } else { 0 })
}
