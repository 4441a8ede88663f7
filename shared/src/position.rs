use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage position snapshot in millimetres.
///
/// Produced by [`StageInterface::get_position`](crate::StageInterface::get_position).
/// Any axis the controller cannot report is `None`. A `Position` is always a
/// snapshot; it is never updated in place by the core.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl Position {
    /// Create a position with all three axes known.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: Some(z),
        }
    }

    /// All three axes, if the controller reported them.
    pub fn xyz(&self) -> Option<(f64, f64, f64)> {
        match (self.x, self.y, self.z) {
            (Some(x), Some(y), Some(z)) => Some((x, y, z)),
            _ => None,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fn axis(v: Option<f64>) -> String {
            v.map_or_else(|| "?".to_string(), |v| format!("{v:.4}"))
        }
        write!(
            f,
            "({}, {}, {}) mm",
            axis(self.x),
            axis(self.y),
            axis(self.z)
        )
    }
}
