//! Prioritized focus-surface areas and Z compensation lookups.
//!
//! Each [`Area`] pairs a polygon in scan-plane coordinates with a fitted
//! [`SurfaceModel`]. The manager answers `z_offset` queries by picking the
//! highest-priority area containing the point. The area set is only ever
//! replaced wholesale under a write lock, so lookups racing a re-level see
//! either the old set or the new one, never a mix.

use crate::error::{ScanError, ScanResult};
use crate::surface::SurfaceModel;
use std::sync::RwLock;
use tracing::info;

/// A polygonal region with its own focus surface.
#[derive(Debug, Clone)]
pub struct Area {
    pub name: String,
    /// Simple (non-self-intersecting) closed ring; last vertex implicitly
    /// connects back to the first.
    pub polygon: Vec<(f64, f64)>,
    pub model: SurfaceModel,
    /// Higher wins when areas overlap; insertion order breaks ties.
    pub priority: i32,
}

impl Area {
    /// Even-odd ray-casting point-in-polygon test.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let n = self.polygon.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        for i in 0..n {
            let (x1, y1) = self.polygon[i];
            let (x2, y2) = self.polygon[(i + 1) % n];
            let crosses = (y1 > y) != (y2 > y);
            if crosses && x < (x2 - x1) * (y - y1) / (y2 - y1 + 1e-12) + x1 {
                inside = !inside;
            }
        }
        inside
    }
}

/// Thread-safe collection of focus areas, replace-on-commit.
#[derive(Debug, Default)]
pub struct FocusPlaneManager {
    areas: RwLock<Vec<Area>>,
}

impl FocusPlaneManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new area set atomically, discarding the old one.
    ///
    /// Fails with [`ScanError::InvalidArgument`] for an empty set: applying
    /// leveling requires at least one fitted area.
    pub fn apply(&self, areas: Vec<Area>) -> ScanResult<()> {
        if areas.is_empty() {
            return Err(ScanError::InvalidArgument(
                "cannot apply leveling without a fitted area".to_string(),
            ));
        }
        info!("applying {} focus area(s)", areas.len());
        *self.write() = areas;
        Ok(())
    }

    /// Clear all areas. Subsequent `z_offset` lookups return 0 immediately.
    pub fn disable(&self) {
        info!("leveling disabled; clearing focus areas");
        self.write().clear();
    }

    pub fn is_active(&self) -> bool {
        !self.read().is_empty()
    }

    /// Z compensation at (x, y) against a reference height.
    ///
    /// Picks the highest-priority containing area (first-found on priority
    /// ties, i.e. insertion order) and returns `predict(x, y) - z_ref`;
    /// 0.0 when no area contains the point.
    pub fn z_offset(&self, x: f64, y: f64, z_ref: f64) -> f64 {
        let areas = self.read();
        let mut best: Option<&Area> = None;
        for area in areas.iter() {
            if area.contains(x, y) && best.map_or(true, |b| area.priority > b.priority) {
                best = Some(area);
            }
        }
        best.map_or(0.0, |area| area.model.predict(x, y) - z_ref)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Area>> {
        self.areas
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Area>> {
        self.areas
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{SurfaceKind, SurfaceModel};
    use approx::assert_abs_diff_eq;

    fn plane(a: f64, b: f64, c: f64) -> SurfaceModel {
        // z = a + b*x + c*y, fit from three exact samples
        let samples = [
            (0.0, 0.0, a),
            (1.0, 0.0, a + b),
            (0.0, 1.0, a + c),
        ];
        SurfaceModel::fit(SurfaceKind::Linear, &samples).unwrap()
    }

    fn square(x0: f64, y0: f64, size: f64) -> Vec<(f64, f64)> {
        vec![
            (x0, y0),
            (x0 + size, y0),
            (x0 + size, y0 + size),
            (x0, y0 + size),
        ]
    }

    fn area(name: &str, polygon: Vec<(f64, f64)>, model: SurfaceModel, priority: i32) -> Area {
        Area {
            name: name.to_string(),
            polygon,
            model,
            priority,
        }
    }

    #[test]
    fn point_in_polygon_even_odd() {
        let a = area("a", square(0.0, 0.0, 2.0), plane(0.0, 0.0, 0.0), 0);
        assert!(a.contains(1.0, 1.0));
        assert!(!a.contains(3.0, 1.0));
        assert!(!a.contains(-0.5, -0.5));
    }

    #[test]
    fn no_containing_area_means_zero_offset() {
        let manager = FocusPlaneManager::new();
        assert_eq!(manager.z_offset(1.0, 1.0, 5.0), 0.0);
        manager
            .apply(vec![area("a", square(10.0, 10.0, 1.0), plane(2.0, 0.0, 0.0), 0)])
            .unwrap();
        assert_eq!(manager.z_offset(1.0, 1.0, 5.0), 0.0);
    }

    #[test]
    fn highest_priority_overlapping_area_wins() {
        let manager = FocusPlaneManager::new();
        manager
            .apply(vec![
                area("low", square(0.0, 0.0, 4.0), plane(1.0, 0.0, 0.0), 0),
                area("high", square(1.0, 1.0, 1.0), plane(7.0, 0.0, 0.0), 5),
            ])
            .unwrap();
        // Inside both: the priority-5 area answers.
        assert_abs_diff_eq!(manager.z_offset(1.5, 1.5, 2.0), 5.0);
        // Only inside the low-priority area.
        assert_abs_diff_eq!(manager.z_offset(3.5, 3.5, 0.0), 1.0);
    }

    #[test]
    fn priority_ties_break_by_insertion_order() {
        let manager = FocusPlaneManager::new();
        manager
            .apply(vec![
                area("first", square(0.0, 0.0, 2.0), plane(3.0, 0.0, 0.0), 1),
                area("second", square(0.0, 0.0, 2.0), plane(9.0, 0.0, 0.0), 1),
            ])
            .unwrap();
        assert_abs_diff_eq!(manager.z_offset(1.0, 1.0, 0.0), 3.0);
    }

    #[test]
    fn disable_takes_effect_immediately() {
        let manager = FocusPlaneManager::new();
        manager
            .apply(vec![area("a", square(0.0, 0.0, 2.0), plane(4.0, 0.0, 0.0), 0)])
            .unwrap();
        assert!(manager.is_active());
        assert_abs_diff_eq!(manager.z_offset(1.0, 1.0, 0.0), 4.0);
        manager.disable();
        assert!(!manager.is_active());
        assert_eq!(manager.z_offset(1.0, 1.0, 0.0), 0.0);
    }

    #[test]
    fn empty_apply_is_rejected() {
        let manager = FocusPlaneManager::new();
        assert!(matches!(
            manager.apply(Vec::new()),
            Err(ScanError::InvalidArgument(_))
        ));
    }
}
