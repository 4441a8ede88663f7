//! Polynomial focus-surface model.
//!
//! Fits z = p(x, y) by least squares over probed samples and predicts focus
//! height at arbitrary scan-plane coordinates. Coefficients are immutable
//! once fit; refitting builds a new model, so a model handed to concurrent
//! lookups can never be observed half-updated.

use crate::error::{ScanError, ScanResult};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Singular-value cutoff for the least-squares solve.
const SVD_EPSILON: f64 = 1e-12;

/// Polynomial order of a surface fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfaceKind {
    Linear,
    Quadratic,
    Cubic,
}

impl SurfaceKind {
    /// Minimum sample count for a well-posed fit (equals the term count).
    pub const fn required_samples(self) -> usize {
        match self {
            SurfaceKind::Linear => 3,
            SurfaceKind::Quadratic => 6,
            SurfaceKind::Cubic => 10,
        }
    }

    /// Monomial basis evaluated at (x, y), lowest order first.
    fn basis(self, x: f64, y: f64) -> Vec<f64> {
        let mut terms = vec![1.0, x, y];
        if matches!(self, SurfaceKind::Quadratic | SurfaceKind::Cubic) {
            terms.extend([x * x, x * y, y * y]);
        }
        if matches!(self, SurfaceKind::Cubic) {
            terms.extend([x * x * x, x * x * y, x * y * y, y * y * y]);
        }
        terms
    }
}

impl fmt::Display for SurfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SurfaceKind::Linear => write!(f, "linear"),
            SurfaceKind::Quadratic => write!(f, "quadratic"),
            SurfaceKind::Cubic => write!(f, "cubic"),
        }
    }
}

/// Least-squares polynomial surface.
#[derive(Debug, Clone)]
pub struct SurfaceModel {
    kind: SurfaceKind,
    coefficients: DVector<f64>,
}

impl SurfaceModel {
    /// Fit a surface of `kind` to `(x, y, z)` samples.
    ///
    /// Fails with [`ScanError::InsufficientSamples`] below the minimum count
    /// for the kind; never silently degrades to a lower order.
    pub fn fit(kind: SurfaceKind, samples: &[(f64, f64, f64)]) -> ScanResult<Self> {
        let required = kind.required_samples();
        if samples.len() < required {
            return Err(ScanError::InsufficientSamples {
                kind,
                required,
                actual: samples.len(),
            });
        }

        let mut basis_matrix = DMatrix::zeros(samples.len(), required);
        for (i, &(x, y, _)) in samples.iter().enumerate() {
            for (j, term) in kind.basis(x, y).into_iter().enumerate() {
                basis_matrix[(i, j)] = term;
            }
        }
        let z = DVector::from_iterator(samples.len(), samples.iter().map(|s| s.2));

        let svd = basis_matrix.svd(true, true);
        let coefficients = svd.solve(&z, SVD_EPSILON).map_err(|err| {
            ScanError::InvalidArgument(format!("surface solve failed: {err}"))
        })?;

        debug!(
            "fit {kind} surface over {} samples: {:?}",
            samples.len(),
            coefficients.as_slice()
        );
        Ok(Self { kind, coefficients })
    }

    /// Evaluate the fitted polynomial at (x, y).
    pub fn predict(&self, x: f64, y: f64) -> f64 {
        self.kind
            .basis(x, y)
            .iter()
            .zip(self.coefficients.iter())
            .map(|(term, coeff)| term * coeff)
            .sum()
    }

    pub fn kind(&self) -> SurfaceKind {
        self.kind
    }

    pub fn coefficients(&self) -> &[f64] {
        self.coefficients.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Scattered sample positions in general position.
    fn probe_points(n: usize) -> Vec<(f64, f64)> {
        (0..n)
            .map(|i| {
                let t = i as f64;
                (
                    (t * 1.618).sin() * 2.0 + t * 0.31,
                    (t * 2.414).cos() * 2.0 + t * 0.17,
                )
            })
            .collect()
    }

    fn synth(kind: SurfaceKind, coeffs: &[f64], x: f64, y: f64) -> f64 {
        kind.basis(x, y)
            .iter()
            .zip(coeffs)
            .map(|(t, c)| t * c)
            .sum()
    }

    #[test]
    fn exactly_determined_fit_recovers_coefficients() {
        let cases: [(SurfaceKind, Vec<f64>); 3] = [
            (SurfaceKind::Linear, vec![0.5, -1.25, 2.0]),
            (
                SurfaceKind::Quadratic,
                vec![0.5, -1.25, 2.0, 0.1, -0.3, 0.05],
            ),
            (
                SurfaceKind::Cubic,
                vec![0.5, -1.25, 2.0, 0.1, -0.3, 0.05, 0.01, -0.02, 0.004, 0.008],
            ),
        ];
        for (kind, coeffs) in cases {
            let samples: Vec<(f64, f64, f64)> = probe_points(kind.required_samples())
                .into_iter()
                .map(|(x, y)| (x, y, synth(kind, &coeffs, x, y)))
                .collect();
            let model = SurfaceModel::fit(kind, &samples).unwrap();
            for (fitted, expected) in model.coefficients().iter().zip(&coeffs) {
                assert_abs_diff_eq!(fitted, expected, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn overdetermined_fit_matches_generating_plane() {
        let samples: Vec<(f64, f64, f64)> = probe_points(12)
            .into_iter()
            .map(|(x, y)| (x, y, 1.0 + 2.0 * x - 0.5 * y))
            .collect();
        let model = SurfaceModel::fit(SurfaceKind::Linear, &samples).unwrap();
        assert_abs_diff_eq!(model.predict(3.0, 4.0), 1.0 + 6.0 - 2.0, epsilon = 1e-9);
    }

    #[test]
    fn too_few_samples_fail_naming_the_requirement() {
        for kind in [
            SurfaceKind::Linear,
            SurfaceKind::Quadratic,
            SurfaceKind::Cubic,
        ] {
            let required = kind.required_samples();
            let samples = vec![(0.0, 0.0, 0.0); required - 1];
            let err = SurfaceModel::fit(kind, &samples).unwrap_err();
            assert!(err.to_string().contains(&required.to_string()), "{err}");
        }
    }
}
