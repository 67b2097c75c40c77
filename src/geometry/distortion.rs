use crate::Errors;
use anyhow::Result;
use log::warn;
use nalgebra::Vector2;

/// Number of fixed-point iterations used to invert the distortion model
///
pub const DEFAULT_UNDISTORT_ITERATIONS: usize = 20;

/// Lens distortion in OpenCV coefficient order `(k1, k2, p1, p2[, k3[, k4, k5, k6]])`.
///
/// Radial terms `k1..k3` and tangential terms `p1, p2` form the Brown-Conrady model,
/// `k4..k6` extend it to the rational model.
///
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
    pub k4: f64,
    pub k5: f64,
    pub k6: f64,
}

impl Distortion {
    /// Builds the model from a flat coefficient list.
    ///
    /// Accepts 4, 5, 8, 12 or 14 coefficients. Thin prism and sensor tilt terms
    /// (positions 9 and above) are not modelled and are ignored with a warning.
    ///
    pub fn from_coefficients(coefficients: &[f64]) -> Result<Self> {
        if !matches!(coefficients.len(), 4 | 5 | 8 | 12 | 14) {
            return Err(Errors::Configuration(format!(
                "distortion must have 4, 5, 8, 12 or 14 coefficients, got {}",
                coefficients.len()
            ))
            .into());
        }
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(
                Errors::Configuration("distortion coefficients must be finite".into()).into(),
            );
        }
        if coefficients.len() > 8 && coefficients[8..].iter().any(|c| *c != 0.0) {
            warn!("Thin prism and tilt distortion terms are not supported and will be ignored");
        }

        let at = |i: usize| coefficients.get(i).copied().unwrap_or(0.0);
        Ok(Self {
            k1: at(0),
            k2: at(1),
            p1: at(2),
            p2: at(3),
            k3: at(4),
            k4: at(5),
            k5: at(6),
            k6: at(7),
        })
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    fn radial(&self, r2: f64) -> f64 {
        let num = 1.0 + ((self.k3 * r2 + self.k2) * r2 + self.k1) * r2;
        let den = 1.0 + ((self.k6 * r2 + self.k5) * r2 + self.k4) * r2;
        num / den
    }

    fn tangential(&self, x: f64, y: f64, r2: f64) -> (f64, f64) {
        (
            2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x),
            self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y,
        )
    }

    /// Applies distortion to normalized image coordinates
    ///
    pub fn distort(&self, n: &Vector2<f64>) -> Vector2<f64> {
        let r2 = n.x * n.x + n.y * n.y;
        let radial = self.radial(r2);
        let (dx, dy) = self.tangential(n.x, n.y, r2);
        Vector2::new(n.x * radial + dx, n.y * radial + dy)
    }

    /// Removes distortion from normalized image coordinates by fixed-point iteration.
    ///
    pub fn undistort(&self, n: &Vector2<f64>) -> Vector2<f64> {
        if self.is_identity() {
            return *n;
        }
        let (mut x, mut y) = (n.x, n.y);
        for _ in 0..DEFAULT_UNDISTORT_ITERATIONS {
            let r2 = x * x + y * y;
            let inv_radial = 1.0 / self.radial(r2);
            let (dx, dy) = self.tangential(x, y, r2);
            x = (n.x - dx) * inv_radial;
            y = (n.y - dy) * inv_radial;
        }
        Vector2::new(x, y)
    }
}
