//! calibration.rs — path-loss model fit
//!
//! Fits `RSSI = A − 10·n·log10(d)` to a reference table by Gauss-Newton
//! least squares, minimizing:
//!   J = Σ_i (rssi_i − A + 10·n·log10(d_i))²
//!
//! Runs once at hub startup. The table is static, so the model is never re-fit.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::distance::{rssi_from_distance, to_distance};
use crate::error::CalibrationError;

/// Initial guess (typical BLE/WiFi values at 1 m).
pub const INITIAL_A: f64 = -59.0;
pub const INITIAL_N: f64 = 2.0;

const MAX_ITER: u32 = 50;
const CONVERGE_TOL: f64 = 1e-10;
const MIN_ABS_N: f64 = 1e-6;

/// Fitted path-loss parameters. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationModel {
    /// Reference RSSI at 1 distance unit (dBm)
    pub a: f64,
    /// Path-loss exponent
    pub n: f64,
}

impl CalibrationModel {
    /// Build from known parameters. Rejects `n ≈ 0`, which would make the
    /// inverse model divide by zero.
    pub fn new(a: f64, n: f64) -> Result<Self, CalibrationError> {
        if !a.is_finite() || !n.is_finite() || n.abs() < MIN_ABS_N {
            return Err(CalibrationError::DegenerateExponent { n });
        }
        Ok(Self { a, n })
    }

    pub fn distance(&self, filtered_rssi: f64) -> f64 {
        to_distance(filtered_rssi, self.a, self.n)
    }

    pub fn rssi_at(&self, distance: f64) -> f64 {
        rssi_from_distance(distance, self.a, self.n)
    }
}

/// Fit the model to `(distance, rssi)` pairs.
pub fn fit(distances: &[f64], rssi_values: &[f64]) -> Result<CalibrationModel, CalibrationError> {
    if distances.len() != rssi_values.len() {
        return Err(CalibrationError::LengthMismatch {
            distances: distances.len(),
            rssi: rssi_values.len(),
        });
    }
    if distances.len() < 2 {
        return Err(CalibrationError::InsufficientPoints { got: distances.len() });
    }
    for (index, (&d, &r)) in distances.iter().zip(rssi_values).enumerate() {
        if !d.is_finite() || !r.is_finite() {
            return Err(CalibrationError::NonFiniteInput { index });
        }
        if d <= 0.0 {
            return Err(CalibrationError::NonPositiveDistance { index, value: d });
        }
    }

    // ∂model/∂A = 1, ∂model/∂n = −10·log10(d)
    let jn: Vec<f64> = distances.iter().map(|d| -10.0 * d.log10()).collect();

    let mut a = INITIAL_A;
    let mut n = INITIAL_N;

    for iter in 0..MAX_ITER {
        let mut jtj = [[0.0f64; 2]; 2];
        let mut jtr = [0.0f64; 2];

        for (&r_meas, &j_n) in rssi_values.iter().zip(&jn) {
            let residual = r_meas - (a + n * j_n);
            jtj[0][0] += 1.0;
            jtj[0][1] += j_n;
            jtj[1][0] += j_n;
            jtj[1][1] += j_n * j_n;
            jtr[0] += residual;
            jtr[1] += j_n * residual;
        }

        // 2x2 normal equations, Cramer's rule
        let det = jtj[0][0] * jtj[1][1] - jtj[0][1] * jtj[1][0];
        if det.abs() <= 1e-12 * jtj[0][0] * jtj[1][1] {
            return Err(CalibrationError::SingularSystem);
        }
        let da = (jtj[1][1] * jtr[0] - jtj[0][1] * jtr[1]) / det;
        let dn = (jtj[0][0] * jtr[1] - jtj[1][0] * jtr[0]) / det;

        a += da;
        n += dn;

        if !a.is_finite() || !n.is_finite() {
            break;
        }

        let step = (da * da + dn * dn).sqrt();
        let scale = 1.0 + (a * a + n * n).sqrt();
        if step < CONVERGE_TOL * scale {
            let rms = rms_residual(distances, rssi_values, a, n);
            debug!("calibration converged after {} iterations: A={a:.3} n={n:.3} rms={rms:.3}", iter + 1);
            return CalibrationModel::new(a, n);
        }
    }

    Err(CalibrationError::NonConvergent { iterations: MAX_ITER })
}

fn rms_residual(distances: &[f64], rssi_values: &[f64], a: f64, n: f64) -> f64 {
    let sum_sq: f64 = distances
        .iter()
        .zip(rssi_values)
        .map(|(&d, &r)| (r - rssi_from_distance(d, a, n)).powi(2))
        .sum();
    (sum_sq / distances.len() as f64).sqrt()
}
