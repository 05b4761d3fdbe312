//! RSSI ↔ distance conversion for the log-distance path-loss model.
//!
//! `RSSI(d) = A − 10·n·log10(d)`
//!
//! Neither direction clamps. Pathological outputs (huge distances from a tiny `n`,
//! `-inf` RSSI at `d = 0`) are left for the solver's sanitize step.

/// Invert the path-loss model: `d = 10^((A − rssi) / (10·n))`.
pub fn to_distance(filtered_rssi: f64, a: f64, n: f64) -> f64 {
    10_f64.powf((a - filtered_rssi) / (10.0 * n))
}

/// Forward model, used by calibration and the simulator.
pub fn rssi_from_distance(distance: f64, a: f64, n: f64) -> f64 {
    a - 10.0 * n * distance.log10()
}
