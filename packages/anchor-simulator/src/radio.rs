//! radio.rs — RSSI measurement model
//!
//! Simulates what one anchor reports for a target at a known distance:
//! 1. Ideal log-distance path loss `A − 10·n·log10(d)`
//! 2. Gaussian shadowing with `sigma_db` (scaled up during noise bursts)
//! 3. Rare multipath outliers: a ±`spike_db` jump with `spike_probability`
//! 4. Quantization to whole dBm, as ESP32 firmware reports integers

use locator_core::CalibrationModel;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

/// Closest distance the model is evaluated at (log10 blows up at 0).
const MIN_DISTANCE_M: f64 = 0.05;

#[derive(Debug, Clone, Deserialize)]
pub struct RadioConfig {
    /// Ground-truth RSSI at 1 m (dBm)
    pub a: f64,
    /// Ground-truth path-loss exponent
    pub n: f64,
    pub sigma_db: f64,
    pub spike_probability: f64,
    pub spike_db: f64,
}

#[derive(Debug, Clone)]
pub struct RadioModel {
    truth: CalibrationModel,
    cfg: RadioConfig,
}

impl RadioModel {
    pub fn new(cfg: RadioConfig) -> Result<Self, locator_core::CalibrationError> {
        Ok(Self { truth: CalibrationModel::new(cfg.a, cfg.n)?, cfg })
    }

    /// Noise-free RSSI at `distance`.
    pub fn ideal(&self, distance: f64) -> f64 {
        self.truth.rssi_at(distance.max(MIN_DISTANCE_M))
    }

    /// One noisy report. `noise_scale` multiplies the shadowing sigma.
    pub fn measure(&self, distance: f64, noise_scale: f64, rng: &mut impl Rng) -> f64 {
        let mut rssi = self.ideal(distance);

        let sigma = self.cfg.sigma_db * noise_scale;
        if let Ok(normal) = Normal::new(0.0, sigma) {
            rssi += normal.sample(rng);
        }

        let p = self.cfg.spike_probability.clamp(0.0, 1.0);
        if p > 0.0 && rng.gen_bool(p) {
            rssi += if rng.gen_bool(0.5) { self.cfg.spike_db } else { -self.cfg.spike_db };
        }
        rssi.round()
    }
}
