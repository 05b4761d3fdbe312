//! scenarios.rs — injectable fault scenarios for the anchor simulator
//!
//! Each scenario exercises one hub behavior:
//! - `AnchorDropout`: one anchor goes silent periodically, so the hub's sync gate must
//!   fall back to degraded payloads and recover once the anchor returns
//! - `NoiseBurst`: shadowing sigma is multiplied for a while, stressing the filters and
//!   the solver's residual check
//!
//! Scenarios are functions of simulated time only, so every one is recoverable.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioType {
    AnchorDropout,
    NoiseBurst,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub active: Vec<ScenarioType>,
    pub dropout_anchor: String,
    pub dropout_period_s: f64,
    pub dropout_duration_s: f64,
    pub burst_period_s: f64,
    pub burst_duration_s: f64,
    pub burst_multiplier: f64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            active: vec![],
            dropout_anchor: "rssi3".into(),
            dropout_period_s: 20.0,
            dropout_duration_s: 5.0,
            burst_period_s: 30.0,
            burst_duration_s: 4.0,
            burst_multiplier: 4.0,
        }
    }
}

impl ScenarioConfig {
    pub fn has(&self, s: ScenarioType) -> bool {
        self.active.contains(&s)
    }

    /// Silent during the last `dropout_duration_s` of every `dropout_period_s` window.
    pub fn is_anchor_dropped(&self, anchor_id: &str, t_s: f64) -> bool {
        if !self.has(ScenarioType::AnchorDropout) || anchor_id != self.dropout_anchor {
            return false;
        }
        in_window(t_s, self.dropout_period_s, self.dropout_duration_s)
    }

    /// Shadowing multiplier at `t_s`.
    pub fn noise_multiplier(&self, t_s: f64) -> f64 {
        if self.has(ScenarioType::NoiseBurst) && in_window(t_s, self.burst_period_s, self.burst_duration_s) {
            self.burst_multiplier
        } else {
            1.0
        }
    }
}

fn in_window(t_s: f64, period: f64, duration: f64) -> bool {
    if period <= 0.0 || duration <= 0.0 {
        return false;
    }
    t_s.rem_euclid(period) >= period - duration
}

/// Named presets selectable from the CLI (`--scenario`).
pub fn preset(name: &str, base: &ScenarioConfig) -> Option<ScenarioConfig> {
    let active = match name {
        "none" => vec![],
        "dropout" => vec![ScenarioType::AnchorDropout],
        "noise_burst" => vec![ScenarioType::NoiseBurst],
        "all" => vec![ScenarioType::AnchorDropout, ScenarioType::NoiseBurst],
        _ => return None,
    };
    Some(ScenarioConfig { active, ..base.clone() })
}
