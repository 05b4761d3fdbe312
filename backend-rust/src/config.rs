//! config.rs — hub configuration (`hub.toml`)
//!
//! Loaded once at startup and validated before anything is built. The embedded
//! default is used when no path is given.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use locator_core::{ExponentialSmoother, FilterChain, FilterError, FilterSpec, Point2, RoomGeometry, SolverConfig};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CONFIG: &str = include_str!("../hub.toml");

/// Upper bound on fallback grid cells; the worker scans the whole grid on every failed solve.
const MAX_GRID_CELLS: f64 = 1_000_000.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid hub.toml: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("at least 3 anchors are required, got {0}")]
    TooFewAnchors(usize),

    #[error("duplicate anchor id {0:?}")]
    DuplicateAnchor(String),

    #[error("anchor {0:?} has a non-finite position")]
    AnchorPosition(String),

    #[error("room must be a positive rectangle (width={width}, height={height}, margin={margin})")]
    InvalidRoom { width: f64, height: f64, margin: f64 },

    #[error("sync.timeout_ms must be > 0")]
    ZeroSyncTimeout,

    #[error("pipeline.queue_capacity must be > 0")]
    ZeroQueueCapacity,

    #[error("broadcast.subscriber_buffer and broadcast.send_timeout_ms must be > 0")]
    InvalidBroadcast,

    #[error("solver.{field} is out of range ({value})")]
    InvalidSolver { field: &'static str, value: f64 },

    #[error("solver.grid_resolution gives {cells:.0} fallback cells, limit is {max:.0}")]
    GridTooFine { cells: f64, max: f64 },

    #[error("filter chain for {scope}: {source}")]
    InvalidFilter {
        scope: String,
        #[source]
        source: FilterError,
    },

    #[error("smoothing.position_alpha: {0}")]
    InvalidSmoothing(#[source] FilterError),
}

// ── Sections ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub udp_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 5000, udp_port: 5556 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { timeout_ms: 2000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { queue_capacity: 1024 }
    }
}

/// Reference `(distance, rssi)` table for the path-loss fit.
#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationTable {
    pub distances: Vec<f64>,
    pub rssi: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomConfig {
    pub width: f64,
    pub height: f64,
    #[serde(default = "default_margin")]
    pub margin: f64,
}

fn default_margin() -> f64 {
    0.1
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnchorConfig {
    pub id: String,
    pub x: f64,
    pub y: f64,
    /// Per-anchor chain, replaces `[filter]` for this anchor
    #[serde(default)]
    pub filter: Option<Vec<FilterSpec>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    pub stages: Vec<FilterSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub send_timeout_ms: u64,
    pub subscriber_buffer: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { send_timeout_ms: 250, subscriber_buffer: 32 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Exponential smoothing of the published position; off when absent
    pub position_alpha: Option<f64>,
}

// ── Root ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub calibration: CalibrationTable,
    pub room: RoomConfig,
    pub anchors: Vec<AnchorConfig>,
    pub filter: FilterConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub smoothing: SmoothingConfig,
}

impl HubConfig {
    /// Read `path`, or the embedded default when `None`. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let text = match path {
            Some(p) => std::fs::read_to_string(p)
                .map_err(|source| ConfigError::Read { path: p.to_path_buf(), source })?,
            None => DEFAULT_CONFIG.to_string(),
        };
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: HubConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.anchors.len() < 3 {
            return Err(ConfigError::TooFewAnchors(self.anchors.len()));
        }
        let mut seen = HashSet::new();
        for a in &self.anchors {
            if !seen.insert(a.id.as_str()) {
                return Err(ConfigError::DuplicateAnchor(a.id.clone()));
            }
            if !(a.x.is_finite() && a.y.is_finite()) {
                return Err(ConfigError::AnchorPosition(a.id.clone()));
            }
        }

        let r = &self.room;
        if !(r.width > 0.0 && r.height > 0.0 && r.width.is_finite() && r.height.is_finite())
            || !(r.margin >= 0.0 && r.margin.is_finite())
        {
            return Err(ConfigError::InvalidRoom { width: r.width, height: r.height, margin: r.margin });
        }

        if self.sync.timeout_ms == 0 {
            return Err(ConfigError::ZeroSyncTimeout);
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.broadcast.subscriber_buffer == 0 || self.broadcast.send_timeout_ms == 0 {
            return Err(ConfigError::InvalidBroadcast);
        }

        let s = &self.solver;
        for (field, value, ok) in [
            ("min_distance", s.min_distance, s.min_distance > 0.0),
            ("max_distance_factor", s.max_distance_factor, s.max_distance_factor > 0.0),
            ("grid_resolution", s.grid_resolution, s.grid_resolution > 0.0),
            ("residual_floor", s.residual_floor, s.residual_floor >= 0.0),
            ("residual_fraction", s.residual_fraction, s.residual_fraction >= 0.0),
        ] {
            if !ok || !value.is_finite() {
                return Err(ConfigError::InvalidSolver { field, value });
            }
        }
        let cells = ((r.width + 2.0 * r.margin) / s.grid_resolution + 1.0)
            * ((r.height + 2.0 * r.margin) / s.grid_resolution + 1.0);
        if cells > MAX_GRID_CELLS {
            return Err(ConfigError::GridTooFine { cells, max: MAX_GRID_CELLS });
        }

        // Build every chain once so bad windows/alphas fail here, not in the worker.
        for a in &self.anchors {
            FilterChain::from_specs(self.filter_for(a))
                .map_err(|source| ConfigError::InvalidFilter { scope: format!("anchor {:?}", a.id), source })?;
        }
        if let Some(alpha) = self.smoothing.position_alpha {
            ExponentialSmoother::new(alpha).map_err(ConfigError::InvalidSmoothing)?;
        }
        Ok(())
    }

    pub fn filter_for<'a>(&'a self, anchor: &'a AnchorConfig) -> &'a [FilterSpec] {
        anchor.filter.as_deref().unwrap_or(&self.filter.stages)
    }

    pub fn anchor_ids(&self) -> Vec<String> {
        self.anchors.iter().map(|a| a.id.clone()).collect()
    }

    pub fn room_geometry(&self) -> RoomGeometry {
        RoomGeometry::new(
            self.anchors.iter().map(|a| Point2::new(a.x, a.y)).collect(),
            self.room.width,
            self.room.height,
            self.room.margin,
        )
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync.timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast.send_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_default_is_valid() {
        let cfg = HubConfig::load(None).unwrap();
        assert_eq!(cfg.anchor_ids(), vec!["rssi1", "rssi2", "rssi3"]);
        assert_eq!(cfg.sync_timeout(), Duration::from_secs(2));
        assert_eq!(cfg.filter.stages.len(), 2);
        assert_eq!(cfg.solver, SolverConfig::default());
        assert_eq!(cfg.room_geometry().anchors[2], Point2::new(0.0, 6.6));
    }

    fn with(replace: &str, by: &str) -> Result<HubConfig, ConfigError> {
        assert!(DEFAULT_CONFIG.contains(replace), "fixture drifted: {replace}");
        HubConfig::from_toml_str(&DEFAULT_CONFIG.replacen(replace, by, 1))
    }

    #[test]
    fn rejects_duplicate_anchor() {
        let err = with("id = \"rssi3\"", "id = \"rssi1\"").unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateAnchor(id) if id == "rssi1"));
    }

    #[test]
    fn rejects_two_anchors() {
        let text = DEFAULT_CONFIG.replacen("[[anchors]]\nid = \"rssi3\"\nx = 0.0\ny = 6.6\n", "", 1);
        let err = HubConfig::from_toml_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::TooFewAnchors(2)));
    }

    #[test]
    fn rejects_zero_timeout_and_resolution() {
        assert!(matches!(with("timeout_ms = 2000", "timeout_ms = 0"), Err(ConfigError::ZeroSyncTimeout)));
        assert!(matches!(
            with("grid_resolution = 0.05", "grid_resolution = 0.0"),
            Err(ConfigError::InvalidSolver { field: "grid_resolution", .. })
        ));
    }

    #[test]
    fn rejects_grid_too_fine_for_room() {
        let err = with("grid_resolution = 0.05", "grid_resolution = 0.000001").unwrap_err();
        assert!(matches!(err, ConfigError::GridTooFine { .. }), "{err}");
        // 1 cm over a 4.8 x 6.6 m room stays under the cap
        assert!(with("grid_resolution = 0.05", "grid_resolution = 0.01").is_ok());
    }

    #[test]
    fn rejects_bad_filter_stage() {
        let err = with("window = 7", "window = 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFilter { source: FilterError::ZeroWindow, .. }));
    }

    #[test]
    fn anchor_filter_override() {
        let cfg = with(
            "id = \"rssi2\"\nx = 4.8\ny = 0.0\n",
            "id = \"rssi2\"\nx = 4.8\ny = 0.0\nfilter = [{ kind = \"moving_average\", window = 5 }]\n",
        )
        .unwrap();
        assert_eq!(cfg.filter_for(&cfg.anchors[1]), &[FilterSpec::MovingAverage { window: 5 }]);
        assert_eq!(cfg.filter_for(&cfg.anchors[0]).len(), 2);
    }

    #[test]
    fn rejects_negative_room() {
        assert!(matches!(with("width = 4.8", "width = -1.0"), Err(ConfigError::InvalidRoom { .. })));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = HubConfig::load(Some(Path::new("/nonexistent/hub.toml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/hub.toml"));
    }
}
