//! # locator-core
//!
//! Estimation pipeline for the three-anchor RSSI hub.
//!
//! These pieces are used by:
//! - `backend-rust`: the hub pipeline worker (filter → distance → solve per synced sample)
//! - `packages/anchor-simulator`: forward model (distance → RSSI) for synthetic feeds
//!
//! ## Stages
//! 1. [`calibration`] — fit `RSSI = A − 10·n·log10(d)` once at startup
//! 2. [`filter`] — per-anchor smoothing chains (moving average, median, exponential)
//! 3. [`distance`] — invert the path-loss model
//! 4. [`solver`] — linearized least squares with a grid-search fallback
//! 5. [`sync_gate`] — freshness gate across independently-arriving anchor streams
//!
//! ## Coordinate conventions
//! Room frame, origin at the room corner, X along the width, Y along the height.
//! Units are whatever the calibration table uses (meters in practice).

pub mod calibration;
pub mod distance;
pub mod error;
pub mod filter;
pub mod geometry;
pub mod solver;
pub mod sync_gate;

pub use calibration::{fit, CalibrationModel};
pub use distance::{rssi_from_distance, to_distance};
pub use error::{CalibrationError, FilterError, SolverError};
pub use filter::{
    ExponentialSmoother, FilterChain, FilterSpec, Median, MovingAverage, SignalFilter,
};
pub use geometry::{Point2, RoomGeometry};
pub use solver::{PositionEstimate, PositionSolver, RejectReason, Solution, SolverConfig};
pub use sync_gate::{AnchorState, SyncGate};
