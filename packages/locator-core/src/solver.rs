//! solver.rs — 2D multilateration with deterministic fallback
//!
//! Algorithm:
//!   1. Sanitize: clamp distances into `[min_distance, diagonal × max_distance_factor]`
//!   2. Linearize against anchor 0 (range-difference form), optional row weights
//!   3. SVD least squares, reporting the effective rank
//!   4. Score: ‖ |p − anchor_i| − r_i ‖₂ over all N anchors
//!   5. Accept if rank ≥ 2, finite, residual ≤ max(floor, fraction × diagonal)
//!   6. Otherwise brute-force grid search over the room plus margin
//!
//! Fallback results are always `success = false`, even when the grid point happens to
//! fit better than the rejected linear solution.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SolverError;
use crate::geometry::{Point2, RoomGeometry};

const SVD_MAX_ITER: usize = 500;

// ── Configuration ─────────────────────────────────────────────────────────────

/// Tunable solver constants. The defaults are empirical, not derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Lower clamp for every distance (room units)
    pub min_distance: f64,
    /// Upper clamp as a multiple of the room diagonal
    pub max_distance_factor: f64,
    /// Grid-search step (room units)
    pub grid_resolution: f64,
    /// Residual always accepted below this value
    pub residual_floor: f64,
    /// Residual accepted below this fraction of the room diagonal
    pub residual_fraction: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            min_distance: 0.05,
            max_distance_factor: 1.2,
            grid_resolution: 0.05,
            residual_floor: 0.5,
            residual_fraction: 0.1,
        }
    }
}

// ── Results ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionEstimate {
    pub x: f64,
    pub y: f64,
    pub residual_norm: f64,
    /// false for every grid-search result
    pub success: bool,
    /// Sanitized distances the estimate was scored against
    pub source_distances: Vec<f64>,
}

impl PositionEstimate {
    pub fn point(&self) -> Point2 {
        Point2::new(self.x, self.y)
    }
}

/// Why the linear solution was discarded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    /// Collinear or duplicated anchors
    RankDeficient { rank: usize },
    /// NaN/inf coordinates (or the SVD did not converge)
    NonFinite,
    ResidualTooLarge { residual: f64, threshold: f64 },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::RankDeficient { rank } => write!(f, "degenerate geometry (rank {rank})"),
            RejectReason::NonFinite => write!(f, "numerically unstable solution"),
            RejectReason::ResidualTooLarge { residual, threshold } => {
                write!(f, "residual {residual:.3} above {threshold:.3}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Solution {
    Linear(PositionEstimate),
    Fallback { estimate: PositionEstimate, reason: RejectReason },
}

impl Solution {
    pub fn estimate(&self) -> &PositionEstimate {
        match self {
            Solution::Linear(e) => e,
            Solution::Fallback { estimate, .. } => estimate,
        }
    }

    pub fn into_estimate(self) -> PositionEstimate {
        match self {
            Solution::Linear(e) => e,
            Solution::Fallback { estimate, .. } => estimate,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Solution::Fallback { .. })
    }
}

/// Raw output of the linearized solve.
#[derive(Debug, Clone, Copy)]
pub struct LinearFit {
    pub point: Point2,
    pub rank: usize,
}

// ── Solver ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PositionSolver {
    room: RoomGeometry,
    config: SolverConfig,
}

impl PositionSolver {
    pub fn new(room: RoomGeometry, config: SolverConfig) -> Result<Self, SolverError> {
        if room.anchor_count() < 3 {
            return Err(SolverError::InvalidAnchorCount {
                anchors: room.anchor_count(),
                distances: room.anchor_count(),
            });
        }
        Ok(Self { room, config })
    }

    pub fn room(&self) -> &RoomGeometry {
        &self.room
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Residual above which the linear solution is rejected.
    pub fn acceptance_threshold(&self) -> f64 {
        self.config.residual_floor.max(self.config.residual_fraction * self.room.diagonal())
    }

    /// Clamp into `[min_distance, diagonal × factor]`. NaN maps to the lower bound.
    pub fn sanitize(&self, distances: &[f64]) -> Vec<f64> {
        let lo = self.config.min_distance;
        let hi = (self.room.diagonal() * self.config.max_distance_factor).max(lo);
        distances
            .iter()
            .map(|&d| if d.is_nan() { lo } else { d.clamp(lo, hi) })
            .collect()
    }

    /// Estimate a position from one distance per anchor.
    ///
    /// `weights`, when given, holds one weight per linearized row (anchors 1..N).
    pub fn solve(&self, distances: &[f64], weights: Option<&[f64]>) -> Result<Solution, SolverError> {
        let anchors = &self.room.anchors;
        if anchors.len() < 3 || distances.len() != anchors.len() {
            return Err(SolverError::InvalidAnchorCount {
                anchors: anchors.len(),
                distances: distances.len(),
            });
        }
        if let Some(w) = weights {
            if w.len() != anchors.len() - 1 {
                return Err(SolverError::WeightCountMismatch { expected: anchors.len() - 1, got: w.len() });
            }
        }

        let dists = self.sanitize(distances);
        let threshold = self.acceptance_threshold();

        let reason = match linear_least_squares(anchors, &dists, weights) {
            None => RejectReason::NonFinite,
            Some(fit) if fit.rank < 2 => RejectReason::RankDeficient { rank: fit.rank },
            Some(fit) if !fit.point.is_finite() => RejectReason::NonFinite,
            Some(fit) => {
                let residual = residual_norm(anchors, fit.point, &dists);
                if residual <= threshold {
                    return Ok(Solution::Linear(PositionEstimate {
                        x: fit.point.x,
                        y: fit.point.y,
                        residual_norm: residual,
                        success: true,
                        source_distances: dists,
                    }));
                }
                RejectReason::ResidualTooLarge { residual, threshold }
            }
        };

        let (best, residual) =
            grid_search(anchors, &dists, self.room.search_bounds(), self.config.grid_resolution);
        debug!("solver fallback ({reason}) → ({:.2}, {:.2}) residual={residual:.3}", best.x, best.y);

        Ok(Solution::Fallback {
            estimate: PositionEstimate {
                x: best.x,
                y: best.y,
                residual_norm: residual,
                success: false,
                source_distances: dists,
            },
            reason,
        })
    }
}

// ── Building blocks ───────────────────────────────────────────────────────────

/// Linearized least squares against anchor 0.
///
/// Row i (for anchors 1..N): `[2(xᵢ−x₀), 2(yᵢ−y₀)] · p = (r₀²−rᵢ²) − (x₀²−xᵢ²) − (y₀²−yᵢ²)`,
/// both sides scaled by `sqrt(wᵢ)` when weights are given. Returns `None` when the SVD
/// does not converge.
pub fn linear_least_squares(
    anchors: &[Point2],
    distances: &[f64],
    weights: Option<&[f64]>,
) -> Option<LinearFit> {
    let rows = anchors.len().saturating_sub(1);
    if rows == 0 || distances.len() != anchors.len() {
        return None;
    }
    let (p0, r0) = (anchors[0], distances[0]);

    let mut m = DMatrix::<f64>::zeros(rows, 2);
    let mut v = DVector::<f64>::zeros(rows);
    for i in 1..anchors.len() {
        let (pi, ri) = (anchors[i], distances[i]);
        let row = i - 1;
        // Negative or non-finite weights zero the row instead of poisoning the solve
        let scale = weights
            .map(|w| w[row])
            .map(|w| if w.is_finite() && w > 0.0 { w.sqrt() } else { 0.0 })
            .unwrap_or(1.0);

        m[(row, 0)] = 2.0 * (pi.x - p0.x) * scale;
        m[(row, 1)] = 2.0 * (pi.y - p0.y) * scale;
        v[row] = ((r0 * r0 - ri * ri) - (p0.x * p0.x - pi.x * pi.x) - (p0.y * p0.y - pi.y * pi.y)) * scale;
    }

    let svd = m.try_svd(true, true, f64::EPSILON, SVD_MAX_ITER)?;
    let sigma_max = svd.singular_values.iter().copied().fold(0.0, f64::max);
    // numpy-style cutoff: eps · max(rows, cols) · σ_max
    let tol = f64::EPSILON * rows.max(2) as f64 * sigma_max;
    let rank = svd.rank(tol);
    let sol = svd.solve(&v, tol).ok()?;

    Some(LinearFit { point: Point2::new(sol[0], sol[1]), rank })
}

/// L2 norm of (geometric distance − measured distance) across all anchors.
pub fn residual_norm(anchors: &[Point2], p: Point2, distances: &[f64]) -> f64 {
    anchors
        .iter()
        .zip(distances)
        .map(|(a, &r)| (p.dist(a) - r).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Exhaustive search over `bounds = (xmin, xmax, ymin, ymax)` at `resolution`.
///
/// Scan order is x-major (every y for the first x, then the next x); the first
/// strict minimum wins, so the result is fully deterministic.
pub fn grid_search(
    anchors: &[Point2],
    distances: &[f64],
    bounds: (f64, f64, f64, f64),
    resolution: f64,
) -> (Point2, f64) {
    let (xmin, xmax, ymin, ymax) = bounds;
    let steps = |lo: f64, hi: f64| -> usize {
        if resolution > 0.0 && resolution.is_finite() && hi > lo {
            ((hi - lo) / resolution + 1e-9).floor() as usize
        } else {
            0
        }
    };
    let (nx, ny) = (steps(xmin, xmax), steps(ymin, ymax));

    let mut best = Point2::new(xmin, ymin);
    let mut best_res = f64::INFINITY;
    for i in 0..=nx {
        let x = xmin + i as f64 * resolution.max(0.0);
        for j in 0..=ny {
            let y = ymin + j as f64 * resolution.max(0.0);
            let p = Point2::new(x, y);
            let res = residual_norm(anchors, p, distances);
            if res < best_res {
                best = p;
                best_res = res;
            }
        }
    }
    (best, best_res)
}
