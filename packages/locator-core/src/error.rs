use thiserror::Error;

/// Calibration failures. Fatal at startup: the hub refuses to serve without a model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    #[error("calibration needs at least 2 points, got {got}")]
    InsufficientPoints { got: usize },

    #[error("calibration table length mismatch: {distances} distances vs {rssi} RSSI values")]
    LengthMismatch { distances: usize, rssi: usize },

    #[error("calibration distance #{index} must be > 0 (got {value})")]
    NonPositiveDistance { index: usize, value: f64 },

    #[error("calibration point #{index} is not finite")]
    NonFiniteInput { index: usize },

    #[error("calibration normal equations are singular (all distances equal?)")]
    SingularSystem,

    #[error("calibration did not converge within {iterations} iterations")]
    NonConvergent { iterations: u32 },

    #[error("fitted path-loss exponent n={n} is too close to zero")]
    DegenerateExponent { n: f64 },
}

/// Malformed solver input, rejected before any computation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolverError {
    #[error("multilateration needs >= 3 anchors with one distance each (anchors={anchors}, distances={distances})")]
    InvalidAnchorCount { anchors: usize, distances: usize },

    #[error("expected {expected} row weights (one per non-reference anchor), got {got}")]
    WeightCountMismatch { expected: usize, got: usize },
}

/// Invalid filter parameters in configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("filter window must hold at least one sample")]
    ZeroWindow,

    #[error("smoothing factor alpha must be in (0, 1], got {0}")]
    AlphaOutOfRange(f64),

    #[error("filter chain has no stages")]
    EmptyChain,
}
