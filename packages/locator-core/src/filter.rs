//! filter.rs — per-anchor RSSI smoothing
//!
//! Every anchor owns one [`FilterChain`] for the lifetime of the hub. State is never
//! reset between solves; a chain is typically Median (spike rejection) followed by an
//! ExponentialSmoother (jitter).

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::FilterError;

/// Smooths a scalar stream. `update` never fails.
pub trait SignalFilter: Send {
    fn update(&mut self, value: f64) -> f64;
}

// ── Moving average ────────────────────────────────────────────────────────────

/// Mean of the last `window` samples (oldest evicted first).
#[derive(Debug, Clone)]
pub struct MovingAverage {
    window: VecDeque<f64>,
    size: usize,
}

impl MovingAverage {
    pub fn new(window_size: usize) -> Result<Self, FilterError> {
        if window_size == 0 {
            return Err(FilterError::ZeroWindow);
        }
        Ok(Self { window: VecDeque::with_capacity(window_size), size: window_size })
    }
}

impl SignalFilter for MovingAverage {
    fn update(&mut self, value: f64) -> f64 {
        push_bounded(&mut self.window, self.size, value);
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }
}

// ── Median ────────────────────────────────────────────────────────────────────

/// Median of the last `window` samples. Even-sized windows average the two middle values.
#[derive(Debug, Clone)]
pub struct Median {
    window: VecDeque<f64>,
    size: usize,
    scratch: Vec<f64>,
}

impl Median {
    pub fn new(window_size: usize) -> Result<Self, FilterError> {
        if window_size == 0 {
            return Err(FilterError::ZeroWindow);
        }
        Ok(Self {
            window: VecDeque::with_capacity(window_size),
            size: window_size,
            scratch: Vec::with_capacity(window_size),
        })
    }
}

impl SignalFilter for Median {
    fn update(&mut self, value: f64) -> f64 {
        push_bounded(&mut self.window, self.size, value);
        self.scratch.clear();
        self.scratch.extend(self.window.iter().copied());
        self.scratch.sort_by(f64::total_cmp);

        let mid = self.scratch.len() / 2;
        if self.scratch.len() % 2 == 0 {
            (self.scratch[mid - 1] + self.scratch[mid]) / 2.0
        } else {
            self.scratch[mid]
        }
    }
}

// ── Exponential smoother ──────────────────────────────────────────────────────

/// `state = α·value + (1 − α)·state`. The first sample seeds the state.
#[derive(Debug, Clone)]
pub struct ExponentialSmoother {
    alpha: f64,
    state: Option<f64>,
}

impl ExponentialSmoother {
    pub fn new(alpha: f64) -> Result<Self, FilterError> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(FilterError::AlphaOutOfRange(alpha));
        }
        Ok(Self { alpha, state: None })
    }

    pub fn value(&self) -> Option<f64> {
        self.state
    }
}

impl SignalFilter for ExponentialSmoother {
    fn update(&mut self, value: f64) -> f64 {
        let next = match self.state {
            None => value,
            Some(prev) => self.alpha * value + (1.0 - self.alpha) * prev,
        };
        self.state = Some(next);
        next
    }
}

fn push_bounded(window: &mut VecDeque<f64>, size: usize, value: f64) {
    window.push_back(value);
    while window.len() > size {
        window.pop_front();
    }
}

// ── Configuration + chains ────────────────────────────────────────────────────

/// One filter stage as written in `hub.toml`:
///
/// ```toml
/// [[filter.stages]]
/// kind = "median"
/// window = 7
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterSpec {
    MovingAverage { window: usize },
    Median { window: usize },
    Exponential { alpha: f64 },
}

impl FilterSpec {
    pub fn build(&self) -> Result<Box<dyn SignalFilter>, FilterError> {
        Ok(match *self {
            FilterSpec::MovingAverage { window } => Box::new(MovingAverage::new(window)?),
            FilterSpec::Median { window } => Box::new(Median::new(window)?),
            FilterSpec::Exponential { alpha } => Box::new(ExponentialSmoother::new(alpha)?),
        })
    }
}

/// Ordered composition of filters; each stage feeds the next.
pub struct FilterChain {
    stages: Vec<Box<dyn SignalFilter>>,
}

impl FilterChain {
    pub fn from_specs(specs: &[FilterSpec]) -> Result<Self, FilterError> {
        if specs.is_empty() {
            return Err(FilterError::EmptyChain);
        }
        let stages = specs.iter().map(FilterSpec::build).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { stages })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl SignalFilter for FilterChain {
    fn update(&mut self, value: f64) -> f64 {
        self.stages.iter_mut().fold(value, |v, stage| stage.update(v))
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain").field("stages", &self.stages.len()).finish()
    }
}
