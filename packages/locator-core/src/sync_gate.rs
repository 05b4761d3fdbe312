//! sync_gate.rs — freshness gate across anchor streams
//!
//! Anchors report independently. A joint solve is only meaningful when every anchor
//! has reported within the last `timeout`; staleness is evaluated lazily at query time,
//! there is no background timer.

use std::time::{Duration, Instant};

/// Latest raw sample for one anchor.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AnchorState {
    pub last_raw: Option<f64>,
    pub last_update: Option<Instant>,
}

impl AnchorState {
    /// Fresh iff a sample arrived strictly less than `timeout` ago.
    pub fn is_fresh(&self, now: Instant, timeout: Duration) -> bool {
        match self.last_update {
            Some(t) => now.saturating_duration_since(t) < timeout,
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncGate {
    timeout: Duration,
    states: Vec<AnchorState>,
}

impl SyncGate {
    pub fn new(anchor_count: usize, timeout: Duration) -> Self {
        Self { timeout, states: vec![AnchorState::default(); anchor_count] }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record a sample for anchor `index`. Timestamps never move backwards: an
    /// out-of-order arrival time keeps the newer one already stored.
    /// Returns `false` for an unknown index.
    pub fn record(&mut self, index: usize, value: f64, now: Instant) -> bool {
        let Some(state) = self.states.get_mut(index) else {
            return false;
        };
        state.last_raw = Some(value);
        state.last_update = Some(match state.last_update {
            Some(prev) if prev > now => prev,
            _ => now,
        });
        true
    }

    pub fn is_fresh(&self, index: usize, now: Instant) -> bool {
        self.states.get(index).is_some_and(|s| s.is_fresh(now, self.timeout))
    }

    pub fn all_fresh(&self, now: Instant) -> bool {
        !self.states.is_empty() && self.states.iter().all(|s| s.is_fresh(now, self.timeout))
    }

    /// Indices of anchors currently stale (for logging).
    pub fn stale(&self, now: Instant) -> Vec<usize> {
        (0..self.states.len()).filter(|&i| !self.is_fresh(i, now)).collect()
    }

    pub fn state(&self, index: usize) -> Option<&AnchorState> {
        self.states.get(index)
    }

    pub fn states(&self) -> &[AnchorState] {
        &self.states
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(2);

    #[test]
    fn starts_stale() {
        let gate = SyncGate::new(3, TIMEOUT);
        let now = Instant::now();
        assert!(!gate.all_fresh(now));
        assert_eq!(gate.stale(now), vec![0, 1, 2]);
    }

    #[test]
    fn fresh_after_all_report() {
        let mut gate = SyncGate::new(3, TIMEOUT);
        let t0 = Instant::now();
        for i in 0..3 {
            assert!(gate.record(i, -60.0 - i as f64, t0));
        }
        assert!(gate.all_fresh(t0 + Duration::from_millis(500)));
        assert_eq!(gate.state(2).and_then(|s| s.last_raw), Some(-62.0));
    }

    #[test]
    fn expires_lazily_at_timeout_boundary() {
        let mut gate = SyncGate::new(3, TIMEOUT);
        let t0 = Instant::now();
        for i in 0..3 {
            gate.record(i, -60.0, t0);
        }
        assert!(gate.all_fresh(t0 + Duration::from_millis(1999)));
        assert!(!gate.all_fresh(t0 + TIMEOUT));
    }

    #[test]
    fn one_old_anchor_blocks_the_gate() {
        let mut gate = SyncGate::new(3, TIMEOUT);
        let t0 = Instant::now();
        let now = t0 + Duration::from_secs(3);
        gate.record(2, -70.0, t0);
        gate.record(0, -61.0, now);
        gate.record(1, -64.0, now);
        assert!(!gate.all_fresh(now));
        assert_eq!(gate.stale(now), vec![2]);
    }

    #[test]
    fn timestamps_are_monotonic() {
        let mut gate = SyncGate::new(3, TIMEOUT);
        let t0 = Instant::now();
        let later = t0 + Duration::from_secs(1);
        gate.record(0, -60.0, later);
        gate.record(0, -65.0, t0);
        let s = gate.state(0).unwrap();
        assert_eq!(s.last_update, Some(later));
        assert_eq!(s.last_raw, Some(-65.0));
    }

    #[test]
    fn unknown_anchor_is_ignored() {
        let mut gate = SyncGate::new(3, TIMEOUT);
        assert!(!gate.record(7, -60.0, Instant::now()));
        assert!(!gate.is_fresh(7, Instant::now()));
    }
}
