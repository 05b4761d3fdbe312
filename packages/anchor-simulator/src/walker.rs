//! walker.rs — ground-truth target motion
//!
//! The target walks a closed waypoint loop at constant speed inside the room.
//! Pure math, no randomness: every bit of noise lives in `radio.rs`.

use locator_core::Point2;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct WalkerConfig {
    /// Physics update rate (Hz)
    pub tick_hz: f64,
    pub speed_mps: f64,
    /// Closed loop; the walker starts on the first point
    pub waypoints: Vec<[f64; 2]>,
}

#[derive(Debug, Clone)]
pub struct Walker {
    waypoints: Vec<Point2>,
    speed: f64,
    position: Point2,
    /// Index of the waypoint currently walked towards
    target: usize,
}

impl Walker {
    /// `None` when there are no waypoints.
    pub fn new(cfg: &WalkerConfig) -> Option<Self> {
        let waypoints: Vec<Point2> = cfg.waypoints.iter().map(|p| Point2::new(p[0], p[1])).collect();
        let start = *waypoints.first()?;
        Some(Self {
            target: 1 % waypoints.len(),
            waypoints,
            speed: cfg.speed_mps.max(0.0),
            position: start,
        })
    }

    pub fn position(&self) -> Point2 {
        self.position
    }

    /// Advance by `dt` seconds, carrying leftover travel past each waypoint.
    pub fn tick(&mut self, dt: f64) {
        let mut remaining = self.speed * dt.max(0.0);
        // Bounded: a degenerate loop (all waypoints equal) must not spin forever
        for _ in 0..=self.waypoints.len() {
            if remaining <= 0.0 {
                break;
            }
            let goal = self.waypoints[self.target];
            let gap = self.position.dist(&goal);
            if gap > remaining {
                let f = remaining / gap;
                self.position = Point2::new(
                    self.position.x + (goal.x - self.position.x) * f,
                    self.position.y + (goal.y - self.position.y) * f,
                );
                return;
            }
            self.position = goal;
            remaining -= gap;
            self.target = (self.target + 1) % self.waypoints.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> WalkerConfig {
        WalkerConfig {
            tick_hz: 10.0,
            speed_mps: 1.0,
            waypoints: vec![[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0]],
        }
    }

    #[test]
    fn walks_towards_next_waypoint() {
        let mut w = Walker::new(&square()).unwrap();
        w.tick(0.5);
        assert_eq!(w.position(), Point2::new(0.5, 0.0));
    }

    #[test]
    fn turns_corners() {
        let mut w = Walker::new(&square()).unwrap();
        w.tick(2.5);
        let p = w.position();
        assert!((p.x - 2.0).abs() < 1e-12 && (p.y - 0.5).abs() < 1e-12, "{p:?}");
    }

    #[test]
    fn loops_back_to_start() {
        let mut w = Walker::new(&square()).unwrap();
        for _ in 0..80 {
            w.tick(0.1);
        }
        let p = w.position();
        assert!(p.x.abs() < 1e-9 && p.y.abs() < 1e-9, "{p:?}");
    }

    #[test]
    fn single_waypoint_stays_put() {
        let cfg = WalkerConfig { tick_hz: 10.0, speed_mps: 1.0, waypoints: vec![[1.0, 1.0]] };
        let mut w = Walker::new(&cfg).unwrap();
        w.tick(5.0);
        assert_eq!(w.position(), Point2::new(1.0, 1.0));
        assert!(Walker::new(&WalkerConfig { waypoints: vec![], ..cfg }).is_none());
    }
}
