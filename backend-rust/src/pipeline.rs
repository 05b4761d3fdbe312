//! pipeline.rs — the estimation pipeline and its single worker
//!
//! Transports never touch pipeline state. They validate and enqueue samples through an
//! [`IngestHandle`]; one worker task owns the [`PipelineContext`], stamps each sample at
//! dequeue, runs gate → filter → distance → solve, and publishes the payload.
//!
//! ```text
//! POST /rssi ─┐
//! WS /ws ─────┼─ try_send ─▶ mpsc (bounded) ─▶ worker ─▶ PipelineContext ─▶ Broadcaster
//! UDP ────────┘
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use locator_core::{
    CalibrationModel, ExponentialSmoother, FilterChain, PositionSolver, SignalFilter, Solution, SolverError, SyncGate,
};
use rssi_types::{AnchorReading, AnchorSample, DegradedPayload, IngestFrame, Payload, Position, SyncedPayload};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::broadcaster::Broadcaster;
use crate::config::{ConfigError, HubConfig};

const STATS_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    #[error("unknown anchor {0:?}")]
    UnknownAnchor(String),

    #[error("non-finite RSSI from anchor {anchor:?}")]
    NonFiniteRssi { anchor: String },

    #[error("ingest queue full")]
    QueueFull,

    #[error("pipeline worker stopped")]
    Closed,

    #[error(transparent)]
    Solver(#[from] SolverError),
}

/// Running counters, exposed on `/health`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    /// Samples applied to the gate
    pub samples: u64,
    /// Synced payloads (linear + fallback)
    pub solves: u64,
    pub fallbacks: u64,
    pub degraded: u64,
}

pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Context ───────────────────────────────────────────────────────────────────

/// Everything the pipeline mutates. Owned by exactly one task.
pub struct PipelineContext {
    anchor_ids: Vec<String>,
    index: HashMap<String, usize>,
    gate: SyncGate,
    filters: Vec<FilterChain>,
    model: CalibrationModel,
    solver: PositionSolver,
    position_smoothing: Option<(ExponentialSmoother, ExponentialSmoother)>,
    stats: PipelineStats,
}

impl PipelineContext {
    pub fn from_config(config: &HubConfig, model: CalibrationModel) -> Result<Self, ConfigError> {
        let anchor_ids = config.anchor_ids();
        let index = anchor_ids.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();

        let filters = config
            .anchors
            .iter()
            .map(|a| {
                FilterChain::from_specs(config.filter_for(a))
                    .map_err(|source| ConfigError::InvalidFilter { scope: format!("anchor {:?}", a.id), source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let solver = PositionSolver::new(config.room_geometry(), config.solver.clone())
            .map_err(|_| ConfigError::TooFewAnchors(config.anchors.len()))?;

        let position_smoothing = match config.smoothing.position_alpha {
            Some(alpha) => Some((
                ExponentialSmoother::new(alpha).map_err(ConfigError::InvalidSmoothing)?,
                ExponentialSmoother::new(alpha).map_err(ConfigError::InvalidSmoothing)?,
            )),
            None => None,
        };

        Ok(Self {
            gate: SyncGate::new(anchor_ids.len(), config.sync_timeout()),
            anchor_ids,
            index,
            filters,
            model,
            solver,
            position_smoothing,
            stats: PipelineStats::default(),
        })
    }

    pub fn anchor_ids(&self) -> &[String] {
        &self.anchor_ids
    }

    pub fn gate(&self) -> &SyncGate {
        &self.gate
    }

    pub fn model(&self) -> &CalibrationModel {
        &self.model
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Apply one sample that arrived at `now` and build the payload to publish.
    ///
    /// Synced only when every anchor is fresh; otherwise the filters and the solver are
    /// left untouched and a degraded payload with raw values is returned.
    pub fn ingest(&mut self, sample: &AnchorSample, now: Instant) -> Result<Payload, IngestError> {
        let &idx = self
            .index
            .get(&sample.anchor_id)
            .ok_or_else(|| IngestError::UnknownAnchor(sample.anchor_id.clone()))?;
        if !sample.rssi.is_finite() {
            return Err(IngestError::NonFiniteRssi { anchor: sample.anchor_id.clone() });
        }

        self.gate.record(idx, sample.rssi, now);
        self.stats.samples += 1;

        if !self.gate.all_fresh(now) {
            self.stats.degraded += 1;
            let stale: Vec<&str> = self.gate.stale(now).into_iter().map(|i| self.anchor_ids[i].as_str()).collect();
            debug!("Pipeline: {} → degraded (stale: {stale:?})", sample.anchor_id);
            return Ok(Payload::Degraded(DegradedPayload {
                anchor_readings: self.raw_readings(),
                epoch_ms: epoch_ms(),
            }));
        }

        let mut readings = Vec::with_capacity(self.anchor_ids.len());
        let mut distances = Vec::with_capacity(self.anchor_ids.len());
        for (i, id) in self.anchor_ids.iter().enumerate() {
            // all_fresh implies every anchor has a value
            let raw = self.gate.states()[i].last_raw.unwrap_or(f64::NAN);
            let filtered = self.filters[i].update(raw);
            distances.push(self.model.distance(filtered));
            readings.push(AnchorReading { id: id.clone(), raw: Some(raw), filtered: Some(filtered) });
        }

        let solution = self.solver.solve(&distances, None)?;
        self.stats.solves += 1;
        if let Solution::Fallback { reason, .. } = &solution {
            self.stats.fallbacks += 1;
            debug!("Pipeline: linear solve rejected ({reason}), using grid search");
        }
        let estimate = solution.into_estimate();

        let (x, y) = match self.position_smoothing.as_mut() {
            Some((sx, sy)) => (sx.update(estimate.x), sy.update(estimate.y)),
            None => (estimate.x, estimate.y),
        };
        debug!(
            "Pipeline: ({x:.2}, {y:.2}) residual={:.3} success={}",
            estimate.residual_norm, estimate.success
        );

        Ok(Payload::Synced(SyncedPayload {
            anchor_readings: readings,
            distances: estimate.source_distances,
            position: Position { x, y },
            residual_norm: estimate.residual_norm,
            success: estimate.success,
            epoch_ms: epoch_ms(),
        }))
    }

    fn raw_readings(&self) -> Vec<AnchorReading> {
        self.anchor_ids
            .iter()
            .zip(self.gate.states())
            .map(|(id, s)| AnchorReading { id: id.clone(), raw: s.last_raw, filtered: None })
            .collect()
    }
}

// ── Ingest handle (transport side) ────────────────────────────────────────────

/// Result of submitting one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReport {
    pub accepted: usize,
    pub rejected: usize,
    pub queue_full: bool,
}

/// Cheap, cloneable sender used by every transport. Never blocks.
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<AnchorSample>,
    known: Arc<HashSet<String>>,
}

impl IngestHandle {
    pub fn new(tx: mpsc::Sender<AnchorSample>, anchor_ids: &[String]) -> Self {
        Self { tx, known: Arc::new(anchor_ids.iter().cloned().collect()) }
    }

    pub fn submit(&self, sample: AnchorSample) -> Result<(), IngestError> {
        if !self.known.contains(&sample.anchor_id) {
            return Err(IngestError::UnknownAnchor(sample.anchor_id));
        }
        if !sample.rssi.is_finite() {
            return Err(IngestError::NonFiniteRssi { anchor: sample.anchor_id });
        }
        self.tx.try_send(sample).map_err(|e| match e {
            mpsc::error::TrySendError::Full(s) => {
                warn!("Ingest: queue full, dropping sample from {}", s.anchor_id);
                IngestError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => IngestError::Closed,
        })
    }

    pub fn submit_frame(&self, frame: IngestFrame) -> SubmitReport {
        let mut report = SubmitReport::default();
        for sample in frame.into_samples() {
            match self.submit(sample) {
                Ok(()) => report.accepted += 1,
                Err(e) => {
                    if matches!(e, IngestError::QueueFull) {
                        report.queue_full = true;
                    } else {
                        debug!("Ingest: rejected sample: {e}");
                    }
                    report.rejected += 1;
                }
            }
        }
        report
    }
}

pub fn channel(capacity: usize, anchor_ids: &[String]) -> (IngestHandle, mpsc::Receiver<AnchorSample>) {
    let (tx, rx) = mpsc::channel(capacity);
    (IngestHandle::new(tx, anchor_ids), rx)
}

// ── Worker ────────────────────────────────────────────────────────────────────

/// Drain the queue until every sender is gone.
pub async fn run_worker(
    mut ctx: PipelineContext,
    mut rx: mpsc::Receiver<AnchorSample>,
    broadcaster: Broadcaster,
    stats_tx: watch::Sender<PipelineStats>,
) {
    let mut log_tick = tokio::time::interval(STATS_LOG_INTERVAL);
    log_tick.tick().await;
    info!("Pipeline worker started ({} anchors)", ctx.anchor_ids().len());

    loop {
        tokio::select! {
            sample = rx.recv() => {
                let Some(sample) = sample else { break };
                match ctx.ingest(&sample, Instant::now()) {
                    Ok(payload) => {
                        let report = broadcaster.publish(&payload).await;
                        if report.dropped > 0 {
                            debug!("Pipeline: {} delivered, {} dropped", report.delivered, report.dropped);
                        }
                    }
                    Err(e) => warn!("Pipeline: sample from {} ignored: {e}", sample.anchor_id),
                }
                stats_tx.send_replace(ctx.stats());
            }
            _ = log_tick.tick() => {
                let s = ctx.stats();
                info!(
                    "Pipeline: samples={} solves={} fallbacks={} degraded={} subscribers={}",
                    s.samples, s.solves, s.fallbacks, s.degraded, broadcaster.len().await
                );
            }
        }
    }
    info!("Pipeline worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use locator_core::{fit, Point2};

    fn config() -> HubConfig {
        config_with("")
    }

    fn config_with(extra: &str) -> HubConfig {
        let base = r#"
            [sync]
            timeout_ms = 2000

            [calibration]
            distances = [1.0, 2.0, 3.0, 4.0, 5.0]
            rssi = [-59.0, -65.0, -69.0, -72.0, -74.0]

            [room]
            width = 5.0
            height = 4.0

            [[anchors]]
            id = "a0"
            x = 0.0
            y = 0.0

            [[anchors]]
            id = "a1"
            x = 5.0
            y = 0.0

            [[anchors]]
            id = "a2"
            x = 0.0
            y = 4.0

            [[filter.stages]]
            kind = "exponential"
            alpha = 1.0
            "#;
        HubConfig::from_toml_str(&format!("{base}\n{extra}")).unwrap()
    }

    fn context(cfg: &HubConfig) -> PipelineContext {
        let model = fit(&cfg.calibration.distances, &cfg.calibration.rssi).unwrap();
        PipelineContext::from_config(cfg, model).unwrap()
    }

    #[test]
    fn one_stale_anchor_yields_degraded_payload() {
        let cfg = config();
        let mut ctx = context(&cfg);
        let t0 = Instant::now();
        let now = t0 + Duration::from_secs(3);

        ctx.ingest(&AnchorSample::new("a2", -70.0), t0).unwrap();
        ctx.ingest(&AnchorSample::new("a0", -61.0), now).unwrap();
        let payload = ctx.ingest(&AnchorSample::new("a1", -64.0), now).unwrap();

        let Payload::Degraded(p) = payload else { panic!("expected degraded payload") };
        let raws: Vec<_> = p.anchor_readings.iter().map(|r| r.raw).collect();
        assert_eq!(raws, vec![Some(-61.0), Some(-64.0), Some(-70.0)]);
        assert!(p.anchor_readings.iter().all(|r| r.filtered.is_none()));
        assert_eq!(ctx.stats().solves, 0);
        assert_eq!(ctx.stats().degraded, 3);
    }

    #[test]
    fn never_heard_anchor_reports_null_raw() {
        let cfg = config();
        let mut ctx = context(&cfg);
        let Payload::Degraded(p) = ctx.ingest(&AnchorSample::new("a1", -64.0), Instant::now()).unwrap() else {
            panic!("expected degraded payload")
        };
        assert_eq!(p.anchor_readings[0].raw, None);
        assert_eq!(p.anchor_readings[1].raw, Some(-64.0));
    }

    #[test]
    fn fresh_anchors_produce_a_position() {
        let cfg = config();
        let mut ctx = context(&cfg);
        let model = *ctx.model();
        let target = Point2::new(2.0, 1.5);
        let now = Instant::now();

        let mut last = None;
        for (i, a) in cfg.room_geometry().anchors.iter().enumerate() {
            let rssi = model.rssi_at(target.dist(a));
            last = Some(ctx.ingest(&AnchorSample::new(format!("a{i}"), rssi), now).unwrap());
        }

        let Some(Payload::Synced(p)) = last else { panic!("expected synced payload") };
        assert!(p.success);
        assert!((p.position.x - 2.0).abs() < 0.01, "x={}", p.position.x);
        assert!((p.position.y - 1.5).abs() < 0.01, "y={}", p.position.y);
        assert_eq!(p.distances.len(), 3);
        assert_eq!(ctx.stats(), PipelineStats { samples: 3, solves: 1, fallbacks: 0, degraded: 2 });
    }

    /// Feed a full round per target and return the synced payloads, in order.
    fn track(ctx: &mut PipelineContext, anchors: &[Point2], targets: &[Point2]) -> Vec<SyncedPayload> {
        let model = *ctx.model();
        let now = Instant::now();
        let mut out = Vec::new();
        for target in targets {
            for (i, a) in anchors.iter().enumerate() {
                let rssi = model.rssi_at(target.dist(a));
                if let Payload::Synced(p) = ctx.ingest(&AnchorSample::new(format!("a{i}"), rssi), now).unwrap() {
                    out.push(p);
                }
            }
        }
        out
    }

    #[test]
    fn position_smoothing_blends_successive_estimates() {
        let plain_cfg = config();
        let smooth_cfg = config_with("[smoothing]\nposition_alpha = 0.5");
        let anchors = plain_cfg.room_geometry().anchors;
        let targets = [Point2::new(2.0, 1.5), Point2::new(3.0, 2.5)];

        let raw = track(&mut context(&plain_cfg), &anchors, &targets);
        let smoothed = track(&mut context(&smooth_cfg), &anchors, &targets);
        assert_eq!(raw.len(), smoothed.len());
        assert!(raw.len() >= 4);

        let mut prev: Option<(f64, f64)> = None;
        for (r, s) in raw.iter().zip(&smoothed) {
            // Only the reported position is smoothed
            assert_eq!(r.distances, s.distances);
            assert_eq!(r.residual_norm, s.residual_norm);
            assert_eq!(r.success, s.success);

            let expected = match prev {
                None => (r.position.x, r.position.y),
                Some((px, py)) => (0.5 * r.position.x + 0.5 * px, 0.5 * r.position.y + 0.5 * py),
            };
            assert!((s.position.x - expected.0).abs() < 1e-12, "x {} vs {}", s.position.x, expected.0);
            assert!((s.position.y - expected.1).abs() < 1e-12, "y {} vs {}", s.position.y, expected.1);
            prev = Some(expected);
        }

        assert!(raw
            .iter()
            .zip(&smoothed)
            .any(|(r, s)| (r.position.x - s.position.x).abs() > 0.1 || (r.position.y - s.position.y).abs() > 0.1));
    }

    #[test]
    fn bad_samples_leave_state_untouched() {
        let cfg = config();
        let mut ctx = context(&cfg);
        let now = Instant::now();
        assert_eq!(
            ctx.ingest(&AnchorSample::new("ghost", -60.0), now).unwrap_err(),
            IngestError::UnknownAnchor("ghost".into())
        );
        assert!(matches!(
            ctx.ingest(&AnchorSample::new("a0", f64::NAN), now),
            Err(IngestError::NonFiniteRssi { .. })
        ));
        assert_eq!(ctx.stats(), PipelineStats::default());
        assert!(ctx.gate().state(0).unwrap().last_raw.is_none());
    }

    #[test]
    fn handle_reports_full_queue() {
        let ids = vec!["a0".to_string(), "a1".to_string(), "a2".to_string()];
        let (handle, _rx) = channel(1, &ids);
        let frame = IngestFrame::Batch(vec![
            AnchorSample::new("a0", -60.0),
            AnchorSample::new("a1", -61.0),
            AnchorSample::new("zz", -62.0),
        ]);
        let report = handle.submit_frame(frame);
        assert_eq!(report, SubmitReport { accepted: 1, rejected: 2, queue_full: true });
    }

    #[tokio::test]
    async fn worker_publishes_to_subscribers() {
        let cfg = config();
        let ctx = context(&cfg);
        let (handle, rx) = channel(16, &cfg.anchor_ids());
        let broadcaster = Broadcaster::new(Duration::from_millis(100), 16);
        let mut sub = broadcaster.subscribe().await;
        let (stats_tx, mut stats_rx) = watch::channel(PipelineStats::default());

        let worker = tokio::spawn(run_worker(ctx, rx, broadcaster.clone(), stats_tx));
        handle.submit(AnchorSample::new("a0", -60.0)).unwrap();

        let text = sub.rx.recv().await.unwrap();
        let payload: Payload = serde_json::from_str(&text).unwrap();
        assert!(!payload.is_synced());

        stats_rx.changed().await.unwrap();
        assert_eq!(stats_rx.borrow().samples, 1);

        drop(handle);
        worker.await.unwrap();
    }
}
