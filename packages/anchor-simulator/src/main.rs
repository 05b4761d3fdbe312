//! anchor-sim — synthetic RSSI anchor feed for rssi-hub
//!
//! Runs:
//!   1. Walker task: moves a ground-truth target along a waypoint loop in the room
//!   2. One task per anchor: at its own rate, measures RSSI to the target (path loss +
//!      shadowing + outliers) and sends the sample to the hub over UDP
//!
//! Anchors are deliberately unsynchronized (different rates, independent jitter), which
//! is what the hub's sync gate exists for. Fault scenarios are toggled with `--scenario`.

mod radio;
mod scenarios;
mod udp_tx;
mod walker;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use locator_core::Point2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rssi_types::AnchorSample;
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, info};

use radio::{RadioConfig, RadioModel};
use scenarios::ScenarioConfig;
use udp_tx::UdpTransmitter;
use walker::{Walker, WalkerConfig};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "anchor-sim", about = "Synthetic RSSI anchors for rssi-hub")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Hub UDP address, overrides [hub].addr
    #[arg(long, env = "RSSI_HUB_UDP")]
    hub_addr: Option<String>,
    /// Send legacy keyed frames (`{"rssi1": -61}`)
    #[arg(long)]
    keyed: bool,
    /// Simulation speed multiplier (1.0 = real-time)
    #[arg(long, default_value = "1.0")]
    speed: f64,
    /// Scenario preset: none, dropout, noise_burst, all
    #[arg(long)]
    scenario: Option<String>,
    /// RNG seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,
}

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FullConfig {
    hub: HubTarget,
    room: RoomConfig,
    anchors: Vec<SimAnchor>,
    radio: RadioConfig,
    walker: WalkerConfig,
    #[serde(default)]
    scenario: ScenarioConfig,
}

#[derive(Debug, Deserialize)]
struct HubTarget {
    addr: String,
}

#[derive(Debug, Deserialize)]
struct RoomConfig {
    width: f64,
    height: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct SimAnchor {
    id: String,
    x: f64,
    y: f64,
    rate_hz: f64,
}

// ── Shared state ──────────────────────────────────────────────────────────────

struct SimState {
    target: Point2,
    /// Simulated seconds since start (scaled by --speed)
    t_s: f64,
}

type SharedState = Arc<RwLock<SimState>>;

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "anchor_simulator=info".into()),
        )
        .init();

    let args = Args::parse();

    let config_str = std::fs::read_to_string(&args.config)
        .unwrap_or_else(|_| include_str!("../config.toml").to_string());
    let cfg: FullConfig = toml::from_str(&config_str).context("invalid anchor-sim config")?;

    let scenario = match args.scenario.as_deref() {
        Some(name) => scenarios::preset(name, &cfg.scenario)
            .with_context(|| format!("unknown scenario preset {name:?}"))?,
        None => cfg.scenario.clone(),
    };

    let walker = Walker::new(&cfg.walker).context("[walker] needs at least one waypoint")?;
    let radio = Arc::new(RadioModel::new(cfg.radio.clone()).context("invalid [radio] model")?);
    let hub_addr = args.hub_addr.clone().unwrap_or_else(|| cfg.hub.addr.clone());
    let transmitter = Arc::new(UdpTransmitter::new(&hub_addr, args.keyed).context("binding UDP socket")?);
    let scenario = Arc::new(scenario);
    let speed = args.speed.clamp(0.1, 20.0);

    info!(
        "📶 Anchor simulator starting — {} anchors, {:.1}×{:.1} m room, hub {hub_addr}, scenarios {:?}",
        cfg.anchors.len(),
        cfg.room.width,
        cfg.room.height,
        scenario.active
    );

    let shared: SharedState = Arc::new(RwLock::new(SimState { target: walker.position(), t_s: 0.0 }));

    let mut seeder = match args.seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    for anchor in cfg.anchors.iter().cloned() {
        let rng = StdRng::seed_from_u64(seeder.gen());
        tokio::spawn(anchor_loop(
            anchor,
            shared.clone(),
            radio.clone(),
            scenario.clone(),
            transmitter.clone(),
            rng,
        ));
    }

    walker_loop(walker, shared, cfg.walker.tick_hz, speed).await;
    Ok(())
}

// ── Ground truth motion ───────────────────────────────────────────────────────

async fn walker_loop(mut walker: Walker, state: SharedState, tick_hz: f64, speed: f64) {
    let period = Duration::from_secs_f64(1.0 / tick_hz.clamp(1.0, 200.0));
    let mut ticker = interval(period);
    let mut last = Instant::now();
    let mut epoch: u64 = 0;

    info!("🚶 Walker running at {:.0} Hz", 1.0 / period.as_secs_f64());

    loop {
        ticker.tick().await;
        let now = Instant::now();
        let dt = now.duration_since(last).as_secs_f64() * speed;
        last = now;

        walker.tick(dt);
        let (p, t_s) = {
            let mut s = state.write().await;
            s.target = walker.position();
            s.t_s += dt;
            (s.target, s.t_s)
        };

        epoch += 1;
        if epoch % 100 == 0 {
            info!("⏱ t={t_s:.0}s | target=({:.2}, {:.2})", p.x, p.y);
        }
    }
}

// ── Per-anchor reporting ──────────────────────────────────────────────────────

async fn anchor_loop(
    anchor: SimAnchor,
    state: SharedState,
    radio: Arc<RadioModel>,
    scenario: Arc<ScenarioConfig>,
    tx: Arc<UdpTransmitter>,
    mut rng: StdRng,
) {
    let position = Point2::new(anchor.x, anchor.y);
    let base = 1.0 / anchor.rate_hz.clamp(0.1, 100.0);
    let mut was_dropped = false;

    loop {
        // ±20 % jitter so anchors drift in and out of phase
        let wait = base * rng.gen_range(0.8..1.2);
        tokio::time::sleep(Duration::from_secs_f64(wait)).await;

        let (target, t_s) = {
            let s = state.read().await;
            (s.target, s.t_s)
        };

        let dropped = scenario.is_anchor_dropped(&anchor.id, t_s);
        if dropped != was_dropped {
            info!("🎭 Anchor {} {}", anchor.id, if dropped { "silenced" } else { "back" });
            was_dropped = dropped;
        }
        if dropped {
            continue;
        }

        let distance = position.dist(&target);
        let rssi = radio.measure(distance, scenario.noise_multiplier(t_s), &mut rng);
        debug!("{} d={distance:.2}m → {rssi}dBm", anchor.id);
        tx.send_sample(&AnchorSample::new(anchor.id.clone(), rssi));
    }
}
