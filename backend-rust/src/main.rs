mod anchor_udp;
mod broadcaster;
mod config;
mod handlers;
mod pipeline;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use broadcaster::Broadcaster;
use config::HubConfig;
use handlers::AppState;
use pipeline::{PipelineContext, PipelineStats};

// ─── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rssi-hub", about = "RSSI multilateration hub")]
struct Args {
    /// hub.toml path (embedded default when omitted)
    #[arg(short, long, env = "RSSI_HUB_CONFIG")]
    config: Option<PathBuf>,
    /// HTTP/WebSocket port, overrides [server].port
    #[arg(long, env = "PORT")]
    port: Option<u16>,
    /// Anchor UDP port, overrides [server].udp_port
    #[arg(long, env = "RSSI_UDP_PORT")]
    udp_port: Option<u16>,
}

// ─── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rssi_hub=info,locator_core=info".into()),
        )
        .init();

    let args = Args::parse();
    info!("📶 RSSI hub starting...");

    let mut config = HubConfig::load(args.config.as_deref()).context("loading hub configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(port) = args.udp_port {
        config.server.udp_port = port;
    }

    // Calibration is fatal: no model, no distances
    let model = locator_core::fit(&config.calibration.distances, &config.calibration.rssi)
        .context("fitting the path-loss model to [calibration]")?;
    info!("Calibrated path-loss model: A={:.2} dBm, n={:.3}", model.a, model.n);

    let ctx = PipelineContext::from_config(&config, model).context("building the estimation pipeline")?;
    let anchors = config.anchor_ids();
    let (ingest, rx) = pipeline::channel(config.pipeline.queue_capacity, &anchors);
    let broadcaster = Broadcaster::new(config.send_timeout(), config.broadcast.subscriber_buffer);
    let (stats_tx, stats_rx) = watch::channel(PipelineStats::default());

    tokio::spawn(pipeline::run_worker(ctx, rx, broadcaster.clone(), stats_tx));
    tokio::spawn(anchor_udp::start_udp_listener(config.server.udp_port, ingest.clone()));

    let state = AppState {
        ingest,
        broadcaster,
        stats: stats_rx,
        anchors: Arc::from(anchors),
        started: Instant::now(),
    };

    // CORS — observers are served from anywhere
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/rssi", post(handlers::post_rssi))
        .route("/ws", get(handlers::anchor_ws))
        .route("/ws/client", get(handlers::client_ws))
        .route("/state", get(handlers::latest_state))
        .route("/health", get(handlers::health))
        .layer(cors)
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.server.port);
    info!("🚀 Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}
