use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rssi_types::IngestFrame;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::broadcaster::Broadcaster;
use crate::pipeline::{IngestHandle, PipelineStats};

// ─── Shared State ─────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub ingest: IngestHandle,
    pub broadcaster: Broadcaster,
    pub stats: watch::Receiver<PipelineStats>,
    pub anchors: Arc<[String]>,
    pub started: Instant,
}

// ─── POST /rssi ───────────────────────────────────────────────────────────────

/// Accepts any ingest frame. The body is read as raw bytes: the ESP32 firmware does
/// not always send a JSON content type.
pub async fn post_rssi(State(app): State<AppState>, body: Bytes) -> Response {
    let frame = match IngestFrame::parse(&body) {
        Ok(f) => f,
        Err(e) => {
            debug!("POST /rssi: malformed body: {e}");
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": format!("malformed frame: {e}") })))
                .into_response();
        }
    };

    let report = app.ingest.submit_frame(frame);
    let status = if report.accepted > 0 {
        StatusCode::OK
    } else if report.queue_full {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(report)).into_response()
}

// ─── GET /ws (anchors) ────────────────────────────────────────────────────────

pub async fn anchor_ws(ws: WebSocketUpgrade, State(app): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_anchor_socket(socket, app.ingest))
}

async fn handle_anchor_socket(mut socket: WebSocket, ingest: IngestHandle) {
    info!("Anchor socket connected");
    while let Some(msg) = socket.recv().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("Anchor socket error: {e}");
                break;
            }
        };
        match IngestFrame::parse(text.as_bytes()) {
            Ok(frame) => {
                let report = ingest.submit_frame(frame);
                if report.rejected > 0 {
                    debug!("Anchor socket: {} accepted, {} rejected", report.accepted, report.rejected);
                }
            }
            Err(e) => debug!("Anchor socket: malformed frame: {e}"),
        }
    }
    info!("Anchor socket disconnected");
}

// ─── GET /ws/client (observers) ───────────────────────────────────────────────

pub async fn client_ws(ws: WebSocketUpgrade, State(app): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_client_socket(socket, app.broadcaster))
}

async fn handle_client_socket(mut socket: WebSocket, broadcaster: Broadcaster) {
    let mut sub = broadcaster.subscribe().await;
    info!("Observer {} connected ({} total)", sub.id, broadcaster.len().await);

    loop {
        tokio::select! {
            next = sub.rx.recv() => {
                // None: the broadcaster already dropped us
                let Some(text) = next else { break };
                if socket.send(Message::Text(text.to_string())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    broadcaster.unsubscribe(sub.id).await;
    info!("Observer {} disconnected", sub.id);
}

// ─── GET /state ───────────────────────────────────────────────────────────────

pub async fn latest_state(State(app): State<AppState>) -> Response {
    match app.broadcaster.last().await {
        Some(text) => ([(header::CONTENT_TYPE, "application/json")], text.to_string()).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

// ─── GET /health ──────────────────────────────────────────────────────────────

pub async fn health(State(app): State<AppState>) -> Json<serde_json::Value> {
    let stats = *app.stats.borrow();
    Json(json!({
        "status": "ok",
        "anchors": &*app.anchors,
        "subscribers": app.broadcaster.len().await,
        "uptimeSecs": app.started.elapsed().as_secs(),
        "pipeline": stats,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::to_bytes;
    use rssi_types::{AnchorReading, AnchorSample, DegradedPayload, Payload};
    use tokio::sync::mpsc;

    use crate::pipeline;

    /// State over a one-slot queue that nobody drains.
    fn app() -> (AppState, mpsc::Receiver<AnchorSample>) {
        let ids: Vec<String> = ["rssi1", "rssi2", "rssi3"].iter().map(|s| s.to_string()).collect();
        let (ingest, rx) = pipeline::channel(1, &ids);
        let (_stats_tx, stats) = watch::channel(PipelineStats::default());
        let state = AppState {
            ingest,
            broadcaster: Broadcaster::new(Duration::from_millis(50), 4),
            stats,
            anchors: Arc::from(ids),
            started: Instant::now(),
        };
        (state, rx)
    }

    async fn post(app: &AppState, body: &'static str) -> (StatusCode, serde_json::Value) {
        let resp = post_rssi(State(app.clone()), Bytes::from_static(body.as_bytes())).await;
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn post_rssi_maps_outcomes_to_status() {
        let (app, _rx) = app();

        let (status, report) = post(&app, r#"{"anchorId":"rssi1","rssi":-60}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["accepted"], 1);

        // Queue holds one sample and the worker is not running
        let (status, report) = post(&app, r#"{"anchorId":"rssi2","rssi":-61}"#).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report["queueFull"], true);

        let (status, _) = post(&app, r#"{"anchorId":"ghost","rssi":-61}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = post(&app, "rssi1=-60").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("malformed frame"));

        let (status, _) = post(&app, r#"{"anchorId":"rssi1","rssi":"loud"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn latest_state_is_empty_until_first_publish() {
        let (app, _rx) = app();

        let resp = latest_state(State(app.clone())).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let payload = Payload::Degraded(DegradedPayload {
            anchor_readings: vec![AnchorReading { id: "rssi1".into(), raw: Some(-60.0), filtered: None }],
            epoch_ms: 42,
        });
        app.broadcaster.publish(&payload).await;

        let resp = latest_state(State(app.clone())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(serde_json::from_slice::<Payload>(&bytes).unwrap(), payload);
    }
}
